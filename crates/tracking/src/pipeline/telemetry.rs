//! Tracing subscriber setup, Prometheus export, and thread spawning that keeps
//! the active dispatcher.

use std::{io, net::SocketAddr, path::Path, sync::OnceLock, thread};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    prelude::*,
};

use crate::pipeline::config::TelemetryOptions;

static PROM_EXPORTER: OnceLock<SocketAddr> = OnceLock::new();

/// Guard returned when a telemetry subscriber has been installed for the current thread.
pub struct TelemetryGuard {
    _default_guard: tracing::subscriber::DefaultGuard,
    _chrome_guard: Option<tracing_chrome::FlushGuard>,
}

/// Start the Prometheus scrape endpoint once per process.
pub fn install_metrics_exporter(addr: SocketAddr) -> Result<()> {
    if let Some(existing) = PROM_EXPORTER.get() {
        tracing::debug!("metrics exporter already listening on {existing}");
        return Ok(());
    }
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
    let _ = PROM_EXPORTER.set(addr);
    tracing::info!("Prometheus metrics available at http://{addr}/metrics");
    Ok(())
}

/// Install tracing subscribers for the current thread.
///
/// `RUST_LOG` wins over `--verbose`. A chrome trace that cannot be opened is
/// reported on stderr and skipped.
pub fn enter_runtime(opts: &TelemetryOptions) -> TelemetryGuard {
    let default_level = if opts.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (chrome_layer, chrome_guard) = match opts.chrome_trace_path.as_deref().map(open_chrome_trace)
    {
        Some(Ok((layer, guard))) => (Some(layer), Some(guard)),
        Some(Err(err)) => {
            eprintln!("chrome trace disabled: {err:#}");
            (None, None)
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(chrome_layer.map(|layer| layer.with_filter(filter_fn(|meta| meta.is_span()))))
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .with(tracing_error::ErrorLayer::default());

    TelemetryGuard {
        _default_guard: tracing::subscriber::set_default(subscriber),
        _chrome_guard: chrome_guard,
    }
}

/// Spawn a thread that inherits the current tracing dispatcher.
pub fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

type ChromeTrace = (
    tracing_chrome::ChromeLayer<tracing_subscriber::Registry>,
    tracing_chrome::FlushGuard,
);

fn open_chrome_trace(path: &Path) -> Result<ChromeTrace> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    Ok(tracing_chrome::ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(tracing_chrome::TraceStyle::Threaded)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawned_thread_inherits_dispatcher() {
        let _guard = enter_runtime(&TelemetryOptions::default());
        let handle = spawn_thread("probe", || {
            tracing::dispatcher::get_default(|d| !d.is::<tracing::subscriber::NoSubscriber>())
        })
        .unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_chrome_trace_file_is_created() {
        let path = std::env::temp_dir().join(format!("tracking-trace-{}.json", std::process::id()));
        {
            let opts = TelemetryOptions {
                chrome_trace_path: Some(path.clone()),
                ..TelemetryOptions::default()
            };
            let _guard = enter_runtime(&opts);
            let _span = tracing::info_span!("trace.test").entered();
        }
        assert!(path.exists());
        let _ = std::fs::remove_file(path);
    }
}
