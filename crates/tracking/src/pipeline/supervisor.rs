//! Process-level wiring: telemetry, capture, detector, connection, keepalive,
//! and the control loop, torn down in reverse on exit.

use std::sync::{
    Arc, Once,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use ml_core::{Detector, ThresholdDetector};
use tracing::{debug, error, info, warn};

use video_ingest::CaptureError;

use crate::pipeline::{
    TrackingConfig,
    channel::{Connection, Transport},
    config::DetectorKind,
    control_loop::ControlLoop,
    keepalive::{Keepalive, KeepaliveExit, spawn_keepalive},
    telemetry,
    tracker::TrackerState,
};

/// Run the tracking loop until Ctrl+C or a fatal error.
///
/// Capture and connection failures at startup are fatal, as is the frame
/// source ending; the caller is expected to exit non-zero on `Err`.
pub fn run(config: TrackingConfig) -> Result<()> {
    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    let result = run_with_telemetry(&config);
    if let Err(err) = &result {
        error!("Tracking loop stopped: {err:#}");
    }
    result
}

fn run_with_telemetry(config: &TrackingConfig) -> Result<()> {
    if let Some(addr) = config.telemetry.metrics_addr {
        telemetry::install_metrics_exporter(addr)?;
    }

    let loop_span = tracing::info_span!(
        "tracking.loop",
        source = %config.camera_uri,
        endpoint = %config.endpoint,
        width = config.width,
        height = config.height,
        deadband = config.deadband,
    );
    let _loop_guard = loop_span.enter();

    let shutdown = install_shutdown_handler();

    debug!(
        "Pan {} ({:?}), tilt {} ({:?}), home {}",
        config.pan.range,
        config.pan.orientation,
        config.tilt.range,
        config.tilt.orientation,
        config.home
    );

    let receiver = video_ingest::spawn_capture_reader(
        &config.camera_uri,
        (config.width, config.height),
    )
    .with_context(|| format!("Failed to start capture from {}", config.camera_uri))?;

    let detector = build_detector(config)?;

    let connection = Connection::connect(&config.endpoint)
        .with_context(|| format!("Failed to connect to controller at {}", config.endpoint))?;
    info!("Connected to controller at {}", config.endpoint);

    let keepalive = spawn_keepalive(connection.liveness_handle(), config.keepalive_interval)
        .context("Failed to spawn keepalive thread")?;

    let mut control = ControlLoop::new(
        receiver,
        detector,
        config.mapper(),
        TrackerState::new(config.home, config.deadband),
        connection,
    );

    info!("Tracking; press Ctrl+C to stop");
    let outcome = control.run(&shutdown);

    let frames = control.frames_processed();
    teardown(keepalive, control.into_connection());
    settle(outcome, shutdown.load(Ordering::SeqCst), frames)
}

/// Stop the keepalive before closing so it never probes a closing socket.
fn teardown<T: Transport>(keepalive: Keepalive, connection: Connection<T>) -> KeepaliveExit {
    let exit = keepalive.stop();
    debug!("Keepalive ended: {exit:?}");
    connection.close();
    exit
}

/// Map the loop outcome to the process result.
fn settle(
    outcome: Result<u64, CaptureError>,
    shutdown_requested: bool,
    frames: u64,
) -> Result<()> {
    match outcome {
        Ok(cycles) => {
            info!("Shutdown requested after {cycles} cycles");
            Ok(())
        }
        // Ctrl+C reaches ffmpeg too, so capture usually ends first.
        Err(err) if shutdown_requested => {
            info!("Shutdown requested after {frames} frames (capture ended: {err})");
            Ok(())
        }
        Err(err) => {
            Err(err).with_context(|| format!("Frame source failed after {frames} frames"))
        }
    }
}

fn install_shutdown_handler() -> Arc<AtomicBool> {
    static CTRL_HANDLER: Once = Once::new();
    static SHUTDOWN: std::sync::OnceLock<Arc<AtomicBool>> = std::sync::OnceLock::new();

    let shutdown = SHUTDOWN
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone();
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
    shutdown
}

fn build_detector(config: &TrackingConfig) -> Result<Box<dyn Detector + Send>> {
    match &config.detector {
        DetectorKind::Threshold {
            luma_threshold,
            min_pixels,
        } => {
            debug!("Threshold detector: luma >= {luma_threshold}, min {min_pixels} px");
            Ok(Box::new(ThresholdDetector::new(*luma_threshold, *min_pixels)))
        }
        #[cfg(feature = "with-tch")]
        DetectorKind::Torch { model_path } => {
            use ml_core::tch::Device;

            let detector = ml_core::TorchDetector::new(
                model_path,
                Device::cuda_if_available(),
                (config.width as i64, config.height as i64),
            )
            .with_context(|| format!("Failed to load detector model {}", model_path.display()))?;
            info!("Detector loaded on {:?}", detector.device());
            Ok(Box::new(detector))
        }
        #[cfg(not(feature = "with-tch"))]
        DetectorKind::Torch { model_path } => anyhow::bail!(
            "cannot load {}: built without the `with-tch` feature",
            model_path.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::channel::tests::RecordingTransport;

    #[test]
    fn test_capture_failure_is_an_error() {
        let err = settle(Err(CaptureError::EndOfStream), false, 12).unwrap_err();
        assert!(err.to_string().contains("after 12 frames"));
        assert!(matches!(
            err.downcast_ref::<CaptureError>(),
            Some(CaptureError::EndOfStream)
        ));
    }

    #[test]
    fn test_capture_ending_during_shutdown_is_clean() {
        assert!(settle(Err(CaptureError::EndOfStream), true, 40).is_ok());
    }

    #[test]
    fn test_requested_shutdown_is_clean() {
        assert!(settle(Ok(7), true, 7).is_ok());
    }

    #[test]
    fn test_teardown_stops_keepalive_then_closes() {
        let transport = RecordingTransport::default();
        let connection = Connection::from_transport("ws://test/", transport.clone());
        let keepalive =
            spawn_keepalive(connection.liveness_handle(), Duration::from_secs(3600)).unwrap();

        // Closing first would surface as ConnectionDropped.
        assert_eq!(teardown(keepalive, connection), KeepaliveExit::Stopped);
        assert!(transport.closed.load(Ordering::SeqCst));
    }
}
