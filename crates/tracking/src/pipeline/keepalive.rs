//! Periodic liveness probe running beside the control loop.
//!
//! The task pings through a [`LivenessHandle`] every interval. A failed probe
//! ends the task and nothing else: the connection stays open and the control
//! loop learns about a dead link from its own next send.

use std::{io, thread, time::Duration};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info};

use crate::pipeline::{
    channel::{ChannelError, LivenessHandle, Transport},
    telemetry::spawn_thread,
};

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Why the keepalive task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepaliveExit {
    /// Stop was requested.
    Stopped,
    /// A probe failed; the task logged it and quit.
    ProbeFailed,
    /// The owning connection was closed or dropped.
    ConnectionDropped,
    /// The thread panicked.
    Panicked,
}

/// Handle to a running keepalive task.
pub struct Keepalive {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<KeepaliveExit>,
}

impl Keepalive {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task to stop and wait for it. A task that already ended
    /// reports its own exit reason.
    pub fn stop(self) -> KeepaliveExit {
        let _ = self.stop_tx.send(());
        match self.handle.join() {
            Ok(exit) => exit,
            Err(_) => {
                error!("keepalive thread panicked");
                KeepaliveExit::Panicked
            }
        }
    }
}

/// Spawn the keepalive thread for `liveness`.
pub fn spawn_keepalive<T: Transport>(
    liveness: LivenessHandle<T>,
    interval: Duration,
) -> io::Result<Keepalive> {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let handle = spawn_thread("keepalive", move || {
        let _span = tracing::info_span!(
            "keepalive",
            endpoint = %liveness.endpoint(),
            interval_s = interval.as_secs_f64()
        )
        .entered();
        loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return KeepaliveExit::Stopped,
            }

            match liveness.probe() {
                Ok(inbound) => {
                    metrics::counter!("tracking_keepalive_probes_total").increment(1);
                    debug!("keepalive ping sent ({inbound} inbound frames drained)");
                }
                Err(ChannelError::Closed) => {
                    info!("connection closed; keepalive exiting");
                    return KeepaliveExit::ConnectionDropped;
                }
                Err(err) => {
                    metrics::counter!("tracking_keepalive_failures_total").increment(1);
                    error!("Keepalive error: {err}");
                    return KeepaliveExit::ProbeFailed;
                }
            }
        }
    })?;

    Ok(Keepalive { stop_tx, handle })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::Ordering,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::pipeline::{
        channel::{Connection, tests::RecordingTransport},
        message::TelemetryMessage,
    };

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_probes_every_interval_until_stopped() {
        let transport = RecordingTransport::default();
        let conn = Connection::from_transport("ws://test/", transport.clone());
        let keepalive = spawn_keepalive(conn.liveness_handle(), Duration::from_millis(5)).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            transport.probes.load(Ordering::SeqCst) >= 3
        }));
        assert_eq!(keepalive.stop(), KeepaliveExit::Stopped);
    }

    #[test]
    fn test_stop_is_prompt_with_long_interval() {
        let conn = Connection::from_transport("ws://test/", RecordingTransport::default());
        let keepalive = spawn_keepalive(conn.liveness_handle(), Duration::from_secs(3600)).unwrap();
        let start = Instant::now();
        assert_eq!(keepalive.stop(), KeepaliveExit::Stopped);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_probe_failure_ends_task_but_not_connection() {
        let transport = RecordingTransport::default();
        transport.fail_probes.store(true, Ordering::SeqCst);
        let conn = Connection::from_transport("ws://test/", transport.clone());
        let keepalive = spawn_keepalive(conn.liveness_handle(), Duration::from_millis(1)).unwrap();

        assert!(wait_until(Duration::from_secs(2), || keepalive.is_finished()));
        assert_eq!(keepalive.stop(), KeepaliveExit::ProbeFailed);

        // Payload traffic is unaffected.
        conn.send(&TelemetryMessage::new(1.0, 2.0, false)).unwrap();
        assert_eq!(transport.sent().len(), 1);
        assert!(!transport.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_exits_when_connection_closed() {
        let conn = Connection::from_transport("ws://test/", RecordingTransport::default());
        let keepalive = spawn_keepalive(conn.liveness_handle(), Duration::from_millis(1)).unwrap();
        conn.close();

        assert!(wait_until(Duration::from_secs(2), || keepalive.is_finished()));
        assert_eq!(keepalive.stop(), KeepaliveExit::ConnectionDropped);
    }
}
