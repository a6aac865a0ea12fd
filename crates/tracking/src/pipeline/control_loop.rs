//! Per-frame control cycle: capture → detect → map → track → send.
//!
//! A cycle is fully synchronous. The only fatal error is the frame source
//! failing; detector errors count as "no target" and send errors are logged and
//! superseded by the next cycle's message.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use ml_core::{Detector, Observation};
use tracing::{debug, error, info, warn};
use video_ingest::{CaptureError, FrameSource};

use crate::pipeline::{
    channel::{Connection, Transport, WsTransport},
    mapper::{ActuatorCommand, CoordinateMapper},
    message::TelemetryMessage,
    tracker::TrackerState,
};

/// What happened during one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub frame_number: u64,
    pub observation: Option<Observation>,
    pub command: ActuatorCommand,
    pub fire: bool,
    pub message: TelemetryMessage,
    pub sent: bool,
}

pub struct ControlLoop<S, D, T: Transport = WsTransport> {
    source: S,
    detector: D,
    mapper: CoordinateMapper,
    state: TrackerState,
    connection: Connection<T>,
    frame_number: u64,
    target_locked: bool,
}

impl<S, D, T> ControlLoop<S, D, T>
where
    S: FrameSource,
    D: Detector,
    T: Transport,
{
    pub fn new(
        source: S,
        detector: D,
        mapper: CoordinateMapper,
        state: TrackerState,
        connection: Connection<T>,
    ) -> Self {
        Self {
            source,
            detector,
            mapper,
            state,
            connection,
            frame_number: 0,
            target_locked: false,
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.connection
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_number
    }

    /// Hand the connection back for closing.
    pub fn into_connection(self) -> Connection<T> {
        self.connection
    }

    /// Run one cycle. Only a frame-source failure is returned as an error.
    pub fn step(&mut self) -> Result<CycleReport, CaptureError> {
        let frame = tracing::info_span!("capture.recv").in_scope(|| self.source.next_frame())?;
        let cycle_start = Instant::now();
        self.frame_number = self.frame_number.wrapping_add(1);
        let _cycle = tracing::info_span!(
            "cycle",
            frame = self.frame_number,
            width = frame.width,
            height = frame.height,
            timestamp = frame.timestamp_ms
        )
        .entered();
        metrics::counter!("tracking_frames_total").increment(1);

        let observation = match self.detector.detect(&frame) {
            Ok(observation) => observation,
            Err(err) => {
                warn!("Detector failed on frame #{}: {err}", self.frame_number);
                None
            }
        };
        self.note_lock_change(observation.as_ref());

        let mapped = observation
            .as_ref()
            .map(|obs| self.mapper.map(obs, frame.width as f64, frame.height as f64));
        let transition = self.state.advance(mapped);
        let message = TelemetryMessage::from(&transition);

        if transition.fire {
            metrics::counter!("tracking_fire_signals_total").increment(1);
        }
        metrics::gauge!("tracking_command_degrees", "axis" => "pan").set(transition.command.pan);
        metrics::gauge!("tracking_command_degrees", "axis" => "tilt").set(transition.command.tilt);

        let sent = match self.connection.send(&message) {
            Ok(()) => {
                metrics::counter!("tracking_commands_sent_total").increment(1);
                true
            }
            Err(err) => {
                metrics::counter!("tracking_send_failures_total").increment(1);
                error!("WebSocket send failed: {err}");
                false
            }
        };

        if self.frame_number % 30 == 0 {
            debug!(
                "Loop heartbeat: frame #{}, {}, fire={}",
                self.frame_number, transition.command, transition.fire
            );
        }
        metrics::histogram!("tracking_cycle_seconds").record(cycle_start.elapsed().as_secs_f64());

        Ok(CycleReport {
            frame_number: self.frame_number,
            observation,
            command: transition.command,
            fire: transition.fire,
            message,
            sent,
        })
    }

    /// Cycle until `shutdown` is raised. Returns the number of cycles run, or
    /// the frame-source error that stopped the loop.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<u64, CaptureError> {
        let start = self.frame_number;
        while !shutdown.load(Ordering::Relaxed) {
            self.step()?;
        }
        Ok(self.frame_number.wrapping_sub(start))
    }

    fn note_lock_change(&mut self, observation: Option<&Observation>) {
        match (self.target_locked, observation) {
            (false, Some(obs)) => {
                metrics::counter!("tracking_target_acquired_total").increment(1);
                info!("Target locked at ({:.0}, {:.0})", obs.x, obs.y);
                self.target_locked = true;
            }
            (true, None) => {
                info!("No target; holding home {}", self.state.home());
                self.target_locked = false;
            }
            _ => {}
        }
    }
}
