//! Tracking-to-actuation loop that follows a detected target with the turret
//! camera servos.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `mapper`: Pixel → servo-degree conversion with clamping.
//! - `tracker`: Committed command and fire decision per cycle.
//! - `message`: Wire payload sent to the controller.
//! - `channel`: WebSocket connection with serialized writes.
//! - `keepalive`: Background liveness probe.
//! - `control_loop`: One capture → detect → map → track → send cycle.
//! - `supervisor`: Process wiring and shutdown.
//! - `telemetry`: Tracing subscriber and metrics setup.

/// Re-export loop settings so callers can configure runs without reaching
/// into submodules.
pub use config::{DetectorKind, TelemetryOptions, TrackCliArgs, TrackingConfig};
/// Launch the tracking loop with a ready-made configuration.
pub use supervisor::run;

pub mod channel;
pub mod config;
pub mod control_loop;
pub mod keepalive;
pub mod mapper;
pub mod message;
mod supervisor;
pub mod telemetry;
pub mod tracker;
