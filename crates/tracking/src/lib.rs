pub mod pipeline;

pub use pipeline::{
    TrackCliArgs, TrackingConfig,
    channel::{ChannelError, Connection, Transport},
    control_loop::{ControlLoop, CycleReport},
    keepalive::{Keepalive, KeepaliveExit, spawn_keepalive},
    mapper::{ActuatorCommand, AxisMapping, AxisRange, CoordinateMapper, Orientation},
    message::TelemetryMessage,
    run,
    tracker::{TrackerState, Transition},
};
