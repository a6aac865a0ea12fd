//! Configuration parsing for the tracking loop.
//!
//! This module owns translation of CLI arguments into a `TrackingConfig` which
//! downstream stages use without re-parsing flags.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Result, anyhow, bail};
use clap::{Args, ValueEnum};

use crate::pipeline::mapper::{
    ActuatorCommand, AxisMapping, AxisRange, CoordinateMapper, Orientation,
};

pub const DEFAULT_DEADBAND_DEGREES: f64 = 5.0;
pub const DEFAULT_KEEPALIVE_SECS: f64 = 60.0;

#[derive(Clone, Debug, PartialEq)]
/// Detector backend and its parameters.
pub enum DetectorKind {
    /// Bright-region centroid on the CPU.
    Threshold { luma_threshold: u8, min_pixels: usize },
    /// TorchScript model, requires the `with-tch` feature.
    Torch { model_path: PathBuf },
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage of the loop.
pub struct TrackingConfig {
    /// WebSocket URL of the turret controller.
    pub endpoint: String,
    /// Camera URI or device identifier.
    pub camera_uri: String,
    /// Capture width streamed by the ingest component.
    pub width: i32,
    /// Capture height streamed by the ingest component.
    pub height: i32,
    /// Pan axis range and direction.
    pub pan: AxisMapping,
    /// Tilt axis range and direction.
    pub tilt: AxisMapping,
    /// Command held while no target is visible; also the initial "previous".
    pub home: ActuatorCommand,
    /// Per-axis movement, in degrees, that must be exceeded to signal fire.
    pub deadband: f64,
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
    /// Detector backend.
    pub detector: DetectorKind,
    /// Telemetry and instrumentation options.
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing and metrics.
pub struct TelemetryOptions {
    /// Default the log filter to `debug` (per-message payloads).
    pub verbose: bool,
    /// Write a Chrome trace JSON file capturing loop spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DetectorChoice {
    Threshold,
    Torch,
}

/// CLI arguments accepted by the `track` subcommand.
#[derive(Debug, Args)]
pub struct TrackCliArgs {
    /// Controller WebSocket URL, e.g. ws://192.168.1.55:81/
    #[arg(long = "endpoint", value_name = "URL")]
    pub endpoint: String,
    /// Camera URI or device identifier.
    #[arg(long = "source", value_name = "URI", default_value = "/dev/video0")]
    pub source: String,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: i32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: i32,
    /// Pan servo range in degrees.
    #[arg(long = "pan-range", value_name = "MIN:MAX", default_value = "0:180")]
    pub pan_range: AxisRange,
    /// Tilt servo range in degrees.
    #[arg(long = "tilt-range", value_name = "MIN:MAX", default_value = "0:180")]
    pub tilt_range: AxisRange,
    /// Drive pan from max to min as the target moves right.
    #[arg(long = "invert-pan", action = clap::ArgAction::SetTrue)]
    pub invert_pan: bool,
    /// Drive tilt from min to max as the target moves down.
    #[arg(long = "no-invert-tilt", action = clap::ArgAction::SetTrue)]
    pub no_invert_tilt: bool,
    /// Mirror the image horizontally before mapping (selfie-style cameras).
    #[arg(long = "mirror", action = clap::ArgAction::SetTrue)]
    pub mirror: bool,
    /// Home command used when no target is visible.
    #[arg(long = "home", value_name = "PAN,TILT", default_value = "90,90")]
    pub home: ActuatorCommand,
    /// Degrees either axis must move before fire is signaled.
    #[arg(long = "deadband", value_name = "DEG", default_value_t = DEFAULT_DEADBAND_DEGREES)]
    pub deadband: f64,
    /// Seconds between keepalive pings.
    #[arg(long = "keepalive-secs", value_name = "S", default_value_t = DEFAULT_KEEPALIVE_SECS)]
    pub keepalive_secs: f64,
    /// Detector backend.
    #[arg(long = "detector", value_enum, default_value_t = DetectorChoice::Threshold)]
    pub detector: DetectorChoice,
    /// TorchScript model path (torch detector).
    #[arg(long = "model", value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// Minimum luma (0-255) counted as target (threshold detector).
    #[arg(long = "luma-threshold", value_name = "0-255", default_value_t = ml_core::threshold::DEFAULT_LUMA_THRESHOLD)]
    pub luma_threshold: u8,
    /// Minimum bright pixels for a detection (threshold detector).
    #[arg(long = "min-pixels", value_name = "N", default_value_t = ml_core::threshold::DEFAULT_MIN_PIXELS)]
    pub min_pixels: usize,
    /// Enable verbose logging (every payload sent).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics-addr", value_name = "HOST:PORT")]
    pub metrics_addr: Option<SocketAddr>,
}

impl TryFrom<TrackCliArgs> for TrackingConfig {
    type Error = anyhow::Error;

    fn try_from(args: TrackCliArgs) -> Result<Self> {
        let endpoint = args.endpoint.trim().to_string();
        let Some(rest) = endpoint
            .strip_prefix("ws://")
            .or_else(|| endpoint.strip_prefix("wss://"))
        else {
            bail!("--endpoint must be a ws:// or wss:// URL, got {endpoint:?}");
        };
        if rest.is_empty() || rest.starts_with('/') {
            bail!("--endpoint is missing a host");
        }

        if args.width <= 0 || args.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }

        if !args.pan_range.contains(args.home.pan) || !args.tilt_range.contains(args.home.tilt) {
            bail!(
                "--home {} lies outside pan {} / tilt {}",
                args.home,
                args.pan_range,
                args.tilt_range
            );
        }

        if !args.deadband.is_finite() || args.deadband < 0.0 {
            bail!("--deadband must be a non-negative number of degrees");
        }

        if !args.keepalive_secs.is_finite() || args.keepalive_secs <= 0.0 {
            bail!("--keepalive-secs must be positive");
        }
        let keepalive_interval = Duration::try_from_secs_f64(args.keepalive_secs)
            .map_err(|err| anyhow!("--keepalive-secs out of range: {err}"))?;

        let detector = match args.detector {
            DetectorChoice::Threshold => DetectorKind::Threshold {
                luma_threshold: args.luma_threshold,
                min_pixels: args.min_pixels.max(1),
            },
            DetectorChoice::Torch => {
                if !cfg!(feature = "with-tch") {
                    bail!("--detector torch requires a build with the `with-tch` feature");
                }
                let model_path = args
                    .model
                    .ok_or_else(|| anyhow!("--detector torch requires --model <path>"))?;
                DetectorKind::Torch { model_path }
            }
        };

        let mut pan_orientation = if args.invert_pan {
            Orientation::Reversed
        } else {
            Orientation::Forward
        };
        if args.mirror {
            pan_orientation = pan_orientation.flipped();
        }
        let tilt_orientation = if args.no_invert_tilt {
            Orientation::Forward
        } else {
            Orientation::Reversed
        };

        let telemetry = TelemetryOptions {
            verbose: args.verbose,
            chrome_trace_path: args.chrome_trace,
            metrics_addr: args.metrics_addr,
        };

        let pan = AxisMapping::new(args.pan_range, pan_orientation);
        let tilt = AxisMapping::new(args.tilt_range, tilt_orientation);
        // Home is transmitted like any other command.
        let home = CoordinateMapper::new(pan, tilt).clamp(args.home);

        Ok(Self {
            endpoint,
            camera_uri: args.source,
            width: args.width,
            height: args.height,
            pan,
            tilt,
            home,
            deadband: args.deadband,
            keepalive_interval,
            detector,
            telemetry,
        })
    }
}

impl TrackingConfig {
    pub fn mapper(&self) -> CoordinateMapper {
        CoordinateMapper::new(self.pan, self.tilt)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: TrackCliArgs,
    }

    fn parse(extra: &[&str]) -> Result<TrackingConfig> {
        let mut argv = vec!["track", "--endpoint", "ws://192.168.1.55:81/"];
        argv.extend_from_slice(extra);
        let cli = TestCli::try_parse_from(argv)?;
        TrackingConfig::try_from(cli.args)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.camera_uri, "/dev/video0");
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.pan.range, AxisRange::new(0.0, 180.0).unwrap());
        assert_eq!(config.pan.orientation, Orientation::Forward);
        assert_eq!(config.tilt.orientation, Orientation::Reversed);
        assert_eq!(config.home, ActuatorCommand::new(90.0, 90.0));
        assert_eq!(config.deadband, 5.0);
        assert_eq!(config.keepalive_interval, Duration::from_secs(60));
        assert!(matches!(config.detector, DetectorKind::Threshold { .. }));
    }

    #[test]
    fn test_custom_ranges_and_orientation() {
        let config = parse(&[
            "--pan-range",
            "0:1000",
            "--tilt-range",
            "0:1000",
            "--home",
            "500,500",
            "--no-invert-tilt",
            "--mirror",
            "--keepalive-secs",
            "0.5",
        ])
        .unwrap();
        assert_eq!(config.pan.range.max(), 1000.0);
        assert_eq!(config.pan.orientation, Orientation::Reversed);
        assert_eq!(config.tilt.orientation, Orientation::Forward);
        assert_eq!(config.keepalive_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_mirror_cancels_invert_pan() {
        let config = parse(&["--invert-pan", "--mirror"]).unwrap();
        assert_eq!(config.pan.orientation, Orientation::Forward);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse(&["--home", "200,90"]).is_err());
        assert!(parse(&["--pan-range", "180:0"]).is_err());
        assert!(parse(&["--deadband", "-1"]).is_err());
        assert!(parse(&["--keepalive-secs", "0"]).is_err());
        assert!(parse(&["--width", "0"]).is_err());
        assert!(parse(&["--detector", "torch"]).is_err());
    }

    #[test]
    fn test_rejects_non_websocket_endpoint() {
        let cli = TestCli::try_parse_from(["track", "--endpoint", "http://host/"]).unwrap();
        assert!(TrackingConfig::try_from(cli.args).is_err());
        let cli = TestCli::try_parse_from(["track", "--endpoint", "ws:///path"]).unwrap();
        assert!(TrackingConfig::try_from(cli.args).is_err());
    }

    #[test]
    fn test_accepts_secure_websocket_endpoint() {
        let cli = TestCli::try_parse_from(["track", "--endpoint", "wss://host:443/"]).unwrap();
        let config = TrackingConfig::try_from(cli.args).unwrap();
        assert_eq!(config.endpoint, "wss://host:443/");
    }

    #[test]
    fn test_home_snaps_to_whole_degrees_inside_range() {
        let config = parse(&[
            "--pan-range",
            "10.4:170.6",
            "--home",
            "10.45,90.2",
        ])
        .unwrap();
        assert_eq!(config.home, ActuatorCommand::new(11.0, 90.0));
    }
}
