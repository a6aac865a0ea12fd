//! Target detectors consumed by the tracking loop.
//!
//! Enable the `with-tch` feature to pull in the `tch` crate and the
//! TorchScript detector.

pub mod detector;
pub mod threshold;
#[cfg(feature = "with-tch")]
pub mod torch;

pub use detector::{Detection, DetectionBatch, Detector, DetectorError, Observation};
pub use threshold::ThresholdDetector;
#[cfg(feature = "with-tch")]
pub use torch::TorchDetector;

#[cfg(feature = "with-tch")]
pub use tch;
