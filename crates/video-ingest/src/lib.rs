//! Frame acquisition for the tracking loop.
//!
//! Capture runs on a background thread and hands frames over a small bounded
//! channel; consumers pull them one at a time through [`FrameSource`].

mod ffmpeg;
mod types;

use crossbeam_channel::Receiver;

pub use ffmpeg::{SourceKind, spawn_capture_reader};
pub use types::{CaptureError, Frame, FrameFormat};

/// Ordered, non-restartable sequence of frames.
///
/// Any error returned from [`FrameSource::next_frame`] is terminal for the
/// source; callers must not expect further frames afterwards.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
}

impl FrameSource for Receiver<Result<Frame, CaptureError>> {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        match self.recv() {
            Ok(result) => result,
            Err(_) => Err(CaptureError::EndOfStream),
        }
    }
}

pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}
