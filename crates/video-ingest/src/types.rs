use anyhow::Error;
use chrono::Utc;
use thiserror::Error;

/// Raw frame captured from a video source.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Wrap a pixel buffer, stamping it with the current wall-clock time.
    pub fn new(data: Vec<u8>, width: i32, height: i32, format: FrameFormat) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format,
        }
    }

    /// All-black frame of the given size.
    pub fn blank(width: i32, height: i32, format: FrameFormat) -> Self {
        let len = (width.max(0) as usize) * (height.max(0) as usize) * format.bytes_per_pixel();
        Self::new(vec![0; len], width, height, format)
    }

    /// Bytes expected for a frame of this size and format.
    pub fn expected_len(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize) * self.format.bytes_per_pixel()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Gray8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Bgr8 => 3,
            FrameFormat::Gray8 => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source reached end of stream")]
    EndOfStream,
    #[error(transparent)]
    Other(#[from] Error),
}
