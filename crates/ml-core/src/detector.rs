use thiserror::Error;
use video_ingest::{Frame, FrameFormat};

/// Single detection returned by a detector backend.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Center x, center y, width, height in frame pixels.
    pub bbox_xywh: [f32; 4],
    pub score: f32,
    pub class_id: i64,
}

impl Detection {
    pub fn center(&self) -> (f64, f64) {
        (self.bbox_xywh[0] as f64, self.bbox_xywh[1] as f64)
    }
}

/// Batched detections for a single frame.
#[derive(Debug, Clone, Default)]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    /// Highest-scoring detection, if any. Ties keep the earliest entry.
    pub fn best(&self) -> Option<&Detection> {
        self.detections.iter().fold(None, |best: Option<&Detection>, det| match best {
            Some(current) if current.score >= det.score => Some(current),
            _ => Some(det),
        })
    }
}

/// Target position reported for one frame.
///
/// Only the center is consumed downstream; the box and score ride along for
/// logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub x: f64,
    pub y: f64,
    pub bbox_xywh: [f32; 4],
    pub score: f32,
}

impl Observation {
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            bbox_xywh: [x as f32, y as f32, 0.0, 0.0],
            score: 1.0,
        }
    }
}

impl From<&Detection> for Observation {
    fn from(det: &Detection) -> Self {
        let (x, y) = det.center();
        Self {
            x,
            y,
            bbox_xywh: det.bbox_xywh,
            score: det.score,
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("unexpected frame buffer size: got {got} bytes, expected {expected}")]
    FrameSize { got: usize, expected: usize },
    #[error("frame format {0:?} is not supported by this detector")]
    UnsupportedFormat(FrameFormat),
    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

/// Produces zero or one target observation per frame.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Observation>, DetectorError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Observation>, DetectorError> {
        (**self).detect(frame)
    }
}

pub(crate) fn check_frame_len(frame: &Frame) -> Result<(), DetectorError> {
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(DetectorError::FrameSize {
            got: frame.data.len(),
            expected,
        });
    }
    Ok(())
}
