//! CPU detector that locates the brightest region of a frame.
//!
//! Every pixel whose luma meets the threshold contributes to an
//! intensity-weighted centroid. This is adequate for a lit marker or an IR
//! beacon and needs no model weights.

use video_ingest::{Frame, FrameFormat};

use crate::detector::{Detector, DetectorError, Observation, check_frame_len};

pub const DEFAULT_LUMA_THRESHOLD: u8 = 200;
pub const DEFAULT_MIN_PIXELS: usize = 16;

#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    luma_threshold: u8,
    min_pixels: usize,
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self::new(DEFAULT_LUMA_THRESHOLD, DEFAULT_MIN_PIXELS)
    }
}

impl ThresholdDetector {
    pub fn new(luma_threshold: u8, min_pixels: usize) -> Self {
        Self {
            luma_threshold,
            min_pixels: min_pixels.max(1),
        }
    }
}

#[inline]
fn luma(format: FrameFormat, px: &[u8]) -> u8 {
    match format {
        // BT.601 weights in fixed point.
        FrameFormat::Bgr8 => {
            ((29 * px[0] as u32 + 150 * px[1] as u32 + 77 * px[2] as u32) >> 8) as u8
        }
        FrameFormat::Gray8 => px[0],
    }
}

impl Detector for ThresholdDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Observation>, DetectorError> {
        check_frame_len(frame)?;
        let width = frame.width.max(0) as usize;
        if width == 0 {
            return Ok(None);
        }
        let bpp = frame.format.bytes_per_pixel();

        let mut count = 0usize;
        let mut weight = 0f64;
        let mut sum_x = 0f64;
        let mut sum_y = 0f64;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);

        for (idx, px) in frame.data.chunks_exact(bpp).enumerate() {
            let value = luma(frame.format, px);
            if value < self.luma_threshold {
                continue;
            }
            let (x, y) = (idx % width, idx / width);
            let w = value as f64;
            count += 1;
            weight += w;
            sum_x += w * (x as f64 + 0.5);
            sum_y += w * (y as f64 + 0.5);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        if count < self.min_pixels || weight <= 0.0 {
            return Ok(None);
        }

        let cx = sum_x / weight;
        let cy = sum_y / weight;
        Ok(Some(Observation {
            x: cx,
            y: cy,
            bbox_xywh: [
                cx as f32,
                cy as f32,
                (max_x - min_x + 1) as f32,
                (max_y - min_y + 1) as f32,
            ],
            score: (weight / count as f64 / 255.0) as f32,
        }))
    }
}
