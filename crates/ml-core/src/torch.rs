use std::{convert::TryFrom, path::Path};

use anyhow::{Result, bail};
use tch::{self, Device, Kind, Tensor};
use video_ingest::{Frame, FrameFormat};

use crate::detector::{
    Detection, DetectionBatch, Detector, DetectorError, Observation, check_frame_len,
};

const MAX_DETECTIONS: usize = 512;

/// TorchScript-backed detector wrapper.
pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    confidence_threshold: f32,
}

impl TorchDetector {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (i64, i64),
    ) -> Result<Self> {
        let module = tch::CModule::load_on_device(model_path, device)?;
        Ok(Self {
            module,
            device,
            input_size,
            confidence_threshold: 0.25,
        })
    }

    /// Override the confidence threshold used for filtering detections.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Converts a BGR frame (height, width) into a normalized RGB tensor.
    fn frame_to_tensor(&self, frame: &Frame) -> Result<Tensor> {
        let (in_w, in_h) = self.input_size;
        if (frame.width as i64, frame.height as i64) != (in_w, in_h) {
            bail!(
                "frame size {}x{} does not match detector input {in_w}x{in_h}",
                frame.width,
                frame.height
            );
        }

        let tensor = Tensor::from_slice(&frame.data)
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, in_h, in_w, 3])
            .flip([3])
            .permute([0, 3, 1, 2])
            / 255.0;

        Ok(tensor)
    }

    /// Executes the TorchScript module and performs basic confidence filtering.
    pub fn infer(&self, input: &Tensor) -> Result<DetectionBatch> {
        let output = self.module.forward_ts(&[input])?;
        let shape = output.size();
        if shape.len() != 3 {
            bail!("unexpected detector output shape: {shape:?}");
        }
        if shape[0] != 1 {
            bail!("detector expected batch=1 but received {}", shape[0]);
        }
        if shape[1] < 5 {
            bail!(
                "detector output requires at least 5 channels (x,y,w,h,conf), got {}",
                shape[1]
            );
        }

        let preds = output
            .to_device(Device::Cpu)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&preds)?;

        let mut detections = Vec::new();
        for row in rows {
            if row.len() < 5 || row[4] < self.confidence_threshold {
                continue;
            }
            detections.push(Detection {
                bbox_xywh: [row[0], row[1], row[2], row[3]],
                score: row[4],
                class_id: if row.len() > 5 { row[5] as i64 } else { 0 },
            });
            if detections.len() >= MAX_DETECTIONS {
                break;
            }
        }

        Ok(DetectionBatch { detections })
    }
}

impl Detector for TorchDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Observation>, DetectorError> {
        if frame.format != FrameFormat::Bgr8 {
            return Err(DetectorError::UnsupportedFormat(frame.format));
        }
        check_frame_len(frame)?;
        let input = self.frame_to_tensor(frame)?;
        let batch = tch::no_grad(|| self.infer(&input))?;
        Ok(batch.best().map(Observation::from))
    }
}
