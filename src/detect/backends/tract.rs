#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

const NMS_IOU_THRESHOLD: f32 = 0.5;

/// Tract-based backend for SSD-MobileNet ONNX models.
///
/// Expects the model to produce `scores` [1, N, C] followed by `boxes`
/// [1, N, 4] with normalized corner coordinates. Class 0 is background.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &RgbImage) -> Tensor {
        let resized = image::imageops::resize(
            frame,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| {
                let value = resized.get_pixel(x as u32, y as u32)[channel] as f32;
                (value - 127.5) / 127.5
            },
        );
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame_width: u32, frame_height: u32) -> Result<Vec<RawDetection>> {
        if outputs.len() < 2 {
            return Err(anyhow!(
                "model produced {} outputs, expected scores and boxes",
                outputs.len()
            ));
        }
        let scores = outputs[0]
            .to_array_view::<f32>()
            .context("scores tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("scores tensor must be [1, N, C]")?;
        let boxes = outputs[1]
            .to_array_view::<f32>()
            .context("boxes tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("boxes tensor must be [1, N, 4]")?;

        let anchors = scores.shape()[1];
        let classes = scores.shape()[2];
        if boxes.shape()[1] != anchors || boxes.shape()[2] != 4 {
            return Err(anyhow!(
                "boxes shape {:?} does not match scores shape {:?}",
                boxes.shape(),
                scores.shape()
            ));
        }

        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let mut best: Option<(u32, f32)> = None;
            for class in 1..classes {
                let score = scores[[0, anchor, class]];
                if score >= self.confidence_threshold
                    && best.map_or(true, |(_, best_score)| score > best_score)
                {
                    best = Some((class as u32, score));
                }
            }
            let Some((class_id, confidence)) = best else {
                continue;
            };
            let bbox = [
                (boxes[[0, anchor, 0]] * fw).clamp(0.0, fw),
                (boxes[[0, anchor, 1]] * fh).clamp(0.0, fh),
                (boxes[[0, anchor, 2]] * fw).clamp(0.0, fw),
                (boxes[[0, anchor, 3]] * fh).clamp(0.0, fh),
            ];
            candidates.push(RawDetection::new(class_id, confidence, bbox, 0));
        }

        let mut kept = suppress_overlaps(candidates);
        for (instance, det) in kept.iter_mut().enumerate() {
            det.instance = instance as u32;
        }
        Ok(kept)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame.width(), frame.height())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_width, self.input_height);
        self.detect(&blank).map(|_| ())
    }
}

/// Greedy per-class non-maximum suppression, highest confidence first.
fn suppress_overlaps(mut candidates: Vec<RawDetection>) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(k, &candidate) > NMS_IOU_THRESHOLD
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let w = (a.right.min(b.right) - a.left.max(b.left)).max(0.0);
    let h = (a.bottom.min(b.bottom) - a.top.max(b.top)).max(0.0);
    let intersection = w * h;
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_of_overlapping_same_class() {
        let a = RawDetection::new(1, 0.9, [0.0, 0.0, 10.0, 10.0], 0);
        let b = RawDetection::new(1, 0.6, [1.0, 1.0, 11.0, 11.0], 0);
        let c = RawDetection::new(2, 0.7, [1.0, 1.0, 11.0, 11.0], 0);

        let kept = suppress_overlaps(vec![b, a, c]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 2);
    }
}
