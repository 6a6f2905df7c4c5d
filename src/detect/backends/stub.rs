use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Stub backend for tests and `stub://` runs.
///
/// Replays a script of per-frame detections, cycling when it runs out. An
/// empty script never detects anything.
pub struct StubBackend {
    script: Vec<Vec<RawDetection>>,
    cursor: usize,
    confidence_threshold: f32,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script,
            cursor: 0,
            confidence_threshold: 0.0,
        }
    }

    /// Drop scripted detections below this confidence, as a real network would.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<RawDetection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let frame_script = &self.script[self.cursor % self.script.len()];
        self.cursor = self.cursor.wrapping_add(1);

        Ok(frame_script
            .iter()
            .filter(|det| det.confidence >= self.confidence_threshold)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, confidence: f32, instance: u32) -> RawDetection {
        RawDetection::new(class_id, confidence, [0.0, 0.0, 10.0, 10.0], instance)
    }

    #[test]
    fn empty_script_detects_nothing() {
        let mut backend = StubBackend::new();
        let frame = RgbImage::new(4, 4);
        assert!(backend.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn script_cycles_per_call() {
        let mut backend = StubBackend::scripted(vec![vec![det(1, 0.9, 0)], vec![]]);
        let frame = RgbImage::new(4, 4);

        assert_eq!(backend.detect(&frame).unwrap().len(), 1);
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.detect(&frame).unwrap().len(), 1);
    }

    #[test]
    fn threshold_filters_low_confidence() {
        let mut backend =
            StubBackend::scripted(vec![vec![det(1, 0.3, 0), det(2, 0.8, 1)]]).with_threshold(0.5);
        let frame = RgbImage::new(4, 4);

        let detections = backend.detect(&frame).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 2);
    }
}
