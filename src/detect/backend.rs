use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawDetection;

/// Detector backend trait.
///
/// A backend is a black box to the pipeline: a frame goes in, raw detections
/// come out. Backends apply their own confidence floor; the pipeline never
/// re-filters what they return.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Instance ids in the result must be unique within the frame.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
