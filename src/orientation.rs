//! Cone orientation from the position of the yellow marking.
//!
//! A cone's yellow band sits low on an upright cone and high on an
//! inverted one. The classifier crops the detection, converts it to 8-bit
//! HSV and compares yellow pixel counts between the upper and lower halves.

use std::cmp::Ordering;

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::detect::RawDetection;
use crate::target::TargetRecord;

/// Scale applied to every edge coordinate of a detection before cropping.
pub const CROP_INSET: f32 = 0.9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrientationVerdict {
    Normal,
    UpsideDown,
    Unknown,
    NotApplicable,
}

impl OrientationVerdict {
    /// Telemetry label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::UpsideDown => "Upside Down",
            Self::Unknown => "Unknown",
            Self::NotApplicable => "Not Cone",
        }
    }
}

/// Which per-detection verdict becomes the published one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictPolicy {
    /// The cone closest to the reference point.
    #[default]
    Closest,
    /// Whatever detection was processed last, cone or not.
    LastProcessed,
}

/// Inclusive HSV range on the 8-bit scale (H 0..=179, S/V 0..=255).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HsvBand {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvBand {
    /// Yellow marking on the cones.
    pub const YELLOW: HsvBand = HsvBand {
        lower: [20, 100, 100],
        upper: [30, 255, 255],
    };

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] >= self.lower[c] && hsv[c] <= self.upper[c])
    }
}

/// Pixel rectangle inside a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scale each edge coordinate of a detection box and clamp it to the frame.
///
/// The scale is applied to the absolute coordinates, not about the box
/// center, so the crop slides toward the frame origin as well as shrinking.
/// Returns `None` when nothing of the box is left.
pub fn inset_crop(
    detection: &RawDetection,
    inset: f32,
    frame_width: u32,
    frame_height: u32,
) -> Option<CropRect> {
    let scale = |edge: f32, limit: u32| ((edge * inset).round() as u32).min(limit);
    let left = scale(detection.left, frame_width);
    let top = scale(detection.top, frame_height);
    let right = scale(detection.right, frame_width);
    let bottom = scale(detection.bottom, frame_height);

    if right <= left || bottom <= top {
        return None;
    }
    Some(CropRect {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    })
}

/// Convert one RGB pixel to 8-bit HSV with the hue halved into 0..=179.
pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> [u8; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    let hue = (h / 2.0).round();
    [
        if hue >= 180.0 { 0 } else { hue as u8 },
        s.round().clamp(0.0, 255.0) as u8,
        max as u8,
    ]
}

/// Orientation classifier for the cone class.
#[derive(Clone, Copy, Debug)]
pub struct OrientationClassifier {
    band: HsvBand,
    inset: f32,
}

impl Default for OrientationClassifier {
    fn default() -> Self {
        Self {
            band: HsvBand::YELLOW,
            inset: CROP_INSET,
        }
    }
}

impl OrientationClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, frame: &RgbImage, detection: &RawDetection) -> OrientationVerdict {
        if !detection.is_cone() {
            return OrientationVerdict::NotApplicable;
        }
        let Some(rect) = inset_crop(detection, self.inset, frame.width(), frame.height()) else {
            return OrientationVerdict::Unknown;
        };

        let crop = image::imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height)
            .to_image();
        let (upper, lower) = self.count_halves(&crop);
        match upper.cmp(&lower) {
            Ordering::Greater => OrientationVerdict::UpsideDown,
            Ordering::Less => OrientationVerdict::Normal,
            Ordering::Equal => OrientationVerdict::Unknown,
        }
    }

    /// Classify every detection, in detection order.
    pub fn classify_all(&self, frame: &RgbImage, detections: &[RawDetection]) -> Vec<OrientationVerdict> {
        detections
            .iter()
            .map(|det| self.classify(frame, det))
            .collect()
    }

    /// Band pixel counts in the upper and lower halves of a crop.
    fn count_halves(&self, crop: &RgbImage) -> (usize, usize) {
        let split = crop.height() / 2;
        let mut upper = 0;
        let mut lower = 0;
        for (_, y, pixel) in crop.enumerate_pixels() {
            if !self.band.contains(rgb_to_hsv(*pixel)) {
                continue;
            }
            if y < split {
                upper += 1;
            } else {
                lower += 1;
            }
        }
        (upper, lower)
    }
}

/// Pick the verdict to publish for one stream.
///
/// `verdicts` runs parallel to `records`.
pub fn published_verdict(
    policy: VerdictPolicy,
    records: &[TargetRecord],
    verdicts: &[OrientationVerdict],
) -> OrientationVerdict {
    match policy {
        VerdictPolicy::LastProcessed => verdicts
            .last()
            .copied()
            .unwrap_or(OrientationVerdict::NotApplicable),
        VerdictPolicy::Closest => records
            .iter()
            .zip(verdicts)
            .filter(|(_, verdict)| **verdict != OrientationVerdict::NotApplicable)
            .fold(None::<(&TargetRecord, OrientationVerdict)>, |best, (record, verdict)| {
                match best {
                    Some((b, _)) if b.target_distance() <= record.target_distance() => best,
                    _ => Some((record, *verdict)),
                }
            })
            .map(|(_, verdict)| verdict)
            .unwrap_or(OrientationVerdict::NotApplicable),
    }
}
