//! Target metrics and closest-target selection.
//!
//! Every raw detection becomes exactly one `TargetRecord`. Offsets are
//! measured from a fixed reference point (the frame center), and the
//! closest target is a stable argmin over the Euclidean offset.

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detect::{class_name, RawDetection};

/// Fixed pixel coordinate that target offsets are measured against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferencePoint {
    pub x: u32,
    pub y: u32,
}

impl ReferencePoint {
    /// Center of a frame, halved with integer division.
    pub fn frame_center(width: u32, height: u32) -> Self {
        Self {
            x: width / 2,
            y: height / 2,
        }
    }
}

/// Semantic record derived from one raw detection.
///
/// Field names on the wire are fixed by the robot control code.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetRecord {
    #[serde(rename = "ClassID")]
    class_id: u32,
    #[serde(rename = "ClassName")]
    class_name: &'static str,
    #[serde(rename = "InstanceID")]
    instance_id: u32,
    #[serde(rename = "Area")]
    area: f32,
    #[serde(rename = "Bottom")]
    bottom: f32,
    #[serde(rename = "CenterX")]
    center_x: f32,
    #[serde(rename = "CenterY")]
    center_y: f32,
    #[serde(rename = "Confidence")]
    confidence: f32,
    #[serde(rename = "Height")]
    height: f32,
    #[serde(rename = "Width")]
    width: f32,
    #[serde(rename = "Left")]
    left: f32,
    #[serde(rename = "Right")]
    right: f32,
    #[serde(rename = "Top")]
    top: f32,
    #[serde(rename = "Timestamp")]
    timestamp: f64,
    #[serde(rename = "TargetX")]
    target_x: f64,
    #[serde(rename = "TargetY")]
    target_y: f64,
    #[serde(rename = "TargetDistance")]
    target_distance: f64,
    #[serde(rename = "AreaPercent")]
    area_percent: f64,
}

impl TargetRecord {
    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn center(&self) -> (f32, f32) {
        (self.center_x, self.center_y)
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn target_offset(&self) -> (f64, f64) {
        (self.target_x, self.target_y)
    }

    pub fn target_distance(&self) -> f64 {
        self.target_distance
    }

    pub fn area_percent(&self) -> f64 {
        self.area_percent
    }
}

/// Converts raw detections into target records for one capture geometry.
#[derive(Clone, Copy, Debug)]
pub struct TargetMetrics {
    frame_area: f64,
    reference: ReferencePoint,
}

impl TargetMetrics {
    pub fn new(frame_area: u64, reference: ReferencePoint) -> Result<Self> {
        if frame_area == 0 {
            return Err(anyhow!("frame area must be greater than zero"));
        }
        Ok(Self {
            frame_area: frame_area as f64,
            reference,
        })
    }

    /// Metrics for a capture resolution, referenced to its center.
    pub fn for_capture(width: u32, height: u32) -> Result<Self> {
        Self::new(
            u64::from(width) * u64::from(height),
            ReferencePoint::frame_center(width, height),
        )
    }

    pub fn reference(&self) -> ReferencePoint {
        self.reference
    }

    pub fn record(&self, detection: &RawDetection, timestamp: f64) -> TargetRecord {
        let (center_x, center_y) = detection.center();
        let target_x = f64::from(center_x) - f64::from(self.reference.x);
        let target_y = f64::from(center_y) - f64::from(self.reference.y);
        let area = detection.area();

        TargetRecord {
            class_id: detection.class_id,
            class_name: class_name(detection.class_id),
            instance_id: detection.instance,
            area,
            bottom: detection.bottom,
            center_x,
            center_y,
            confidence: detection.confidence,
            height: detection.height(),
            width: detection.width(),
            left: detection.left,
            right: detection.right,
            top: detection.top,
            timestamp,
            target_x,
            target_y,
            target_distance: target_x.hypot(target_y),
            area_percent: f64::from(area) / self.frame_area * 100.0,
        }
    }

    pub fn records(&self, detections: &[RawDetection], timestamp: f64) -> Vec<TargetRecord> {
        detections
            .iter()
            .map(|det| self.record(det, timestamp))
            .collect()
    }
}

/// Index of the record closest to the reference point.
///
/// Stable: among equal distances the earliest record wins. Any non-empty
/// slice yields an index, however far its records are from the reference.
pub fn closest_index(records: &[TargetRecord]) -> Option<usize> {
    let first = records.first()?;
    let mut closest = 0;
    let mut closest_distance = first.target_distance;
    for (idx, record) in records.iter().enumerate().skip(1) {
        if record.target_distance < closest_distance {
            closest = idx;
            closest_distance = record.target_distance;
        }
    }
    Some(closest)
}

/// Record closest to the reference point, or `None` for an empty slice.
pub fn select_closest(records: &[TargetRecord]) -> Option<&TargetRecord> {
    closest_index(records).map(|idx| &records[idx])
}
