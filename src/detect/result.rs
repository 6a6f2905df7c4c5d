/// Class id the detector assigns to cones.
pub const CONE_CLASS_ID: u32 = 2;

/// One raw detection reported by a detector backend for a single frame.
///
/// Coordinates are frame pixels. Width, height, center and area are derived
/// from the box so they can never disagree with it.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    /// Unique within the frame the detection came from.
    pub instance: u32,
}

impl RawDetection {
    pub fn new(class_id: u32, confidence: f32, bbox: [f32; 4], instance: u32) -> Self {
        let [left, top, right, bottom] = bbox;
        Self {
            class_id,
            confidence,
            left: left.max(0.0),
            top: top.max(0.0),
            right: right.max(left.max(0.0)),
            bottom: bottom.max(top.max(0.0)),
            instance,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn is_cone(&self) -> bool {
        self.class_id == CONE_CLASS_ID
    }
}

/// Human-readable label for a class id.
pub fn class_name(class_id: u32) -> &'static str {
    if class_id == CONE_CLASS_ID {
        "cones"
    } else {
        "cubes"
    }
}
