//! Shared detection and object types for the localization pipeline

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Axis-aligned bounding box in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Create a new bounding box
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    /// Center point (x, y) in pixel coordinates
    pub fn center(&self) -> (f32, f32) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// A box is usable when all fields are finite and it has positive extent
    pub fn is_valid(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    /// True when the box touches (or crosses) any image border.
    ///
    /// Border contact suggests the object is partially outside the frame, so
    /// the detection is likely truncated.
    pub fn touches_border(&self, image_width: u32, image_height: u32) -> bool {
        const MARGIN: f32 = 1.0;
        self.left <= MARGIN
            || self.top <= MARGIN
            || self.right() >= image_width as f32 - MARGIN
            || self.bottom() >= image_height as f32 - MARGIN
    }

    /// Clamp the box to image bounds. Returns `None` when the clamped region
    /// has zero area (box fully outside the image).
    pub fn clamped(&self, image_width: u32, image_height: u32) -> Option<BoundingBox> {
        if !self.is_valid() {
            return None;
        }

        let left = self.left.max(0.0);
        let top = self.top.max(0.0);
        let right = self.right().min(image_width as f32);
        let bottom = self.bottom().min(image_height as f32);

        if right <= left || bottom <= top {
            return None;
        }

        Some(BoundingBox {
            left,
            top,
            width: right - left,
            height: bottom - top,
        })
    }
}

/// A single detection as returned by the detection capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class: String,
    pub confidence: f32,
}

/// A detection bound to the session image it was found on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Index into the session's working image set (frame or panorama)
    pub image_idx: usize,
    pub bbox: BoundingBox,
    pub class: String,
    pub confidence: f32,
}

/// A detection converted into the robot's polar coordinate frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolarDetection {
    pub image_idx: usize,
    /// Source bounding box, retained for later cropping
    pub bbox: BoundingBox,
    pub class: String,
    pub confidence: f32,
    /// Set when the source box touched the image border (possibly cut off)
    pub truncated: bool,
    pub angle_deg: f64,
    pub radius_mm: f64,
}

impl PolarDetection {
    /// Confidence after down-weighting truncated detections
    pub fn effective_confidence(&self, truncation_weight: f32) -> f32 {
        if self.truncated {
            self.confidence * truncation_weight
        } else {
            self.confidence
        }
    }

    /// Position in a Cartesian frame centered on the robot origin, in mm.
    ///
    /// Pairwise distances are computed here rather than in polar space to
    /// avoid angle-wrap distortion near the origin.
    pub fn cartesian_mm(&self) -> (f64, f64) {
        let theta = self.angle_deg.to_radians();
        (self.radius_mm * theta.cos(), self.radius_mm * theta.sin())
    }
}

/// One physical object: a merged cluster of polar detections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolarObject {
    pub id: Uuid,
    /// Representative location, taken from the highest-ranked member
    pub angle_deg: f64,
    pub radius_mm: f64,
    /// Class by majority vote over members
    pub class: String,
    /// Representative source image and bounding box, used for cropping
    pub image_idx: usize,
    pub bbox: BoundingBox,
    /// All member detections, retained for auditability. Never empty.
    pub members: Vec<PolarDetection>,
}

impl PolarObject {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Fixed-length feature embedding of one object's cropped image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
