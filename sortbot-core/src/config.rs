//! Configuration for the localization pipeline

use serde::{Deserialize, Serialize};

/// How stitched panoramas are composed from a session's frames
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StitchMode {
    /// Compose a single panorama from all usable frames
    Full,
    /// Compose one panorama per chunk of at most `max_frames` frames
    Chunked { max_frames: usize },
}

/// Stitching stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchConfig {
    /// When disabled, frames pass through to detection unchanged
    pub enabled: bool,
    pub mode: StitchMode,
    /// Fraction of frame width adjacent frames are expected to overlap
    pub expected_overlap: f32,
    /// Below this pairwise overlap the session degrades to no-stitch mode
    pub min_overlap: f32,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: StitchMode::Full,
            expected_overlap: 0.30,
            min_overlap: 0.10,
        }
    }
}

/// Per-session pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub stitch: StitchConfig,
    /// Name of the detection model to request from the detection capability
    pub detection_model: String,
    /// Name of the embedding model to request from the embedding capability
    pub embedding_model: String,
    /// Images (detection) or crops (embedding) per inference batch
    pub batch_size: usize,
    /// Detections below this confidence are discarded
    pub confidence_threshold: f32,
    /// Cartesian distance below which two detections merge into one object
    pub merge_threshold_mm: f64,
    /// Class pairs the deduplicator treats as the same object class
    pub confusable_classes: Vec<(String, String)>,
    /// Confidence multiplier applied to border-truncated detections
    pub truncation_weight: f32,
    /// Inference soft failures beyond this count mark the session degraded
    pub soft_failure_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stitch: StitchConfig::default(),
            detection_model: "faster-rcnn-r50-fpn".to_string(),
            embedding_model: "resnet18".to_string(),
            batch_size: 8,
            confidence_threshold: 0.5,
            merge_threshold_mm: 150.0,
            confusable_classes: Vec::new(),
            truncation_weight: 0.5,
            soft_failure_limit: 3,
        }
    }
}

impl SessionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 || self.batch_size > 1024 {
            return Err("Batch size must be between 1 and 1024".to_string());
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("Confidence threshold must be within [0, 1]".to_string());
        }

        if !self.merge_threshold_mm.is_finite() || self.merge_threshold_mm <= 0.0 {
            return Err("Merge threshold must be positive and finite".to_string());
        }

        if !(0.0..=1.0).contains(&self.truncation_weight) {
            return Err("Truncation weight must be within [0, 1]".to_string());
        }

        if self.detection_model.is_empty() || self.embedding_model.is_empty() {
            return Err("Model names cannot be empty".to_string());
        }

        self.stitch.validate()
    }

    /// True when `a` and `b` are the same class or a configured confusable pair
    pub fn classes_compatible(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        self.confusable_classes
            .iter()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a))
    }
}

impl StitchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..1.0).contains(&self.expected_overlap) {
            return Err("Expected overlap must be within [0, 1)".to_string());
        }

        if !(0.0..1.0).contains(&self.min_overlap) {
            return Err("Minimum overlap must be within [0, 1)".to_string());
        }

        if self.min_overlap > self.expected_overlap {
            return Err("Minimum overlap cannot exceed expected overlap".to_string());
        }

        if let StitchMode::Chunked { max_frames } = self.mode {
            if max_frames < 2 {
                return Err("Chunked stitch mode requires at least 2 frames per chunk".to_string());
            }
        }

        Ok(())
    }
}

/// Camera rig calibration, fixed once per physical rig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRig {
    /// Expected frame resolution (width, height)
    pub image_width: u32,
    pub image_height: u32,
    /// Horizontal field of view of one frame, in degrees
    pub horizontal_fov_deg: f64,
    /// Distance from the rotation axis to the bottom-center of the image, in pixels
    pub arm_radius_px: f64,
    /// Calibrated scale from projected pixels to workspace millimeters
    pub mm_per_px: f64,
    /// Angular range of the robot's polar frame; angles are reported in [0, range)
    pub angular_range_deg: f64,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            image_width: 1280,
            image_height: 720,
            horizontal_fov_deg: 62.2,
            arm_radius_px: 1000.0,
            mm_per_px: 0.5,
            angular_range_deg: 360.0,
        }
    }
}

impl CameraRig {
    /// Validate calibration values
    pub fn validate(&self) -> Result<(), String> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err("Image resolution must be non-zero".to_string());
        }

        if self.image_width > 7680 || self.image_height > 4320 {
            return Err("Image resolution too large (max 8K)".to_string());
        }

        // Check for potential overflow in pixel calculations
        let total_pixels = self
            .image_width
            .checked_mul(self.image_height)
            .ok_or_else(|| "Resolution would cause integer overflow".to_string())?;

        if total_pixels > 100_000_000 {
            return Err("Image resolution too large (max 100M pixels)".to_string());
        }

        if !self.horizontal_fov_deg.is_finite()
            || self.horizontal_fov_deg <= 0.0
            || self.horizontal_fov_deg >= 180.0
        {
            return Err("Horizontal FOV must be within (0, 180) degrees".to_string());
        }

        if !self.arm_radius_px.is_finite() || self.arm_radius_px <= 0.0 {
            return Err("Arm radius must be positive and finite".to_string());
        }

        if !self.mm_per_px.is_finite() || self.mm_per_px <= 0.0 {
            return Err("mm-per-pixel scale must be positive and finite".to_string());
        }

        if !self.angular_range_deg.is_finite()
            || self.angular_range_deg <= 0.0
            || self.angular_range_deg > 360.0
        {
            return Err("Angular range must be within (0, 360] degrees".to_string());
        }

        Ok(())
    }

    /// Degrees of workspace arc covered by one pixel column
    pub fn deg_per_col(&self) -> f64 {
        self.horizontal_fov_deg / self.image_width as f64
    }

    /// Wrap an angle into the rig's angular range
    pub fn wrap_angle(&self, angle_deg: f64) -> f64 {
        let wrapped = angle_deg.rem_euclid(self.angular_range_deg);
        // rem_euclid can return the range itself through rounding
        if wrapped >= self.angular_range_deg {
            0.0
        } else {
            wrapped
        }
    }
}

/// Inference admission gate configuration, shared across sessions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Maximum detector/embedder calls in flight at once
    pub max_concurrent: usize,
    /// Queue wait beyond this bound is reported as resource exhaustion
    pub max_queue_wait_ms: u64,
    /// Per-call inference timeout
    pub call_timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queue_wait_ms: 5_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 || self.max_concurrent > 64 {
            return Err("Gate concurrency must be between 1 and 64".to_string());
        }

        if self.call_timeout_ms == 0 {
            return Err("Call timeout must be non-zero".to_string());
        }

        Ok(())
    }
}
