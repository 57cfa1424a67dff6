//! Pixel-space to robot-polar coordinate conversion
//!
//! A detection's bounding box center maps to an absolute arm angle through
//! the image's pixel-to-angle mapping, and to a radial distance through the
//! rig's perspective model: the camera looks along the arm, so a box's
//! horizontal offset from the image center subtends an angle at the rotation
//! axis, and its vertical offset shifts the radial distance.

use crate::error::VisionError;
use crate::stitcher::{MappedImage, PixelToAngle};
use sortbot_core::{CameraRig, PolarDetection, RawDetection};

/// Deterministic pixel-to-polar converter, calibrated once per camera rig
pub struct CoordinateConverter {
    rig: CameraRig,
}

impl CoordinateConverter {
    pub fn new(rig: CameraRig) -> Result<Self, VisionError> {
        rig.validate()
            .map_err(|e| VisionError::Core(sortbot_core::Error::Configuration(e)))?;
        Ok(Self { rig })
    }

    /// Convert one raw detection into the robot's polar frame.
    ///
    /// Angles are wrapped into the rig's angular range; radius is always
    /// non-negative. Boxes touching the image border are flagged truncated.
    pub fn convert(
        &self,
        raw: &RawDetection,
        image: &MappedImage,
    ) -> Result<PolarDetection, VisionError> {
        if !raw.bbox.is_valid() {
            return Err(VisionError::Geometry(format!(
                "Invalid bounding box: {:?}",
                raw.bbox
            )));
        }

        let width = image.width();
        let height = image.height();
        if width == 0 || height == 0 {
            return Err(VisionError::Geometry("Empty source image".to_string()));
        }

        let (cx, cy) = raw.bbox.center();
        let dy = height as f64 / 2.0 - cy as f64;
        let axis_dist = dy + self.rig.arm_radius_px;
        if !axis_dist.is_finite() || axis_dist <= 0.0 {
            return Err(VisionError::Geometry(format!(
                "Box center behind the rotation axis (axis distance {:.1}px)",
                axis_dist
            )));
        }

        let base_angle_deg = image.mapping.base_angle_at(cx as f64);
        if !base_angle_deg.is_finite() {
            return Err(VisionError::Geometry(
                "Non-finite mapped capture angle".to_string(),
            ));
        }

        let (angle_deg, dist_px) = match image.mapping {
            PixelToAngle::Frame { .. } => {
                let dx = cx as f64 - width as f64 / 2.0;
                let gamma_rad = (dx.abs() / axis_dist).atan();
                // Columns right of the image center sit at lower arm angles
                let offset_deg = if dx > 0.0 {
                    -gamma_rad.to_degrees()
                } else {
                    gamma_rad.to_degrees()
                };
                let dist_px = if gamma_rad.sin().abs() > 1e-9 {
                    dx.abs() / gamma_rad.sin()
                } else {
                    axis_dist
                };
                (base_angle_deg + offset_deg, dist_px)
            }
            // A panorama column already encodes the horizontal angle, so
            // only the vertical offset contributes to the radial distance
            PixelToAngle::Affine { .. } => (base_angle_deg, axis_dist),
        };

        let radius_mm = dist_px * self.rig.mm_per_px;
        if !radius_mm.is_finite() || radius_mm < 0.0 {
            return Err(VisionError::Geometry(format!(
                "Non-finite or negative radius for box {:?}",
                raw.bbox
            )));
        }

        Ok(PolarDetection {
            image_idx: raw.image_idx,
            bbox: raw.bbox,
            class: raw.class.clone(),
            confidence: raw.confidence,
            truncated: raw.bbox.touches_border(width, height),
            angle_deg: self.rig.wrap_angle(angle_deg),
            radius_mm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use sortbot_core::BoundingBox;

    fn rig() -> CameraRig {
        let mut rig = CameraRig::default();
        rig.image_width = 200;
        rig.image_height = 100;
        rig.arm_radius_px = 500.0;
        rig.mm_per_px = 1.0;
        rig
    }

    fn frame_image(capture_angle_deg: f64) -> MappedImage {
        MappedImage {
            image: RgbImage::new(200, 100),
            mapping: PixelToAngle::Frame { capture_angle_deg },
            source_frames: vec![0],
        }
    }

    fn raw(bbox: BoundingBox) -> RawDetection {
        RawDetection {
            image_idx: 0,
            bbox,
            class: "bolt".to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_centered_box_keeps_capture_angle() {
        let converter = CoordinateConverter::new(rig()).unwrap();
        // Box centered at (100, 50), the image center
        let det = converter
            .convert(&raw(BoundingBox::new(90.0, 40.0, 20.0, 20.0)), &frame_image(30.0))
            .unwrap();

        assert!((det.angle_deg - 30.0).abs() < 1e-9);
        // dy = 0: the radial distance is exactly the arm radius
        assert!((det.radius_mm - 500.0).abs() < 1e-9);
        assert!(!det.truncated);
    }

    #[test]
    fn test_right_of_center_lowers_angle() {
        let converter = CoordinateConverter::new(rig()).unwrap();
        let det = converter
            .convert(&raw(BoundingBox::new(140.0, 40.0, 20.0, 20.0)), &frame_image(30.0))
            .unwrap();
        assert!(det.angle_deg < 30.0);

        let det_left = converter
            .convert(&raw(BoundingBox::new(40.0, 40.0, 20.0, 20.0)), &frame_image(30.0))
            .unwrap();
        assert!(det_left.angle_deg > 30.0);
    }

    #[test]
    fn test_offset_box_radius_matches_projection() {
        let converter = CoordinateConverter::new(rig()).unwrap();
        // Center at (150, 50): dx = 50, dy = 0
        let det = converter
            .convert(&raw(BoundingBox::new(140.0, 40.0, 20.0, 20.0)), &frame_image(0.0))
            .unwrap();

        // dist = dx / sin(atan(dx / axis)) = hypot(dx, axis)
        let expected = (50.0f64.powi(2) + 500.0f64.powi(2)).sqrt();
        assert!((det.radius_mm - expected).abs() < 1e-6);
    }

    #[test]
    fn test_vertical_offset_shifts_radius() {
        let converter = CoordinateConverter::new(rig()).unwrap();
        // Center at (100, 20): dy = 30, above image center means farther out
        let det = converter
            .convert(&raw(BoundingBox::new(90.0, 10.0, 20.0, 20.0)), &frame_image(0.0))
            .unwrap();
        assert!((det.radius_mm - 530.0).abs() < 1e-9);

        // Center at (100, 80): dy = -30, closer to the arm
        let det_low = converter
            .convert(&raw(BoundingBox::new(90.0, 70.0, 20.0, 20.0)), &frame_image(0.0))
            .unwrap();
        assert!((det_low.radius_mm - 470.0).abs() < 1e-9);
    }

    #[test]
    fn test_panorama_column_encodes_angle() {
        let converter = CoordinateConverter::new(rig()).unwrap();
        let pano = MappedImage {
            image: RgbImage::new(200, 100),
            mapping: PixelToAngle::Affine {
                angle_at_col0_deg: 10.0,
                deg_per_col: 0.1,
            },
            source_frames: vec![0, 1],
        };

        // Center column 100 maps to 10 + 0.1 * 100 = 20 degrees
        let det = converter
            .convert(&raw(BoundingBox::new(90.0, 40.0, 20.0, 20.0)), &pano)
            .unwrap();
        assert!((det.angle_deg - 20.0).abs() < 1e-9);
        assert!((det.radius_mm - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_angle_wraps_into_range() {
        let converter = CoordinateConverter::new(rig()).unwrap();
        // Capture angle near the wrap point, box left of center pushes past it
        let det = converter
            .convert(&raw(BoundingBox::new(10.0, 40.0, 20.0, 20.0)), &frame_image(359.9))
            .unwrap();
        assert!(det.angle_deg >= 0.0 && det.angle_deg < 360.0);
    }

    #[test]
    fn test_border_box_flagged_truncated() {
        let converter = CoordinateConverter::new(rig()).unwrap();
        let det = converter
            .convert(&raw(BoundingBox::new(0.0, 40.0, 20.0, 20.0)), &frame_image(0.0))
            .unwrap();
        assert!(det.truncated);
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let converter = CoordinateConverter::new(rig()).unwrap();
        let bbox = BoundingBox::new(37.5, 12.25, 24.0, 18.0);
        let image = frame_image(42.0);

        let first = converter.convert(&raw(bbox), &image).unwrap();
        for _ in 0..10 {
            let again = converter.convert(&raw(bbox), &image).unwrap();
            assert!((again.angle_deg - first.angle_deg).abs() < 1e-12);
            assert!((again.radius_mm - first.radius_mm).abs() < 1e-12);
        }
    }

    #[test]
    fn test_invalid_bbox_rejected() {
        let converter = CoordinateConverter::new(rig()).unwrap();
        let result = converter.convert(
            &raw(BoundingBox::new(f32::NAN, 0.0, 10.0, 10.0)),
            &frame_image(0.0),
        );
        assert!(matches!(result, Err(VisionError::Geometry(_))));
    }
}
