//! Property tests for deduplication and coordinate conversion

use proptest::prelude::*;
use sortbot_core::{BoundingBox, CameraRig, PolarDetection, RawDetection, SessionConfig};
use sortbot_vision::{CoordinateConverter, Deduplicator, MappedImage, PixelToAngle};

fn dedup() -> Deduplicator {
    Deduplicator::new(SessionConfig::default()).unwrap()
}

fn test_rig() -> CameraRig {
    CameraRig {
        image_width: 200,
        image_height: 100,
        horizontal_fov_deg: 60.0,
        arm_radius_px: 1000.0,
        mm_per_px: 0.5,
        angular_range_deg: 360.0,
    }
}

fn arb_detection() -> impl Strategy<Value = PolarDetection> {
    (
        0.0f64..360.0,
        0.0f64..2000.0,
        prop::sample::select(vec!["bolt", "nut", "wrench"]),
        0.05f32..1.0,
        0.0f32..180.0,
        0.0f32..80.0,
    )
        .prop_map(|(angle_deg, radius_mm, class, confidence, left, top)| PolarDetection {
            image_idx: 0,
            bbox: BoundingBox::new(left, top, 20.0, 20.0),
            class: class.to_string(),
            confidence,
            truncated: false,
            angle_deg,
            radius_mm,
        })
}

proptest! {
    /// Never more objects than detections, and every detection lands in
    /// exactly one object
    #[test]
    fn dedup_partitions_detections(
        detections in prop::collection::vec(arb_detection(), 0..30)
    ) {
        let total = detections.len();
        let objects = dedup().merge(detections);

        prop_assert!(objects.len() <= total);
        let member_total: usize = objects.iter().map(|o| o.member_count()).sum();
        prop_assert_eq!(member_total, total);
    }

    /// The partition does not depend on input order
    #[test]
    fn dedup_is_order_independent(
        detections in prop::collection::vec(arb_detection(), 0..20),
        rotation in 0usize..20
    ) {
        let forward = dedup().merge(detections.clone());

        let mut rotated = detections;
        if !rotated.is_empty() {
            let r = rotation % rotated.len();
            rotated.rotate_left(r);
        }
        let shuffled = dedup().merge(rotated);

        prop_assert_eq!(forward.len(), shuffled.len());
        for (a, b) in forward.iter().zip(shuffled.iter()) {
            prop_assert_eq!(&a.class, &b.class);
            prop_assert_eq!(a.member_count(), b.member_count());
            prop_assert!((a.angle_deg - b.angle_deg).abs() < 1e-9);
            prop_assert!((a.radius_mm - b.radius_mm).abs() < 1e-9);
        }
    }

    /// Re-merging the collapsed representatives is the identity on the
    /// object set
    #[test]
    fn dedup_is_idempotent(
        detections in prop::collection::vec(arb_detection(), 0..20)
    ) {
        let first = dedup().merge(detections);

        let representatives: Vec<PolarDetection> =
            first.iter().map(|o| o.members[0].clone()).collect();
        let second = dedup().merge(representatives);

        prop_assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            prop_assert_eq!(&a.class, &b.class);
            prop_assert!((a.angle_deg - b.angle_deg).abs() < 1e-9);
            prop_assert!((a.radius_mm - b.radius_mm).abs() < 1e-9);
        }
    }

    /// Identical inputs give identical polar coordinates, repeatably
    #[test]
    fn converter_is_deterministic(
        left in 0.0f32..180.0,
        top in 0.0f32..80.0,
        width in 1.0f32..20.0,
        height in 1.0f32..20.0,
        capture_angle_deg in 0.0f64..360.0
    ) {
        let converter = CoordinateConverter::new(test_rig()).unwrap();
        let image = MappedImage {
            image: image::RgbImage::new(200, 100),
            mapping: PixelToAngle::Frame { capture_angle_deg },
            source_frames: vec![0],
        };
        let raw = RawDetection {
            image_idx: 0,
            bbox: BoundingBox::new(left, top, width, height),
            class: "bolt".to_string(),
            confidence: 0.9,
        };

        let first = converter.convert(&raw, &image).unwrap();
        let second = converter.convert(&raw, &image).unwrap();

        prop_assert!((first.angle_deg - second.angle_deg).abs() < 1e-12);
        prop_assert!((first.radius_mm - second.radius_mm).abs() < 1e-12);
        prop_assert!(first.angle_deg >= 0.0 && first.angle_deg < 360.0);
        prop_assert!(first.radius_mm >= 0.0);
    }

    /// Clamping yields a region fully inside the image, or nothing
    #[test]
    fn clamped_box_stays_inside_bounds(
        left in -100.0f32..300.0,
        top in -100.0f32..200.0,
        width in 0.1f32..200.0,
        height in 0.1f32..200.0
    ) {
        let bbox = BoundingBox::new(left, top, width, height);
        match bbox.clamped(200, 100) {
            Some(clamped) => {
                prop_assert!(clamped.left >= 0.0);
                prop_assert!(clamped.top >= 0.0);
                prop_assert!(clamped.right() <= 200.0);
                prop_assert!(clamped.bottom() <= 100.0);
                prop_assert!(clamped.area() > 0.0);
            }
            None => {
                // Fully outside the image: nothing croppable
            }
        }
    }

    /// Wrapped angles always land inside the rig's angular range
    #[test]
    fn wrap_angle_stays_in_range(angle_deg in -1000.0f64..1000.0) {
        let rig = test_rig();
        let wrapped = rig.wrap_angle(angle_deg);
        prop_assert!(wrapped >= 0.0 && wrapped < rig.angular_range_deg);
    }
}
