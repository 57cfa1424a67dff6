//! Object localization over the session's working image set
//!
//! Thin orchestration around the injected detection capability: batches
//! images when the capability supports it, filters detections below the
//! confidence threshold, and absorbs per-image failures so one bad frame
//! never aborts a session.

use crate::admission::InferenceGate;
use crate::capability::Detector;
use crate::error::VisionError;
use crate::stitcher::MappedImage;
use image::RgbImage;
use sortbot_core::{Detection, RawDetection, SessionConfig};
use std::sync::Arc;
use tracing::{debug, warn};

/// Detections kept per image; the most confident win when a model floods
const MAX_DETECTIONS_PER_IMAGE: usize = 100;

/// Result of the detection stage
#[derive(Debug)]
pub struct LocalizeOutcome {
    pub detections: Vec<RawDetection>,
    /// Images whose inference failed and degraded to an empty list
    pub soft_failures: usize,
}

/// Runs the detection capability over every working image of a session
pub struct ObjectLocalizer<D: Detector + ?Sized> {
    detector: Arc<D>,
    gate: Arc<InferenceGate>,
}

impl<D: Detector + ?Sized> ObjectLocalizer<D> {
    pub fn new(detector: Arc<D>, gate: Arc<InferenceGate>) -> Self {
        Self { detector, gate }
    }

    /// Detect objects on all images.
    ///
    /// Capability errors and timeouts on single images degrade to empty
    /// detection lists; only admission exhaustion propagates, as a
    /// retryable error.
    pub async fn localize(
        &self,
        images: &[MappedImage],
        config: &SessionConfig,
    ) -> Result<LocalizeOutcome, VisionError> {
        let threshold = config.confidence_threshold;
        let mut per_image: Vec<Option<Vec<Detection>>> = vec![None; images.len()];
        let mut soft_failures = 0;

        if self.detector.supports_batching() {
            for (chunk_idx, chunk) in images.chunks(config.batch_size).enumerate() {
                let refs: Vec<&RgbImage> = chunk.iter().map(|m| &m.image).collect();
                let label = format!("detect-batch[{}]", chunk_idx);
                let offset = chunk_idx * config.batch_size;

                match self
                    .gate
                    .run(&label, self.detector.detect_batch(&refs, threshold))
                    .await
                {
                    Ok(results) if results.len() == chunk.len() => {
                        for (i, detections) in results.into_iter().enumerate() {
                            per_image[offset + i] = Some(detections);
                        }
                    }
                    Ok(results) => {
                        warn!(
                            "{} returned {} results for {} images, discarding batch",
                            label,
                            results.len(),
                            chunk.len()
                        );
                        soft_failures += chunk.len();
                    }
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(e) => {
                        warn!("{} failed: {}, continuing with empty detections", label, e);
                        soft_failures += chunk.len();
                    }
                }
            }
        } else {
            let calls = images.iter().enumerate().map(|(idx, mapped)| async move {
                let label = format!("detect[{}]", idx);
                let result = self
                    .gate
                    .run(&label, self.detector.detect(&mapped.image, threshold))
                    .await;
                (idx, result)
            });

            for (idx, result) in futures_util::future::join_all(calls).await {
                match result {
                    Ok(detections) => per_image[idx] = Some(detections),
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(e) => {
                        warn!(
                            "detect[{}] failed: {}, continuing with empty detections",
                            idx, e
                        );
                        soft_failures += 1;
                    }
                }
            }
        }

        let mut raw = Vec::new();
        for (image_idx, detections) in per_image.into_iter().enumerate() {
            let Some(mut detections) = detections else {
                continue;
            };

            detections.retain(|d| {
                if !d.bbox.is_valid() || !d.confidence.is_finite() {
                    warn!("Discarding malformed detection on image {}", image_idx);
                    return false;
                }
                d.confidence >= threshold
            });

            if detections.len() > MAX_DETECTIONS_PER_IMAGE {
                detections.sort_by(|a, b| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                detections.truncate(MAX_DETECTIONS_PER_IMAGE);
            }

            debug!("Image {} yielded {} detections", image_idx, detections.len());
            raw.extend(detections.into_iter().map(|d| RawDetection {
                image_idx,
                bbox: d.bbox,
                class: d.class,
                confidence: d.confidence,
            }));
        }

        Ok(LocalizeOutcome {
            detections: raw,
            soft_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockDetector;
    use crate::stitcher::PixelToAngle;
    use sortbot_core::{BoundingBox, GateConfig};

    fn mapped_image() -> MappedImage {
        MappedImage {
            image: RgbImage::new(32, 32),
            mapping: PixelToAngle::Frame {
                capture_angle_deg: 0.0,
            },
            source_frames: vec![0],
        }
    }

    fn gate() -> Arc<InferenceGate> {
        Arc::new(InferenceGate::new(GateConfig::default()).unwrap())
    }

    fn detection(class: &str, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(5.0, 5.0, 10.0, 10.0),
            class: class.to_string(),
            confidence,
        }
    }

    #[tokio::test]
    async fn test_localize_filters_below_threshold() {
        let mut mock = MockDetector::new();
        mock.expect_supports_batching().return_const(false);
        mock.expect_detect().returning(|_, _| {
            Ok(vec![detection("bolt", 0.9), detection("bolt", 0.3)])
        });

        let localizer = ObjectLocalizer::new(Arc::new(mock), gate());
        let outcome = localizer
            .localize(&[mapped_image()], &SessionConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.detections.len(), 1);
        assert_eq!(outcome.detections[0].confidence, 0.9);
        assert_eq!(outcome.soft_failures, 0);
    }

    #[tokio::test]
    async fn test_localize_absorbs_per_image_failure() {
        let mut mock = MockDetector::new();
        mock.expect_supports_batching().return_const(false);
        let mut call = 0;
        mock.expect_detect().returning_st(move |_, _| {
            call += 1;
            if call == 1 {
                Err(VisionError::Inference("model crashed".to_string()))
            } else {
                Ok(vec![detection("bolt", 0.8)])
            }
        });

        let localizer = ObjectLocalizer::new(Arc::new(mock), gate());
        let outcome = localizer
            .localize(&[mapped_image(), mapped_image()], &SessionConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.soft_failures, 1);
        assert_eq!(outcome.detections.len(), 1);
    }

    #[tokio::test]
    async fn test_localize_tags_image_index() {
        let mut mock = MockDetector::new();
        mock.expect_supports_batching().return_const(false);
        mock.expect_detect()
            .returning(|_, _| Ok(vec![detection("bolt", 0.8)]));

        let localizer = ObjectLocalizer::new(Arc::new(mock), gate());
        let outcome = localizer
            .localize(&[mapped_image(), mapped_image()], &SessionConfig::default())
            .await
            .unwrap();

        let mut indices: Vec<usize> = outcome.detections.iter().map(|d| d.image_idx).collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_localize_uses_batching_when_supported() {
        let mut mock = MockDetector::new();
        mock.expect_supports_batching().return_const(true);
        mock.expect_detect_batch().times(1).returning(|images, _| {
            Ok(images
                .iter()
                .map(|_| vec![detection("bolt", 0.8)])
                .collect())
        });

        let localizer = ObjectLocalizer::new(Arc::new(mock), gate());
        let outcome = localizer
            .localize(
                &[mapped_image(), mapped_image(), mapped_image()],
                &SessionConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.detections.len(), 3);
    }

    #[tokio::test]
    async fn test_localize_discards_mismatched_batch() {
        let mut mock = MockDetector::new();
        mock.expect_supports_batching().return_const(true);
        mock.expect_detect_batch()
            .returning(|_, _| Ok(vec![vec![detection("bolt", 0.8)]]));

        let localizer = ObjectLocalizer::new(Arc::new(mock), gate());
        let outcome = localizer
            .localize(&[mapped_image(), mapped_image()], &SessionConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.detections.len(), 0);
        assert_eq!(outcome.soft_failures, 2);
    }

    #[tokio::test]
    async fn test_localize_propagates_exhaustion() {
        let mut mock = MockDetector::new();
        mock.expect_supports_batching().return_const(false);
        mock.expect_detect()
            .returning(|_, _| Err(VisionError::Exhausted { waited_ms: 5000 }));

        let localizer = ObjectLocalizer::new(Arc::new(mock), gate());
        let result = localizer
            .localize(&[mapped_image()], &SessionConfig::default())
            .await;

        assert!(matches!(result, Err(VisionError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn test_localize_drops_malformed_boxes() {
        let mut mock = MockDetector::new();
        mock.expect_supports_batching().return_const(false);
        mock.expect_detect().returning(|_, _| {
            Ok(vec![
                Detection {
                    bbox: BoundingBox::new(f32::NAN, 0.0, 10.0, 10.0),
                    class: "bolt".to_string(),
                    confidence: 0.9,
                },
                detection("bolt", 0.8),
            ])
        });

        let localizer = ObjectLocalizer::new(Arc::new(mock), gate());
        let outcome = localizer
            .localize(&[mapped_image()], &SessionConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.detections.len(), 1);
    }
}
