//! Injected inference and collaborator capabilities
//!
//! The pipeline never owns a model or a datastore. Detection, embedding,
//! persistence and panorama storage are all capabilities injected at
//! construction, so alternative implementations can be substituted without
//! touching the pipeline.

use crate::error::VisionError;
use async_trait::async_trait;
use bytes::Bytes;
use image::RgbImage;
use sortbot_core::{Detection, SessionId, SessionReport};

/// Per-channel normalization statistics for embedding input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl ChannelStats {
    /// ImageNet statistics, the default for torchvision-style backbones
    pub fn imagenet() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// Input contract of an embedding capability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbedderSpec {
    /// Expected crop dimensions after resizing
    pub input_width: u32,
    pub input_height: u32,
    pub stats: ChannelStats,
    /// Length of the produced feature vectors
    pub output_len: usize,
}

/// Opaque object detection capability.
///
/// Implementations report whether they support batched inference; the
/// localizer falls back to per-image invocation otherwise.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Detector: Send + Sync {
    /// Detect objects on one image, returning boxes with class and confidence
    async fn detect(&self, image: &RgbImage, threshold: f32)
        -> Result<Vec<Detection>, VisionError>;

    fn supports_batching(&self) -> bool {
        false
    }

    /// Detect objects on a batch of images. The default forwards to
    /// `detect` per image; batching implementations override this.
    async fn detect_batch<'a>(
        &self,
        images: &[&'a RgbImage],
        threshold: f32,
    ) -> Result<Vec<Vec<Detection>>, VisionError> {
        let mut results = Vec::with_capacity(images.len());
        for image in images {
            results.push(self.detect(image, threshold).await?);
        }
        Ok(results)
    }
}

/// Opaque feature embedding capability.
///
/// Crops are delivered already resized and channel-normalized according to
/// `spec()`, in CHW layout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    fn spec(&self) -> EmbedderSpec;

    async fn embed_batch(&self, crops: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, VisionError>;
}

/// Persistence collaborator: consumes the finalized object records of a
/// session. Storage format and schema are owned by the collaborator.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    async fn persist(&self, report: &SessionReport) -> Result<(), VisionError>;
}

/// Object storage collaborator for derived panorama images
#[async_trait]
pub trait PanoramaStore: Send + Sync {
    async fn put_panorama(
        &self,
        session_id: &SessionId,
        index: usize,
        png: Bytes,
    ) -> Result<(), VisionError>;
}
