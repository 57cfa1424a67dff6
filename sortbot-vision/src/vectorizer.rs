//! Feature embedding of unique objects
//!
//! Crops each object's representative bounding box from its source image,
//! resizes and normalizes the crop to the embedding capability's input
//! contract, and batches crops through the inference gate. Objects whose
//! crop cannot be produced are kept in the object set without a vector.

use crate::admission::InferenceGate;
use crate::capability::{Embedder, EmbedderSpec};
use crate::error::VisionError;
use crate::stitcher::MappedImage;
use crate::utils;
use image::imageops::FilterType;
use sortbot_core::{BoundingBox, FeatureVector, PolarObject, SessionConfig};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of the vectorization stage; `vectors` is positionally aligned
/// with the input object list
#[derive(Debug)]
pub struct VectorizeOutcome {
    pub vectors: Vec<Option<FeatureVector>>,
    /// Embedding batches that failed and left their objects without vectors
    pub soft_failures: usize,
    /// Objects whose clamped crop had zero area
    pub unvectorizable: usize,
}

/// Produces one feature vector per unique object
pub struct Vectorizer<E: Embedder + ?Sized> {
    embedder: Arc<E>,
    gate: Arc<InferenceGate>,
}

impl<E: Embedder + ?Sized> Vectorizer<E> {
    pub fn new(embedder: Arc<E>, gate: Arc<InferenceGate>) -> Self {
        Self { embedder, gate }
    }

    /// Embed every object's representative crop.
    ///
    /// Out-of-bounds boxes are clamped before cropping; a clamped region
    /// with zero area marks the object unvectorizable rather than dropping
    /// it. Only admission exhaustion aborts, as a retryable error.
    pub async fn vectorize(
        &self,
        images: &[MappedImage],
        objects: &[PolarObject],
        config: &SessionConfig,
    ) -> Result<VectorizeOutcome, VisionError> {
        let spec = self.embedder.spec();
        let mut unvectorizable = 0;

        let mut crops: Vec<Option<Vec<f32>>> = Vec::with_capacity(objects.len());
        for object in objects {
            let Some(image) = images.get(object.image_idx) else {
                warn!(
                    "Object {} references missing image {}, marking unvectorizable",
                    object.id, object.image_idx
                );
                unvectorizable += 1;
                crops.push(None);
                continue;
            };

            match prepare_crop(image, &object.bbox, &spec) {
                Some(tensor) => crops.push(Some(tensor)),
                None => {
                    warn!(
                        "Object {} crop has zero area after clamping, marking unvectorizable",
                        object.id
                    );
                    unvectorizable += 1;
                    crops.push(None);
                }
            }
        }

        let pending: Vec<usize> = (0..crops.len()).filter(|&i| crops[i].is_some()).collect();
        let mut vectors: Vec<Option<FeatureVector>> = vec![None; objects.len()];
        let mut soft_failures = 0;

        for (chunk_idx, chunk) in pending.chunks(config.batch_size).enumerate() {
            let batch: Vec<Vec<f32>> = chunk
                .iter()
                .map(|&i| crops[i].take().unwrap_or_default())
                .collect();
            let label = format!("embed-batch[{}]", chunk_idx);

            match self
                .gate
                .run(&label, self.embedder.embed_batch(&batch))
                .await
            {
                Ok(results) if results.len() == chunk.len() => {
                    for (&slot, values) in chunk.iter().zip(results) {
                        if values.len() != spec.output_len {
                            warn!(
                                "{} returned a vector of length {} (expected {})",
                                label,
                                values.len(),
                                spec.output_len
                            );
                        }
                        vectors[slot] = Some(FeatureVector::new(values));
                    }
                }
                Ok(results) => {
                    warn!(
                        "{} returned {} vectors for {} crops, discarding batch",
                        label,
                        results.len(),
                        chunk.len()
                    );
                    soft_failures += chunk.len();
                }
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("{} failed: {}, objects keep no vector", label, e);
                    soft_failures += chunk.len();
                }
            }
        }

        debug!(
            "Vectorized {}/{} objects ({} unvectorizable, {} soft failures)",
            vectors.iter().filter(|v| v.is_some()).count(),
            objects.len(),
            unvectorizable,
            soft_failures
        );

        Ok(VectorizeOutcome {
            vectors,
            soft_failures,
            unvectorizable,
        })
    }
}

/// Clamp, crop, resize and normalize one object region. `None` when the
/// clamped region has zero area.
fn prepare_crop(
    image: &MappedImage,
    bbox: &BoundingBox,
    spec: &EmbedderSpec,
) -> Option<Vec<f32>> {
    let clamped = bbox.clamped(image.width(), image.height())?;

    let x = clamped.left.floor() as u32;
    let y = clamped.top.floor() as u32;
    let width = (clamped.right().ceil() as u32).min(image.width()) - x;
    let height = (clamped.bottom().ceil() as u32).min(image.height()) - y;
    if width == 0 || height == 0 {
        return None;
    }

    let crop = image::imageops::crop_imm(&image.image, x, y, width, height).to_image();
    let resized = image::imageops::resize(
        &crop,
        spec.input_width,
        spec.input_height,
        FilterType::Triangle,
    );

    let mut tensor = utils::image_to_chw(&resized);
    utils::apply_channel_stats(&mut tensor, &spec.stats);
    Some(tensor)
}
