//! Panorama assembly from angularly ordered frames
//!
//! Frames captured at known arm angles are placed side by side in angular
//! order, trimming the configured overlap width between adjacent frames. The
//! composed panorama records an affine column-to-angle mapping so later
//! stages can recover the absolute capture angle of any pixel column.

use crate::error::VisionError;
use bytes::Bytes;
use image::RgbImage;
use sortbot_core::{CameraRig, Frame, StitchConfig, StitchMode};
use tracing::{debug, info, warn};

/// Mapping from a pixel column of an image to the arm angle it was
/// captured at
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelToAngle {
    /// Unstitched frame: every column shares the frame's capture angle
    Frame { capture_angle_deg: f64 },
    /// Panorama: `angle(col) = angle_at_col0_deg + deg_per_col * col`
    Affine {
        angle_at_col0_deg: f64,
        deg_per_col: f64,
    },
}

impl PixelToAngle {
    /// Base capture angle for a pixel column
    pub fn base_angle_at(&self, col: f64) -> f64 {
        match self {
            PixelToAngle::Frame { capture_angle_deg } => *capture_angle_deg,
            PixelToAngle::Affine {
                angle_at_col0_deg,
                deg_per_col,
            } => angle_at_col0_deg + deg_per_col * col,
        }
    }

    pub fn is_panorama(&self) -> bool {
        matches!(self, PixelToAngle::Affine { .. })
    }
}

/// An image the detection stage runs on: an original frame or a composed
/// panorama, together with its pixel-to-angle mapping
#[derive(Debug, Clone)]
pub struct MappedImage {
    pub image: RgbImage,
    pub mapping: PixelToAngle,
    /// Sequence indices of the source frames
    pub source_frames: Vec<u32>,
}

impl MappedImage {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            image: frame.image.clone(),
            mapping: PixelToAngle::Frame {
                capture_angle_deg: frame.angle_deg,
            },
            source_frames: vec![frame.index],
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Result of the stitching stage
#[derive(Debug)]
pub struct StitchOutcome {
    pub images: Vec<MappedImage>,
    /// False when stitching was disabled or degraded to passthrough
    pub stitched: bool,
    /// Frames excluded for invalid angle metadata (soft failures)
    pub excluded_frames: usize,
}

/// Assembles session frames into panoramas, or passes them through
pub struct ImageStitcher {
    config: StitchConfig,
    rig: CameraRig,
}

impl ImageStitcher {
    pub fn new(config: StitchConfig, rig: CameraRig) -> Self {
        Self { config, rig }
    }

    /// Assemble the session's working image set.
    ///
    /// Frames with non-finite or out-of-range capture angles are excluded
    /// and logged; pairwise overlap below the configured minimum degrades
    /// the whole session to no-stitch mode.
    pub fn assemble(&self, frames: &[Frame]) -> StitchOutcome {
        let mut usable: Vec<&Frame> = Vec::with_capacity(frames.len());
        for frame in frames {
            if frame.angle_deg.is_finite()
                && frame.angle_deg >= 0.0
                && frame.angle_deg < self.rig.angular_range_deg
            {
                usable.push(frame);
            } else {
                warn!(
                    "Frame {} excluded: capture angle {} outside [0, {})",
                    frame.index, frame.angle_deg, self.rig.angular_range_deg
                );
            }
        }
        let excluded_frames = frames.len() - usable.len();

        // Angular order; sequence index breaks ties deterministically
        usable.sort_by(|a, b| {
            a.angle_deg
                .partial_cmp(&b.angle_deg)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });

        if !self.config.enabled || usable.len() < 2 {
            return self.passthrough(usable, excluded_frames);
        }

        // Overlap between adjacent frames, estimated from their angular gap.
        // A gap of a full FOV means zero overlap.
        for pair in usable.windows(2) {
            let gap = pair[1].angle_deg - pair[0].angle_deg;
            let overlap = 1.0 - gap / self.rig.horizontal_fov_deg;
            if overlap < self.config.min_overlap as f64 {
                warn!(
                    "Overlap {:.2} between frames {} and {} below minimum {:.2}, \
                     degrading session to no-stitch mode",
                    overlap, pair[0].index, pair[1].index, self.config.min_overlap
                );
                return self.passthrough(usable, excluded_frames);
            }
        }

        let composed = {
            let chunks: Vec<&[&Frame]> = match self.config.mode {
                StitchMode::Full => vec![&usable[..]],
                StitchMode::Chunked { max_frames } => usable.chunks(max_frames).collect(),
            };
            chunks
                .iter()
                .map(|chunk| self.compose(chunk))
                .collect::<Result<Vec<MappedImage>, VisionError>>()
        };

        match composed {
            Ok(images) => {
                info!(
                    "Stitched {} frames into {} panorama(s)",
                    usable.len(),
                    images.len()
                );
                StitchOutcome {
                    images,
                    stitched: true,
                    excluded_frames,
                }
            }
            Err(e) => {
                warn!("Panorama composition failed: {}, degrading to no-stitch", e);
                self.passthrough(usable, excluded_frames)
            }
        }
    }

    fn passthrough(&self, usable: Vec<&Frame>, excluded_frames: usize) -> StitchOutcome {
        StitchOutcome {
            images: usable.iter().map(|f| MappedImage::from_frame(f)).collect(),
            stitched: false,
            excluded_frames,
        }
    }

    /// Compose one panorama from an angularly ordered chunk of frames
    fn compose(&self, chunk: &[&Frame]) -> Result<MappedImage, VisionError> {
        if chunk.len() == 1 {
            return Ok(MappedImage::from_frame(chunk[0]));
        }

        // Fixed trim width from the configured expected overlap
        let mut total_width: u64 = 0;
        let mut max_height: u32 = 0;
        let mut offsets = Vec::with_capacity(chunk.len());
        for (i, frame) in chunk.iter().enumerate() {
            if i > 0 {
                let trim = (self.config.expected_overlap * frame.width() as f32).round() as u64;
                total_width = total_width.saturating_sub(trim.min(total_width));
            }
            offsets.push(total_width);
            total_width += frame.width() as u64;
            max_height = max_height.max(frame.height());
        }

        if total_width == 0 || max_height == 0 {
            return Err(VisionError::Stitch("Empty panorama canvas".to_string()));
        }
        if total_width * max_height as u64 > 100_000_000 {
            return Err(VisionError::Stitch(
                "Panorama canvas too large (max 100M pixels)".to_string(),
            ));
        }

        let mut canvas = RgbImage::new(total_width as u32, max_height);
        for (frame, offset) in chunk.iter().zip(&offsets) {
            image::imageops::replace(&mut canvas, &frame.image, *offset as i64, 0);
        }

        // Affine column-to-angle mapping through the first and last frame
        // centers; exact for evenly spaced sweeps
        let first_center = offsets[0] as f64 + chunk[0].width() as f64 / 2.0;
        let last_center =
            offsets[chunk.len() - 1] as f64 + chunk[chunk.len() - 1].width() as f64 / 2.0;
        let span_cols = last_center - first_center;
        let deg_per_col = if span_cols.abs() > f64::EPSILON {
            (chunk[chunk.len() - 1].angle_deg - chunk[0].angle_deg) / span_cols
        } else {
            self.rig.deg_per_col()
        };
        let angle_at_col0_deg = chunk[0].angle_deg - deg_per_col * first_center;

        debug!(
            "Composed panorama from {} frames: {}x{}, {:.4} deg/col",
            chunk.len(),
            total_width,
            max_height,
            deg_per_col
        );

        Ok(MappedImage {
            image: canvas,
            mapping: PixelToAngle::Affine {
                angle_at_col0_deg,
                deg_per_col,
            },
            source_frames: chunk.iter().map(|f| f.index).collect(),
        })
    }
}

/// Encode a panorama as PNG for the object storage collaborator
pub fn encode_png(image: &RgbImage) -> Result<Bytes, VisionError> {
    let mut buf = Vec::new();
    image.write_to(
        &mut std::io::Cursor::new(&mut buf),
        image::ImageOutputFormat::Png,
    )?;
    Ok(Bytes::from(buf))
}
