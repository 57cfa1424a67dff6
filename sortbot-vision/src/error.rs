//! Error types for sortbot-vision

use sortbot_core::Error as CoreError;
use sortbot_core::FailureReason;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Stitch error: {0}")]
    Stitch(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Inference admission queue saturated after {waited_ms}ms")]
    Exhausted { waited_ms: u64 },

    #[error("Session failed: {0}")]
    SessionFailed(FailureReason),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl VisionError {
    /// True for errors the caller may retry by resubmitting the session
    /// (the inference gate was saturated, not the session itself broken)
    pub fn is_retryable(&self) -> bool {
        matches!(self, VisionError::Exhausted { .. })
    }
}
