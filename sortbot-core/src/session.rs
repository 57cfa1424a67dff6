//! Session lifecycle: identifiers, frames, states and the final report

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::types::{FeatureVector, PolarObject};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id, rejecting identifiers the platform cannot store.
    ///
    /// Identifiers must be 1-31 characters long and must not start with a
    /// digit.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() || id.len() > 31 {
            return Err(Error::InvalidSession(
                "Length must be between 1 and 31 characters".to_string(),
            ));
        }

        if id.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidSession(
                "Session ID cannot start with a number".to_string(),
            ));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One captured frame as delivered by the transport collaborator:
/// encoded image bytes, capture angle and sequence index
#[derive(Debug, Clone)]
pub struct FrameCapture {
    pub index: u32,
    pub angle_deg: f64,
    pub bytes: Bytes,
}

/// A decoded frame, immutable once captured
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence index within the session
    pub index: u32,
    /// Arm rotation when the frame was captured, in degrees
    pub angle_deg: f64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u32, angle_deg: f64, image: RgbImage) -> Self {
        Self {
            index,
            angle_deg,
            image,
        }
    }

    /// Decode a captured frame from its transport bytes
    pub fn from_capture(capture: &FrameCapture) -> Result<Self> {
        let image = image::load_from_memory(&capture.bytes)?.to_rgb8();
        Ok(Self::new(capture.index, capture.angle_deg, image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// One robot sweep: an ordered set of frames plus pipeline configuration
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub frames: Vec<Frame>,
    pub config: SessionConfig,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, frames: Vec<Frame>, config: SessionConfig) -> Result<Self> {
        config.validate().map_err(Error::Configuration)?;

        Ok(Self {
            id,
            frames,
            config,
            started_at: Utc::now(),
        })
    }
}

/// Why a session reached the terminal `Failed` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Zero frames, or every frame failed validation
    UnrecoverableInput,
    /// No polar detections existed at the deduplication barrier
    EmptyBarrier,
    /// The session was cancelled between stages
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::UnrecoverableInput => f.write_str("unrecoverable input"),
            FailureReason::EmptyBarrier => f.write_str("empty deduplication barrier"),
            FailureReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Pipeline state machine. Transitions are sequential and one-directional;
/// `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Started,
    Stitching,
    Detecting,
    Converting,
    Deduplicating,
    Vectorizing,
    Finished,
    Failed(FailureReason),
}

impl SessionState {
    fn order(&self) -> Option<u8> {
        match self {
            SessionState::Started => Some(0),
            SessionState::Stitching => Some(1),
            SessionState::Detecting => Some(2),
            SessionState::Converting => Some(3),
            SessionState::Deduplicating => Some(4),
            SessionState::Vectorizing => Some(5),
            SessionState::Finished => Some(6),
            SessionState::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed(_))
    }

    /// True when `next` is a legal transition from this state
    pub fn can_advance_to(&self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }

        match (self.order(), next.order()) {
            // Failure is reachable from any non-terminal state
            (Some(_), None) => true,
            (Some(current), Some(next)) => next == current + 1,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Started => f.write_str("started"),
            SessionState::Stitching => f.write_str("stitching"),
            SessionState::Detecting => f.write_str("detecting"),
            SessionState::Converting => f.write_str("converting"),
            SessionState::Deduplicating => f.write_str("deduplicating"),
            SessionState::Vectorizing => f.write_str("vectorizing"),
            SessionState::Finished => f.write_str("finished"),
            SessionState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// One finalized object: the merged detection cluster plus its embedding,
/// if one could be produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object: PolarObject,
    /// `None` when the object was unvectorizable (zero-area crop or
    /// embedding soft failure)
    pub vector: Option<FeatureVector>,
}

/// Final outcome of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub state: SessionState,
    pub objects: Vec<ObjectRecord>,
    /// Set when inference soft failures exceeded the configured limit
    pub degraded: bool,
    pub soft_failures: usize,
    pub finished_at: DateTime<Utc>,
}
