//! sortbot-core: shared data model for the SortBot cloud pipeline
//!
//! Holds the types every subsystem crate speaks: frames and sessions,
//! pixel-space and polar-space detections, merged objects and their feature
//! vectors, plus the shared error taxonomy and configuration.

pub mod config;
pub mod error;
pub mod session;
pub mod types;

pub use config::{CameraRig, GateConfig, SessionConfig, StitchConfig, StitchMode};
pub use error::{Error, Result};
pub use session::{
    FailureReason, Frame, FrameCapture, ObjectRecord, Session, SessionId, SessionReport,
    SessionState,
};
pub use types::{
    BoundingBox, Detection, FeatureVector, PolarDetection, PolarObject, RawDetection,
};
