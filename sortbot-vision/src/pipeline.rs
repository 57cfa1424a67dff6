//! Per-session pipeline orchestration
//!
//! Runs one session through the stage machine
//! `Started → Stitching → Detecting → Converting → Deduplicating →
//! Vectorizing → Finished`, with `Failed` reachable from any stage.
//! Transitions are sequential and one-directional; cancellation is checked
//! at every transition. Soft failures are absorbed along the way and only
//! reported; unrecoverable conditions terminate the session with a reason.

use crate::admission::InferenceGate;
use crate::capability::{Detector, Embedder, ObjectSink, PanoramaStore};
use crate::converter::CoordinateConverter;
use crate::dedup::Deduplicator;
use crate::error::VisionError;
use crate::localizer::ObjectLocalizer;
use crate::stitcher::{self, ImageStitcher, MappedImage};
use crate::vectorizer::Vectorizer;
use chrono::Utc;
use parking_lot::RwLock;
use sortbot_core::{
    CameraRig, FailureReason, Frame, FrameCapture, ObjectRecord, Session, SessionId,
    SessionReport, SessionState,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Cooperative cancellation flag, checked at every stage transition
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<RwLock<bool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.cancelled.write() = true;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.read()
    }
}

/// Decode transport captures into frames, skipping undecodable images as
/// soft failures. Returns the decoded frames and the skip count.
pub fn decode_captures(captures: &[FrameCapture]) -> (Vec<Frame>, usize) {
    let mut frames = Vec::with_capacity(captures.len());
    let mut skipped = 0;

    for capture in captures {
        match Frame::from_capture(capture) {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                warn!("Frame {} failed to decode: {}, skipping", capture.index, e);
                skipped += 1;
            }
        }
    }

    (frames, skipped)
}

/// Orchestrates the localization pipeline for one session at a time.
///
/// One pipeline instance serves many sessions; sessions share nothing but
/// the inference gate, so concurrent `run` calls need no further locking.
pub struct SessionPipeline<D, E, S, P>
where
    D: Detector,
    E: Embedder,
    S: ObjectSink,
    P: PanoramaStore,
{
    localizer: ObjectLocalizer<D>,
    vectorizer: Vectorizer<E>,
    converter: CoordinateConverter,
    sink: Arc<S>,
    panorama_store: Arc<P>,
    rig: CameraRig,
}

impl<D, E, S, P> SessionPipeline<D, E, S, P>
where
    D: Detector,
    E: Embedder,
    S: ObjectSink,
    P: PanoramaStore,
{
    pub fn new(
        detector: Arc<D>,
        embedder: Arc<E>,
        sink: Arc<S>,
        panorama_store: Arc<P>,
        gate: Arc<InferenceGate>,
        rig: CameraRig,
    ) -> Result<Self, VisionError> {
        let converter = CoordinateConverter::new(rig.clone())?;

        Ok(Self {
            localizer: ObjectLocalizer::new(detector, gate.clone()),
            vectorizer: Vectorizer::new(embedder, gate),
            converter,
            sink,
            panorama_store,
            rig,
        })
    }

    /// Run one session to a terminal state.
    ///
    /// Terminal outcomes (`Finished` as well as `Failed` with a reason) are
    /// returned as reports; `Err` is reserved for conditions outside the
    /// session itself, such as admission exhaustion (retryable) or a
    /// persistence handoff failure.
    pub async fn run(&self, session: Session) -> Result<SessionReport, VisionError> {
        self.run_with_cancel(session, CancelFlag::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        session: Session,
        cancel: CancelFlag,
    ) -> Result<SessionReport, VisionError> {
        let mut state = SessionState::Started;
        let mut soft_failures = 0usize;
        info!(
            "Session {} started with {} frames (model {})",
            session.id,
            session.frames.len(),
            session.config.detection_model
        );

        // Sessions without a single usable frame never reach the detector
        let usable_frames = session
            .frames
            .iter()
            .filter(|f| {
                f.angle_deg.is_finite()
                    && f.angle_deg >= 0.0
                    && f.angle_deg < self.rig.angular_range_deg
            })
            .count();
        if usable_frames == 0 {
            return Ok(self.fail(
                &session,
                &mut state,
                FailureReason::UnrecoverableInput,
                soft_failures,
            ));
        }

        // Stitching
        if let Some(report) =
            self.advance(&session, &mut state, SessionState::Stitching, &cancel, soft_failures)
        {
            return Ok(report);
        }
        let stitch_outcome =
            ImageStitcher::new(session.config.stitch.clone(), self.rig.clone())
                .assemble(&session.frames);
        soft_failures += stitch_outcome.excluded_frames;
        if stitch_outcome.images.is_empty() {
            return Ok(self.fail(
                &session,
                &mut state,
                FailureReason::UnrecoverableInput,
                soft_failures,
            ));
        }
        if stitch_outcome.stitched {
            self.store_panoramas(&session.id, &stitch_outcome.images, &mut soft_failures)
                .await;
        }

        // Detecting
        if let Some(report) =
            self.advance(&session, &mut state, SessionState::Detecting, &cancel, soft_failures)
        {
            return Ok(report);
        }
        let localize = self
            .localizer
            .localize(&stitch_outcome.images, &session.config)
            .await?;
        soft_failures += localize.soft_failures;

        // Converting
        if let Some(report) =
            self.advance(&session, &mut state, SessionState::Converting, &cancel, soft_failures)
        {
            return Ok(report);
        }
        let mut polar = Vec::with_capacity(localize.detections.len());
        for raw in &localize.detections {
            match self
                .converter
                .convert(raw, &stitch_outcome.images[raw.image_idx])
            {
                Ok(detection) => polar.push(detection),
                Err(e) => {
                    warn!("Dropping unconvertible detection: {}", e);
                    soft_failures += 1;
                }
            }
        }

        // Deduplicating: requires every detection of the session, so this
        // is the pipeline's synchronization barrier
        if let Some(report) = self.advance(
            &session,
            &mut state,
            SessionState::Deduplicating,
            &cancel,
            soft_failures,
        ) {
            return Ok(report);
        }
        if polar.is_empty() {
            return Ok(self.fail(
                &session,
                &mut state,
                FailureReason::EmptyBarrier,
                soft_failures,
            ));
        }
        let objects = Deduplicator::new(session.config.clone())?.merge(polar);

        // Vectorizing
        if let Some(report) = self.advance(
            &session,
            &mut state,
            SessionState::Vectorizing,
            &cancel,
            soft_failures,
        ) {
            return Ok(report);
        }
        let vectorize = self
            .vectorizer
            .vectorize(&stitch_outcome.images, &objects, &session.config)
            .await?;
        soft_failures += vectorize.soft_failures;

        // Finished: a cancellation landing here discards the partial
        // vectorization output, which is safe to recompute per object
        if let Some(report) =
            self.advance(&session, &mut state, SessionState::Finished, &cancel, soft_failures)
        {
            return Ok(report);
        }

        let objects: Vec<ObjectRecord> = objects
            .into_iter()
            .zip(vectorize.vectors)
            .map(|(object, vector)| ObjectRecord { object, vector })
            .collect();

        let report = SessionReport {
            session_id: session.id.clone(),
            state,
            degraded: soft_failures > session.config.soft_failure_limit,
            soft_failures,
            objects,
            finished_at: Utc::now(),
        };

        self.sink.persist(&report).await?;
        info!(
            "Session {} finished with {} objects ({} soft failures{})",
            session.id,
            report.objects.len(),
            soft_failures,
            if report.degraded { ", degraded" } else { "" }
        );

        Ok(report)
    }

    /// Move to the next stage, or fail the session when cancelled
    fn advance(
        &self,
        session: &Session,
        state: &mut SessionState,
        next: SessionState,
        cancel: &CancelFlag,
        soft_failures: usize,
    ) -> Option<SessionReport> {
        if cancel.is_cancelled() {
            return Some(self.fail(session, state, FailureReason::Cancelled, soft_failures));
        }

        debug_assert!(state.can_advance_to(next));
        *state = next;
        info!("Session {} entered stage: {}", session.id, next);
        None
    }

    fn fail(
        &self,
        session: &Session,
        state: &mut SessionState,
        reason: FailureReason,
        soft_failures: usize,
    ) -> SessionReport {
        *state = SessionState::Failed(reason);
        warn!("Session {} failed: {}", session.id, reason);

        SessionReport {
            session_id: session.id.clone(),
            state: *state,
            objects: Vec::new(),
            degraded: soft_failures > session.config.soft_failure_limit,
            soft_failures,
            finished_at: Utc::now(),
        }
    }

    /// Offer derived panoramas to the object storage collaborator.
    /// Storage failures are soft: the session continues without them.
    async fn store_panoramas(
        &self,
        session_id: &SessionId,
        images: &[MappedImage],
        soft_failures: &mut usize,
    ) {
        for (idx, mapped) in images.iter().enumerate() {
            if !mapped.mapping.is_panorama() {
                continue;
            }

            match stitcher::encode_png(&mapped.image) {
                Ok(png) => {
                    if let Err(e) = self.panorama_store.put_panorama(session_id, idx, png).await {
                        warn!("Failed to store panorama {}: {}", idx, e);
                        *soft_failures += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to encode panorama {}: {}", idx, e);
                    *soft_failures += 1;
                }
            }
        }
    }
}
