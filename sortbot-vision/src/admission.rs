//! Bounded-concurrency admission for shared inference capacity
//!
//! Detection and embedding run on a shared, scarce resource (typically a
//! GPU). Every capability invocation across all concurrent sessions passes
//! through one `InferenceGate` so that capacity is never oversubscribed.
//! Callers beyond the concurrency limit queue in arrival order; queueing
//! beyond the configured wait bound is reported as a retryable exhaustion.

use crate::error::VisionError;
use sortbot_core::GateConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// FIFO admission gate for detector and embedder calls
pub struct InferenceGate {
    permits: Arc<Semaphore>,
    max_queue_wait: Duration,
    call_timeout: Duration,
}

impl InferenceGate {
    pub fn new(config: GateConfig) -> Result<Self, VisionError> {
        config
            .validate()
            .map_err(|e| VisionError::Core(sortbot_core::Error::Configuration(e)))?;

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            max_queue_wait: Duration::from_millis(config.max_queue_wait_ms),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        })
    }

    /// Run one inference call under admission control.
    ///
    /// Waits for a permit (FIFO), then bounds the call itself with the
    /// per-call timeout. A permit that cannot be obtained within the queue
    /// wait bound returns `VisionError::Exhausted`.
    pub async fn run<T, F>(&self, label: &str, call: F) -> Result<T, VisionError>
    where
        F: Future<Output = Result<T, VisionError>>,
    {
        let queued_at = Instant::now();
        let permit = match tokio::time::timeout(self.max_queue_wait, self.permits.acquire()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(VisionError::Inference(
                    "Inference gate closed".to_string(),
                ))
            }
            Err(_) => {
                let waited_ms = queued_at.elapsed().as_millis() as u64;
                warn!("{} admission timed out after {}ms", label, waited_ms);
                return Err(VisionError::Exhausted { waited_ms });
            }
        };

        debug!(
            "{} admitted after {}ms queue wait",
            label,
            queued_at.elapsed().as_millis()
        );

        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(VisionError::Inference(format!(
                "{} timed out after {}ms",
                label,
                self.call_timeout.as_millis()
            ))),
        };

        drop(permit);
        result
    }

    /// Permits currently available (not in flight)
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
