//! System-wide cap on simultaneous outbound generation calls.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LimiterError {
    #[error("Cancelled while waiting for a generation slot")]
    Cancelled,

    #[error("Generation limiter closed")]
    Closed,
}

/// Shared between all dispatchers of a process. Cloning shares the slots.
#[derive(Debug, Clone)]
pub struct GenerationLimiter {
    slots: Option<Arc<Semaphore>>,
}

/// Held for the duration of one provider call.
#[derive(Debug)]
pub struct GenerationPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl GenerationLimiter {
    /// `max_concurrent == 0` disables the limit.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            slots: (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent))),
        }
    }

    pub fn unlimited() -> Self {
        Self { slots: None }
    }

    /// Free slots, or `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.slots.as_ref().map(|s| s.available_permits())
    }

    /// Wait for a slot. Returns early with [`LimiterError::Cancelled`] when
    /// `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GenerationPermit, LimiterError> {
        let Some(slots) = &self.slots else {
            return Ok(GenerationPermit { _permit: None });
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(LimiterError::Cancelled),
            permit = Arc::clone(slots).acquire_owned() => permit
                .map(|p| GenerationPermit { _permit: Some(p) })
                .map_err(|_| LimiterError::Closed),
        }
    }
}
