//! Single-slot run guard.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::PipelineError;

/// At most one run in flight per stage.
///
/// [`try_enter`](RunGuard::try_enter) is the debounce path: it fails
/// immediately while a run holds the slot. [`enter`](RunGuard::enter)
/// waits for the slot instead.
#[derive(Debug, Clone)]
pub struct RunGuard {
    slot: Arc<Semaphore>,
}

/// Holding this keeps the guard closed.
#[derive(Debug)]
pub struct RunPermit {
    _permit: OwnedSemaphorePermit,
}

impl RunGuard {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn try_enter(&self) -> Option<RunPermit> {
        self.slot
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| RunPermit { _permit: permit })
    }

    pub async fn enter(&self) -> Result<RunPermit, PipelineError> {
        self.slot
            .clone()
            .acquire_owned()
            .await
            .map(|permit| RunPermit { _permit: permit })
            .map_err(|_| PipelineError::Internal("run guard closed".into()))
    }

    pub fn is_held(&self) -> bool {
        self.slot.available_permits() == 0
    }
}

impl Default for RunGuard {
    fn default() -> Self {
        Self::new()
    }
}
