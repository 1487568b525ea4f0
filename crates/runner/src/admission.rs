use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{RunnerError, RunnerResult};

/// Fixed-capacity slot pool bounding concurrent sandbox runs.
#[derive(Clone)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
}

/// A held slot; released when dropped.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(capacity: i64) -> RunnerResult<Self> {
        let capacity = usize::try_from(capacity)
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| {
                RunnerError::Config(format!("queue capacity must be positive (got {capacity})"))
            })?;
        Ok(Self {
            slots: Arc::new(Semaphore::new(capacity)),
        })
    }

    /// Wait for a free slot, or give up when `cancel` fires. A canceled
    /// waiter consumes nothing.
    pub async fn acquire(&self, cancel: &CancellationToken) -> RunnerResult<Slot> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunnerError::Canceled),
            permit = self.slots.clone().acquire_owned() => {
                let permit = permit
                    .map_err(|_| RunnerError::Internal("admission gate closed".into()))?;
                Ok(Slot { _permit: permit })
            }
        }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
