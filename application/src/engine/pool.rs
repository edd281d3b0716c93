//! Global worker pool.
//!
//! One fair semaphore caps concurrently executing workers across every
//! session. A stage acquires all of its permits at the execute boundary,
//! before launching anything, so a stage never stalls on the pool once
//! its workers are running. Waiters queue FIFO.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire permits for a whole stage at once. A stage wider than the
    /// pool acquires the full pool instead of deadlocking.
    pub async fn acquire_stage(&self, workers: usize) -> OwnedSemaphorePermit {
        let wanted = workers.clamp(1, self.capacity) as u32;
        self.semaphore
            .clone()
            .acquire_many_owned(wanted)
            .await
            .expect("worker pool semaphore never closes")
    }
}
