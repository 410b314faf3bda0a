//! Concurrency slots for step execution

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many instances execute steps at the same time
///
/// A slot is held only while steps run. Suspended instances hold no
/// slot, so thousands of waits can coexist under a small budget.
#[derive(Clone)]
pub struct WorkerSlots {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl WorkerSlots {
    /// Create a slot pool with the given capacity
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Acquire one slot, waiting if the pool is exhausted
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquire cannot fail.
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("slot semaphore closed")
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of slots currently held
    pub fn in_use(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }
}
