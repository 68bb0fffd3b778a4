//! Bounded slot pool limiting how many documents are mid-pipeline at once.
//!
//! The pool is independent of the scheduler's job-level concurrency bound: a
//! running job acquires one slot per file it is actively pushing through the
//! heavy extraction and embedding stages, so the pool caps document-level
//! concurrency across every running job. Slots are released through an RAII
//! guard, which keeps acquire/release balanced on error paths.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Errors raised while acquiring a slot.
#[derive(Debug, Error)]
pub enum SlotError {
    /// The pool was closed during shutdown while callers were waiting.
    #[error("slot pool is closed")]
    Closed,
}

/// Counting pool of document-processing slots.
#[derive(Clone)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl SlotPool {
    /// Create a pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Acquire one slot, suspending until one is available.
    ///
    /// The returned guard releases the slot when dropped.
    pub async fn acquire(&self) -> Result<SlotGuard, SlotError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SlotError::Closed)?;
        Ok(SlotGuard { _permit: permit })
    }

    /// Configured capacity of the pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held. Always `<= capacity()`.
    pub fn held(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Close the pool, waking waiting acquirers with [`SlotError::Closed`].
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Scoped ownership of one slot.
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}
