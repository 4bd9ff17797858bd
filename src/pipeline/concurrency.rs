// src/pipeline/concurrency.rs
//!
//! Backpressure for the ingestion side of the pipeline.
//!
//! ```text
//! Record source -> Gate (permits) -> Job tasks -> Outcome channel -> Summary
//! ```
//!
//! The streaming ingester takes a [`GatePermit`] before turning a fragment into a
//! job, so at most `capacity` jobs exist at any time no matter how fast the input
//! can be read. Jobs report back through an `async_channel` whose producer side
//! is owned by a [`SenderGuard`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::PipelineError;

/// Counting semaphore with FIFO waiters. Permits are released on drop.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    waiting: Arc<AtomicUsize>,
}

/// Proof of a held gate slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::Config(
                "Initial permits must be positive".to_string(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for a free permit. Waiters are served in arrival order.
    pub async fn acquire(&self) -> Result<GatePermit, PipelineError> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(GatePermit { _permit: permit });
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("[GATE] all {} permits taken, {} waiting", self.capacity, queued);
        let result = self.semaphore.clone().acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        result
            .map(|permit| GatePermit { _permit: permit })
            .map_err(|_| PipelineError::Aborted("concurrency gate closed".to_string()))
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Tasks currently suspended in [`acquire`](Self::acquire).
    pub fn queue_length(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Owns the orchestrator's copy of a channel sender.
///
/// Receivers only finish once every sender is gone, so the orchestrator closes its
/// own copy before it starts waiting on the receiving side.
///
/// ```ignore
/// let (tx, rx) = async_channel::unbounded();
/// let guard = SenderGuard::new(tx);
/// let job_tx = guard.sender().clone();
/// guard.close();
/// ```
pub(crate) struct SenderGuard<T> {
    sender: async_channel::Sender<T>,
}

impl<T> SenderGuard<T> {
    pub fn new(sender: async_channel::Sender<T>) -> Self {
        Self { sender }
    }

    /// Get a reference to the sender for cloning.
    pub fn sender(&self) -> &async_channel::Sender<T> {
        &self.sender
    }

    /// Drops the guarded sender. Clones held elsewhere stay open.
    pub fn close(self) {
        drop(self);
    }
}
