//! Bounded slot pools for scan and work concurrency.
//!
//! The engine runs exactly two of these: one sized by `scanner_concurrency`,
//! one by `worker_concurrency`. They are the only mutable state shared across
//! jobs. Slot acquisition is FIFO across waiting tasks, which is what keeps
//! scheduling fair when the job count exceeds the pool size: a continuous job
//! re-queues behind the others after every pass instead of monopolizing its
//! slot.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// A bounded pool of concurrency slots with occupancy instrumentation
#[derive(Debug)]
pub struct SlotPool {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: AtomicUsize,
    high_water: AtomicUsize,
}

/// Holds one slot for as long as it is alive
#[derive(Debug)]
pub struct SlotGuard {
    pool: Arc<SlotPool>,
    _permit: OwnedSemaphorePermit,
}

impl SlotPool {
    pub fn new(name: &'static str, capacity: NonZeroUsize) -> Arc<Self> {
        Arc::new(Self {
            name,
            semaphore: Arc::new(Semaphore::new(capacity.get())),
            capacity: capacity.get(),
            active: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        })
    }

    /// Waits for a free slot. Waiters are served in request order.
    pub async fn acquire(self: &Arc<Self>) -> SlotGuard {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("slot semaphore closed");

        let occupied = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(occupied, Ordering::SeqCst);
        trace!(pool = self.name, occupied, "slot acquired");

        SlotGuard {
            pool: Arc::clone(self),
            _permit: permit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of slots ever held at one instant
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let occupied = self.pool.active.fetch_sub(1, Ordering::SeqCst) - 1;
        trace!(pool = self.pool.name, occupied, "slot released");
    }
}
