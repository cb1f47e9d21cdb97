//! Bounded in-memory queue between producers and the background worker.
//!
//! Pushing never blocks and never fails: when the queue is full the oldest
//! item is evicted and counted as dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// What happened to the queue on a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    /// Occupancy after the push.
    pub len: usize,
    /// Whether the oldest item was evicted to make room.
    pub evicted: bool,
}

/// Fixed-capacity FIFO that evicts its oldest item when full.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue. A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    // A panic while holding the lock cannot leave the deque in a broken
    // state, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Appends an item, evicting the oldest one if the queue is full.
    pub fn push(&self, item: T) -> PushOutcome {
        let mut items = self.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };
        items.push_back(item);
        PushOutcome {
            len: items.len(),
            evicted,
        }
    }

    /// Removes up to `max` of the oldest items, in insertion order.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut items = self.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Removes every queued item.
    pub fn drain_all(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of items held at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of items evicted since creation. Never decreases.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
