//! Bounded single-consumer queue with a drop-oldest overflow policy.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

struct QueueState<T> {
    items: VecDeque<T>,
    dropped: u64,
    processing: bool,
}

/// A bounded FIFO decoupling event producers from one consumer.
///
/// Capacity is fixed at construction. When the queue is full, `put` evicts
/// the oldest entry, counts it as dropped, and enqueues the new item; the
/// producer is never blocked. The consumer side is async with a bounded
/// wait. The processing flag is observability only; nothing synchronizes
/// on it.
pub struct EventQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> EventQueue<T> {
    /// Creates a queue holding at most `capacity` items (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                dropped: 0,
                processing: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues an item without blocking.
    ///
    /// When full, the oldest entry is evicted and returned, and the dropped
    /// counter is incremented; the new item is always enqueued.
    pub fn put(&self, item: T) -> Option<T> {
        let evicted = {
            let mut state = self.lock();
            let evicted = if state.items.len() >= self.capacity {
                state.dropped += 1;
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(item);
            evicted
        };
        if evicted.is_some() {
            debug!("queue full, dropped oldest entry");
        }
        self.notify.notify_one();
        evicted
    }

    /// Removes and returns the oldest item, if any.
    pub fn try_get(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Waits up to `timeout` for an item.
    ///
    /// Returns `None` when the timeout elapses with the queue still empty.
    pub async fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            // Arm the listener before checking so a put between the check
            // and the await still wakes us.
            let notified = self.notify.notified();
            if let Some(item) = self.try_get() {
                return Some(item);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.try_get();
            }
        }
    }

    /// Drains the queue without processing. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let drained = state.items.len();
        state.items.clear();
        drained
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items dropped due to overflow since the last metrics reset.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }

    /// Resets the dropped counter. Queued items are unaffected.
    pub fn reset_metrics(&self) {
        self.lock().dropped = 0;
    }

    /// Returns the observability-only processing flag.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.lock().processing
    }

    /// Sets the observability-only processing flag.
    pub fn set_processing(&self, value: bool) {
        self.lock().processing = value;
    }
}
