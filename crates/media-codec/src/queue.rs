//! Bounded, blocking FIFO of buffer-slot indices.
//!
//! One [`AvailabilityQueue`] exists per hand-off edge:
//! - client → input worker (`InputAvailable`)
//! - client / display → output worker (`EngineAvailable`)
//! - render → display release matching (`DisplayAvailable`)
//!
//! Deactivation wakes every waiter; a waiter woken that way gets `None` and must
//! abandon its unit of work. Pushes are still accepted while inactive so that
//! indices returned during a pause are not lost.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bounded FIFO of slot indices with a blocking pop.
///
/// ## Design
/// - `active` is stored under the same mutex as the queue to avoid lost wakeups.
/// - A single [`Condvar`] signals both "index pushed" and "deactivated".
/// - Capacity is the slot count of the owning pool; pushing past it is a bug
///   in ownership tracking and is rejected.
#[derive(Debug)]
pub struct AvailabilityQueue {
    name: &'static str,
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

#[derive(Debug)]
struct QueueInner {
    queue: VecDeque<usize>,
    capacity: usize,
    active: bool,
}

impl AvailabilityQueue {
    /// Create an inactive queue that can hold up to `capacity` indices.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            inner: Mutex::new(QueueInner {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                active: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resize the capacity. Existing entries are kept.
    pub fn set_capacity(&self, capacity: usize) {
        self.lock().capacity = capacity;
    }

    /// Append `index` and wake one waiter.
    ///
    /// Returns `false` when the queue is full or already holds `index`.
    pub fn push(&self, index: usize) -> bool {
        let mut g = self.lock();
        if g.queue.len() >= g.capacity || g.queue.contains(&index) {
            tracing::warn!(queue = self.name, index, len = g.queue.len(), "queue push rejected");
            return false;
        }
        g.queue.push_back(index);
        drop(g);
        self.cv.notify_one();
        true
    }

    /// Put an aborted unit's index back at the head.
    pub fn requeue_front(&self, index: usize) -> bool {
        let mut g = self.lock();
        if g.queue.contains(&index) {
            return false;
        }
        g.queue.push_front(index);
        drop(g);
        self.cv.notify_one();
        true
    }

    /// Block until an index is available or the queue is deactivated.
    pub fn pop(&self) -> Option<usize> {
        let mut g = self.lock();
        loop {
            if !g.active {
                return None;
            }
            if let Some(index) = g.queue.pop_front() {
                return Some(index);
            }
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        loop {
            if !g.active {
                return None;
            }
            if let Some(index) = g.queue.pop_front() {
                return Some(index);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }

    /// Take the head without blocking, regardless of activity.
    pub fn try_pop(&self) -> Option<usize> {
        self.lock().queue.pop_front()
    }

    /// Activate or deactivate. Deactivation with `wake_all` releases every waiter.
    pub fn set_active(&self, active: bool, wake_all: bool) {
        let mut g = self.lock();
        g.active = active;
        drop(g);
        if wake_all || active {
            self.cv.notify_all();
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Current number of queued indices (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.lock().queue.contains(&index)
    }

    /// Drop every queued index.
    pub fn clear(&self) {
        let mut g = self.lock();
        let dropped = g.queue.len();
        g.queue.clear();
        drop(g);
        if dropped > 0 {
            tracing::debug!(queue = self.name, dropped, "queue cleared");
        }
    }

    /// Queued indices in FIFO order.
    pub fn snapshot(&self) -> Vec<usize> {
        self.lock().queue.iter().copied().collect()
    }
}
