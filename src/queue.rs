//! Bounded receive queue with drop-oldest overflow.
//!
//! The queue sits between the WebSocket worker (producer) and the output
//! pacer (consumer). Producers never block: when an insertion would exceed
//! capacity the head element is dropped first. This is real-time audio, so
//! fresh data beats stale data.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::pipeline::AudioFrame;

/// Upper bound on any single consumer wait, so the running flag is observed.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Bounded FIFO of received audio frames.
pub struct ReceiveQueue {
    inner: Mutex<VecDeque<AudioFrame>>,
    non_empty: Condvar,
    capacity: AtomicUsize,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

/// Counters surfaced for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Total frames accepted.
    pub pushed: u64,
    /// Total frames evicted by the overflow policy.
    pub dropped: u64,
    /// Current queue length.
    pub len: usize,
}

impl ReceiveQueue {
    /// New queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            non_empty: Condvar::new(),
            capacity: AtomicUsize::new(capacity.max(1)),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a frame, evicting from the head when full. Never blocks.
    pub fn push(&self, frame: AudioFrame) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        let mut queue = self.inner.lock();
        while queue.len() >= capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(capacity, "receive queue full, dropped oldest frame");
        }
        queue.push_back(frame);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        debug!(len = queue.len(), "queued received frame");
        drop(queue);
        self.non_empty.notify_all();
    }

    /// Remove and return the head frame, if any.
    pub fn pop(&self) -> Option<AudioFrame> {
        self.inner.lock().pop_front()
    }

    /// Drop every queued frame. Returns how many were discarded.
    pub fn flush(&self) -> usize {
        let mut queue = self.inner.lock();
        let drained = queue.len();
        queue.clear();
        drained
    }

    /// Current number of queued frames.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Replace the capacity. Existing excess frames are evicted lazily on
    /// the next push.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity.max(1), Ordering::Relaxed);
    }

    /// Block until the queue holds at least `count` frames or `keep_waiting`
    /// returns false. Waits are sliced so shutdown is observed promptly.
    ///
    /// `keep_waiting` must not take any element lock.
    pub fn wait_len_at_least(&self, count: usize, keep_waiting: impl Fn() -> bool) -> bool {
        let mut queue = self.inner.lock();
        while queue.len() < count {
            if !keep_waiting() {
                return false;
            }
            self.non_empty.wait_for(&mut queue, WAIT_SLICE);
        }
        true
    }

    /// Wake every consumer blocked on the non-empty condition.
    pub fn notify_waiters(&self) {
        self.non_empty.notify_all();
    }

    /// Snapshot of the queue counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            len: self.len(),
        }
    }
}
