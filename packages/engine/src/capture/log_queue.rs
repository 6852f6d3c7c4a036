// packages/engine/src/capture/log_queue.rs
//! Bounded per-device event log
//!
//! FIFO of captured records for a single device. All mutations serialize on
//! one lock that may block the calling thread, so it must only be used from
//! the deferred worker or the control handler, never from a completion
//! callback.
//!
//! When the log is full new records are dropped; the oldest unconsumed
//! records are always kept.

use crate::capture::record::EventRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The log already holds `capacity` records
    QueueFull,

    /// The device was detached
    Closed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::QueueFull => "queue_full",
            DropReason::Closed => "detached",
        }
    }
}

struct QueueInner {
    entries: VecDeque<EventRecord>,
    closed: bool,
}

/// Ordered, bounded log of one device's events
pub struct DeviceLogQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    push_count: AtomicU64,
    pop_count: AtomicU64,
    drop_count: AtomicU64,
}

impl DeviceLogQueue {
    /// Create a new log holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            push_count: AtomicU64::new(0),
            pop_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
        }
    }

    /// Append a record at the tail.
    ///
    /// A rejected record is dropped here, which hands its buffer back to the pool.
    pub fn push(&self, record: EventRecord) -> PushOutcome {
        let mut inner = self.inner.lock();

        let reason = if inner.closed {
            DropReason::Closed
        } else if inner.entries.len() >= self.capacity {
            DropReason::QueueFull
        } else {
            inner.entries.push_back(record);
            self.push_count.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Accepted;
        };

        drop(inner);
        trace!("Log entry dropped: {}", reason.as_str());
        self.drop_count.fetch_add(1, Ordering::Relaxed);
        PushOutcome::Dropped(reason)
    }

    /// Detach the oldest record. The caller owns it afterwards.
    pub fn pop(&self) -> Option<EventRecord> {
        let record = self.inner.lock().entries.pop_front();
        if record.is_some() {
            self.pop_count.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    /// Release every record and reset to empty. Returns the number released.
    pub fn clear(&self) -> usize {
        self.clear_and(|| ())
    }

    /// Run `f` and clear the log inside the same critical section
    pub fn clear_and<F: FnOnce()>(&self, f: F) -> usize {
        let mut inner = self.inner.lock();
        f();
        let released = inner.entries.len();
        inner.entries.clear();
        released
    }

    /// Clear the log and refuse every later push
    pub fn close(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let released = inner.entries.len();
        inner.entries.clear();
        released
    }

    /// Cheap pre-check so producers can skip acquiring a buffer for a full log.
    /// `push` still decides.
    pub fn has_room(&self) -> bool {
        let inner = self.inner.lock();
        !inner.closed && inner.entries.len() < self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            pop_count: self.pop_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            current_size: self.len(),
            capacity: self.capacity,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Records accepted
    pub push_count: u64,

    /// Records handed to a consumer
    pub pop_count: u64,

    /// Records dropped (full or closed)
    pub drop_count: u64,

    pub current_size: usize,

    pub capacity: usize,
}

impl QueueStats {
    /// Calculate fill percentage
    pub fn fill_percentage(&self) -> f64 {
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }

    /// Share of offered records that were dropped
    pub fn drop_rate(&self) -> f64 {
        let offered = self.push_count + self.drop_count;
        if offered == 0 {
            0.0
        } else {
            (self.drop_count as f64 / offered as f64) * 100.0
        }
    }
}
