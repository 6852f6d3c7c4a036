// packages/engine/src/monitor/state.rs
//! Per-device monitoring state
//!
//! Holds the device's name, which operation classes are captured and the
//! device's event log. A state lives from attach to detach; detaching closes
//! the log so late producers cannot leak buffers into it.

use crate::capture::log_queue::{DeviceLogQueue, DropReason, PushOutcome};
use crate::capture::pool::EntryPool;
use crate::capture::record::{EventKind, EventRecord, MonitorMask, Timestamp};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What happened to an offered event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,

    /// The mask excludes this kind
    NotMonitored,

    /// The log refused the record
    Dropped(DropReason),

    /// No pool buffer was available
    Exhausted,
}

/// Monitoring state of one attached device
pub struct MonitorState {
    name: Arc<str>,
    mask: AtomicU16,
    queue: DeviceLogQueue,
}

impl MonitorState {
    /// Create a state that is attached but not recording
    pub fn new(name: impl Into<Arc<str>>, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            mask: AtomicU16::new(MonitorMask::NONE.bits()),
            queue: DeviceLogQueue::new(max_entries),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Current monitor mask. Lock-free, safe on the fast path.
    pub fn mask(&self) -> MonitorMask {
        MonitorMask::from_bits_retain(self.mask.load(Ordering::Acquire))
    }

    pub fn is_monitoring(&self, kind: EventKind) -> bool {
        self.mask().contains(kind.mask())
    }

    /// Install a new mask and discard the log in one step.
    ///
    /// The log is cleared even when the mask is unchanged, so a consumer never
    /// sees records captured under a previous configuration.
    pub fn configure(&self, mask: MonitorMask) -> usize {
        let released = self
            .queue
            .clear_and(|| self.mask.store(mask.bits(), Ordering::Release));

        debug!(
            "Monitoring reset for {}: mask {:#06x}, {} stale entries released",
            self.name,
            mask.bits(),
            released
        );
        released
    }

    /// Capture `payload` as an event of `kind` if the mask asks for it.
    ///
    /// Blocks on the log lock; call from a context where that is allowed.
    pub fn record(&self, kind: EventKind, payload: &[u8], pool: &EntryPool) -> RecordOutcome {
        if !self.is_monitoring(kind) {
            return RecordOutcome::NotMonitored;
        }

        // Skip the pool entirely when the consumer has fallen behind
        if !self.queue.has_room() {
            let reason = if self.queue.is_closed() {
                DropReason::Closed
            } else {
                DropReason::QueueFull
            };
            trace!("{}: log full, not adding {} entry", self.name, kind);
            metrics::counter!("portsniffer_events_dropped_total", "reason" => reason.as_str())
                .increment(1);
            return RecordOutcome::Dropped(reason);
        }

        let buffer = match pool.acquire() {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("{}: dropping {} entry: {}", self.name, kind, e);
                metrics::counter!("portsniffer_events_dropped_total", "reason" => "exhausted")
                    .increment(1);
                return RecordOutcome::Exhausted;
            }
        };

        if payload.len() > crate::capture::MAX_PAYLOAD_LENGTH {
            debug!(
                "{}: truncating {} entry from {} to {} bytes",
                self.name,
                kind,
                payload.len(),
                crate::capture::MAX_PAYLOAD_LENGTH
            );
        }

        let record = EventRecord::encode(buffer, kind, Timestamp::now(), payload);

        match self.queue.push(record) {
            PushOutcome::Accepted => {
                trace!("{}: recorded {} entry ({} bytes)", self.name, kind, payload.len());
                metrics::counter!("portsniffer_events_recorded_total").increment(1);
                RecordOutcome::Recorded
            }
            PushOutcome::Dropped(reason) => {
                metrics::counter!("portsniffer_events_dropped_total", "reason" => reason.as_str())
                    .increment(1);
                RecordOutcome::Dropped(reason)
            }
        }
    }

    /// Oldest unconsumed record
    pub fn pop(&self) -> Option<EventRecord> {
        self.queue.pop()
    }

    pub fn clear(&self) -> usize {
        self.queue.clear()
    }

    /// Drain the log and refuse further records. Used on detach.
    pub fn close(&self) -> usize {
        self.queue.close()
    }

    pub fn queue(&self) -> &DeviceLogQueue {
        &self.queue
    }
}

impl std::fmt::Debug for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorState")
            .field("name", &self.name)
            .field("mask", &self.mask())
            .field("entries", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pool::PoolConfig;

    fn pool(capacity: usize) -> EntryPool {
        EntryPool::new(PoolConfig {
            capacity,
            free_list_depth: 8,
        })
    }

    #[test]
    fn test_new_state_records_nothing() {
        let pool = pool(8);
        let state = MonitorState::new("COM1", 160);

        assert_eq!(state.mask(), MonitorMask::NONE);
        assert_eq!(
            state.record(EventKind::Write, b"abc", &pool),
            RecordOutcome::NotMonitored
        );
        assert_eq!(pool.stats().acquired, 0);
    }

    #[test]
    fn test_record_respects_mask() {
        let pool = pool(8);
        let state = MonitorState::new("COM1", 160);
        state.configure(MonitorMask::WRITE);

        assert_eq!(state.record(EventKind::Write, b"w", &pool), RecordOutcome::Recorded);
        assert_eq!(state.record(EventKind::Read, b"r", &pool), RecordOutcome::NotMonitored);
        assert_eq!(state.queue().len(), 1);
        assert_eq!(state.pop().unwrap().kind(), EventKind::Write);
    }

    #[test]
    fn test_configure_clears_log_even_with_same_mask() {
        let pool = pool(8);
        let state = MonitorState::new("COM1", 160);
        state.configure(MonitorMask::READ);

        state.record(EventKind::Read, b"1", &pool);
        state.record(EventKind::Read, b"2", &pool);

        assert_eq!(state.configure(MonitorMask::READ), 2);
        assert!(state.pop().is_none());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_full_log_skips_pool() {
        let pool = pool(8);
        let state = MonitorState::new("COM1", 2);
        state.configure(MonitorMask::READ);

        state.record(EventKind::Read, b"1", &pool);
        state.record(EventKind::Read, b"2", &pool);
        assert_eq!(
            state.record(EventKind::Read, b"3", &pool),
            RecordOutcome::Dropped(DropReason::QueueFull)
        );
        assert_eq!(pool.stats().acquired, 2);
    }

    #[test]
    fn test_pool_exhaustion_drops_event() {
        let pool = pool(1);
        let state = MonitorState::new("COM1", 160);
        state.configure(MonitorMask::WRITE);

        assert_eq!(state.record(EventKind::Write, b"1", &pool), RecordOutcome::Recorded);
        assert_eq!(state.record(EventKind::Write, b"2", &pool), RecordOutcome::Exhausted);
        assert_eq!(state.queue().len(), 1);
    }

    #[test]
    fn test_close_drains_and_rejects() {
        let pool = pool(8);
        let state = MonitorState::new("COM1", 160);
        state.configure(MonitorMask::WRITE);

        for _ in 0..5 {
            state.record(EventKind::Write, b"x", &pool);
        }
        assert_eq!(pool.live(), 5);

        assert_eq!(state.close(), 5);
        assert_eq!(pool.live(), 0);
        assert_eq!(
            state.record(EventKind::Write, b"late", &pool),
            RecordOutcome::Dropped(DropReason::Closed)
        );
    }
}
