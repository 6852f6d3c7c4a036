// packages/engine/src/capture/mod.rs
//! Event capture primitives
//!
//! - **Record**: wire layout of one captured operation
//! - **Pool**: fixed-size buffers reused across records
//! - **Log Queue**: bounded FIFO of records per device
//!
//! # Architecture
//!
//! ```text
//! Interception ─→ EntryPool::acquire ─→ EventRecord::encode ─→ DeviceLogQueue::push
//!                                                                      │
//! Consumer ←── PopLogEntry response ←── DeviceLogQueue::pop ←──────────┘
//!                       (record dropped → buffer back to pool)
//! ```

pub mod log_queue;
pub mod pool;
pub mod record;

// Re-export commonly used types
pub use log_queue::{DeviceLogQueue, DropReason, PushOutcome, QueueStats};
pub use pool::{EntryBuffer, EntryPool, PoolConfig, PoolStats};
pub use record::{
    EventKind, EventRecord, MonitorMask, Timestamp, DEVICE_NAME_UNITS, ENTRY_RECORD_SIZE,
    MAX_PAYLOAD_LENGTH, RECORD_HEADER_LEN,
};
