// packages/engine/src/interception/mod.rs
//! Port interception layer
//!
//! Sits between a port's user and the real device, forwarding everything
//! unchanged while capturing monitored operations:
//!
//! - **Transport**: the device below the interceptor
//! - **Control Operations**: serial configuration commands and their payload
//! - **Deferred Worker**: records reads off the completion path
//! - **Pipeline**: per-port read/write/control hooks
//!
//! # Architecture
//!
//! ```text
//! Port user
//!     │
//!     ├─ write / control → MonitorState::record → Transport
//!     └─ read → Transport → DeferredWorker → MonitorState::record → read completes
//! ```

pub mod control_op;
pub mod deferred;
pub mod pipeline;
pub mod transport;

// Re-export commonly used types
pub use control_op::{ControlOperation, Handflow, LineControl, Timeouts};
pub use deferred::{DeferredHandle, DeferredStats, DeferredWorker, ReadHandoff};
pub use pipeline::InterceptedPort;
pub use transport::{LoopbackTransport, PortTransport};
