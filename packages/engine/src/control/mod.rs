// packages/engine/src/control/mod.rs
//! Consumer-facing control channel
//!
//! - **Protocol**: request codes, statuses and wire encodings
//! - **Handler**: executes raw requests against the registry
//! - **Session**: exclusive claim on the channel
//! - **Server / Client**: the protocol carried over TCP
//!
//! # Architecture
//!
//! ```text
//! ControlClient ── TCP frames ──→ ControlServer ─→ ControlSession ─→ ControlHandler ─→ DeviceRegistry
//! ```

pub mod client;
pub mod frame;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use client::{ControlClient, DEFAULT_POLL_INTERVAL};
pub use handler::{Completion, ControlHandler};
pub use protocol::{Compatible, PoppedEntry, RequestCode, Status, VersionInfo};
pub use server::ControlServer;
pub use session::ControlSession;
