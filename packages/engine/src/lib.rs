// packages/engine/src/lib.rs
//! PortSniffer Capture Engine Library
//!
//! Transparent traffic capture for serial and parallel ports. An interceptor
//! sits between a port's user and the port, forwards every operation unchanged
//! and records monitored reads, writes and configuration commands into a
//! bounded per-device log that a consumer drains over the control channel.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **capture**: record layout, entry pool, per-device log queue
//! - **monitor**: per-device monitor state and the device registry
//! - **interception**: port transports, deferred read recording, the pipeline
//! - **control**: control protocol, request handler, sessions, TCP server/client
//! - **engine**: wires the pieces together
//! - **observability**: tracing and metrics set-up
//! - **utils**: configuration and error types

// Public module exports
pub mod capture;
pub mod control;
pub mod engine;
pub mod interception;
pub mod monitor;
pub mod observability;
pub mod utils;

// Re-export commonly used types
pub use capture::{EntryPool, EventKind, MonitorMask, PoolConfig, Timestamp};
pub use control::{ControlClient, ControlServer, ControlSession, PoppedEntry, Status, VersionInfo};
pub use engine::CaptureEngine;
pub use interception::{ControlOperation, InterceptedPort, LoopbackTransport, PortTransport};
pub use monitor::{DeviceRegistry, MonitorState};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Control protocol version spoken by this build
pub const PROTOCOL_VERSION: VersionInfo = VersionInfo::CURRENT;
