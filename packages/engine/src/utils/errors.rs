// packages/engine/src/utils/errors.rs
//! Error types for the capture engine
//!
//! Control-protocol failures are returned to the consumer as typed statuses
//! (see [`crate::control::protocol::Status`]). Failures on the interception
//! path are never surfaced to the intercepted operation; they only show up in
//! logs and drop counters.

use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No attached device (or no entry) matches the request
    #[error("Device not found: {0}")]
    NotFound(String),

    /// A device with this name is already attached
    #[error("Device already attached: {0}")]
    AlreadyExists(String),

    /// The entry pool cannot hand out another buffer
    #[error("Entry pool exhausted")]
    Exhausted,

    /// The consumer's buffer is too small for a variable-length reply
    #[error("Output buffer too small, {required} bytes required")]
    Overflow { required: usize },

    /// The device's log is empty
    #[error("No more log entries")]
    NoMoreEntries,

    /// Device name does not fit the fixed-width wire field
    #[error("Device name is too long ({len} UTF-16 code units)")]
    NameTooLong { len: usize },

    /// A fixed-size request or response buffer is too short
    #[error("Buffer too small: {required} bytes required, {provided} provided")]
    BufferTooSmall { required: usize, provided: usize },

    /// Malformed or unknown control request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The control channel does not exist (no device attached)
    #[error("Control channel is not available")]
    ChannelUnavailable,

    /// Another consumer already holds the control channel
    #[error("Control channel is busy")]
    ChannelBusy,

    /// The control channel was torn down while a session was open
    #[error("Control channel was closed")]
    ChannelClosed,

    /// Unexpected bytes on the control transport
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl EngineError {
    /// Whether a consumer should simply poll again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::NoMoreEntries | EngineError::Overflow { .. })
    }
}
