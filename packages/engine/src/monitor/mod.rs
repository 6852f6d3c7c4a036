// packages/engine/src/monitor/mod.rs
//! Device monitoring state and the registry of attached devices

pub mod registry;
pub mod state;

// Re-export commonly used types
pub use registry::{AcceptAll, ControlChannel, DeviceEnumerator, DeviceRegistry, StaticEnumerator};
pub use state::{MonitorState, RecordOutcome};
