// packages/engine/src/monitor/registry.rs
//! Registry of monitored devices
//!
//! Keeps attached devices in attachment order behind one lock. Lookups are a
//! linear scan: a host has tens of ports, not thousands.
//!
//! The registry also owns the lifecycle of the control channel: it comes up
//! with the first attached device and goes away with the last one.
//!
//! Lock ordering: registry lock first, then the channel lock. The registry
//! lock is always released before any device log is touched.

use crate::capture::record::{MonitorMask, DEVICE_NAME_UNITS};
use crate::monitor::state::MonitorState;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Source of attachable device names (the host's device tree)
pub trait DeviceEnumerator: Send + Sync {
    /// Whether the interceptor may be installed on `name`
    fn is_attachable(&self, name: &str) -> bool;

    /// All names that could be attached
    fn enumerate(&self) -> Vec<String>;
}

/// Enumerator over a fixed list of port names
#[derive(Debug, Clone, Default)]
pub struct StaticEnumerator {
    names: Vec<String>,
}

impl StaticEnumerator {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl DeviceEnumerator for StaticEnumerator {
    fn is_attachable(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    fn enumerate(&self) -> Vec<String> {
        self.names.clone()
    }
}

/// Enumerator that accepts every name
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl DeviceEnumerator for AcceptAll {
    fn is_attachable(&self, _name: &str) -> bool {
        true
    }

    fn enumerate(&self) -> Vec<String> {
        Vec::new()
    }
}

struct ChannelState {
    online: bool,
    generation: u64,
    session_open: bool,
}

/// Existence and exclusivity of the consumer-facing control channel
pub struct ControlChannel {
    state: Mutex<ChannelState>,
}

impl ControlChannel {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                online: false,
                generation: 0,
                session_open: false,
            }),
        }
    }

    fn bring_up(&self) {
        let mut state = self.state.lock();
        state.online = true;
        state.generation += 1;
        state.session_open = false;
        info!("Control channel created (generation {})", state.generation);
    }

    fn tear_down(&self) {
        let mut state = self.state.lock();
        state.online = false;
        state.session_open = false;
        info!("Control channel deleted (generation {})", state.generation);
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    pub fn has_session(&self) -> bool {
        self.state.lock().session_open
    }

    /// Claim exclusive access. Returns the generation the claim belongs to.
    pub(crate) fn claim(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(EngineError::ChannelUnavailable);
        }
        if state.session_open {
            return Err(EngineError::ChannelBusy);
        }
        state.session_open = true;
        Ok(state.generation)
    }

    /// Give up a claim. A claim from a torn-down generation is already gone.
    pub(crate) fn release(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.online && state.generation == generation {
            state.session_open = false;
        }
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.online && state.session_open && state.generation == generation
    }
}

/// The set of currently monitored devices
pub struct DeviceRegistry {
    devices: Mutex<Vec<Arc<MonitorState>>>,
    channel: ControlChannel,
    enumerator: Arc<dyn DeviceEnumerator>,
    max_entries_per_device: usize,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>, max_entries_per_device: usize) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            channel: ControlChannel::new(),
            enumerator,
            max_entries_per_device,
        }
    }

    /// Check a name against the fixed-width wire field
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.contains('\0') {
            return Err(EngineError::InvalidRequest(format!(
                "Invalid device name: {:?}",
                name
            )));
        }

        let len = name.encode_utf16().count();
        if len >= DEVICE_NAME_UNITS {
            return Err(EngineError::NameTooLong { len });
        }

        Ok(())
    }

    /// Start monitoring a device. It records nothing until configured.
    pub fn attach(&self, name: &str) -> Result<Arc<MonitorState>> {
        Self::validate_name(name)?;

        if !self.enumerator.is_attachable(name) {
            return Err(EngineError::NotFound(name.to_string()));
        }

        let mut devices = self.devices.lock();
        if devices.iter().any(|d| d.name() == name) {
            return Err(EngineError::AlreadyExists(name.to_string()));
        }

        let state = Arc::new(MonitorState::new(name, self.max_entries_per_device));
        devices.push(Arc::clone(&state));

        if devices.len() == 1 {
            self.channel.bring_up();
        }

        info!("Attached to {} ({} devices monitored)", name, devices.len());
        Ok(state)
    }

    /// Stop monitoring a device and release its log
    pub fn detach(&self, name: &str) -> Result<()> {
        let state = {
            let mut devices = self.devices.lock();
            let index = devices
                .iter()
                .position(|d| d.name() == name)
                .ok_or_else(|| EngineError::NotFound(name.to_string()))?;

            let state = devices.remove(index);
            if devices.is_empty() {
                self.channel.tear_down();
            }
            state
        };

        let released = state.close();
        info!("Detached from {}, {} log entries released", name, released);
        Ok(())
    }

    /// Set a device's mask and clear its log
    pub fn configure(&self, name: &str, mask: MonitorMask) -> Result<()> {
        let state = self.find(name)?;
        state.configure(mask);
        Ok(())
    }

    /// Snapshot of attached names in attachment order
    pub fn list(&self) -> Vec<String> {
        self.devices
            .lock()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Look up a device by exact name
    pub fn find(&self, name: &str) -> Result<Arc<MonitorState>> {
        let devices = self.devices.lock();
        let found = devices.iter().find(|d| d.name() == name).cloned();
        drop(devices);

        found.ok_or_else(|| {
            debug!("No attached device named {}", name);
            EngineError::NotFound(name.to_string())
        })
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    pub fn enumerator(&self) -> &Arc<dyn DeviceEnumerator> {
        &self.enumerator
    }

    pub fn max_entries_per_device(&self) -> usize {
        self.max_entries_per_device
    }
}
