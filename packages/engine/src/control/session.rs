// packages/engine/src/control/session.rs
//! Exclusive consumer session on the control channel
//!
//! Only one session can be open at a time. The channel exists only while at
//! least one device is attached; detaching the last device invalidates the
//! session even though it is still held.

use crate::capture::record::{MonitorMask, ENTRY_RECORD_SIZE};
use crate::control::handler::{Completion, ControlHandler};
use crate::control::protocol::{
    attached_devices_retry_len, decode_attached_devices, decode_pop_response, AttachedDevices,
    PopLogEntryRequest, PoppedEntry, RequestCode, ResetMonitoringRequest, VersionInfo,
    ATTACHED_DEVICES_HEADER_LEN, VERSION_RESPONSE_LEN,
};
use crate::monitor::registry::DeviceRegistry;
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Initial GetAttachedDevices buffer; grown on overflow
const ATTACHED_DEVICES_INITIAL_LEN: usize = 256;

pub struct ControlSession {
    registry: Arc<DeviceRegistry>,
    handler: ControlHandler,
    generation: u64,
}

impl ControlSession {
    /// Claim the control channel
    pub fn open(registry: Arc<DeviceRegistry>) -> Result<Self> {
        let generation = registry.channel().claim()?;
        info!("Control session opened (generation {})", generation);

        Ok(Self {
            handler: ControlHandler::new(Arc::clone(&registry)),
            registry,
            generation,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the channel this session was opened on still exists
    pub fn is_valid(&self) -> bool {
        self.registry.channel().is_current(self.generation)
    }

    /// Execute a raw request
    pub fn call(&self, code: u32, input: &[u8], output: &mut [u8]) -> Result<Completion> {
        if !self.is_valid() {
            return Err(EngineError::ChannelClosed);
        }
        Ok(self.handler.dispatch(code, input, output))
    }

    pub fn get_version(&self) -> Result<VersionInfo> {
        let mut out = [0u8; VERSION_RESPONSE_LEN];
        let c = self.call(RequestCode::GetVersion.as_u32(), &[], &mut out)?;
        c.status.check("")?;
        VersionInfo::decode(&out[..c.information])
    }

    /// Attached device names, growing the buffer until the list fits
    pub fn get_attached_devices(&self) -> Result<Vec<String>> {
        let mut capacity = ATTACHED_DEVICES_INITIAL_LEN;

        loop {
            let mut out = vec![0u8; capacity.max(ATTACHED_DEVICES_HEADER_LEN)];
            let c = self.call(RequestCode::GetAttachedDevices.as_u32(), &[], &mut out)?;

            match decode_attached_devices(c.status, &out[..c.information])? {
                AttachedDevices::Complete(names) => return Ok(names),
                AttachedDevices::Overflow { required } => {
                    debug!("Attached device list needs {} bytes, retrying", required);
                    capacity = attached_devices_retry_len(out.len(), required)?;
                }
            }
        }
    }

    /// Install a new mask on `device` and discard its log
    pub fn reset_monitoring(&self, device: &str, mask: MonitorMask) -> Result<()> {
        let input = ResetMonitoringRequest {
            device: device.to_string(),
            mask,
        }
        .encode()?;

        let c = self.call(RequestCode::ResetMonitoring.as_u32(), &input, &mut [])?;
        c.status.check(device)
    }

    /// Oldest log entry of `device`, `None` when the log is empty
    pub fn pop_log_entry(&self, device: &str) -> Result<Option<PoppedEntry>> {
        let input = PopLogEntryRequest {
            device: device.to_string(),
        }
        .encode()?;

        let mut out = vec![0u8; ENTRY_RECORD_SIZE];
        let c = self.call(RequestCode::PopLogEntry.as_u32(), &input, &mut out)?;
        decode_pop_response(c.status, &out[..c.information], device)
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.registry.channel().release(self.generation);
        debug!("Control session closed (generation {})", self.generation);
    }
}

impl std::fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::registry::AcceptAll;

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry::new(Arc::new(AcceptAll), 160))
    }

    #[test]
    fn test_no_channel_without_devices() {
        let registry = registry();
        assert!(matches!(
            ControlSession::open(registry),
            Err(EngineError::ChannelUnavailable)
        ));
    }

    #[test]
    fn test_exclusive() {
        let registry = registry();
        registry.attach("COM1").unwrap();

        let session = ControlSession::open(Arc::clone(&registry)).unwrap();
        assert!(matches!(
            ControlSession::open(Arc::clone(&registry)),
            Err(EngineError::ChannelBusy)
        ));

        drop(session);
        assert!(ControlSession::open(registry).is_ok());
    }

    #[test]
    fn test_last_detach_closes_session() {
        let registry = registry();
        registry.attach("COM1").unwrap();
        let session = ControlSession::open(Arc::clone(&registry)).unwrap();

        registry.detach("COM1").unwrap();
        assert!(matches!(session.get_version(), Err(EngineError::ChannelClosed)));

        // A new channel generation does not revive the old session
        registry.attach("COM1").unwrap();
        assert!(!session.is_valid());
        let fresh = ControlSession::open(Arc::clone(&registry)).unwrap();
        assert_ne!(fresh.generation(), session.generation());

        // Dropping the stale session leaves the fresh claim alone
        drop(session);
        assert!(registry.channel().has_session());
    }

    #[test]
    fn test_typed_requests() {
        let registry = registry();
        registry.attach("COM1").unwrap();
        let session = ControlSession::open(Arc::clone(&registry)).unwrap();

        assert_eq!(session.get_version().unwrap(), VersionInfo::CURRENT);
        assert_eq!(session.get_attached_devices().unwrap(), vec!["COM1".to_string()]);

        session.reset_monitoring("COM1", MonitorMask::WRITE).unwrap();
        assert_eq!(session.pop_log_entry("COM1").unwrap(), None);
        assert!(matches!(
            session.pop_log_entry("COM2"),
            Err(EngineError::NotFound(name)) if name == "COM2"
        ));
    }

    #[test]
    fn test_attached_devices_grows_buffer() {
        let registry = registry();
        let names: Vec<String> = (0..40).map(|i| format!("COM{}", i)).collect();
        for name in &names {
            registry.attach(name).unwrap();
        }

        let session = ControlSession::open(registry).unwrap();
        assert_eq!(session.get_attached_devices().unwrap(), names);
    }
}
