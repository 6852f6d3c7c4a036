// packages/engine/src/control/handler.rs
//! Control request dispatch
//!
//! Executes one raw request against the registry. Every request validates its
//! buffer sizes first; nothing is touched on a short buffer.

use crate::control::protocol::{
    attached_devices_len, encode_attached_devices, PopLogEntryRequest, RequestCode,
    ResetMonitoringRequest, Status, VersionInfo, ATTACHED_DEVICES_HEADER_LEN,
    POP_LOG_ENTRY_REQUEST_LEN, POP_LOG_ENTRY_RESPONSE_LEN, RESET_MONITORING_REQUEST_LEN,
    VERSION_RESPONSE_LEN,
};
use crate::monitor::registry::DeviceRegistry;
use crate::utils::errors::EngineError;
use std::sync::Arc;
use tracing::debug;

/// Result of a request: a status and how many output bytes are valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub status: Status,
    pub information: usize,
}

impl Completion {
    pub fn success(information: usize) -> Self {
        Self {
            status: Status::Success,
            information,
        }
    }

    pub fn failed(status: Status) -> Self {
        Self {
            status,
            information: 0,
        }
    }
}

impl From<EngineError> for Completion {
    fn from(err: EngineError) -> Self {
        Completion::failed(Status::from(&err))
    }
}

/// Executes control requests
pub struct ControlHandler {
    registry: Arc<DeviceRegistry>,
}

impl ControlHandler {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Execute the request identified by `code`
    pub fn dispatch(&self, code: u32, input: &[u8], output: &mut [u8]) -> Completion {
        let Some(request) = RequestCode::from_u32(code) else {
            debug!("Unknown control request {:#010x}", code);
            return Completion::failed(Status::InvalidDeviceRequest);
        };

        metrics::counter!("portsniffer_control_requests_total", "request" => request.name())
            .increment(1);

        let completion = match request {
            RequestCode::GetVersion => self.get_version(output),
            RequestCode::GetAttachedDevices => self.get_attached_devices(output),
            RequestCode::ResetMonitoring => self.reset_monitoring(input),
            RequestCode::PopLogEntry => self.pop_log_entry(input, output),
        };

        debug!(
            "{}: {:?}, {} bytes returned",
            request.name(),
            completion.status,
            completion.information
        );
        completion
    }

    fn get_version(&self, output: &mut [u8]) -> Completion {
        if output.len() < VERSION_RESPONSE_LEN {
            return Completion::failed(Status::BufferTooSmall);
        }

        VersionInfo::CURRENT.encode_into(output);
        Completion::success(VERSION_RESPONSE_LEN)
    }

    fn get_attached_devices(&self, output: &mut [u8]) -> Completion {
        if output.len() < ATTACHED_DEVICES_HEADER_LEN {
            return Completion::failed(Status::BufferTooSmall);
        }

        let names = self.registry.list();
        let required = attached_devices_len(&names);

        if output.len() < required {
            output[..ATTACHED_DEVICES_HEADER_LEN].copy_from_slice(&(required as u32).to_le_bytes());
            return Completion {
                status: Status::BufferOverflow,
                information: ATTACHED_DEVICES_HEADER_LEN,
            };
        }

        Completion::success(encode_attached_devices(&names, output))
    }

    fn reset_monitoring(&self, input: &[u8]) -> Completion {
        if input.len() < RESET_MONITORING_REQUEST_LEN {
            return Completion::failed(Status::BufferTooSmall);
        }

        let result = ResetMonitoringRequest::decode(input)
            .and_then(|request| self.registry.configure(&request.device, request.mask));

        match result {
            Ok(()) => Completion::success(0),
            Err(e) => e.into(),
        }
    }

    fn pop_log_entry(&self, input: &[u8], output: &mut [u8]) -> Completion {
        if input.len() < POP_LOG_ENTRY_REQUEST_LEN || output.len() < POP_LOG_ENTRY_RESPONSE_LEN {
            return Completion::failed(Status::BufferTooSmall);
        }

        let state = match PopLogEntryRequest::decode(input)
            .and_then(|request| self.registry.find(&request.device))
        {
            Ok(state) => state,
            Err(e) => return e.into(),
        };

        match state.pop() {
            Some(record) => {
                let wire = record.as_wire();
                output[..wire.len()].copy_from_slice(wire);
                Completion::success(wire.len())
            }
            None => Completion::failed(Status::NoMoreEntries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pool::{EntryPool, PoolConfig};
    use crate::capture::record::{EventKind, MonitorMask, ENTRY_RECORD_SIZE};
    use crate::control::protocol::{decode_attached_devices, AttachedDevices, PoppedEntry};
    use crate::monitor::registry::AcceptAll;

    fn handler() -> (ControlHandler, Arc<DeviceRegistry>) {
        let registry = Arc::new(DeviceRegistry::new(Arc::new(AcceptAll), 160));
        (ControlHandler::new(Arc::clone(&registry)), registry)
    }

    fn reset(device: &str, mask: MonitorMask) -> Vec<u8> {
        ResetMonitoringRequest {
            device: device.to_string(),
            mask,
        }
        .encode()
        .unwrap()
    }

    fn pop(device: &str) -> Vec<u8> {
        PopLogEntryRequest {
            device: device.to_string(),
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_get_version() {
        let (handler, _) = handler();
        let mut out = [0u8; 4];

        let c = handler.dispatch(RequestCode::GetVersion.as_u32(), &[], &mut out);
        assert_eq!(c, Completion::success(4));
        assert_eq!(out, [1, 0, 0, 0]);

        let c = handler.dispatch(RequestCode::GetVersion.as_u32(), &[], &mut out[..3]);
        assert_eq!(c, Completion::failed(Status::BufferTooSmall));
    }

    #[test]
    fn test_unknown_request() {
        let (handler, _) = handler();
        let c = handler.dispatch(0x806A_2010, &[], &mut []);
        assert_eq!(c.status, Status::InvalidDeviceRequest);
    }

    #[test]
    fn test_attached_devices_overflow() {
        let (handler, registry) = handler();
        registry.attach("COM1").unwrap();
        registry.attach("COM2").unwrap();

        let mut small = [0u8; 8];
        let c = handler.dispatch(RequestCode::GetAttachedDevices.as_u32(), &[], &mut small);
        assert_eq!(c.status, Status::BufferOverflow);
        assert_eq!(c.information, 4);
        assert_eq!(u32::from_le_bytes([small[0], small[1], small[2], small[3]]), 26);

        let mut out = vec![0u8; 26];
        let c = handler.dispatch(RequestCode::GetAttachedDevices.as_u32(), &[], &mut out);
        assert_eq!(c, Completion::success(26));
        assert_eq!(
            decode_attached_devices(c.status, &out[..c.information]).unwrap(),
            AttachedDevices::Complete(vec!["COM1".to_string(), "COM2".to_string()])
        );
    }

    #[test]
    fn test_reset_unknown_device() {
        let (handler, _) = handler();
        let c = handler.dispatch(
            RequestCode::ResetMonitoring.as_u32(),
            &reset("COM7", MonitorMask::READ),
            &mut [],
        );
        assert_eq!(c, Completion::failed(Status::NoSuchDevice));
    }

    #[test]
    fn test_short_inputs() {
        let (handler, _) = handler();
        let mut out = vec![0u8; ENTRY_RECORD_SIZE];

        let c = handler.dispatch(RequestCode::ResetMonitoring.as_u32(), &[0u8; 257], &mut []);
        assert_eq!(c.status, Status::BufferTooSmall);

        let c = handler.dispatch(RequestCode::PopLogEntry.as_u32(), &[0u8; 255], &mut out);
        assert_eq!(c.status, Status::BufferTooSmall);

        let c = handler.dispatch(RequestCode::PopLogEntry.as_u32(), &pop("COM1"), &mut out[..4095]);
        assert_eq!(c.status, Status::BufferTooSmall);
    }

    #[test]
    fn test_pop_returns_exact_length() {
        let (handler, registry) = handler();
        let pool = EntryPool::new(PoolConfig::default());
        let state = registry.attach("COM1").unwrap();

        let c = handler.dispatch(
            RequestCode::ResetMonitoring.as_u32(),
            &reset("COM1", MonitorMask::WRITE),
            &mut [],
        );
        assert_eq!(c, Completion::success(0));
        state.record(EventKind::Write, &[1, 2, 3], &pool);

        let mut out = vec![0u8; ENTRY_RECORD_SIZE];
        let c = handler.dispatch(RequestCode::PopLogEntry.as_u32(), &pop("COM1"), &mut out);
        assert_eq!(c, Completion::success(15));

        let entry = PoppedEntry::decode(&out[..c.information]).unwrap();
        assert_eq!(entry.kind, EventKind::Write);
        assert_eq!(entry.payload, vec![1, 2, 3]);
        assert_eq!(pool.live(), 0);

        let c = handler.dispatch(RequestCode::PopLogEntry.as_u32(), &pop("COM1"), &mut out);
        assert_eq!(c, Completion::failed(Status::NoMoreEntries));
    }
}
