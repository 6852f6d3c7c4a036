// packages/engine/src/control/protocol.rs
//! Control protocol wire format
//!
//! Requests are identified by 32-bit codes laid out like device I/O control
//! codes. Every integer is little-endian and device names travel as fixed
//! 128-unit UTF-16 fields.
//!
//! ```text
//! GetVersion          out: major u16, minor u16
//! GetAttachedDevices  out: length u32, name\0 name\0 ... \0
//! ResetMonitoring     in:  name [u16; 128], mask u16
//! PopLogEntry         in:  name [u16; 128]
//!                     out: timestamp i64, kind u16, payload_len u16, payload
//! ```

use crate::capture::record::{
    EventKind, MonitorMask, Timestamp, DEVICE_NAME_UNITS, ENTRY_RECORD_SIZE, RECORD_HEADER_LEN,
};
use crate::interception::control_op::ControlOperation;
use crate::utils::errors::{EngineError, Result};
use bytes::{Buf, BufMut};
use serde::Serialize;
use std::fmt;

pub const CONTROL_DEVICE_TYPE: u32 = 0x806A;
pub const CONTROL_FUNCTION_BASE: u32 = 0x800;

const METHOD_BUFFERED: u32 = 0;
const FILE_ANY_ACCESS: u32 = 0;
const FILE_READ_ACCESS: u32 = 1;
const FILE_WRITE_ACCESS: u32 = 2;

pub const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;

pub const VERSION_RESPONSE_LEN: usize = 4;
pub const ATTACHED_DEVICES_HEADER_LEN: usize = 4;
pub const DEVICE_NAME_FIELD_LEN: usize = DEVICE_NAME_UNITS * 2;
pub const RESET_MONITORING_REQUEST_LEN: usize = DEVICE_NAME_FIELD_LEN + 2;
pub const POP_LOG_ENTRY_REQUEST_LEN: usize = DEVICE_NAME_FIELD_LEN;
pub const POP_LOG_ENTRY_RESPONSE_LEN: usize = ENTRY_RECORD_SIZE;

/// Control request codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RequestCode {
    GetVersion = ctl_code(CONTROL_DEVICE_TYPE, CONTROL_FUNCTION_BASE, METHOD_BUFFERED, FILE_READ_ACCESS),
    GetAttachedDevices =
        ctl_code(CONTROL_DEVICE_TYPE, CONTROL_FUNCTION_BASE + 1, METHOD_BUFFERED, FILE_READ_ACCESS),
    ResetMonitoring =
        ctl_code(CONTROL_DEVICE_TYPE, CONTROL_FUNCTION_BASE + 2, METHOD_BUFFERED, FILE_WRITE_ACCESS),
    PopLogEntry = ctl_code(CONTROL_DEVICE_TYPE, CONTROL_FUNCTION_BASE + 3, METHOD_BUFFERED, FILE_ANY_ACCESS),
}

impl RequestCode {
    pub fn from_u32(code: u32) -> Option<Self> {
        [
            RequestCode::GetVersion,
            RequestCode::GetAttachedDevices,
            RequestCode::ResetMonitoring,
            RequestCode::PopLogEntry,
        ]
        .into_iter()
        .find(|request| request.as_u32() == code)
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            RequestCode::GetVersion => "get_version",
            RequestCode::GetAttachedDevices => "get_attached_devices",
            RequestCode::ResetMonitoring => "reset_monitoring",
            RequestCode::PopLogEntry => "pop_log_entry",
        }
    }
}

/// Completion status of a control request (NT status values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum Status {
    Success = 0x0000_0000,
    BufferOverflow = 0x8000_0005,
    DeviceBusy = 0x8000_0011,
    NoMoreEntries = 0x8000_001A,
    Unsuccessful = 0xC000_0001,
    NoSuchDevice = 0xC000_000E,
    InvalidDeviceRequest = 0xC000_0010,
    BufferTooSmall = 0xC000_0023,
    ObjectNameCollision = 0xC000_0035,
    InsufficientResources = 0xC000_009A,
    NameTooLong = 0xC000_0106,
}

impl Status {
    pub fn from_u32(value: u32) -> Option<Self> {
        let status = match value {
            0x0000_0000 => Status::Success,
            0x8000_0005 => Status::BufferOverflow,
            0x8000_0011 => Status::DeviceBusy,
            0x8000_001A => Status::NoMoreEntries,
            0xC000_0001 => Status::Unsuccessful,
            0xC000_000E => Status::NoSuchDevice,
            0xC000_0010 => Status::InvalidDeviceRequest,
            0xC000_0023 => Status::BufferTooSmall,
            0xC000_0035 => Status::ObjectNameCollision,
            0xC000_009A => Status::InsufficientResources,
            0xC000_0106 => Status::NameTooLong,
            _ => return None,
        };
        Some(status)
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Turn a non-success status into an error. `device` names the device
    /// the request was about, if any.
    pub fn check(self, device: &str) -> Result<()> {
        match self {
            Status::Success => Ok(()),
            Status::BufferOverflow => Err(EngineError::Overflow { required: 0 }),
            Status::DeviceBusy => Err(EngineError::ChannelBusy),
            Status::NoMoreEntries => Err(EngineError::NoMoreEntries),
            Status::NoSuchDevice => Err(EngineError::NotFound(device.to_string())),
            Status::ObjectNameCollision => Err(EngineError::AlreadyExists(device.to_string())),
            Status::InsufficientResources => Err(EngineError::Exhausted),
            Status::NameTooLong => Err(EngineError::NameTooLong {
                len: device.encode_utf16().count(),
            }),
            Status::BufferTooSmall => Err(EngineError::BufferTooSmall {
                required: 0,
                provided: 0,
            }),
            Status::InvalidDeviceRequest | Status::Unsuccessful => {
                Err(EngineError::InvalidRequest(format!("{:?}", self)))
            }
        }
    }
}

impl From<&EngineError> for Status {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::NotFound(_) | EngineError::ChannelUnavailable => Status::NoSuchDevice,
            EngineError::AlreadyExists(_) => Status::ObjectNameCollision,
            EngineError::Exhausted => Status::InsufficientResources,
            EngineError::Overflow { .. } => Status::BufferOverflow,
            EngineError::NoMoreEntries => Status::NoMoreEntries,
            EngineError::NameTooLong { .. } => Status::NameTooLong,
            EngineError::BufferTooSmall { .. } => Status::BufferTooSmall,
            EngineError::InvalidRequest(_) | EngineError::Protocol(_) => {
                Status::InvalidDeviceRequest
            }
            EngineError::ChannelBusy => Status::DeviceBusy,
            EngineError::ChannelClosed
            | EngineError::Io(_)
            | EngineError::Serialization(_)
            | EngineError::Config(_) => {
                Status::Unsuccessful
            }
        }
    }
}

/// Server version as reported by GetVersion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub major: u16,
    pub minor: u16,
}

/// How well a client matches the server it talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatible {
    Full,
    Major,
    Incompatible,
}

impl VersionInfo {
    pub const CURRENT: VersionInfo = VersionInfo {
        major: MAJOR_VERSION,
        minor: MINOR_VERSION,
    };

    pub fn encode_into(&self, out: &mut [u8]) {
        let mut buf = &mut out[..VERSION_RESPONSE_LEN];
        buf.put_u16_le(self.major);
        buf.put_u16_le(self.minor);
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, VERSION_RESPONSE_LEN)?;
        let mut buf = data;
        Ok(Self {
            major: buf.get_u16_le(),
            minor: buf.get_u16_le(),
        })
    }

    /// Compare a server version against this client's
    pub fn compatibility(&self, server: &VersionInfo) -> Compatible {
        if self.major != server.major {
            Compatible::Incompatible
        } else if self.minor != server.minor {
            Compatible::Major
        } else {
            Compatible::Full
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn ensure_len(data: &[u8], required: usize) -> Result<()> {
    if data.len() < required {
        return Err(EngineError::BufferTooSmall {
            required,
            provided: data.len(),
        });
    }
    Ok(())
}

/// Write `name` into a fixed-width, NUL-padded UTF-16 field
pub fn encode_device_name(name: &str, out: &mut [u8]) -> Result<()> {
    ensure_len(out, DEVICE_NAME_FIELD_LEN)?;

    let len = name.encode_utf16().count();
    if len >= DEVICE_NAME_UNITS {
        return Err(EngineError::NameTooLong { len });
    }

    let mut buf = &mut out[..DEVICE_NAME_FIELD_LEN];
    for unit in name.encode_utf16() {
        buf.put_u16_le(unit);
    }
    let padding = buf.len();
    buf.put_bytes(0, padding);
    Ok(())
}

/// Read a device name from a fixed-width UTF-16 field.
///
/// The last unit is treated as a terminator whatever it holds, so an
/// unterminated field never reads past its end.
pub fn decode_device_name(field: &[u8]) -> Result<String> {
    ensure_len(field, DEVICE_NAME_FIELD_LEN)?;

    let mut units = [0u16; DEVICE_NAME_UNITS];
    let mut buf = &field[..DEVICE_NAME_FIELD_LEN];
    for unit in units.iter_mut() {
        *unit = buf.get_u16_le();
    }
    units[DEVICE_NAME_UNITS - 1] = 0;

    let len = units.iter().position(|&u| u == 0).unwrap_or(DEVICE_NAME_UNITS - 1);
    Ok(String::from_utf16_lossy(&units[..len]))
}

/// ResetMonitoring request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetMonitoringRequest {
    pub device: String,
    pub mask: MonitorMask,
}

impl ResetMonitoringRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; RESET_MONITORING_REQUEST_LEN];
        encode_device_name(&self.device, &mut out)?;
        (&mut out[DEVICE_NAME_FIELD_LEN..]).put_u16_le(self.mask.bits());
        Ok(out)
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        ensure_len(input, RESET_MONITORING_REQUEST_LEN)?;
        let device = decode_device_name(input)?;
        let mut buf = &input[DEVICE_NAME_FIELD_LEN..];
        // Unknown bits are ignored
        let mask = MonitorMask::from_bits_truncate(buf.get_u16_le());
        Ok(Self { device, mask })
    }
}

/// PopLogEntry request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopLogEntryRequest {
    pub device: String,
}

impl PopLogEntryRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; POP_LOG_ENTRY_REQUEST_LEN];
        encode_device_name(&self.device, &mut out)?;
        Ok(out)
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        Ok(Self {
            device: decode_device_name(input)?,
        })
    }
}

/// Total GetAttachedDevices response size for `names`
pub fn attached_devices_len<S: AsRef<str>>(names: &[S]) -> usize {
    let names_len: usize = names
        .iter()
        .map(|name| 2 * (name.as_ref().encode_utf16().count() + 1))
        .sum();
    ATTACHED_DEVICES_HEADER_LEN + names_len + 2
}

/// Write a complete GetAttachedDevices response. `out` must hold
/// [`attached_devices_len`] bytes.
pub fn encode_attached_devices<S: AsRef<str>>(names: &[S], out: &mut [u8]) -> usize {
    let len = attached_devices_len(names);
    let mut buf = &mut out[..len];

    buf.put_u32_le(len as u32);
    for name in names {
        for unit in name.as_ref().encode_utf16() {
            buf.put_u16_le(unit);
        }
        buf.put_u16_le(0);
    }
    buf.put_u16_le(0);
    len
}

/// Outcome of a GetAttachedDevices call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachedDevices {
    Complete(Vec<String>),

    /// The output buffer was too small; retry with `required` bytes
    Overflow { required: usize },
}

/// Smallest valid GetAttachedDevices response: the length and one terminator
pub const MIN_ATTACHED_DEVICES_LEN: usize = ATTACHED_DEVICES_HEADER_LEN + 2;

/// Buffer size for the next GetAttachedDevices attempt after an overflow.
///
/// A reply asking for no more than was already offered would never succeed.
pub fn attached_devices_retry_len(offered: usize, required: usize) -> Result<usize> {
    if required <= offered {
        return Err(EngineError::Protocol(format!(
            "Overflow reply requires {} bytes but {} were offered",
            required, offered
        )));
    }
    Ok(required)
}

/// Parse a GetAttachedDevices response
pub fn decode_attached_devices(status: Status, data: &[u8]) -> Result<AttachedDevices> {
    if status != Status::Success && status != Status::BufferOverflow {
        status.check("")?;
    }

    ensure_len(data, ATTACHED_DEVICES_HEADER_LEN)?;
    let mut buf = data;
    let required = buf.get_u32_le() as usize;

    if status == Status::BufferOverflow {
        return Ok(AttachedDevices::Overflow { required });
    }

    if required < MIN_ATTACHED_DEVICES_LEN {
        return Err(EngineError::Protocol(format!(
            "Attached device list length {} is below the minimum of {}",
            required, MIN_ATTACHED_DEVICES_LEN
        )));
    }
    ensure_len(data, required)?;
    let mut body = &data[ATTACHED_DEVICES_HEADER_LEN..required];
    let mut names = Vec::new();
    let mut current = Vec::new();

    while body.remaining() >= 2 {
        match body.get_u16_le() {
            0 if current.is_empty() => break,
            0 => names.push(String::from_utf16_lossy(&std::mem::take(&mut current))),
            unit => current.push(unit),
        }
    }

    if !current.is_empty() {
        return Err(EngineError::Protocol(
            "Unterminated name in attached device list".to_string(),
        ));
    }

    Ok(AttachedDevices::Complete(names))
}

/// A log entry as returned by PopLogEntry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoppedEntry {
    pub timestamp: Timestamp,
    pub kind: EventKind,
    pub payload: Vec<u8>,
}

impl PoppedEntry {
    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, RECORD_HEADER_LEN)?;

        let mut buf = data;
        let timestamp = Timestamp(buf.get_i64_le());
        let raw_kind = buf.get_u16_le();
        let payload_len = buf.get_u16_le() as usize;

        let kind = EventKind::from_u16(raw_kind)
            .ok_or_else(|| EngineError::Protocol(format!("Invalid entry kind {:#x}", raw_kind)))?;
        ensure_len(data, RECORD_HEADER_LEN + payload_len)?;

        Ok(Self {
            timestamp,
            kind,
            payload: buf[..payload_len].to_vec(),
        })
    }

    /// One JSON object per entry, for machine-readable listings
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The configuration command carried by a control-operation entry
    pub fn control_operation(&self) -> Option<Result<ControlOperation>> {
        (self.kind == EventKind::ControlOperation).then(|| ControlOperation::decode(&self.payload))
    }
}

impl fmt::Display for PoppedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {:4} |", self.kind.symbol(), self.payload.len())?;
        for byte in &self.payload {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Parse a PopLogEntry response. `Ok(None)` means the log was empty.
pub fn decode_pop_response(status: Status, data: &[u8], device: &str) -> Result<Option<PoppedEntry>> {
    match status {
        Status::Success => PoppedEntry::decode(data).map(Some),
        Status::NoMoreEntries => Ok(None),
        other => other.check(device).map(|_| None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes() {
        assert_eq!(RequestCode::GetVersion.as_u32(), 0x806A_6000);
        assert_eq!(RequestCode::GetAttachedDevices.as_u32(), 0x806A_6004);
        assert_eq!(RequestCode::ResetMonitoring.as_u32(), 0x806A_A008);
        assert_eq!(RequestCode::PopLogEntry.as_u32(), 0x806A_200C);
        assert_eq!(RequestCode::from_u32(0x806A_200C), Some(RequestCode::PopLogEntry));
        assert_eq!(RequestCode::from_u32(0x806A_2010), None);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Status::from(&EngineError::NotFound("COM1".into())), Status::NoSuchDevice);
        assert_eq!(Status::from(&EngineError::NoMoreEntries), Status::NoMoreEntries);
        assert_eq!(Status::from(&EngineError::ChannelBusy), Status::DeviceBusy);
        assert_eq!(Status::from_u32(0xC000_0023), Some(Status::BufferTooSmall));
        assert!(matches!(
            Status::NoSuchDevice.check("COM1"),
            Err(EngineError::NotFound(name)) if name == "COM1"
        ));
    }

    #[test]
    fn test_compatibility() {
        let client = VersionInfo::CURRENT;
        assert_eq!(client.compatibility(&VersionInfo { major: 1, minor: 0 }), Compatible::Full);
        assert_eq!(client.compatibility(&VersionInfo { major: 1, minor: 3 }), Compatible::Major);
        assert_eq!(
            client.compatibility(&VersionInfo { major: 2, minor: 0 }),
            Compatible::Incompatible
        );
    }

    #[test]
    fn test_device_name_field() {
        let mut field = [0xFFu8; DEVICE_NAME_FIELD_LEN];
        encode_device_name("COM1", &mut field).unwrap();

        assert_eq!(&field[..10], &[b'C', 0, b'O', 0, b'M', 0, b'1', 0, 0, 0]);
        assert!(field[8..].iter().all(|&b| b == 0));
        assert_eq!(decode_device_name(&field).unwrap(), "COM1");
    }

    #[test]
    fn test_unterminated_name_is_cut() {
        let mut field = [0u8; DEVICE_NAME_FIELD_LEN];
        for chunk in field.chunks_exact_mut(2) {
            chunk.copy_from_slice(&(b'A' as u16).to_le_bytes());
        }

        let name = decode_device_name(&field).unwrap();
        assert_eq!(name.len(), DEVICE_NAME_UNITS - 1);
    }

    #[test]
    fn test_name_too_long() {
        let mut field = [0u8; DEVICE_NAME_FIELD_LEN];
        let name = "X".repeat(DEVICE_NAME_UNITS);
        assert!(matches!(
            encode_device_name(&name, &mut field),
            Err(EngineError::NameTooLong { len: 128 })
        ));
    }

    #[test]
    fn test_reset_request_layout() {
        let request = ResetMonitoringRequest {
            device: "COM3".to_string(),
            mask: MonitorMask::READ | MonitorMask::WRITE,
        };
        let encoded = request.encode().unwrap();

        assert_eq!(encoded.len(), RESET_MONITORING_REQUEST_LEN);
        assert_eq!(&encoded[256..], &[0x03, 0x00]);
        assert_eq!(ResetMonitoringRequest::decode(&encoded).unwrap(), request);
    }

    #[test]
    fn test_attached_devices_empty() {
        let names: [&str; 0] = [];
        assert_eq!(attached_devices_len(&names), 6);

        let mut out = [0u8; 6];
        assert_eq!(encode_attached_devices(&names, &mut out), 6);
        assert_eq!(out, [6, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode_attached_devices(Status::Success, &out).unwrap(),
            AttachedDevices::Complete(vec![])
        );
    }

    #[test]
    fn test_attached_devices_list() {
        let names = ["COM1", "LPT1"];
        let len = attached_devices_len(&names);
        assert_eq!(len, 4 + 10 + 10 + 2);

        let mut out = vec![0u8; len];
        encode_attached_devices(&names, &mut out);
        assert_eq!(
            decode_attached_devices(Status::Success, &out).unwrap(),
            AttachedDevices::Complete(vec!["COM1".to_string(), "LPT1".to_string()])
        );
        assert_eq!(
            decode_attached_devices(Status::BufferOverflow, &out[..4]).unwrap(),
            AttachedDevices::Overflow { required: 26 }
        );
    }

    #[test]
    fn test_attached_devices_length_below_minimum() {
        assert!(matches!(
            decode_attached_devices(Status::Success, &[2, 0, 0, 0, 0, 0]),
            Err(EngineError::Protocol(_))
        ));
        assert!(matches!(
            decode_attached_devices(Status::Success, &[0, 0, 0, 0]),
            Err(EngineError::Protocol(_))
        ));
    }

    #[test]
    fn test_attached_devices_retry_must_grow() {
        assert_eq!(attached_devices_retry_len(256, 466).unwrap(), 466);
        assert!(matches!(
            attached_devices_retry_len(256, 256),
            Err(EngineError::Protocol(_))
        ));
        assert!(matches!(
            attached_devices_retry_len(256, 8),
            Err(EngineError::Protocol(_))
        ));
    }

    #[test]
    fn test_popped_entry_display() {
        let entry = PoppedEntry {
            timestamp: Timestamp(0),
            kind: EventKind::Write,
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        assert_eq!(entry.to_string(), "W |    4 | DE AD BE EF");
    }

    #[test]
    fn test_popped_entry_json() {
        let entry = PoppedEntry {
            timestamp: Timestamp(42),
            kind: EventKind::ControlOperation,
            payload: vec![1],
        };
        assert_eq!(
            entry.to_json().unwrap(),
            r#"{"timestamp":42,"kind":"control_operation","payload":[1]}"#
        );
    }

    #[test]
    fn test_popped_entry_decode() {
        let mut data = Vec::new();
        data.put_i64_le(132_000_000_000_000_000);
        data.put_u16_le(EventKind::Read.as_u16());
        data.put_u16_le(2);
        data.put_slice(&[0x41, 0x42]);

        let entry = PoppedEntry::decode(&data).unwrap();
        assert_eq!(entry.kind, EventKind::Read);
        assert_eq!(entry.payload, b"AB");
        assert_eq!(entry.timestamp.ticks(), 132_000_000_000_000_000);

        data[8] = 0x09;
        assert!(matches!(PoppedEntry::decode(&data), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_pop_response_statuses() {
        assert_eq!(decode_pop_response(Status::NoMoreEntries, &[], "COM1").unwrap(), None);
        assert!(matches!(
            decode_pop_response(Status::NoSuchDevice, &[], "COM1"),
            Err(EngineError::NotFound(_))
        ));
    }
}
