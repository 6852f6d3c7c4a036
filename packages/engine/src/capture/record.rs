// packages/engine/src/capture/record.rs
//! Captured event records and their wire layout
//!
//! A record lives in a single pooled buffer, already laid out the way the
//! control protocol returns it:
//!
//! ```text
//! offset  size  field
//! 0       8     timestamp      (i64, 100 ns ticks since 1601-01-01 UTC)
//! 8       2     kind           (u16, one MonitorMask bit)
//! 10      2     payload_length (u16)
//! 12      n     payload        (n <= MAX_PAYLOAD_LENGTH)
//! ```
//!
//! Popping a record is therefore a single copy of `RECORD_HEADER_LEN + n` bytes.

use crate::capture::pool::EntryBuffer;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Size of every pooled record buffer and the largest PopLogEntry response
pub const ENTRY_RECORD_SIZE: usize = 4096;

/// Fixed fields in front of the payload
pub const RECORD_HEADER_LEN: usize = 12;

/// Payload bytes that fit behind the header; anything beyond is truncated
pub const MAX_PAYLOAD_LENGTH: usize = ENTRY_RECORD_SIZE - RECORD_HEADER_LEN;

/// Width of a device name on the wire in UTF-16 code units, terminator included
pub const DEVICE_NAME_UNITS: usize = 128;

/// Offset between 1601-01-01 and 1970-01-01 in 100 ns ticks
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

bitflags! {
    /// Operation classes captured for a device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MonitorMask: u16 {
        const READ = 0x0001;
        const WRITE = 0x0002;
        const CONTROL = 0x0004;
    }
}

impl MonitorMask {
    /// Attached but not recording
    pub const NONE: MonitorMask = MonitorMask::empty();
}

impl FromStr for MonitorMask {
    type Err = String;

    /// Parse a type string such as `"RW"` or `"C"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = MonitorMask::NONE;

        for c in s.chars() {
            match c {
                'R' => mask |= MonitorMask::READ,
                'W' => mask |= MonitorMask::WRITE,
                'C' => mask |= MonitorMask::CONTROL,
                other => return Err(format!("Invalid monitor type: {}", other)),
            }
        }

        if mask.is_empty() {
            return Err("No monitor types given".to_string());
        }

        Ok(mask)
    }
}

/// Kind of a captured operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum EventKind {
    Read = 0x0001,
    Write = 0x0002,
    ControlOperation = 0x0004,
}

impl EventKind {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(EventKind::Read),
            0x0002 => Some(EventKind::Write),
            0x0004 => Some(EventKind::ControlOperation),
            _ => None,
        }
    }

    /// The mask bit that enables capturing this kind
    pub fn mask(self) -> MonitorMask {
        MonitorMask::from_bits_truncate(self.as_u16())
    }

    /// Single-character tag used in log listings
    pub fn symbol(self) -> char {
        match self {
            EventKind::Read => 'R',
            EventKind::Write => 'W',
            EventKind::ControlOperation => 'C',
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Read => write!(f, "read"),
            EventKind::Write => write!(f, "write"),
            EventKind::ControlOperation => write!(f, "control"),
        }
    }
}

/// Wall-clock capture time in 100 ns ticks since 1601-01-01 UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let ticks = time.timestamp() * TICKS_PER_SECOND
            + i64::from(time.timestamp_subsec_nanos()) / 100
            + UNIX_EPOCH_TICKS;
        Self(ticks)
    }

    pub fn ticks(self) -> i64 {
        self.0
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let since_unix = self.0.checked_sub(UNIX_EPOCH_TICKS)?;
        let secs = since_unix.div_euclid(TICKS_PER_SECOND);
        let nanos = (since_unix.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        DateTime::from_timestamp(secs, nanos)
    }
}

/// One captured operation, stored in a pooled buffer
pub struct EventRecord {
    buffer: EntryBuffer,
    kind: EventKind,
    payload_len: usize,
}

impl EventRecord {
    /// Lay out a record in `buffer`, truncating the payload to [`MAX_PAYLOAD_LENGTH`]
    pub fn encode(
        mut buffer: EntryBuffer,
        kind: EventKind,
        timestamp: Timestamp,
        payload: &[u8],
    ) -> Self {
        let payload_len = payload.len().min(MAX_PAYLOAD_LENGTH);

        buffer[0..8].copy_from_slice(&timestamp.ticks().to_le_bytes());
        buffer[8..10].copy_from_slice(&kind.as_u16().to_le_bytes());
        buffer[10..12].copy_from_slice(&(payload_len as u16).to_le_bytes());
        buffer[RECORD_HEADER_LEN..RECORD_HEADER_LEN + payload_len]
            .copy_from_slice(&payload[..payload_len]);

        Self {
            buffer,
            kind,
            payload_len,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        let mut ticks = [0u8; 8];
        ticks.copy_from_slice(&self.buffer[0..8]);
        Timestamp(i64::from_le_bytes(ticks))
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[RECORD_HEADER_LEN..RECORD_HEADER_LEN + self.payload_len]
    }

    /// Number of meaningful bytes in the wire form
    pub fn wire_len(&self) -> usize {
        RECORD_HEADER_LEN + self.payload_len
    }

    /// Header and payload, exactly as a PopLogEntry response carries them
    pub fn as_wire(&self) -> &[u8] {
        &self.buffer[..self.wire_len()]
    }
}

impl fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRecord")
            .field("timestamp", &self.timestamp())
            .field("kind", &self.kind)
            .field("payload_len", &self.payload_len)
            .finish()
    }
}
