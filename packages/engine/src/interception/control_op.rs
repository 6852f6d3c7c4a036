// packages/engine/src/interception/control_op.rs
//! Serial configuration commands and their captured payload
//!
//! A captured control operation is stored as the command code followed by a
//! fixed 20-byte parameter block (the largest parameter set, zero padded):
//!
//! ```text
//! offset  size  field
//! 0       4     code (u32)
//! 4       20    parameters, layout depends on code
//! ```
//!
//! Commands without a known layout keep their raw input bytes instead.

use crate::utils::errors::{EngineError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::fmt;

pub const SERIAL_SET_BAUD_RATE: u32 = 0x001B_0004;
pub const SERIAL_SET_QUEUE_SIZE: u32 = 0x001B_0008;
pub const SERIAL_SET_LINE_CONTROL: u32 = 0x001B_000C;
pub const SERIAL_SET_TIMEOUTS: u32 = 0x001B_001C;
pub const SERIAL_SET_HANDFLOW: u32 = 0x001B_0064;

/// Size of the parameter block behind the code
pub const CONTROL_PARAMS_LEN: usize = 20;

/// Captured payload size for every known command
pub const CONTROL_PAYLOAD_LEN: usize = 4 + CONTROL_PARAMS_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineControl {
    pub stop_bits: u8,
    pub parity: u8,
    pub word_length: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Timeouts {
    pub read_interval: u32,
    pub read_total_multiplier: u32,
    pub read_total_constant: u32,
    pub write_total_multiplier: u32,
    pub write_total_constant: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Handflow {
    pub control_handshake: u32,
    pub flow_replace: u32,
    pub xon_limit: i32,
    pub xoff_limit: i32,
}

/// A configuration command issued to a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlOperation {
    SetBaudRate { baud_rate: u32 },
    SetQueueSize { input_size: u32, output_size: u32 },
    SetLineControl(LineControl),
    SetTimeouts(Timeouts),
    SetHandflow(Handflow),
    Other { code: u32, input: Vec<u8> },
}

impl ControlOperation {
    pub fn code(&self) -> u32 {
        match self {
            ControlOperation::SetBaudRate { .. } => SERIAL_SET_BAUD_RATE,
            ControlOperation::SetQueueSize { .. } => SERIAL_SET_QUEUE_SIZE,
            ControlOperation::SetLineControl(_) => SERIAL_SET_LINE_CONTROL,
            ControlOperation::SetTimeouts(_) => SERIAL_SET_TIMEOUTS,
            ControlOperation::SetHandflow(_) => SERIAL_SET_HANDFLOW,
            ControlOperation::Other { code, .. } => *code,
        }
    }

    /// Build the captured payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CONTROL_PAYLOAD_LEN);
        buf.put_u32_le(self.code());

        match self {
            ControlOperation::SetBaudRate { baud_rate } => buf.put_u32_le(*baud_rate),
            ControlOperation::SetQueueSize {
                input_size,
                output_size,
            } => {
                buf.put_u32_le(*input_size);
                buf.put_u32_le(*output_size);
            }
            ControlOperation::SetLineControl(lc) => {
                buf.put_u8(lc.stop_bits);
                buf.put_u8(lc.parity);
                buf.put_u8(lc.word_length);
            }
            ControlOperation::SetTimeouts(t) => {
                buf.put_u32_le(t.read_interval);
                buf.put_u32_le(t.read_total_multiplier);
                buf.put_u32_le(t.read_total_constant);
                buf.put_u32_le(t.write_total_multiplier);
                buf.put_u32_le(t.write_total_constant);
            }
            ControlOperation::SetHandflow(h) => {
                buf.put_u32_le(h.control_handshake);
                buf.put_u32_le(h.flow_replace);
                buf.put_i32_le(h.xon_limit);
                buf.put_i32_le(h.xoff_limit);
            }
            ControlOperation::Other { input, .. } => {
                buf.put_slice(input);
                return buf.freeze();
            }
        }

        buf.resize(CONTROL_PAYLOAD_LEN, 0);
        buf.freeze()
    }

    /// Parse a captured payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(EngineError::BufferTooSmall {
                required: 4,
                provided: payload.len(),
            });
        }

        let mut buf = payload;
        let code = buf.get_u32_le();

        let known = matches!(
            code,
            SERIAL_SET_BAUD_RATE
                | SERIAL_SET_QUEUE_SIZE
                | SERIAL_SET_LINE_CONTROL
                | SERIAL_SET_TIMEOUTS
                | SERIAL_SET_HANDFLOW
        );
        if known && payload.len() < CONTROL_PAYLOAD_LEN {
            return Err(EngineError::BufferTooSmall {
                required: CONTROL_PAYLOAD_LEN,
                provided: payload.len(),
            });
        }

        let op = match code {
            SERIAL_SET_BAUD_RATE => ControlOperation::SetBaudRate {
                baud_rate: buf.get_u32_le(),
            },
            SERIAL_SET_QUEUE_SIZE => ControlOperation::SetQueueSize {
                input_size: buf.get_u32_le(),
                output_size: buf.get_u32_le(),
            },
            SERIAL_SET_LINE_CONTROL => ControlOperation::SetLineControl(LineControl {
                stop_bits: buf.get_u8(),
                parity: buf.get_u8(),
                word_length: buf.get_u8(),
            }),
            SERIAL_SET_TIMEOUTS => ControlOperation::SetTimeouts(Timeouts {
                read_interval: buf.get_u32_le(),
                read_total_multiplier: buf.get_u32_le(),
                read_total_constant: buf.get_u32_le(),
                write_total_multiplier: buf.get_u32_le(),
                write_total_constant: buf.get_u32_le(),
            }),
            SERIAL_SET_HANDFLOW => ControlOperation::SetHandflow(Handflow {
                control_handshake: buf.get_u32_le(),
                flow_replace: buf.get_u32_le(),
                xon_limit: buf.get_i32_le(),
                xoff_limit: buf.get_i32_le(),
            }),
            code => ControlOperation::Other {
                code,
                input: buf.to_vec(),
            },
        };

        Ok(op)
    }
}

impl fmt::Display for ControlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlOperation::SetBaudRate { baud_rate } => write!(f, "SET_BAUD_RATE {}", baud_rate),
            ControlOperation::SetQueueSize {
                input_size,
                output_size,
            } => write!(f, "SET_QUEUE_SIZE in={} out={}", input_size, output_size),
            ControlOperation::SetLineControl(lc) => write!(
                f,
                "SET_LINE_CONTROL stop={} parity={} word={}",
                lc.stop_bits, lc.parity, lc.word_length
            ),
            ControlOperation::SetTimeouts(t) => write!(
                f,
                "SET_TIMEOUTS interval={} read={}x+{} write={}x+{}",
                t.read_interval,
                t.read_total_multiplier,
                t.read_total_constant,
                t.write_total_multiplier,
                t.write_total_constant
            ),
            ControlOperation::SetHandflow(h) => write!(
                f,
                "SET_HANDFLOW handshake={:#x} replace={:#x} xon={} xoff={}",
                h.control_handshake, h.flow_replace, h.xon_limit, h.xoff_limit
            ),
            ControlOperation::Other { code, input } => {
                write!(f, "IOCTL {:#010x} ({} bytes)", code, input.len())
            }
        }
    }
}
