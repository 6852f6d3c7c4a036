// packages/engine/src/control/frame.rs
//! Framing of control requests over a byte stream
//!
//! ```text
//! request:  code u32 | input_len u32 | output_capacity u32 | input
//! response: status u32 | information u32 | output[..information]
//! ```

use crate::control::protocol::Status;
use crate::utils::errors::{EngineError, Result};
use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest input or output carried by one frame
pub const MAX_FRAME_PAYLOAD: usize = 64 * 1024;

const REQUEST_HEADER_LEN: usize = 12;
const RESPONSE_HEADER_LEN: usize = 8;

#[derive(Debug)]
pub struct RequestFrame {
    pub code: u32,
    pub input: Vec<u8>,
    pub output_capacity: usize,
}

/// Read the next request. `Ok(None)` when the peer closed the stream.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<RequestFrame>> {
    let code = match reader.read_u32_le().await {
        Ok(code) => code,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let input_len = reader.read_u32_le().await? as usize;
    let output_capacity = reader.read_u32_le().await? as usize;

    if input_len > MAX_FRAME_PAYLOAD {
        return Err(EngineError::Protocol(format!(
            "Request input of {} bytes exceeds {}",
            input_len, MAX_FRAME_PAYLOAD
        )));
    }

    let mut input = vec![0u8; input_len];
    reader.read_exact(&mut input).await?;

    Ok(Some(RequestFrame {
        code,
        input,
        output_capacity: output_capacity.min(MAX_FRAME_PAYLOAD),
    }))
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    code: u32,
    input: &[u8],
    output_capacity: usize,
) -> Result<()> {
    if input.len() > MAX_FRAME_PAYLOAD {
        return Err(EngineError::Protocol(format!(
            "Request input of {} bytes exceeds {}",
            input.len(),
            MAX_FRAME_PAYLOAD
        )));
    }

    let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + input.len());
    buf.put_u32_le(code);
    buf.put_u32_le(input.len() as u32);
    buf.put_u32_le(output_capacity.min(MAX_FRAME_PAYLOAD) as u32);
    buf.put_slice(input);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: Status,
    output: &[u8],
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + output.len());
    buf.put_u32_le(status.as_u32());
    buf.put_u32_le(output.len() as u32);
    buf.put_slice(output);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_response<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Status, Vec<u8>)> {
    let raw_status = reader.read_u32_le().await?;
    let information = reader.read_u32_le().await? as usize;

    let status = Status::from_u32(raw_status)
        .ok_or_else(|| EngineError::Protocol(format!("Unknown status {:#010x}", raw_status)))?;

    if information > MAX_FRAME_PAYLOAD {
        return Err(EngineError::Protocol(format!(
            "Response of {} bytes exceeds {}",
            information, MAX_FRAME_PAYLOAD
        )));
    }

    let mut output = vec![0u8; information];
    reader.read_exact(&mut output).await?;
    Ok((status, output))
}
