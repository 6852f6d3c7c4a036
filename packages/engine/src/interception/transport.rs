// packages/engine/src/interception/transport.rs
//! Underlying port transport
//!
//! The interceptor forwards every operation to the real device unmodified and
//! only observes the result. Anything implementing [`PortTransport`] can sit
//! below an [`InterceptedPort`](crate::interception::pipeline::InterceptedPort).

use crate::interception::control_op::ControlOperation;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// The device below the interceptor
pub trait PortTransport: Send + Sync {
    /// Read up to `buf.len()` bytes. `Ok(0)` means nothing was available.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `data`, returning how many bytes the device accepted
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Apply a configuration command (baud rate, line control, ...)
    fn control(&self, op: &ControlOperation) -> io::Result<()>;
}

impl<T: PortTransport + ?Sized> PortTransport for Arc<T> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }

    fn control(&self, op: &ControlOperation) -> io::Result<()> {
        (**self).control(op)
    }
}

#[derive(Default)]
struct LoopbackInner {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    controls: Vec<ControlOperation>,
    read_error: Option<io::ErrorKind>,
    echo: bool,
}

/// In-memory port: bytes injected (or echoed from writes) come back on read
#[derive(Default)]
pub struct LoopbackTransport {
    inner: Mutex<LoopbackInner>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A port that echoes every written byte back to the reader
    pub fn echo() -> Self {
        let transport = Self::default();
        transport.inner.lock().echo = true;
        transport
    }

    /// Make bytes available to the next reads, as if the device received them
    pub fn inject(&self, data: &[u8]) {
        self.inner.lock().rx.extend(data);
    }

    /// Fail the next read with `kind`
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.inner.lock().read_error = Some(kind);
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().tx.clone()
    }

    /// Configuration commands applied so far
    pub fn controls(&self) -> Vec<ControlOperation> {
        self.inner.lock().controls.clone()
    }
}

impl PortTransport for LoopbackTransport {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();

        if let Some(kind) = inner.read_error.take() {
            return Err(io::Error::new(kind, "injected read failure"));
        }

        let n = buf.len().min(inner.rx.len());
        for (slot, byte) in buf.iter_mut().zip(inner.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        inner.tx.extend_from_slice(data);
        if inner.echo {
            inner.rx.extend(data);
        }
        Ok(data.len())
    }

    fn control(&self, op: &ControlOperation) -> io::Result<()> {
        self.inner.lock().controls.push(op.clone());
        Ok(())
    }
}
