// packages/engine/src/interception/pipeline.rs
//! Interception pipeline
//!
//! Every operation on an attached port passes through [`InterceptedPort`]:
//! it is forwarded to the transport unchanged, and a copy is captured when the
//! device's monitor mask asks for it. Capture never changes an operation's
//! outcome; a full log or an exhausted pool only costs the event.
//!
//! - **Write / control**: captured before forwarding, in the caller's context
//! - **Read**: captured after the transport returns data, via the deferred worker

use crate::capture::pool::EntryPool;
use crate::capture::record::EventKind;
use crate::interception::control_op::ControlOperation;
use crate::interception::deferred::{DeferredHandle, ReadHandoff};
use crate::interception::transport::PortTransport;
use crate::monitor::state::{MonitorState, RecordOutcome};
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::Arc;
use tracing::{error, trace};

/// A port with the capture engine between its user and its transport
pub struct InterceptedPort<T: PortTransport> {
    state: Arc<MonitorState>,
    transport: T,
    pool: EntryPool,
    deferred: DeferredHandle,
}

impl<T: PortTransport> InterceptedPort<T> {
    pub fn new(
        state: Arc<MonitorState>,
        transport: T,
        pool: EntryPool,
        deferred: DeferredHandle,
    ) -> Self {
        Self {
            state,
            transport,
            pool,
            deferred,
        }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn state(&self) -> &Arc<MonitorState> {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read up to `len` bytes from the port.
    ///
    /// When reads are monitored and data arrived, the read does not return
    /// until the deferred worker has recorded it (or could not take it).
    pub fn read(&self, len: usize) -> io::Result<Bytes> {
        let mut buf = BytesMut::zeroed(len);

        if !self.state.is_monitoring(EventKind::Read) {
            let n = self.transport.read(&mut buf)?;
            buf.truncate(n);
            return Ok(buf.freeze());
        }

        // Completion channel is set up before the read is forwarded
        let (completion, completed) = crossbeam_channel::bounded(1);

        let n = self.transport.read(&mut buf)?;
        if n == 0 {
            return Ok(Bytes::new());
        }
        buf.truncate(n);

        let handoff = ReadHandoff {
            device: self.state.shared_name(),
            data: buf.freeze(),
            completion,
        };

        match self.deferred.try_hand_off(handoff) {
            Ok(()) => completed.recv().map_err(|_| {
                error!("{}: deferred worker lost a read completion", self.name());
                io::Error::new(io::ErrorKind::Other, "read completion lost")
            }),
            Err(handoff) => Ok(handoff.data),
        }
    }

    /// Write `data` to the port, capturing it first if writes are monitored
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.capture(EventKind::Write, data);
        self.transport.write(data)
    }

    /// Apply a configuration command, capturing it first if control
    /// operations are monitored
    pub fn control(&self, op: &ControlOperation) -> io::Result<()> {
        if self.state.is_monitoring(EventKind::ControlOperation) {
            let payload = op.encode();
            self.capture(EventKind::ControlOperation, &payload);
        }
        self.transport.control(op)
    }

    fn capture(&self, kind: EventKind, payload: &[u8]) {
        match self.state.record(kind, payload, &self.pool) {
            RecordOutcome::Recorded | RecordOutcome::NotMonitored => {}
            outcome => trace!("{}: {} not captured ({:?})", self.name(), kind, outcome),
        }
    }
}
