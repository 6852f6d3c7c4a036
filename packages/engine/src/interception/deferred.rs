// packages/engine/src/interception/deferred.rs
//! Deferred read recording
//!
//! Read completions arrive in a context that must not block, allocate or take
//! the log lock. They hand the read data to a dedicated worker thread instead;
//! the worker records the event and then finishes the read by sending the data
//! back to the waiting reader.
//!
//! ```text
//! read completes ─→ try_hand_off ─┬─→ worker: registry.find ─→ MonitorState::record
//!                                 │                     │
//!                                 │                     └─→ completion.send(data)
//!                                 └─→ queue full: read completes unrecorded
//! ```
//!
//! The handoff carries the device *name*, not a pointer to its state. A device
//! detached in between is simply not found and the handoff is discarded.

use crate::capture::pool::EntryPool;
use crate::capture::record::EventKind;
use crate::monitor::registry::DeviceRegistry;
use crate::monitor::state::RecordOutcome;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

/// One completed read waiting to be recorded
pub struct ReadHandoff {
    pub device: Arc<str>,
    pub data: Bytes,

    /// Finishes the original read once the worker is done with it
    pub completion: Sender<Bytes>,
}

/// Cheap, cloneable sender side of the worker's queue
#[derive(Clone)]
pub struct DeferredHandle {
    tx: Sender<ReadHandoff>,
}

impl DeferredHandle {
    /// Queue a handoff without blocking.
    ///
    /// Gives the handoff back when the worker is saturated or gone; the caller
    /// then completes the read itself.
    pub fn try_hand_off(&self, handoff: ReadHandoff) -> std::result::Result<(), ReadHandoff> {
        match self.tx.try_send(handoff) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(handoff)) => {
                trace!("Deferred queue full, {} read not recorded", handoff.device);
                metrics::counter!("portsniffer_events_dropped_total", "reason" => "queue_full")
                    .increment(1);
                Err(handoff)
            }
            Err(TrySendError::Disconnected(handoff)) => Err(handoff),
        }
    }
}

#[derive(Default)]
struct WorkerCounters {
    processed: AtomicU64,
    recorded: AtomicU64,
    discarded: AtomicU64,
    dropped: AtomicU64,
}

/// Worker statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeferredStats {
    /// Handoffs taken off the queue
    pub processed: u64,

    /// Handoffs that became log entries
    pub recorded: u64,

    /// Handoffs whose device was no longer attached
    pub discarded: u64,

    /// Handoffs refused by the log or the pool (or no longer monitored)
    pub dropped: u64,
}

/// Dedicated thread that records deferred reads
pub struct DeferredWorker {
    handle: DeferredHandle,
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    counters: Arc<WorkerCounters>,
}

impl DeferredWorker {
    /// Start the worker with room for `queue_depth` pending handoffs
    pub fn spawn(registry: Arc<DeviceRegistry>, pool: EntryPool, queue_depth: usize) -> Result<Self> {
        let (tx, rx) = bounded::<ReadHandoff>(queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let counters = Arc::new(WorkerCounters::default());

        let thread = {
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name("portsniffer-deferred".to_string())
                .spawn(move || run(rx, shutdown_rx, registry, pool, counters))
                .map_err(EngineError::Io)?
        };

        info!("Deferred read worker started (queue depth {})", queue_depth.max(1));

        Ok(Self {
            handle: DeferredHandle { tx },
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
            counters,
        })
    }

    pub fn handle(&self) -> DeferredHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> DeferredStats {
        DeferredStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker. Handoffs still queued are completed without recording.
    pub fn shutdown(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        drop(shutdown_tx);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Deferred read worker panicked");
            }
        }

        info!("Deferred read worker stopped: {:?}", self.stats());
    }
}

impl Drop for DeferredWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    rx: Receiver<ReadHandoff>,
    shutdown_rx: Receiver<()>,
    registry: Arc<DeviceRegistry>,
    pool: EntryPool,
    counters: Arc<WorkerCounters>,
) {
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(handoff) => process(handoff, &registry, &pool, &counters),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }

    // Nobody is recording any more; let blocked readers go
    let mut released = 0usize;
    while let Ok(handoff) = rx.try_recv() {
        let _ = handoff.completion.send(handoff.data);
        released += 1;
    }
    if released > 0 {
        debug!("Completed {} pending reads without recording", released);
    }
}

fn process(
    handoff: ReadHandoff,
    registry: &DeviceRegistry,
    pool: &EntryPool,
    counters: &WorkerCounters,
) {
    counters.processed.fetch_add(1, Ordering::Relaxed);

    match registry.find(&handoff.device) {
        Ok(state) => match state.record(EventKind::Read, &handoff.data, pool) {
            RecordOutcome::Recorded => {
                counters.recorded.fetch_add(1, Ordering::Relaxed);
            }
            outcome => {
                trace!("{}: deferred read not recorded ({:?})", handoff.device, outcome);
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        },
        Err(_) => {
            trace!("{}: device gone, discarding deferred read", handoff.device);
            counters.discarded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("portsniffer_handoffs_discarded_total").increment(1);
        }
    }

    // The reader may have given up; the data is no longer needed then
    let _ = handoff.completion.send(handoff.data);
}
