// packages/engine/src/capture/pool.rs
//! Fixed-size entry pool
//!
//! Hands out buffers of exactly [`ENTRY_RECORD_SIZE`] bytes and takes them
//! back when an [`EntryBuffer`] is dropped. Released buffers go onto a
//! lock-free free list so steady-state capture does not touch the allocator.
//!
//! # Architecture
//!
//! ```text
//! EntryPool
//! ├─ Free list: [Block, Block, ...]   (up to free_list_depth, reused)
//! └─ Live: acquired - released        (bounded by capacity)
//! ```
//!
//! Running out of capacity is a normal outcome: `acquire` returns
//! [`EngineError::Exhausted`] and the caller drops the event.

use crate::capture::record::ENTRY_RECORD_SIZE;
use crate::utils::errors::{EngineError, Result};
use crossbeam::queue::ArrayQueue;
use serde::Deserialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for the entry pool
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of buffers alive at the same time
    pub capacity: usize,

    /// Number of released buffers kept around for reuse
    pub free_list_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 8192,
            free_list_depth: 256,
        }
    }
}

struct PoolShared {
    free: ArrayQueue<Box<[u8]>>,
    capacity: usize,
    live: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
    exhausted: AtomicU64,
    closed: AtomicBool,
}

impl PoolShared {
    fn reclaim(&self, block: Box<[u8]>) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.released.fetch_add(1, Ordering::Relaxed);

        if !self.closed.load(Ordering::Acquire) {
            // A full free list just lets the block go back to the allocator
            let _ = self.free.push(block);
        }
    }
}

/// Process-wide pool of fixed-size record buffers
#[derive(Clone)]
pub struct EntryPool {
    shared: Arc<PoolShared>,
}

impl EntryPool {
    /// Create a new entry pool
    pub fn new(config: PoolConfig) -> Self {
        info!(
            "Initializing entry pool: capacity {} buffers of {} bytes, free list depth {}",
            config.capacity, ENTRY_RECORD_SIZE, config.free_list_depth
        );

        Self {
            shared: Arc::new(PoolShared {
                free: ArrayQueue::new(config.free_list_depth.max(1)),
                capacity: config.capacity,
                live: AtomicUsize::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Take a buffer out of the pool
    pub fn acquire(&self) -> Result<EntryBuffer> {
        let shared = &self.shared;

        if shared.closed.load(Ordering::Acquire) {
            shared.exhausted.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::Exhausted);
        }

        let reserved = shared
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < shared.capacity).then_some(live + 1)
            });

        if reserved.is_err() {
            shared.exhausted.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::Exhausted);
        }

        shared.acquired.fetch_add(1, Ordering::Relaxed);

        let block = shared
            .free
            .pop()
            .unwrap_or_else(|| vec![0u8; ENTRY_RECORD_SIZE].into_boxed_slice());

        Ok(EntryBuffer {
            block,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Give a buffer back. Equivalent to dropping it.
    pub fn release(&self, buffer: EntryBuffer) {
        drop(buffer);
    }

    /// Number of buffers currently handed out
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.shared.capacity,
            live: self.live(),
            free: self.shared.free.len(),
            acquired: self.shared.acquired.load(Ordering::Relaxed),
            released: self.shared.released.load(Ordering::Relaxed),
            exhausted: self.shared.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out buffers and drop the free list.
    ///
    /// Buffers still alive are freed when their owners drop them.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let mut freed = 0usize;
        while self.shared.free.pop().is_some() {
            freed += 1;
        }
        debug!("Entry pool shut down, {} cached buffers freed", freed);
    }
}

impl fmt::Debug for EntryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPool").field("stats", &self.stats()).finish()
    }
}

/// A buffer owned by exactly one record at a time.
///
/// Returns itself to the pool on drop, so it can be released once and only once.
pub struct EntryBuffer {
    block: Box<[u8]>,
    shared: Arc<PoolShared>,
}

impl Deref for EntryBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.block
    }
}

impl DerefMut for EntryBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.block
    }
}

impl Drop for EntryBuffer {
    fn drop(&mut self) {
        let block = std::mem::take(&mut self.block);
        self.shared.reclaim(block);
    }
}

impl fmt::Debug for EntryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryBuffer").field("len", &self.block.len()).finish()
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub live: usize,
    pub free: usize,
    pub acquired: u64,
    pub released: u64,
    pub exhausted: u64,
}
