//! Log Buffer Pool
//!
//! ## Buffer lifecycle
//! ```text
//!   allocate/reuse ──▶ Writing ──seal──▶ Dirty ──write──▶ Clean ──reuse──┐
//!          ▲                               │                            │
//!          │                             fails                          │
//!          │                               ▼                            │
//!          │                            Failed ──discard_failed──▶ freed │
//!          └────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Exactly one buffer is the current write buffer; sealed buffers queue
//!   in LSN order and are written in that order.
//! - Clean buffers stay readable until they are reused or evicted.
//! - The total capacity of all buffers never exceeds the budget. When it is
//!   used up the appender writes dirty buffers itself (backpressure) or,
//!   if configured not to block, fails with `BufferPoolExhausted`.
//! - After a write failure no further buffer is handed out until the
//!   failure has been discarded.
//!
//! ## Concurrency:
//! - `state`: pool bookkeeping, never held across I/O
//! - `write_lock`: serializes buffer writes so they reach the file in order

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{LogError, Result};
use crate::file::{FileManager, LogPosition};
use crate::lsn::Lsn;

use super::{BufferState, LogBuffer};

/// Buffers dropped after a write failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discarded {
    /// Cursor before the first discarded entry
    pub rewind: Option<LogPosition>,
    /// First discarded entry
    pub first_lsn: Lsn,
    /// Transactions that had entries in the discarded buffers
    pub txn_ids: HashSet<u64>,
    pub n_buffers: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently allocated
    pub n_buffers: usize,
    /// Bytes of all allocated buffers
    pub buffer_bytes: usize,
    /// Entry lookups by LSN
    pub n_not_resident: u64,
    /// Lookups the pool could not serve
    pub n_cache_miss: u64,
    pub n_buffers_written: u64,
    /// Times an appender had to write buffers to make room
    pub n_pool_waits: u64,
}

struct PoolState {
    current: Option<Arc<LogBuffer>>,
    /// Sealed buffers in LSN order
    buffers: VecDeque<Arc<LogBuffer>>,
    allocated_bytes: usize,
    next_id: u64,
    failure: Option<Arc<LogBuffer>>,
}

impl PoolState {
    fn all(&self) -> impl Iterator<Item = &Arc<LogBuffer>> {
        self.buffers.iter().chain(self.current.iter())
    }
}

/// Pool of write buffers sitting between appenders and the log files.
pub struct LogBufferPool {
    buffer_size: usize,
    max_buffer_size: usize,
    budget: usize,
    block_when_full: bool,
    state: Mutex<PoolState>,
    write_lock: Mutex<()>,

    n_not_resident: AtomicU64,
    n_cache_miss: AtomicU64,
    n_buffers_written: AtomicU64,
    n_pool_waits: AtomicU64,
}

impl LogBufferPool {
    pub fn new(config: &Config) -> Self {
        Self {
            buffer_size: config.log_buffer_size,
            max_buffer_size: config.log_buffer_max_size,
            budget: config.buffer_pool_budget,
            block_when_full: config.block_on_full_pool,
            state: Mutex::new(PoolState {
                current: None,
                buffers: VecDeque::new(),
                allocated_bytes: 0,
                next_id: 0,
                failure: None,
            }),
            write_lock: Mutex::new(()),
            n_not_resident: AtomicU64::new(0),
            n_cache_miss: AtomicU64::new(0),
            n_buffers_written: AtomicU64::new(0),
            n_pool_waits: AtomicU64::new(0),
        }
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Buffer that will receive the next `min_size` bytes.
    ///
    /// Rotates away from the current buffer when it lacks room or when the
    /// entry starts a new file, since a buffer never spans two files.
    /// Must be called under the log's allocation lock.
    pub fn get_write_buffer(
        &self,
        min_size: usize,
        file_flipped: bool,
        fm: &FileManager,
    ) -> Result<Arc<LogBuffer>> {
        if min_size > self.max_buffer_size {
            return Err(LogError::EntryTooLarge {
                size: min_size,
                max: self.max_buffer_size,
            });
        }

        let mut state = self.state.lock();
        Self::check_failure(&state)?;

        if let Some(current) = &state.current {
            if !file_flipped && current.has_room(min_size) {
                return Ok(Arc::clone(current));
            }
            if current.is_empty() && current.capacity() >= min_size {
                return Ok(Arc::clone(current));
            }
        }

        if let Some(current) = state.current.take() {
            if current.seal() {
                state.buffers.push_back(current);
            } else {
                state.allocated_bytes -= current.capacity();
            }
        }

        let want = min_size.max(self.buffer_size).min(self.max_buffer_size);
        loop {
            let reusable = state
                .buffers
                .iter()
                .position(|b| b.state() == BufferState::Clean && b.capacity() >= min_size);
            if let Some(pos) = reusable {
                if let Some(buffer) = state.buffers.remove(pos) {
                    buffer.reinit();
                    state.current = Some(Arc::clone(&buffer));
                    return Ok(buffer);
                }
            }

            if state.allocated_bytes + want <= self.budget {
                let buffer = Arc::new(LogBuffer::new(state.next_id, want));
                state.next_id += 1;
                state.allocated_bytes += want;
                state.current = Some(Arc::clone(&buffer));
                debug!(id = buffer.id(), capacity = want, "allocated log buffer");
                return Ok(buffer);
            }

            let evictable = state
                .buffers
                .iter()
                .position(|b| b.state() == BufferState::Clean);
            if let Some(pos) = evictable {
                if let Some(buffer) = state.buffers.remove(pos) {
                    state.allocated_bytes -= buffer.capacity();
                    debug!(id = buffer.id(), "evicted clean log buffer");
                }
                continue;
            }

            if !self.block_when_full {
                return Err(LogError::BufferPoolExhausted {
                    budget: self.budget,
                });
            }

            self.n_pool_waits.fetch_add(1, Ordering::Relaxed);
            drop(state);
            self.write_dirty_buffers(fm)?;
            state = self.state.lock();
            Self::check_failure(&state)?;
        }
    }

    /// Note that the entry at `lsn` is in the current buffer; with `flush`
    /// the buffer is sealed so the next write takes it to disk.
    pub fn write_completed(&self, lsn: Lsn, flush: bool) {
        if flush {
            debug!(%lsn, "sealing write buffer for flush");
            self.seal_current();
        }
    }

    /// Queue the current buffer for writing if it holds anything.
    pub fn seal_current(&self) {
        let mut state = self.state.lock();
        let sealed = match &state.current {
            Some(current) => current.seal(),
            None => false,
        };
        if sealed {
            if let Some(current) = state.current.take() {
                state.buffers.push_back(current);
            }
        }
    }

    pub fn has_dirty(&self) -> bool {
        let state = self.state.lock();
        state
            .buffers
            .iter()
            .any(|b| b.state() == BufferState::Dirty)
    }

    /// Write every dirty buffer, oldest first.
    ///
    /// On failure the buffer is marked failed, later buffers stay unwritten,
    /// and every call fails until `discard_failed` runs.
    pub fn write_dirty_buffers(&self, fm: &FileManager) -> Result<()> {
        let _writing = self.write_lock.lock();
        loop {
            let next = {
                let state = self.state.lock();
                Self::check_failure(&state)?;
                state
                    .buffers
                    .iter()
                    .find(|b| b.state() == BufferState::Dirty)
                    .cloned()
            };
            let buffer = match next {
                Some(buffer) => buffer,
                None => return Ok(()),
            };

            let (first_lsn, bytes) = buffer.prepare_write();
            if let Err(e) = fm.write_log_buffer(first_lsn, &bytes) {
                buffer.mark_failed();
                self.state.lock().failure = Some(Arc::clone(&buffer));
                warn!(
                    buffer = buffer.id(),
                    %first_lsn,
                    error = %e,
                    "log buffer write failed"
                );
                return Err(LogError::LogWrite(format!(
                    "writing buffer at {}: {}",
                    first_lsn, e
                )));
            }
            buffer.mark_clean();
            self.n_buffers_written.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn has_failure(&self) -> bool {
        self.state.lock().failure.is_some()
    }

    /// Drop the failed buffer and every buffer after it.
    ///
    /// Must be called under the log's allocation lock.
    pub fn discard_failed(&self) -> Result<Option<Discarded>> {
        let (failed, dropped) = {
            let mut state = self.state.lock();
            let failed = match state.failure.take() {
                Some(failed) => failed,
                None => return Ok(None),
            };
            // the failed buffer stays queued, so draining from it covers it
            let from = state
                .buffers
                .iter()
                .position(|b| Arc::ptr_eq(b, &failed))
                .unwrap_or(state.buffers.len());
            let mut dropped: Vec<Arc<LogBuffer>> = state.buffers.drain(from..).collect();
            dropped.extend(state.current.take());
            for buffer in &dropped {
                state.allocated_bytes = state.allocated_bytes.saturating_sub(buffer.capacity());
            }
            (failed, dropped)
        };

        let mut txn_ids = HashSet::new();
        for buffer in &dropped {
            txn_ids.extend(buffer.txn_ids()?);
        }
        Ok(Some(Discarded {
            rewind: failed.rewind_point(),
            first_lsn: failed.first_lsn(),
            txn_ids,
            n_buffers: dropped.len(),
        }))
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Buffer currently holding `lsn`, if any.
    pub fn get_read_buffer(&self, lsn: Lsn) -> Option<Arc<LogBuffer>> {
        let state = self.state.lock();
        let found = state.all().find(|b| b.contains_lsn(lsn)).cloned();
        found
    }

    /// Bytes of the entry at `lsn` if it is still buffered.
    pub fn read_entry(&self, lsn: Lsn) -> Result<Option<Bytes>> {
        self.n_not_resident.fetch_add(1, Ordering::Relaxed);
        let found = match self.get_read_buffer(lsn) {
            Some(buffer) => buffer.read_entry(lsn)?,
            None => None,
        };
        if found.is_none() {
            self.n_cache_miss.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            n_buffers: state.all().count(),
            buffer_bytes: state.allocated_bytes,
            n_not_resident: self.n_not_resident.load(Ordering::Relaxed),
            n_cache_miss: self.n_cache_miss.load(Ordering::Relaxed),
            n_buffers_written: self.n_buffers_written.load(Ordering::Relaxed),
            n_pool_waits: self.n_pool_waits.load(Ordering::Relaxed),
        }
    }

    fn check_failure(state: &PoolState) -> Result<()> {
        match &state.failure {
            Some(failed) => Err(LogError::LogWrite(format!(
                "log buffer at {} failed to write and has not been discarded",
                failed.first_lsn()
            ))),
            None => Ok(()),
        }
    }
}
