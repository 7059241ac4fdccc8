//! A single staging buffer.
//!
//! Entries are claimed (`reserve`) under the log's allocation lock and
//! copied in (`fill`) afterwards, possibly by several threads at once.
//! Anything that needs the bytes to be complete waits for the pending
//! copies to drain first.

use std::collections::HashSet;

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};

use crate::entry::LogEntryHeader;
use crate::error::{LogError, Result};
use crate::file::LogPosition;
use crate::lsn::Lsn;

/// Where a buffer is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Accepting appends
    Writing,
    /// Full or sealed, waiting to be written
    Dirty,
    /// On disk; kept as a read cache until reused
    Clean,
    /// Its write failed; unusable until discarded
    Failed,
}

struct BufferInner {
    data: BytesMut,
    /// Contents handed to the file layer, kept for reads
    frozen: Option<Bytes>,
    first_lsn: Lsn,
    last_lsn: Lsn,
    /// Reserved ranges not yet copied in
    pending: usize,
    state: BufferState,
    /// Cursor before the first entry of this buffer
    rewind: Option<LogPosition>,
}

impl BufferInner {
    fn bytes(&self) -> &[u8] {
        match &self.frozen {
            Some(frozen) => frozen,
            None => &self.data,
        }
    }
}

/// Fixed-capacity byte region holding whole entries of one log file.
pub struct LogBuffer {
    id: u64,
    capacity: usize,
    inner: Mutex<BufferInner>,
    filled: Condvar,
}

impl LogBuffer {
    pub fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            inner: Mutex::new(BufferInner {
                data: BytesMut::with_capacity(capacity),
                frozen: None,
                first_lsn: Lsn::NULL,
                last_lsn: Lsn::NULL,
                pending: 0,
                state: BufferState::Writing,
                rewind: None,
            }),
            filled: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> BufferState {
        self.inner.lock().state
    }

    /// Bytes claimed so far.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_lsn().is_null()
    }

    pub fn first_lsn(&self) -> Lsn {
        self.inner.lock().first_lsn
    }

    pub fn last_lsn(&self) -> Lsn {
        self.inner.lock().last_lsn
    }

    /// Whether `size` more bytes can be appended.
    pub fn has_room(&self, size: usize) -> bool {
        let inner = self.inner.lock();
        inner.state == BufferState::Writing && inner.data.len() + size <= self.capacity
    }

    /// Claim `size` bytes for the entry at `lsn`; returns the offset to fill.
    ///
    /// `before` is the allocation cursor before `lsn` was issued and becomes
    /// the rewind point if this is the first entry.
    pub fn reserve(&self, lsn: Lsn, size: usize, before: LogPosition) -> usize {
        let mut inner = self.inner.lock();
        if inner.first_lsn.is_null() {
            inner.first_lsn = lsn;
            inner.rewind = Some(before);
        }
        let offset = inner.data.len();
        inner.data.resize(offset + size, 0);
        inner.last_lsn = lsn;
        inner.pending += 1;
        offset
    }

    /// Copy a sealed entry into the range claimed by `reserve`.
    pub fn fill(&self, offset: usize, entry: &[u8]) {
        let mut inner = self.inner.lock();
        inner.data[offset..offset + entry.len()].copy_from_slice(entry);
        inner.pending -= 1;
        if inner.pending == 0 {
            self.filled.notify_all();
        }
    }

    pub fn contains_lsn(&self, lsn: Lsn) -> bool {
        let inner = self.inner.lock();
        Self::holds(&inner, lsn)
    }

    /// Bytes of the entry at `lsn`, or `None` if this buffer does not hold it.
    pub fn read_entry(&self, lsn: Lsn) -> Result<Option<Bytes>> {
        let mut inner = self.inner.lock();
        if !Self::holds(&inner, lsn) {
            return Ok(None);
        }
        while inner.pending > 0 {
            self.filled.wait(&mut inner);
        }
        if !Self::holds(&inner, lsn) {
            return Ok(None);
        }

        let start = (lsn.file_offset() - inner.first_lsn.file_offset()) as usize;
        let bytes = inner.bytes();
        let header = LogEntryHeader::read_from(&bytes[start..])?;
        let end = start + header.entry_size();
        if end > bytes.len() {
            return Err(LogError::Corruption(format!(
                "buffered entry at {} runs past the buffer end",
                lsn
            )));
        }
        Ok(Some(Bytes::copy_from_slice(&bytes[start..end])))
    }

    /// Stop accepting appends. Returns true if there is anything to write.
    pub fn seal(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != BufferState::Writing || inner.first_lsn.is_null() {
            return false;
        }
        inner.state = BufferState::Dirty;
        true
    }

    /// Wait for pending copies and hand out the bytes to write.
    pub fn prepare_write(&self) -> (Lsn, Bytes) {
        let mut inner = self.inner.lock();
        while inner.pending > 0 {
            self.filled.wait(&mut inner);
        }
        if inner.frozen.is_none() {
            let data = inner.data.split().freeze();
            inner.frozen = Some(data);
        }
        let bytes = inner.frozen.clone().unwrap_or_default();
        (inner.first_lsn, bytes)
    }

    pub fn mark_clean(&self) {
        self.inner.lock().state = BufferState::Clean;
    }

    pub fn mark_failed(&self) {
        self.inner.lock().state = BufferState::Failed;
    }

    /// Empty the buffer for reuse as a write buffer.
    pub fn reinit(&self) {
        let mut inner = self.inner.lock();
        inner.frozen = None;
        inner.data.clear();
        inner.data.reserve(self.capacity);
        inner.first_lsn = Lsn::NULL;
        inner.last_lsn = Lsn::NULL;
        inner.pending = 0;
        inner.state = BufferState::Writing;
        inner.rewind = None;
    }

    /// Cursor to restore if this buffer's entries are thrown away.
    pub fn rewind_point(&self) -> Option<LogPosition> {
        self.inner.lock().rewind
    }

    /// Transactions owning any entry in this buffer.
    pub fn txn_ids(&self) -> Result<HashSet<u64>> {
        let mut inner = self.inner.lock();
        while inner.pending > 0 {
            self.filled.wait(&mut inner);
        }

        let mut ids = HashSet::new();
        let mut rest = inner.bytes();
        while !rest.is_empty() {
            let header = LogEntryHeader::read_from(rest)?;
            if let Some(txn_id) = header.txn_id() {
                ids.insert(txn_id);
            }
            let size = header.entry_size().min(rest.len());
            rest = &rest[size..];
        }
        Ok(ids)
    }

    fn holds(inner: &BufferInner, lsn: Lsn) -> bool {
        !inner.first_lsn.is_null()
            && inner.state != BufferState::Failed
            && lsn.file_number() == inner.first_lsn.file_number()
            && lsn >= inner.first_lsn
            && lsn <= inner.last_lsn
    }
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LogBuffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("state", &inner.state)
            .field("first_lsn", &inner.first_lsn)
            .field("last_lsn", &inner.last_lsn)
            .finish()
    }
}
