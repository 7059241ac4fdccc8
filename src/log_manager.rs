//! Log Manager
//!
//! The entry point of the log: append records, read them back by LSN, and
//! make them durable.
//!
//! ## Responsibilities
//! - Find and repair the end of the log on open
//! - Assign LSNs and stage entries in the buffer pool
//! - Write buffers out and group fsyncs
//! - Roll the allocator back after a failed write and force the affected
//!   transactions to abort
//!
//! ## Append path
//! ```text
//!   marshal ──▶ [log_lock: bump_lsn + get_write_buffer + reserve] ──▶ seal + copy
//!                                                                        │
//!               fsync (group) ◀── write dirty buffers (in LSN order) ◀───┘
//! ```
//!
//! ## Concurrency:
//! - `log_lock` covers only LSN allocation and buffer choice. The entry is
//!   copied into its reserved range after the lock is released.
//! - Lock order: `log_lock` → pool → buffer. The file manager's locks are
//!   leaves.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::{LogBufferPool, PoolStats};
use crate::config::Config;
use crate::entry::{
    marshal_entry, seal_entry, LogEntry, LogEntryHeader, LogEntryType, Loggable,
    FIRST_LOG_ENTRY_OFFSET,
};
use crate::error::{LogError, Result};
use crate::file::{FileManager, FileManagerStats};
use crate::fsync::{FSyncManager, FSyncStats};
use crate::lsn::Lsn;
use crate::reader::LastFileReader;

/// Entry types whose last occurrence recovery reports.
const RECOVERY_TARGETS: [LogEntryType; 5] = [
    LogEntryType::Root,
    LogEntryType::TxnCommit,
    LogEntryType::TxnAbort,
    LogEntryType::Trace,
    LogEntryType::CheckpointEnd,
];

/// How one entry is logged.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// Readers ignore the entry unless something later confirms it
    pub provisional: bool,
    /// Write the entry's buffer to its file before returning
    pub flush: bool,
    /// Also fsync before returning (implies `flush`)
    pub fsync: bool,
    /// Start a new log file with this entry
    pub force_new_file: bool,
}

/// What opening the log found at its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryInfo {
    /// Where the next entry goes
    pub end_of_log: Lsn,
    /// Last valid entry, NULL for an empty log
    pub last_valid_lsn: Lsn,
    pub last_root: Option<Lsn>,
    pub last_commit: Option<Lsn>,
    pub last_abort: Option<Lsn>,
    pub last_trace: Option<Lsn>,
    pub last_checkpoint_end: Option<Lsn>,
    /// Entries found in the last file
    pub n_entries_in_last_file: u64,
    /// Bytes of torn tail removed
    pub truncated_bytes: u64,
}

/// Counters across the whole log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogStats {
    pub pool: PoolStats,
    pub fsync: FSyncStats,
    pub files: FileManagerStats,
    /// `get` reads that had to be repeated with a larger size
    pub n_repeat_fault_reads: u64,
    /// Failed writes that were rolled back
    pub n_write_rollbacks: u64,
}

/// The log.
pub struct LogManager {
    config: Config,
    fm: Arc<FileManager>,
    pool: LogBufferPool,
    fsync: FSyncManager,

    /// Serializes LSN allocation with buffer choice
    log_lock: Mutex<()>,

    /// Transactions that lost entries to a failed write
    must_abort: Mutex<HashSet<u64>>,

    /// Set once the log can no longer be trusted
    invalid: Mutex<Option<String>>,

    recovery: RecoveryInfo,

    n_repeat_fault_reads: AtomicU64,
    n_write_rollbacks: AtomicU64,
}

impl LogManager {
    /// Open or create the log in `config.log_dir`.
    ///
    /// On startup:
    /// 1. Validate the config and open the directory
    /// 2. Find the end of the log in the last file
    /// 3. Truncate a torn tail
    /// 4. Seed the LSN allocator from the end of the log
    pub fn open(config: Config) -> Result<Self> {
        // Step 1: File manager (validates config, creates the directory)
        let fm = Arc::new(FileManager::open(&config)?);

        // Step 2: Scan the last file
        let mut last = LastFileReader::new(Arc::clone(&fm))?.with_target_types(&RECOVERY_TARGETS);
        last.read_to_end(&config)?;

        // Step 3: Cut the log back to its last valid entry
        let truncated_bytes = last.set_end_of_file()?;

        // Step 4: Seed the allocator
        let end = last.end_of_log();
        if !end.is_null() {
            if end.file_offset() < FIRST_LOG_ENTRY_OFFSET {
                fm.set_last_position(end.with_offset(FIRST_LOG_ENTRY_OFFSET), Lsn::NULL, 0);
            } else {
                fm.set_last_position(end, last.last_valid_lsn(), last.prev_offset());
            }
        }

        let recovery = RecoveryInfo {
            end_of_log: fm.next_lsn(),
            last_valid_lsn: last.last_valid_lsn(),
            last_root: last.last_seen(LogEntryType::Root),
            last_commit: last.last_seen(LogEntryType::TxnCommit),
            last_abort: last.last_seen(LogEntryType::TxnAbort),
            last_trace: last.last_seen(LogEntryType::Trace),
            last_checkpoint_end: last.last_seen(LogEntryType::CheckpointEnd),
            n_entries_in_last_file: last.n_entries(),
            truncated_bytes,
        };
        info!(
            dir = %config.log_dir.display(),
            end_of_log = %recovery.end_of_log,
            last_valid = %recovery.last_valid_lsn,
            truncated_bytes,
            "opened log"
        );

        Ok(Self {
            pool: LogBufferPool::new(&config),
            fsync: FSyncManager::new(Duration::from_millis(config.fsync_timeout_ms)),
            config,
            fm,
            log_lock: Mutex::new(()),
            must_abort: Mutex::new(HashSet::new()),
            invalid: Mutex::new(None),
            recovery,
            n_repeat_fault_reads: AtomicU64::new(0),
            n_write_rollbacks: AtomicU64::new(0),
        })
    }

    // =========================================================================
    // Logging
    // =========================================================================

    /// Append `item`; the entry is buffered, not yet durable.
    pub fn log(&self, item: &dyn Loggable) -> Result<Lsn> {
        self.log_with(item, LogOptions::default())
    }

    /// Append `item` as a provisional entry.
    pub fn log_provisional(&self, item: &dyn Loggable) -> Result<Lsn> {
        self.log_with(
            item,
            LogOptions {
                provisional: true,
                ..LogOptions::default()
            },
        )
    }

    /// Append `item` and write it to its file, fsyncing too if `fsync`.
    pub fn log_force_flush(&self, item: &dyn Loggable, fsync: bool) -> Result<Lsn> {
        self.log_with(
            item,
            LogOptions {
                flush: true,
                fsync,
                ..LogOptions::default()
            },
        )
    }

    /// Append `item` as the first entry of a new file.
    pub fn log_force_flip(&self, item: &dyn Loggable) -> Result<Lsn> {
        self.log_with(
            item,
            LogOptions {
                flush: true,
                force_new_file: true,
                ..LogOptions::default()
            },
        )
    }

    pub fn log_with(&self, item: &dyn Loggable, options: LogOptions) -> Result<Lsn> {
        self.check_valid()?;

        let entry_type = item.entry_type();
        if entry_type == LogEntryType::TxnCommit {
            if let Some(txn_id) = item.txn_id() {
                self.check_commit_allowed(txn_id)?;
            }
        }

        // Marshal before taking any lock; an oversized entry has no side effects
        let mut entry = marshal_entry(item, options.provisional)?;
        let max = self.pool.max_buffer_size();
        if entry.len() > max {
            return Err(LogError::EntryTooLarge {
                size: entry.len(),
                max,
            });
        }

        let (lsn, prev_offset, buffer, offset) = {
            let _log = self.log_lock.lock();
            self.apply_pending_rollback()?;
            if options.force_new_file {
                self.fm.force_new_log_file();
            }

            let bump = self.fm.bump_lsn(entry.len() as u64)?;
            let buffer = match self.pool.get_write_buffer(entry.len(), bump.flipped, &self.fm) {
                Ok(buffer) => buffer,
                Err(e) => {
                    if self.pool.has_failure() {
                        self.rollback_failed_write()?;
                    } else {
                        self.fm.restore_last_position();
                    }
                    return Err(e);
                }
            };
            let offset = buffer.reserve(bump.lsn, entry.len(), bump.before);
            self.pool
                .write_completed(bump.lsn, options.flush || options.fsync);
            (bump.lsn, bump.prev_offset, buffer, offset)
        };

        seal_entry(&mut entry, prev_offset);
        buffer.fill(offset, &entry);

        if options.flush || options.fsync || self.pool.has_dirty() {
            if let Err(e) = self.pool.write_dirty_buffers(&self.fm) {
                self.recover_from_write_failure();
                return Err(e);
            }
        }
        if options.fsync {
            self.fsync.fsync(self.fm.as_ref())?;
        }

        if entry_type == LogEntryType::TxnAbort {
            if let Some(txn_id) = item.txn_id() {
                self.must_abort.lock().remove(&txn_id);
            }
        }
        Ok(lsn)
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Write every buffered entry to its file without fsyncing.
    pub fn flush(&self) -> Result<()> {
        self.check_valid()?;
        {
            let _log = self.log_lock.lock();
            self.pool.seal_current();
        }
        if let Err(e) = self.pool.write_dirty_buffers(&self.fm) {
            self.recover_from_write_failure();
            return Err(e);
        }
        Ok(())
    }

    /// Write and fsync every buffered entry.
    pub fn sync(&self) -> Result<()> {
        self.flush()?;
        self.fsync.fsync(self.fm.as_ref())
    }

    /// Flush, fsync, and release all files.
    pub fn close(&self) -> Result<()> {
        self.sync()?;
        self.fm.clear();
        debug!(dir = %self.config.log_dir.display(), "closed log");
        Ok(())
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Read the entry at `lsn`, from the buffer pool if it is still there.
    pub fn get(&self, lsn: Lsn) -> Result<LogEntry> {
        if lsn.is_null() {
            return Err(LogError::NullLsn);
        }
        if let Some(bytes) = self.pool.read_entry(lsn)? {
            return LogEntry::from_bytes(lsn, bytes, self.config.checksum_on_read);
        }
        self.get_from_file(lsn)
    }

    fn get_from_file(&self, lsn: Lsn) -> Result<LogEntry> {
        let handle = self.fm.get_file_handle(lsn.file_number())?;
        let offset = lsn.file_offset() as u64;

        let mut buf = vec![0u8; self.config.fault_read_size.max(LogEntryHeader::MAX_SIZE)];
        let n = handle.read_at(offset, &mut buf)?;
        buf.truncate(n);

        let header = LogEntryHeader::read_from(&buf).map_err(|e| match e {
            LogError::BufferUnderflow { .. } => LogError::Corruption(format!(
                "no complete entry header at {} ({} bytes readable)",
                lsn, n
            )),
            other => other,
        })?;

        let entry_size = header.entry_size();
        if entry_size > buf.len() {
            self.n_repeat_fault_reads.fetch_add(1, Ordering::Relaxed);
            buf.resize(entry_size, 0);
            let n = handle.read_at(offset, &mut buf)?;
            if n < entry_size {
                return Err(LogError::Corruption(format!(
                    "entry at {} needs {} bytes but only {} are in the file",
                    lsn, entry_size, n
                )));
            }
        }
        LogEntry::from_bytes(lsn, Bytes::from(buf), self.config.checksum_on_read)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Fails with `MustAbort` if `txn_id` lost entries to a failed write.
    pub fn check_commit_allowed(&self, txn_id: u64) -> Result<()> {
        if self.must_abort.lock().contains(&txn_id) {
            return Err(LogError::MustAbort { txn_id });
        }
        Ok(())
    }

    pub fn must_abort(&self, txn_id: u64) -> bool {
        self.must_abort.lock().contains(&txn_id)
    }

    // =========================================================================
    // Failure Handling
    // =========================================================================

    /// Roll back after a failed buffer write, under the log lock.
    fn recover_from_write_failure(&self) {
        let _log = self.log_lock.lock();
        if let Err(e) = self.apply_pending_rollback() {
            error!(error = %e, "could not recover from log write failure");
        }
    }

    /// Apply a rollback if a buffer write has failed. Caller holds `log_lock`.
    fn apply_pending_rollback(&self) -> Result<()> {
        if self.pool.has_failure() {
            self.rollback_failed_write()?;
        }
        Ok(())
    }

    /// Throw away the failed buffer and everything after it, cut the file
    /// back to where that buffer started, and rewind the allocator there.
    /// Caller holds `log_lock`.
    fn rollback_failed_write(&self) -> Result<()> {
        let discarded = match self.pool.discard_failed() {
            Ok(Some(discarded)) => discarded,
            Ok(None) => return Ok(()),
            Err(e) => return Err(self.invalidate(format!("discarding failed buffers: {}", e))),
        };

        if let Err(e) = self.fm.discard_tail(discarded.first_lsn) {
            return Err(self.invalidate(format!(
                "removing unwritten tail at {}: {}",
                discarded.first_lsn, e
            )));
        }
        if let Some(rewind) = discarded.rewind {
            self.fm.rewind_to(rewind);
        }

        let mut must_abort = self.must_abort.lock();
        must_abort.extend(discarded.txn_ids.iter().copied());
        self.n_write_rollbacks.fetch_add(1, Ordering::Relaxed);
        warn!(
            rewound_to = %discarded.first_lsn,
            buffers = discarded.n_buffers,
            txns = discarded.txn_ids.len(),
            "rolled back failed log write"
        );
        Ok(())
    }

    /// Mark the log unusable and return the error describing why.
    pub fn invalidate(&self, reason: String) -> LogError {
        error!(reason = %reason, "log invalidated");
        *self.invalid.lock() = Some(reason.clone());
        LogError::EnvironmentInvalid(reason)
    }

    pub fn is_valid(&self) -> bool {
        self.invalid.lock().is_none()
    }

    fn check_valid(&self) -> Result<()> {
        match &*self.invalid.lock() {
            Some(reason) => Err(LogError::EnvironmentInvalid(reason.clone())),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.fm
    }

    pub fn recovery_info(&self) -> &RecoveryInfo {
        &self.recovery
    }

    /// LSN the next entry would get if it fits in the current file.
    pub fn next_lsn(&self) -> Lsn {
        self.fm.next_lsn()
    }

    pub fn last_lsn(&self) -> Lsn {
        self.fm.last_used_lsn()
    }

    pub fn stats(&self) -> LogStats {
        LogStats {
            pool: self.pool.stats(),
            fsync: self.fsync.stats(),
            files: self.fm.stats(),
            n_repeat_fault_reads: self.n_repeat_fault_reads.load(Ordering::Relaxed),
            n_write_rollbacks: self.n_write_rollbacks.load(Ordering::Relaxed),
        }
    }
}
