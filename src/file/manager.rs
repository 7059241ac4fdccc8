//! File Manager
//!
//! Owns the directory of numbered log files and decides where the next
//! byte of the log goes.
//!
//! ## Responsibilities
//! - LSN allocation (`bump_lsn`), file flips, rollback of the allocator
//! - File discovery by name (`00000001.wal`, `0000007b.wal`, ...)
//! - Cached read handles with header validation
//! - The write descriptor at the end of the log, and fsync of it
//! - Truncating, renaming, and deleting files
//!
//! ## Concurrency:
//! - `position`: Mutex, held only for pure bookkeeping, never across I/O
//! - `handles`: its own lock, independent of `position`
//! - `log_end` / `log_end_sync`: separate descriptors of the same file so an
//!   fsync does not block the next buffer write

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::entry::{
    marshal_entry, seal_entry, FileHeader, LogEntry, LogEntryType, FIRST_LOG_ENTRY_OFFSET,
};
use crate::error::{LogError, Result};
use crate::fsync::Syncer;
use crate::lsn::Lsn;

use super::cache::{HandleCache, LruPolicy, Pinned};
use super::{FaultInjector, FileHandle, WriteFault};

/// Suffix of live log files
pub const LOG_SUFFIX: &str = ".wal";

/// Suffix of files moved aside because of a bad header
pub const BAD_SUFFIX: &str = ".bad";

/// Suffix of files retired by tools instead of being deleted
pub const DEL_SUFFIX: &str = ".del";

/// A pinned read handle; unpins on drop.
pub type FileHandleGuard = Pinned<FileHandle, LruPolicy>;

/// Snapshot of the append cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    pub current_file_num: u32,
    pub next_available_lsn: Lsn,
    pub last_used_lsn: Lsn,
    /// Offset of the last entry, recorded in the next entry's header
    pub prev_offset: u32,
    pub force_new_file: bool,
}

impl LogPosition {
    fn initial() -> Self {
        Self {
            current_file_num: 0,
            next_available_lsn: Lsn::new(0, FIRST_LOG_ENTRY_OFFSET),
            last_used_lsn: Lsn::NULL,
            prev_offset: 0,
            force_new_file: false,
        }
    }
}

/// Outcome of one `bump_lsn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BumpResult {
    /// LSN assigned to the entry
    pub lsn: Lsn,
    /// Offset of the entry before it in the same file, 0 after a flip
    pub prev_offset: u32,
    /// The entry starts a new file
    pub flipped: bool,
    /// Cursor before this bump
    pub before: LogPosition,
}

struct PositionState {
    current: LogPosition,
    saved: LogPosition,
    /// Last entry of each finished file, for the next file's header
    last_used_in_file: BTreeMap<u32, Lsn>,
}

struct OpenLogEnd {
    file_number: u32,
    file: File,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileManagerStats {
    pub n_file_opens: u64,
    pub n_writes: u64,
    pub n_bytes_written: u64,
    pub n_log_end_syncs: u64,
    pub n_cached_handles: usize,
    pub n_handle_evictions: u64,
}

/// Manages the numbered log files of one log directory.
pub struct FileManager {
    /// Directory holding the log files
    dir: PathBuf,
    max_file_size: u64,
    faults: Arc<dyn FaultInjector>,
    position: Mutex<PositionState>,
    handles: HandleCache<FileHandle>,
    log_end: Mutex<Option<OpenLogEnd>>,
    log_end_sync: Mutex<Option<OpenLogEnd>>,

    n_file_opens: AtomicU64,
    n_writes: AtomicU64,
    n_bytes_written: AtomicU64,
    n_log_end_syncs: AtomicU64,
}

impl FileManager {
    /// Open the log directory, creating it if needed.
    ///
    /// The append cursor starts at `(0, FIRST_LOG_ENTRY_OFFSET)`; callers
    /// that find existing files seed it with `set_last_position`.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.log_dir)?;

        let initial = LogPosition::initial();
        Ok(Self {
            dir: config.log_dir.clone(),
            max_file_size: config.file_max_size,
            faults: Arc::clone(&config.fault_injector),
            position: Mutex::new(PositionState {
                current: initial,
                saved: initial,
                last_used_in_file: BTreeMap::new(),
            }),
            handles: HandleCache::new(config.file_handle_cache_size, LruPolicy::default()),
            log_end: Mutex::new(None),
            log_end_sync: Mutex::new(None),
            n_file_opens: AtomicU64::new(0),
            n_writes: AtomicU64::new(0),
            n_bytes_written: AtomicU64::new(0),
            n_log_end_syncs: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    // =========================================================================
    // LSN Allocation
    // =========================================================================

    /// Claim `size` bytes of log and return the LSN of their start.
    ///
    /// Flips to `(current + 1, FIRST_LOG_ENTRY_OFFSET)` when a new file was
    /// forced, or when the current file already holds entries and the
    /// request does not fit in what is left. A request that exactly fits
    /// stays; a request into a file with no entries always stays, so an
    /// oversized entry sits alone in its file.
    ///
    /// The cursor before the bump is saved for `restore_last_position`.
    pub fn bump_lsn(&self, size: u64) -> Result<BumpResult> {
        let mut guard = self.position.lock();
        let state = &mut *guard;
        state.saved = state.current;
        let before = state.current;

        let next_offset = before.next_available_lsn.file_offset() as u64;
        let file_has_entries = next_offset > FIRST_LOG_ENTRY_OFFSET as u64;
        let flipped = before.force_new_file
            || (file_has_entries && next_offset + size > self.max_file_size);

        let mut cur = before;
        if flipped {
            let new_file = cur
                .current_file_num
                .checked_add(1)
                .filter(|n| *n != u32::MAX)
                .ok_or(LogError::FileNumberOverflow)?;
            if !cur.last_used_lsn.is_null() {
                state
                    .last_used_in_file
                    .insert(cur.last_used_lsn.file_number(), cur.last_used_lsn);
            }
            cur.current_file_num = new_file;
            cur.force_new_file = false;
            cur.prev_offset = 0;
            cur.last_used_lsn = Lsn::new(new_file, FIRST_LOG_ENTRY_OFFSET);
        } else {
            let same_file = !cur.last_used_lsn.is_null()
                && cur.last_used_lsn.file_number() == cur.next_available_lsn.file_number();
            cur.prev_offset = if same_file {
                cur.last_used_lsn.file_offset()
            } else {
                0
            };
            cur.last_used_lsn = cur.next_available_lsn;
        }

        let end = cur.last_used_lsn.file_offset() as u64 + size;
        let end = u32::try_from(end).map_err(|_| LogError::EntryTooLarge {
            size: size as usize,
            max: (u32::MAX - cur.last_used_lsn.file_offset()) as usize,
        })?;
        cur.next_available_lsn = cur.last_used_lsn.with_offset(end);

        if flipped {
            debug!(
                from = before.current_file_num,
                to = cur.current_file_num,
                "log file flip"
            );
        }

        state.current = cur;
        Ok(BumpResult {
            lsn: cur.last_used_lsn,
            prev_offset: cur.prev_offset,
            flipped,
            before,
        })
    }

    /// Undo the most recent `bump_lsn`.
    pub fn restore_last_position(&self) {
        let mut state = self.position.lock();
        state.current = state.saved;
    }

    /// Move the cursor back to an earlier snapshot.
    pub fn rewind_to(&self, position: LogPosition) {
        let mut state = self.position.lock();
        state.current = position;
        state.saved = position;
    }

    /// Seed the cursor from the recovered end of the log.
    pub fn set_last_position(&self, next_available: Lsn, last_used: Lsn, prev_offset: u32) {
        let mut state = self.position.lock();
        state.current = LogPosition {
            current_file_num: next_available.file_number(),
            next_available_lsn: next_available,
            last_used_lsn: last_used,
            prev_offset,
            force_new_file: false,
        };
        state.saved = state.current;
        if !last_used.is_null() {
            state
                .last_used_in_file
                .insert(last_used.file_number(), last_used);
        }
    }

    /// Make the next `bump_lsn` start a new file.
    pub fn force_new_log_file(&self) {
        self.position.lock().current.force_new_file = true;
    }

    pub fn position(&self) -> LogPosition {
        self.position.lock().current
    }

    pub fn next_lsn(&self) -> Lsn {
        self.position.lock().current.next_available_lsn
    }

    pub fn last_used_lsn(&self) -> Lsn {
        self.position.lock().current.last_used_lsn
    }

    pub fn prev_entry_offset(&self) -> u32 {
        self.position.lock().current.prev_offset
    }

    pub fn current_file_num(&self) -> u32 {
        self.position.lock().current.current_file_num
    }

    // =========================================================================
    // File Discovery
    // =========================================================================

    /// `00000001.wal` style name of a file.
    pub fn file_name(file_number: u32, suffix: &str) -> String {
        format!("{:08x}{}", file_number, suffix)
    }

    /// "0000007b.wal" → Some(123)
    pub fn parse_file_number(name: &str, suffix: &str) -> Option<u32> {
        let digits = name.strip_suffix(suffix)?;
        if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(digits, 16).ok()
    }

    pub fn full_path(&self, file_number: u32) -> PathBuf {
        self.dir.join(Self::file_name(file_number, LOG_SUFFIX))
    }

    /// Names of files carrying any of `suffixes`, sorted.
    pub fn list_files(&self, suffixes: &[&str]) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if suffixes
                .iter()
                .any(|s| Self::parse_file_number(&name, s).is_some())
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Numbers of all live log files, ascending.
    pub fn all_file_numbers(&self) -> Result<Vec<u32>> {
        let mut numbers: Vec<u32> = self
            .list_files(&[LOG_SUFFIX])?
            .iter()
            .filter_map(|name| Self::parse_file_number(name, LOG_SUFFIX))
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    pub fn first_file_num(&self) -> Result<Option<u32>> {
        Ok(self.all_file_numbers()?.first().copied())
    }

    pub fn last_file_num(&self) -> Result<Option<u32>> {
        Ok(self.all_file_numbers()?.last().copied())
    }

    /// Nearest existing file after (`forward`) or before `file_number`.
    pub fn following_file_num(&self, file_number: u32, forward: bool) -> Result<Option<u32>> {
        let numbers = self.all_file_numbers()?;
        let found = if forward {
            numbers.iter().copied().find(|n| *n > file_number)
        } else {
            numbers.iter().rev().copied().find(|n| *n < file_number)
        };
        Ok(found)
    }

    pub fn files_exist(&self) -> Result<bool> {
        Ok(!self.all_file_numbers()?.is_empty())
    }

    // =========================================================================
    // Read Handles
    // =========================================================================

    /// Pinned read handle on a log file, opened and validated on first use.
    pub fn get_file_handle(&self, file_number: u32) -> Result<FileHandleGuard> {
        self.handles
            .get_or_try_insert(file_number, || self.open_handle(file_number))
    }

    /// Offset of the last entry of the file before `file_number`, from its header.
    pub fn file_header_prev_offset(&self, file_number: u32) -> Result<u64> {
        let handle = self.get_file_handle(file_number)?;
        let mut buf = vec![0u8; FIRST_LOG_ENTRY_OFFSET as usize];
        let n = handle.read_at(0, &mut buf)?;
        buf.truncate(n);
        let header = decode_file_header(file_number, buf)?;
        Ok(header.last_entry_in_prev_file_offset())
    }

    /// Drop all cached read handles and close the log end.
    pub fn clear(&self) {
        self.handles.clear();
        self.close_log_end();
    }

    fn open_handle(&self, file_number: u32) -> Result<FileHandle> {
        let path = self.full_path(file_number);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LogError::LogFileNotFound { file_number })
            }
            Err(e) => return Err(e.into()),
        };
        self.n_file_opens.fetch_add(1, Ordering::Relaxed);

        // An empty file has not had its header written yet
        let len = file.metadata()?.len();
        let old_header_version = if len == 0 {
            false
        } else {
            self.read_file_header(&file, file_number)?
                .validate(file_number)?
        };

        Ok(FileHandle::new(
            file_number,
            path,
            file,
            old_header_version,
            Arc::clone(&self.faults),
        ))
    }

    fn read_file_header(&self, file: &File, file_number: u32) -> Result<FileHeader> {
        let header_len = FIRST_LOG_ENTRY_OFFSET as usize;
        self.faults.before_read(file_number, 0, header_len)?;

        let mut reader = file;
        reader.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(header_len);
        reader.take(header_len as u64).read_to_end(&mut buf)?;
        decode_file_header(file_number, buf)
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Write one buffer's bytes at `first_lsn`.
    ///
    /// Moving to a new file fsyncs and closes the previous one; a new,
    /// empty file gets its header first.
    pub fn write_log_buffer(&self, first_lsn: Lsn, data: &[u8]) -> Result<()> {
        let file_number = first_lsn.file_number();
        let mut log_end = self.log_end.lock();

        let reuse = matches!(&*log_end, Some(open) if open.file_number == file_number);
        if !reuse {
            if let Some(old) = log_end.take() {
                self.finish_file(old)?;
            }
            let file = self.open_log_end_file(file_number)?;
            let sync_file = file.try_clone()?;
            *self.log_end_sync.lock() = Some(OpenLogEnd {
                file_number,
                file: sync_file,
            });
            *log_end = Some(OpenLogEnd { file_number, file });
        }

        match log_end.as_mut() {
            Some(open) => self.write_at(
                &mut open.file,
                file_number,
                first_lsn.file_offset() as u64,
                data,
            ),
            None => Err(LogError::LogWrite(format!(
                "no open log file for {}",
                first_lsn
            ))),
        }
    }

    /// fsync the file at the end of the log.
    pub fn sync_log_end(&self) -> Result<()> {
        let sync = self.log_end_sync.lock();
        if let Some(open) = sync.as_ref() {
            self.faults.before_fsync(open.file_number)?;
            open.file.sync_data()?;
            self.n_log_end_syncs.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Close the write and sync descriptors without syncing.
    pub fn close_log_end(&self) {
        *self.log_end.lock() = None;
        *self.log_end_sync.lock() = None;
    }

    fn finish_file(&self, old: OpenLogEnd) -> Result<()> {
        self.faults.before_fsync(old.file_number)?;
        old.file.sync_data()?;
        self.n_log_end_syncs.fetch_add(1, Ordering::Relaxed);

        let mut sync = self.log_end_sync.lock();
        if matches!(&*sync, Some(open) if open.file_number == old.file_number) {
            *sync = None;
        }
        debug!(file_number = old.file_number, "finished log file");
        Ok(())
    }

    fn open_log_end_file(&self, file_number: u32) -> Result<File> {
        let path = self.full_path(file_number);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        self.n_file_opens.fetch_add(1, Ordering::Relaxed);

        if file.metadata()?.len() == 0 {
            let prev_offset = self.take_last_used_before(file_number);
            let mut entry = marshal_entry(&FileHeader::new(file_number, prev_offset), false)?;
            seal_entry(&mut entry, 0);
            self.write_at(&mut file, file_number, 0, &entry)?;
            debug!(file_number, "created log file");
        } else {
            self.read_file_header(&file, file_number)?
                .validate(file_number)?;
        }
        Ok(file)
    }

    /// Offset of the last entry of the file just before `file_number`, 0 if
    /// that file holds no entries.
    fn take_last_used_before(&self, file_number: u32) -> u64 {
        let prev_file = match file_number.checked_sub(1) {
            Some(prev_file) => prev_file,
            None => return 0,
        };
        let mut state = self.position.lock();
        let prev = state.last_used_in_file.get(&prev_file).copied();
        // keep the entry in case this file is rewritten after a failed write
        state.last_used_in_file.retain(|n, _| *n >= prev_file);
        prev.map(|lsn| lsn.file_offset() as u64).unwrap_or(0)
    }

    fn write_at(&self, file: &mut File, file_number: u32, offset: u64, data: &[u8]) -> Result<()> {
        self.n_writes.fetch_add(1, Ordering::Relaxed);
        match self.faults.before_write(file_number, offset, data.len()) {
            WriteFault::Proceed => {
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(data)?;
            }
            WriteFault::Fail(kind) => {
                return Err(io::Error::new(
                    kind,
                    format!("injected write failure on file {:08x} at {}", file_number, offset),
                )
                .into());
            }
            WriteFault::Torn { keep } => {
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(&data[..keep.min(data.len())])?;
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("torn write on file {:08x} at {}", file_number, offset),
                )
                .into());
            }
        }
        self.n_bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    // =========================================================================
    // Truncation, Renaming, Deletion
    // =========================================================================

    /// Cut a file back to `offset` bytes and fsync it.
    ///
    /// A file written by an older log version is not appended to again.
    pub fn truncate_log(&self, file_number: u32, offset: u64) -> Result<()> {
        let path = self.full_path(file_number);
        let file = match OpenOptions::new().write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LogError::LogFileNotFound { file_number })
            }
            Err(e) => return Err(e.into()),
        };
        file.set_len(offset)?;
        file.sync_all()?;
        info!(file_number, offset, "truncated log file");

        if offset >= FIRST_LOG_ENTRY_OFFSET as u64
            && self.get_file_handle(file_number)?.is_old_header_version()
        {
            self.force_new_log_file();
        }
        Ok(())
    }

    /// Remove whatever a failed write left at and after `lsn`.
    ///
    /// A file left with nothing but (part of) its header is deleted so the
    /// next write recreates it with a current header.
    pub fn discard_tail(&self, lsn: Lsn) -> Result<()> {
        self.close_log_end();

        let file_number = lsn.file_number();
        let path = self.full_path(file_number);
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let first = FIRST_LOG_ENTRY_OFFSET as u64;
        if len < first || lsn.file_offset() as u64 <= first {
            self.handles.remove(file_number);
            fs::remove_file(&path)?;
            warn!(file_number, len, "removed log file with no complete entries");
            return Ok(());
        }

        let offset = lsn.file_offset() as u64;
        if len > offset {
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(offset)?;
            file.sync_all()?;
            warn!(file_number, offset, discarded = len - offset, "discarded unwritten log tail");
        }
        Ok(())
    }

    /// Rename a log file to carry `suffix` instead of `.wal`.
    ///
    /// If the target exists, `.1`, `.2`, ... are appended until a free name
    /// is found.
    pub fn rename_file(&self, file_number: u32, suffix: &str) -> Result<PathBuf> {
        self.handles.remove(file_number);

        let from = self.full_path(file_number);
        let base = Self::file_name(file_number, suffix);
        let mut target = self.dir.join(&base);
        let mut generation = 1;
        while target.exists() {
            target = self.dir.join(format!("{}.{}", base, generation));
            generation += 1;
        }

        fs::rename(&from, &target)?;
        warn!(file_number, path = %target.display(), "moved log file aside");
        Ok(target)
    }

    pub fn delete_file(&self, file_number: u32) -> Result<()> {
        self.handles.remove(file_number);
        match fs::remove_file(self.full_path(file_number)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(LogError::LogFileNotFound { file_number })
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn stats(&self) -> FileManagerStats {
        FileManagerStats {
            n_file_opens: self.n_file_opens.load(Ordering::Relaxed),
            n_writes: self.n_writes.load(Ordering::Relaxed),
            n_bytes_written: self.n_bytes_written.load(Ordering::Relaxed),
            n_log_end_syncs: self.n_log_end_syncs.load(Ordering::Relaxed),
            n_cached_handles: self.handles.len(),
            n_handle_evictions: self.handles.n_evictions(),
        }
    }
}

impl Syncer for FileManager {
    fn sync(&self) -> Result<()> {
        self.sync_log_end()
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

/// Parse and checksum the header entry at the start of a file.
fn decode_file_header(file_number: u32, bytes: Vec<u8>) -> Result<FileHeader> {
    let bad = |reason: String| LogError::BadFileHeader {
        file_number,
        reason,
    };

    if bytes.len() < FIRST_LOG_ENTRY_OFFSET as usize {
        return Err(bad(format!(
            "file is {} bytes, shorter than its {} byte header",
            bytes.len(),
            FIRST_LOG_ENTRY_OFFSET
        )));
    }

    let entry = LogEntry::from_bytes(Lsn::new(file_number, 0), Bytes::from(bytes), true)
        .map_err(|e| bad(e.to_string()))?;
    if entry.entry_type() != LogEntryType::FileHeader {
        return Err(bad(format!("first entry is {}", entry.entry_type())));
    }
    entry
        .read_item::<FileHeader>()
        .map_err(|e| bad(e.to_string()))
}
