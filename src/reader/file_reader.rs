//! Sequential Log Scanner
//!
//! Reads entries through a window buffer that is refilled from the file as
//! the scan moves on. Forward windows start at the entry being read,
//! backward windows end after it, so a scan in either direction needs one
//! read per window rather than one per entry.
//!
//! ## Damaged entries
//! - In any file but the last, a bad entry is corruption.
//! - In the last file, a bad entry is a torn write (`TornWrite`) unless a
//!   valid entry follows it; then it is interior corruption.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::config::Config;
use crate::entry::{
    verify_entry, verify_sealed, LogEntry, LogEntryHeader, LogEntryType, FIRST_LOG_ENTRY_OFFSET,
};
use crate::error::{LogError, Result};
use crate::file::FileManager;
use crate::lsn::Lsn;

const WINDOW_GRANULE: usize = 1024;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    /// Entries read and verified, filtered or not
    pub n_read: u64,
    /// Reads repeated because an entry did not fit in the window
    pub n_repeat_iterator_reads: u64,
    /// Physical reads issued
    pub n_read_operations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Bytes of one file region held in memory.
struct Window {
    file_number: Option<u32>,
    start: u64,
    data: Vec<u8>,
    /// Current window size, grows toward `max_size`
    size: usize,
    max_size: usize,
}

impl Window {
    fn covers(&self, file_number: u32, offset: u64, len: usize) -> bool {
        self.file_number == Some(file_number)
            && offset >= self.start
            && offset + len as u64 <= self.start + self.data.len() as u64
    }

    fn slice(&self, offset: u64, len: usize) -> &[u8] {
        let from = (offset - self.start) as usize;
        &self.data[from..from + len]
    }
}

/// Scanner over the log, forward or backward, between two LSNs.
pub struct FileReader {
    fm: Arc<FileManager>,
    direction: Direction,
    single_file: bool,
    /// Where the next entry starts, `None` once the scan is over
    next: Option<Lsn>,
    /// Inclusive bound, NULL for none
    finish: Lsn,
    window: Window,
    file_len: Option<(u32, u64)>,
    last_file: Option<u32>,

    targets: Option<HashSet<LogEntryType>>,
    include_file_headers: bool,
    skip_provisional: bool,

    last_lsn: Lsn,
    stats: ReaderStats,
}

impl FileReader {
    /// Scan forward from `start` (NULL: the first file) through `finish`
    /// (NULL: the end of the log).
    pub fn forward(fm: Arc<FileManager>, config: &Config, start: Lsn, finish: Lsn) -> Result<Self> {
        let next = if start.is_null() {
            fm.first_file_num()?.map(|n| Lsn::new(n, 0))
        } else {
            Some(start)
        };
        Self::build(fm, config, Direction::Forward, false, next, finish)
    }

    /// Scan one file from its start to its end.
    pub fn single_file(fm: Arc<FileManager>, config: &Config, file_number: u32) -> Result<Self> {
        Self::build(
            fm,
            config,
            Direction::Forward,
            true,
            Some(Lsn::new(file_number, 0)),
            Lsn::NULL,
        )
    }

    /// Scan backward from the entry at `start` down to `finish` (NULL: the
    /// first entry of the log), following each entry's previous offset.
    pub fn backward(fm: Arc<FileManager>, config: &Config, start: Lsn, finish: Lsn) -> Result<Self> {
        if start.is_null() {
            return Err(LogError::NullLsn);
        }
        Self::build(fm, config, Direction::Backward, false, Some(start), finish)
    }

    /// LSN of the last readable entry in the log, NULL if there is none.
    ///
    /// Empty files and files holding only a header are passed over in
    /// favour of the file before them. A torn tail in the last file with
    /// data ends the search at the entry before it. Nothing is modified.
    pub fn find_last_entry(fm: &Arc<FileManager>, config: &Config) -> Result<Lsn> {
        let mut at_tail = true;
        for file_number in fm.all_file_numbers()?.into_iter().rev() {
            if std::fs::metadata(fm.full_path(file_number))?.len() == 0 {
                continue;
            }

            let mut reader = Self::single_file(Arc::clone(fm), config, file_number)?;
            if at_tail {
                reader = reader.tail_file(file_number);
            }
            loop {
                match reader.next_entry() {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(LogError::TornWrite { .. }) if at_tail => break,
                    Err(e) => return Err(e),
                }
            }
            if !reader.last_lsn().is_null() {
                return Ok(reader.last_lsn());
            }
            at_tail = false;
        }
        Ok(Lsn::NULL)
    }

    fn build(
        fm: Arc<FileManager>,
        config: &Config,
        direction: Direction,
        single_file: bool,
        next: Option<Lsn>,
        finish: Lsn,
    ) -> Result<Self> {
        let last_file = fm.last_file_num()?;
        Ok(Self {
            fm,
            direction,
            single_file,
            next,
            finish,
            window: Window {
                file_number: None,
                start: 0,
                data: Vec::new(),
                size: config.iterator_read_size,
                max_size: config.iterator_max_size,
            },
            file_len: None,
            last_file,
            targets: None,
            include_file_headers: false,
            skip_provisional: false,
            last_lsn: Lsn::NULL,
            stats: ReaderStats::default(),
        })
    }

    /// Only return entries of these types.
    pub fn with_target_types(mut self, types: &[LogEntryType]) -> Self {
        self.targets = Some(types.iter().copied().collect());
        self
    }

    /// Also return the header entry at the start of each file.
    pub fn include_file_headers(mut self, include: bool) -> Self {
        self.include_file_headers = include;
        self
    }

    pub fn skip_provisional(mut self, skip: bool) -> Self {
        self.skip_provisional = skip;
        self
    }

    /// Treat `file_number` as the end of the log when classifying damage.
    pub(crate) fn tail_file(mut self, file_number: u32) -> Self {
        self.last_file = Some(file_number);
        self
    }

    /// LSN of the entry most recently returned.
    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Next matching entry, or `None` at the end of the range.
    pub fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        loop {
            let lsn = match self.position_next()? {
                Some(lsn) => lsn,
                None => return Ok(None),
            };

            let entry = self.read_entry_at(lsn)?;
            self.stats.n_read += 1;
            self.advance_past(&entry)?;

            if self.wanted(&entry) {
                self.last_lsn = lsn;
                return Ok(Some(entry));
            }
        }
    }

    /// Settle `next` on an entry to read, moving across files as needed.
    fn position_next(&mut self) -> Result<Option<Lsn>> {
        loop {
            let lsn = match self.next {
                Some(lsn) => lsn,
                None => return Ok(None),
            };

            let past_finish = !self.finish.is_null()
                && match self.direction {
                    Direction::Forward => lsn > self.finish,
                    Direction::Backward => lsn < self.finish,
                };
            if past_finish {
                self.next = None;
                return Ok(None);
            }

            if self.direction == Direction::Backward {
                return Ok(Some(lsn));
            }

            let len = self.file_len(lsn.file_number())?;
            if (lsn.file_offset() as u64) < len {
                return Ok(Some(lsn));
            }

            if self.single_file {
                self.next = None;
                return Ok(None);
            }
            self.next = self
                .fm
                .following_file_num(lsn.file_number(), true)?
                .map(|n| Lsn::new(n, 0));
        }
    }

    fn wanted(&self, entry: &LogEntry) -> bool {
        let entry_type = entry.entry_type();
        if entry_type == LogEntryType::FileHeader && !self.include_file_headers {
            return false;
        }
        if self.skip_provisional && entry.is_provisional() {
            return false;
        }
        match &self.targets {
            Some(targets) => targets.contains(&entry_type),
            None => true,
        }
    }

    /// Read and verify the entry at `lsn`.
    fn read_entry_at(&mut self, lsn: Lsn) -> Result<LogEntry> {
        let file_number = lsn.file_number();
        let offset = lsn.file_offset() as u64;
        let file_len = self.file_len(file_number)?;
        let available = file_len.saturating_sub(offset) as usize;

        if available < LogEntryHeader::MIN_SIZE {
            return Err(self
                .damaged(lsn, None, "entry header runs past the end of the file")
                .into());
        }

        let header_len = available.min(LogEntryHeader::MAX_SIZE);
        self.ensure(file_number, offset, header_len)?;
        let peeked = LogEntryHeader::peek_entry_size(self.window.slice(offset, header_len));
        let entry_size = match peeked {
            Ok(size) => size,
            Err(e) => return Err(self.damaged(lsn, None, &e.to_string()).into()),
        };
        if entry_size > available {
            return Err(self
                .damaged(lsn, None, "entry runs past the end of the file")
                .into());
        }

        // The checksum covers the type byte, so it is checked before decoding.
        self.ensure(file_number, offset, entry_size)?;
        if let Err(e) = verify_sealed(lsn, self.window.slice(offset, entry_size)) {
            let reason = e.to_string();
            return Err(self.damaged(lsn, Some(entry_size), &reason).or_interior(e));
        }
        if let Err(e) = LogEntryHeader::read_from(self.window.slice(offset, entry_size)) {
            return Err(LogError::Corruption(format!(
                "entry at {} has a valid checksum but cannot be decoded: {}",
                lsn, e
            )));
        }

        let bytes = Bytes::copy_from_slice(self.window.slice(offset, entry_size));
        LogEntry::from_bytes(lsn, bytes, false)
    }

    /// Classify a damaged entry. `entry_size` is known when only the
    /// checksum failed, which allows probing for a valid entry behind it.
    fn damaged(&mut self, lsn: Lsn, entry_size: Option<usize>, reason: &str) -> Damage {
        let in_last_file = self.last_file == Some(lsn.file_number());
        if !in_last_file {
            return Damage::Interior(LogError::Corruption(format!(
                "damaged entry at {}: {}",
                lsn, reason
            )));
        }

        if let Some(size) = entry_size {
            let behind = Lsn::new(lsn.file_number(), lsn.file_offset() + size as u32);
            if self.probe(behind) {
                return Damage::Interior(LogError::Corruption(format!(
                    "damaged entry at {} is followed by a valid entry at {}: {}",
                    lsn, behind, reason
                )));
            }
        }

        debug!(%lsn, reason, "damaged entry at end of log");
        Damage::Tail(LogError::TornWrite { lsn })
    }

    /// Whether a complete, valid entry starts at `lsn`.
    fn probe(&mut self, lsn: Lsn) -> bool {
        let offset = lsn.file_offset() as u64;
        let file_len = match self.file_len(lsn.file_number()) {
            Ok(len) => len,
            Err(_) => return false,
        };
        let available = file_len.saturating_sub(offset) as usize;
        if available < LogEntryHeader::MIN_SIZE {
            return false;
        }
        let header_len = available.min(LogEntryHeader::MAX_SIZE);
        if self.ensure(lsn.file_number(), offset, header_len).is_err() {
            return false;
        }
        let header = match LogEntryHeader::read_from(self.window.slice(offset, header_len)) {
            Ok(header) => header,
            Err(_) => return false,
        };
        let size = header.entry_size();
        if size > available || self.ensure(lsn.file_number(), offset, size).is_err() {
            return false;
        }
        verify_entry(lsn, &header, self.window.slice(offset, size)).is_ok()
    }

    /// Move `next` past `entry` in the scan direction.
    fn advance_past(&mut self, entry: &LogEntry) -> Result<()> {
        let lsn = entry.lsn();
        match self.direction {
            Direction::Forward => {
                let end = lsn.file_offset() as u64 + entry.entry_size() as u64;
                let end = u32::try_from(end)
                    .map_err(|_| LogError::Corruption(format!("entry at {} overflows its file", lsn)))?;
                self.next = Some(lsn.with_offset(end));
            }
            Direction::Backward => {
                let prev = entry.header().prev_offset();
                self.next = if prev != 0 {
                    if prev >= lsn.file_offset() {
                        return Err(LogError::Corruption(format!(
                            "entry at {} points forward to offset {:#x}",
                            lsn, prev
                        )));
                    }
                    Some(lsn.with_offset(prev))
                } else if lsn.file_offset() > 0 && self.include_file_headers {
                    Some(lsn.with_offset(0))
                } else {
                    self.previous_file_last_entry(lsn.file_number())?
                };
            }
        }
        Ok(())
    }

    /// Last entry before file `file_number`, skipping files without entries.
    fn previous_file_last_entry(&mut self, file_number: u32) -> Result<Option<Lsn>> {
        let mut file_number = file_number;
        loop {
            let prev_file = match self.fm.following_file_num(file_number, false)? {
                Some(prev_file) => prev_file,
                None => return Ok(None),
            };
            if prev_file + 1 != file_number {
                return Err(LogError::Corruption(format!(
                    "log file {:08x} is missing before {:08x}",
                    file_number - 1,
                    file_number
                )));
            }

            let offset = self.fm.file_header_prev_offset(file_number)?;
            if offset >= FIRST_LOG_ENTRY_OFFSET as u64 {
                let offset = u32::try_from(offset).map_err(|_| LogError::BadFileHeader {
                    file_number,
                    reason: format!("previous entry offset {} is out of range", offset),
                })?;
                return Ok(Some(Lsn::new(prev_file, offset)));
            }
            if self.include_file_headers {
                return Ok(Some(Lsn::new(prev_file, 0)));
            }
            file_number = prev_file;
        }
    }

    fn file_len(&mut self, file_number: u32) -> Result<u64> {
        if let Some((n, len)) = self.file_len {
            if n == file_number {
                return Ok(len);
            }
        }
        let len = self.fm.get_file_handle(file_number)?.len()?;
        self.file_len = Some((file_number, len));
        Ok(len)
    }

    /// Make `[offset, offset + len)` of the file resident in the window.
    fn ensure(&mut self, file_number: u32, offset: u64, len: usize) -> Result<()> {
        if self.window.covers(file_number, offset, len) {
            return Ok(());
        }
        if self.window.file_number == Some(file_number)
            && offset >= self.window.start
            && offset < self.window.start + self.window.data.len() as u64
        {
            // the entry starts in the window but does not end there
            self.stats.n_repeat_iterator_reads += 1;
        }

        if len > self.window.size {
            let grown = len.div_ceil(WINDOW_GRANULE) * WINDOW_GRANULE;
            if grown <= self.window.max_size {
                debug!(from = self.window.size, to = grown, "growing read window");
                self.window.size = grown;
            }
        }
        let size = self.window.size.max(len);

        let file_len = self.file_len(file_number)?;
        let start = match self.direction {
            Direction::Forward => offset,
            Direction::Backward => (offset + len as u64).saturating_sub(size as u64),
        };
        let end = (start + size as u64).min(file_len);
        let want = end.saturating_sub(start) as usize;

        let handle = self.fm.get_file_handle(file_number)?;
        self.window.data.resize(want, 0);
        let n = handle.read_at(start, &mut self.window.data)?;
        self.window.data.truncate(n);
        self.window.file_number = Some(file_number);
        self.window.start = start;
        self.stats.n_read_operations += 1;

        if !self.window.covers(file_number, offset, len) {
            return Err(LogError::BufferUnderflow {
                needed: len,
                remaining: n.saturating_sub((offset - start) as usize),
            });
        }
        Ok(())
    }
}

/// Outcome of classifying a damaged entry.
enum Damage {
    Tail(LogError),
    Interior(LogError),
}

impl Damage {
    /// Report interior damage as `err` when it is more specific.
    fn or_interior(self, err: LogError) -> LogError {
        match self {
            Damage::Tail(tail) => tail,
            Damage::Interior(_) => err,
        }
    }
}

impl From<Damage> for LogError {
    fn from(damage: Damage) -> Self {
        match damage {
            Damage::Tail(e) | Damage::Interior(e) => e,
        }
    }
}
