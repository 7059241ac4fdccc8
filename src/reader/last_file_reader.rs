//! End-of-log discovery.
//!
//! Scans the last log file to find where valid data ends, remembering the
//! last entry of each type recovery cares about.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::entry::{LogEntryType, FIRST_LOG_ENTRY_OFFSET};
use crate::error::{LogError, Result};
use crate::file::{FileManager, BAD_SUFFIX};
use crate::lsn::Lsn;

use super::FileReader;

/// Finds the true end of the log in its last file.
pub struct LastFileReader {
    fm: Arc<FileManager>,
    file_number: Option<u32>,
    file_len: u64,
    /// End of the last valid entry, the file header included
    last_valid_end: u64,
    last_valid_lsn: Lsn,
    /// Previous-entry offset recorded in the last valid entry
    last_prev_offset: u32,
    last_seen: HashMap<LogEntryType, Lsn>,
    targets: Vec<LogEntryType>,
    n_entries: u64,
    torn_at: Option<Lsn>,
}

impl LastFileReader {
    /// Pick the last usable file.
    ///
    /// A zero-length last file gives way to the one before it. A last file
    /// with a bad header and no room for entries is renamed aside; a bad
    /// header on a file that holds more than that is fatal.
    pub fn new(fm: Arc<FileManager>) -> Result<Self> {
        let mut numbers = fm.all_file_numbers()?;
        let mut chosen = None;

        while let Some(file_number) = numbers.pop() {
            let len = std::fs::metadata(fm.full_path(file_number))?.len();
            if len == 0 && !numbers.is_empty() {
                continue;
            }

            match fm.get_file_handle(file_number) {
                Ok(_) => {
                    chosen = Some((file_number, len));
                    break;
                }
                Err(LogError::BadFileHeader { reason, .. })
                    if len <= FIRST_LOG_ENTRY_OFFSET as u64 =>
                {
                    warn!(
                        file_number,
                        len,
                        reason = %reason,
                        "last log file has a bad header, moving it aside"
                    );
                    fm.rename_file(file_number, BAD_SUFFIX)?;
                }
                Err(e) => return Err(e),
            }
        }

        let (file_number, file_len) = match chosen {
            Some((n, len)) => (Some(n), len),
            None => (None, 0),
        };
        Ok(Self {
            fm,
            file_number,
            file_len,
            last_valid_end: 0,
            last_valid_lsn: Lsn::NULL,
            last_prev_offset: 0,
            last_seen: HashMap::new(),
            targets: Vec::new(),
            n_entries: 0,
            torn_at: None,
        })
    }

    /// Remember the last LSN of each of these types.
    pub fn with_target_types(mut self, types: &[LogEntryType]) -> Self {
        self.targets = types.to_vec();
        self
    }

    /// Scan the chosen file to the end of its valid entries.
    ///
    /// A torn tail stops the scan quietly; interior damage is returned.
    pub fn read_to_end(&mut self, config: &Config) -> Result<()> {
        let file_number = match self.file_number {
            Some(n) => n,
            None => return Ok(()),
        };

        let mut reader = FileReader::single_file(Arc::clone(&self.fm), config, file_number)?
            .include_file_headers(true)
            .tail_file(file_number);
        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    let lsn = entry.lsn();
                    self.last_valid_end = lsn.file_offset() as u64 + entry.entry_size() as u64;
                    if entry.entry_type() == LogEntryType::FileHeader {
                        continue;
                    }
                    self.last_valid_lsn = lsn;
                    self.last_prev_offset = entry.header().prev_offset();
                    self.n_entries += 1;
                    if self.targets.contains(&entry.entry_type()) {
                        self.last_seen.insert(entry.entry_type(), lsn);
                    }
                }
                Ok(None) => break,
                Err(LogError::TornWrite { lsn }) => {
                    info!(
                        %lsn,
                        discarded = self.file_len.saturating_sub(lsn.file_offset() as u64),
                        "found torn write at end of log"
                    );
                    self.torn_at = Some(lsn);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Cut the file back to the end of its last valid entry.
    ///
    /// Returns the number of bytes removed.
    pub fn set_end_of_file(&self) -> Result<u64> {
        let file_number = match self.file_number {
            Some(n) => n,
            None => return Ok(0),
        };
        if self.file_len <= self.last_valid_end {
            return Ok(0);
        }
        self.fm.truncate_log(file_number, self.last_valid_end)?;
        Ok(self.file_len - self.last_valid_end)
    }

    /// File that was scanned, `None` if the log is empty.
    pub fn file_number(&self) -> Option<u32> {
        self.file_number
    }

    /// Where the next entry would be written.
    pub fn end_of_log(&self) -> Lsn {
        match self.file_number {
            Some(n) => Lsn::new(n, self.last_valid_end as u32),
            None => Lsn::NULL,
        }
    }

    /// Last valid entry that is not a file header.
    pub fn last_valid_lsn(&self) -> Lsn {
        self.last_valid_lsn
    }

    /// Previous-entry offset stored in the last valid entry.
    pub fn prev_offset(&self) -> u32 {
        self.last_prev_offset
    }

    pub fn last_seen(&self, entry_type: LogEntryType) -> Option<Lsn> {
        self.last_seen.get(&entry_type).copied()
    }

    pub fn n_entries(&self) -> u64 {
        self.n_entries
    }

    pub fn has_torn_tail(&self) -> bool {
        self.torn_at.is_some()
    }

    /// Bytes past the last valid entry.
    pub fn tail_bytes(&self) -> u64 {
        self.file_len.saturating_sub(self.last_valid_end)
    }
}
