//! File Header
//!
//! Every log file starts with a `FileHeader` entry at offset 0:
//!
//! ```text
//! ┌───────────────────┬────────────────────┬──────────────────────────────┬─────────────────┐
//! │ Timestamp (8)     │ File number (4)    │ Last entry in prev file (8)  │ Log version (4) │
//! └───────────────────┴────────────────────┴──────────────────────────────┴─────────────────┘
//! ```
//!
//! The last-entry offset lets a backward scan step from the first entry
//! of a file to the last entry of the file before it.

use bytes::{BufMut, BytesMut};

use crate::codec::{LogBuf, LogBufMut, Timestamp, INT_LOG_SIZE, LONG_LOG_SIZE, TIMESTAMP_LOG_SIZE};
use crate::error::{LogError, Result};

use super::{FromLog, LogEntryHeader, LogEntryType, Loggable};

/// Version of the log format written by this crate.
pub const LOG_VERSION: i32 = 1;

/// Offset of the first entry after the file header.
pub const FIRST_LOG_ENTRY_OFFSET: u32 = (LogEntryHeader::MIN_SIZE + FileHeader::LOG_SIZE) as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    time: Timestamp,
    file_number: u32,
    last_entry_in_prev_file_offset: u64,
    log_version: i32,
}

impl FileHeader {
    /// Encoded item size.
    pub const LOG_SIZE: usize = TIMESTAMP_LOG_SIZE + INT_LOG_SIZE + LONG_LOG_SIZE + INT_LOG_SIZE;

    pub fn new(file_number: u32, last_entry_in_prev_file_offset: u64) -> Self {
        Self {
            time: Timestamp::now(),
            file_number,
            last_entry_in_prev_file_offset,
            log_version: LOG_VERSION,
        }
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn file_number(&self) -> u32 {
        self.file_number
    }

    pub fn last_entry_in_prev_file_offset(&self) -> u64 {
        self.last_entry_in_prev_file_offset
    }

    pub fn log_version(&self) -> i32 {
        self.log_version
    }

    /// Check the header belongs to `expected_file` and is readable.
    ///
    /// Returns true if the file was written by an older log version.
    pub fn validate(&self, expected_file: u32) -> Result<bool> {
        if self.file_number != expected_file {
            return Err(LogError::BadFileHeader {
                file_number: expected_file,
                reason: format!("header names file {:08x}", self.file_number),
            });
        }
        if self.log_version > LOG_VERSION {
            return Err(LogError::BadFileHeader {
                file_number: expected_file,
                reason: format!(
                    "log version {} is newer than supported version {}",
                    self.log_version, LOG_VERSION
                ),
            });
        }
        Ok(self.log_version < LOG_VERSION)
    }
}

impl Loggable for FileHeader {
    fn entry_type(&self) -> LogEntryType {
        LogEntryType::FileHeader
    }

    fn log_size(&self) -> usize {
        Self::LOG_SIZE
    }

    fn write_to_log(&self, buf: &mut BytesMut) {
        buf.put_timestamp(self.time);
        buf.put_u32_le(self.file_number);
        buf.put_u64_le(self.last_entry_in_prev_file_offset);
        buf.put_i32_le(self.log_version);
    }
}

impl FromLog for FileHeader {
    fn read_from_log(buf: &mut &[u8], _version: u8) -> Result<Self> {
        Ok(Self {
            time: buf.get_timestamp()?,
            file_number: buf.get_log_u32()?,
            last_entry_in_prev_file_offset: buf.get_log_u64()?,
            log_version: buf.get_log_i32()?,
        })
    }
}
