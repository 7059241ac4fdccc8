//! Error types for AtlasLog
//!
//! Provides a unified error type for all log operations.
//!
//! Errors fall into three groups:
//! - handled locally (`TornWrite` ends a scan, write faults roll the allocator back)
//! - surfaced but recoverable (`MustAbort`, `FsyncTimeout`, `EntryTooLarge`)
//! - fatal (`ChecksumMismatch` in the interior, `BadFileHeader` on a file with data,
//!   `EnvironmentInvalid`)

use thiserror::Error;

use crate::lsn::Lsn;

/// Result type alias using LogError
pub type Result<T> = std::result::Result<T, LogError>;

/// Unified error type for log operations
#[derive(Debug, Error)]
pub enum LogError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log file {file_number:08x} does not exist")]
    LogFileNotFound { file_number: u32 },

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    #[error("checksum mismatch at {lsn}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { lsn: Lsn, expected: u32, actual: u32 },

    /// A damaged entry at the physical end of the log.
    #[error("torn write at end of log, {lsn}")]
    TornWrite { lsn: Lsn },

    #[error("bad header in log file {file_number:08x}: {reason}")]
    BadFileHeader { file_number: u32, reason: String },

    #[error("invalid log entry type {type_num}")]
    InvalidEntryType { type_num: u8 },

    #[error("log corruption: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("log entry of {size} bytes exceeds the maximum of {max} bytes")]
    EntryTooLarge { size: usize, max: usize },

    #[error("log buffer pool budget of {budget} bytes is exhausted")]
    BufferPoolExhausted { budget: usize },

    #[error("log file number space exhausted")]
    FileNumberOverflow,

    // -------------------------------------------------------------------------
    // Durability Errors
    // -------------------------------------------------------------------------
    #[error("log write failed: {0}")]
    LogWrite(String),

    #[error("timed out after {timeout_ms} ms waiting for group fsync")]
    FsyncTimeout { timeout_ms: u64 },

    #[error("group fsync failed: {0}")]
    FsyncFailed(String),

    #[error("log is no longer usable, recovery must be run: {0}")]
    EnvironmentInvalid(String),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("transaction {txn_id} lost log data in a failed write and must abort")]
    MustAbort { txn_id: u64 },

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    BufferUnderflow { needed: usize, remaining: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("null LSN")]
    NullLsn,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LogError {
    /// Returns true if the error means on-disk data cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LogError::ChecksumMismatch { .. }
                | LogError::TornWrite { .. }
                | LogError::BadFileHeader { .. }
                | LogError::InvalidEntryType { .. }
                | LogError::BufferUnderflow { .. }
                | LogError::Corruption(_)
        )
    }

    /// Returns true for damage confined to the physical end of the log.
    pub fn is_torn_write(&self) -> bool {
        matches!(self, LogError::TornWrite { .. })
    }

    /// Returns true if the caller may keep using the log after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LogError::Io(_)
                | LogError::LogWrite(_)
                | LogError::EntryTooLarge { .. }
                | LogError::BufferPoolExhausted { .. }
                | LogError::FsyncTimeout { .. }
                | LogError::FsyncFailed(_)
                | LogError::MustAbort { .. }
                | LogError::TornWrite { .. }
        )
    }
}

impl From<bincode::Error> for LogError {
    fn from(err: bincode::Error) -> Self {
        LogError::Serialization(err.to_string())
    }
}
