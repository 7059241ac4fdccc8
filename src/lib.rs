//! # AtlasLog
//!
//! A write-ahead log engine for a B-tree database:
//! - Numbered, size-limited log files addressed by LSN
//! - Pooled write buffers that also serve reads of recent entries
//! - Group commit: one fsync for many concurrent durability requests
//! - Rollback of the LSN allocator after failed writes
//! - Torn-tail detection and truncation on open
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LogManager                            │
//! │        log / log_force_flush / get / flush / sync            │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//! ┌─────────────┐      ┌─────────────────┐     ┌──────────────┐
//! │ FileManager │◀─────│  LogBufferPool  │     │ FSyncManager │
//! │ (LSNs,files)│      │ (staging+cache) │     │(group commit)│
//! └──────┬──────┘      └─────────────────┘     └──────────────┘
//!        │
//!        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   00000000.wal   00000001.wal   ...      (FileReader scans)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use atlaslog::{Config, LogManager, TraceRecord};
//!
//! let config = Config::builder().log_dir("/tmp/atlaslog").build();
//! let log = LogManager::open(config)?;
//! let lsn = log.log_force_flush(&TraceRecord::new("hello"), true)?;
//! let entry = log.get(lsn)?;
//! let trace: TraceRecord = entry.read_item()?;
//! assert_eq!(trace.message(), "hello");
//! # Ok::<(), atlaslog::LogError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod lsn;

pub mod codec;
pub mod entry;
pub mod file;
pub mod buffer;
pub mod fsync;
pub mod reader;
pub mod log_manager;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, ConfigBuilder};
pub use entry::{
    FileHeader, FromLog, LogEntry, LogEntryHeader, LogEntryType, Loggable, RawItem, TraceRecord,
    TxnEnd, FIRST_LOG_ENTRY_OFFSET, LOG_VERSION,
};
pub use error::{LogError, Result};
pub use file::{FaultInjector, FaultPlan, FileManager, NoFaults};
pub use log_manager::{LogManager, LogOptions, LogStats, RecoveryInfo};
pub use lsn::Lsn;
pub use reader::{FileReader, LastFileReader, LogSummary};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasLog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
