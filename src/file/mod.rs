//! Log File Layer
//!
//! Everything that touches log files on disk.
//!
//! ## Directory Layout
//! ```text
//! {log_dir}/
//!   ├── 00000000.wal    ┌────────────────┬─────────┬─────────┬─────┐
//!   ├── 00000001.wal    │ FileHeader (0) │ Entry   │ Entry   │ ... │
//!   └── ...             └────────────────┴─────────┴─────────┴─────┘
//!                                        ^ FIRST_LOG_ENTRY_OFFSET
//! ```
//!
//! - `FileManager`: LSN allocation, file discovery, writes, truncation
//! - `HandleCache`: bounded cache of pinned read handles
//! - `FaultInjector`: I/O fault hooks consulted before every operation

mod cache;
mod fault;
mod handle;
mod manager;

pub use cache::{EvictionPolicy, HandleCache, LruPolicy, Pinned};
pub use fault::{FaultInjector, FaultPlan, NoFaults, WriteFault};
pub use handle::FileHandle;
pub use manager::{
    BumpResult, FileHandleGuard, FileManager, FileManagerStats, LogPosition, BAD_SUFFIX,
    DEL_SUFFIX, LOG_SUFFIX,
};
