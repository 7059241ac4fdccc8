//! Write Buffering
//!
//! Appenders copy entries into pooled in-memory buffers; buffers reach the
//! log files later, in LSN order, and serve reads of recent entries until
//! they are reused.

mod log_buffer;
mod pool;

pub use log_buffer::{BufferState, LogBuffer};
pub use pool::{Discarded, LogBufferPool, PoolStats};
