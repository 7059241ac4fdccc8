//! Configuration for AtlasLog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::sync::Arc;

use crate::entry::FIRST_LOG_ENTRY_OFFSET;
use crate::error::{LogError, Result};
use crate::file::{FaultInjector, NoFaults};

/// Main configuration for a log instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // File Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the numbered log files
    /// Internal structure:
    ///   {log_dir}/
    ///     ├── 00000000.wal
    ///     ├── 00000001.wal
    ///     └── 00000002.bad     (moved aside, bad header)
    pub log_dir: PathBuf,

    /// Nominal size limit of one log file (in bytes)
    pub file_max_size: u64,

    /// Max number of open read handles kept in the cache
    pub file_handle_cache_size: usize,

    // -------------------------------------------------------------------------
    // Buffer Pool Configuration
    // -------------------------------------------------------------------------
    /// Starting capacity of each write buffer (in bytes)
    pub log_buffer_size: usize,

    /// Largest buffer the pool will allocate; also the largest entry
    pub log_buffer_max_size: usize,

    /// Total bytes of all pooled buffers
    pub buffer_pool_budget: usize,

    /// Block appenders when the budget is used up (otherwise fail)
    pub block_on_full_pool: bool,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// How long a group-commit follower waits for its round (milliseconds)
    pub fsync_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Read Configuration
    // -------------------------------------------------------------------------
    /// First read size when fetching an entry from a file (in bytes)
    pub fault_read_size: usize,

    /// Starting read buffer of log scanners (in bytes)
    pub iterator_read_size: usize,

    /// Largest read buffer a scanner keeps (in bytes)
    pub iterator_max_size: usize,

    /// Verify entry checksums on `get`
    pub checksum_on_read: bool,

    // -------------------------------------------------------------------------
    // Testing
    // -------------------------------------------------------------------------
    /// I/O fault strategy for the file layer
    pub fault_injector: Arc<dyn FaultInjector>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./atlaslog_data"),
            file_max_size: 10 * 1024 * 1024, // 10 MB
            file_handle_cache_size: 100,
            log_buffer_size: 1024 * 1024,         // 1 MB
            log_buffer_max_size: 4 * 1024 * 1024, // 4 MB
            buffer_pool_budget: 8 * 1024 * 1024,  // 8 MB
            block_on_full_pool: true,
            fsync_timeout_ms: 500,
            fault_read_size: 2048,
            iterator_read_size: 8192,
            iterator_max_size: 16 * 1024 * 1024, // 16 MB
            checksum_on_read: true,
            fault_injector: Arc::new(NoFaults),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check option values and their relationships
    pub fn validate(&self) -> Result<()> {
        if self.file_max_size <= FIRST_LOG_ENTRY_OFFSET as u64 {
            return Err(LogError::Config(format!(
                "file_max_size {} must exceed the file header size {}",
                self.file_max_size, FIRST_LOG_ENTRY_OFFSET
            )));
        }
        if self.file_max_size > u32::MAX as u64 {
            return Err(LogError::Config(format!(
                "file_max_size {} exceeds the addressable {} bytes",
                self.file_max_size,
                u32::MAX
            )));
        }
        if self.log_buffer_size == 0 {
            return Err(LogError::Config("log_buffer_size must be positive".into()));
        }
        if self.log_buffer_max_size < self.log_buffer_size {
            return Err(LogError::Config(format!(
                "log_buffer_max_size {} is below log_buffer_size {}",
                self.log_buffer_max_size, self.log_buffer_size
            )));
        }
        if self.buffer_pool_budget < self.log_buffer_max_size {
            return Err(LogError::Config(format!(
                "buffer_pool_budget {} is below log_buffer_max_size {}",
                self.buffer_pool_budget, self.log_buffer_max_size
            )));
        }
        if self.file_handle_cache_size == 0 {
            return Err(LogError::Config(
                "file_handle_cache_size must be positive".into(),
            ));
        }
        if self.iterator_read_size == 0 || self.iterator_max_size < self.iterator_read_size {
            return Err(LogError::Config(format!(
                "iterator sizes {} / {} are invalid",
                self.iterator_read_size, self.iterator_max_size
            )));
        }
        if self.fault_read_size == 0 {
            return Err(LogError::Config("fault_read_size must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the log directory
    pub fn log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_dir = path.into();
        self
    }

    /// Set the nominal log file size limit (in bytes)
    pub fn file_max_size(mut self, size: u64) -> Self {
        self.config.file_max_size = size;
        self
    }

    /// Set the number of cached read handles
    pub fn file_handle_cache_size(mut self, count: usize) -> Self {
        self.config.file_handle_cache_size = count;
        self
    }

    /// Set the starting write buffer capacity (in bytes)
    pub fn log_buffer_size(mut self, size: usize) -> Self {
        self.config.log_buffer_size = size;
        self
    }

    /// Set the largest write buffer (in bytes)
    pub fn log_buffer_max_size(mut self, size: usize) -> Self {
        self.config.log_buffer_max_size = size;
        self
    }

    /// Set the total buffer pool budget (in bytes)
    pub fn buffer_pool_budget(mut self, size: usize) -> Self {
        self.config.buffer_pool_budget = size;
        self
    }

    /// Set whether appenders block on a full pool
    pub fn block_on_full_pool(mut self, block: bool) -> Self {
        self.config.block_on_full_pool = block;
        self
    }

    /// Set the group-commit follower timeout (in milliseconds)
    pub fn fsync_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fsync_timeout_ms = ms;
        self
    }

    /// Set the first read size of `get` (in bytes)
    pub fn fault_read_size(mut self, size: usize) -> Self {
        self.config.fault_read_size = size;
        self
    }

    /// Set the starting scanner read buffer (in bytes)
    pub fn iterator_read_size(mut self, size: usize) -> Self {
        self.config.iterator_read_size = size;
        self
    }

    /// Set the largest scanner read buffer (in bytes)
    pub fn iterator_max_size(mut self, size: usize) -> Self {
        self.config.iterator_max_size = size;
        self
    }

    /// Set whether `get` verifies checksums
    pub fn checksum_on_read(mut self, verify: bool) -> Self {
        self.config.checksum_on_read = verify;
        self
    }

    /// Install an I/O fault strategy
    pub fn fault_injector(mut self, injector: Arc<dyn FaultInjector>) -> Self {
        self.config.fault_injector = injector;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
