//! I/O Fault Injection
//!
//! The file layer consults a [`FaultInjector`] before every physical
//! write, fsync, and read. Production code uses [`NoFaults`]; tests
//! install a [`FaultPlan`] to simulate disk-full, failed fsyncs, and torn
//! writes at precise points.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

/// What to do with one physical write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// Perform the write normally.
    Proceed,
    /// Write nothing and fail with this error kind.
    Fail(io::ErrorKind),
    /// Write only the first `keep` bytes, then fail.
    Torn { keep: usize },
}

/// Hook consulted by the file layer before each I/O operation.
pub trait FaultInjector: Send + Sync + fmt::Debug {
    fn before_write(&self, _file_number: u32, _offset: u64, _len: usize) -> WriteFault {
        WriteFault::Proceed
    }

    fn before_fsync(&self, _file_number: u32) -> io::Result<()> {
        Ok(())
    }

    fn before_read(&self, _file_number: u32, _offset: u64, _len: usize) -> io::Result<()> {
        Ok(())
    }
}

/// Injects nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultInjector for NoFaults {}

/// Scripted faults plus I/O counters.
///
/// All triggers are one-shot unless noted. Methods take `&self` so a plan
/// can be shared through an `Arc` with the log it is installed in.
#[derive(Debug)]
pub struct FaultPlan {
    /// Fail once this many more writes have succeeded; negative is disarmed
    fail_writes_after: AtomicI64,
    fail_next_write: AtomicBool,
    torn_next_write: Mutex<Option<usize>>,
    fail_next_fsync: AtomicBool,
    /// Persistent until cleared
    disk_full: AtomicBool,
    fail_reads: AtomicBool,

    writes: AtomicU64,
    fsyncs: AtomicU64,
    reads: AtomicU64,
    faults_injected: AtomicU64,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultPlan {
    pub fn new() -> Self {
        Self {
            fail_writes_after: AtomicI64::new(-1),
            fail_next_write: AtomicBool::new(false),
            torn_next_write: Mutex::new(None),
            fail_next_fsync: AtomicBool::new(false),
            disk_full: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            writes: AtomicU64::new(0),
            fsyncs: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            faults_injected: AtomicU64::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Triggers
    // -------------------------------------------------------------------------

    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Let `count` more writes succeed, then fail the next one.
    pub fn fail_writes_after(&self, count: u64) {
        self.fail_writes_after.store(count as i64, Ordering::SeqCst);
    }

    /// Write only `keep` bytes of the next write, then fail it.
    pub fn tear_next_write(&self, keep: usize) {
        *self.torn_next_write.lock() = Some(keep);
    }

    pub fn fail_next_fsync(&self) {
        self.fail_next_fsync.store(true, Ordering::SeqCst);
    }

    /// Fail every write until cleared.
    pub fn set_disk_full(&self, full: bool) {
        self.disk_full.store(full, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Disarm every trigger. Counters are kept.
    pub fn clear(&self) {
        self.fail_writes_after.store(-1, Ordering::SeqCst);
        self.fail_next_write.store(false, Ordering::SeqCst);
        *self.torn_next_write.lock() = None;
        self.fail_next_fsync.store(false, Ordering::SeqCst);
        self.disk_full.store(false, Ordering::SeqCst);
        self.fail_reads.store(false, Ordering::SeqCst);
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Physical writes attempted, including failed ones.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fsyncs(&self) -> u64 {
        self.fsyncs.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn faults_injected(&self) -> u64 {
        self.faults_injected.load(Ordering::SeqCst)
    }

    fn injected(&self) {
        self.faults_injected.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts down the armed write countdown; true when it fires.
    fn countdown_fired(&self) -> bool {
        let mut current = self.fail_writes_after.load(Ordering::SeqCst);
        while current >= 0 {
            let next = current - 1;
            match self.fail_writes_after.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return current == 0,
                Err(actual) => current = actual,
            }
        }
        false
    }
}

impl FaultInjector for FaultPlan {
    fn before_write(&self, _file_number: u32, _offset: u64, _len: usize) -> WriteFault {
        self.writes.fetch_add(1, Ordering::SeqCst);

        if self.disk_full.load(Ordering::SeqCst) {
            self.injected();
            return WriteFault::Fail(io::ErrorKind::Other);
        }
        if self.fail_next_write.swap(false, Ordering::SeqCst) || self.countdown_fired() {
            self.injected();
            return WriteFault::Fail(io::ErrorKind::Other);
        }
        if let Some(keep) = self.torn_next_write.lock().take() {
            self.injected();
            return WriteFault::Torn { keep };
        }
        WriteFault::Proceed
    }

    fn before_fsync(&self, file_number: u32) -> io::Result<()> {
        self.fsyncs.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_fsync.swap(false, Ordering::SeqCst) {
            self.injected();
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected fsync failure on file {:08x}", file_number),
            ));
        }
        Ok(())
    }

    fn before_read(&self, file_number: u32, offset: u64, _len: usize) -> io::Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            self.injected();
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected read failure on file {:08x} at {}", file_number, offset),
            ));
        }
        Ok(())
    }
}
