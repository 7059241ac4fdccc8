//! Tests for appending and reading entries
//!
//! These tests verify:
//! - LSNs increase strictly and entries read back intact
//! - Recent entries are served from the buffer pool without file reads
//! - Entries spread over several files and survive a reopen
//! - Oversized entries are rejected without side effects
//! - Concurrent appenders get distinct LSNs
//! - Readers racing appenders see only fully copied entries

use std::collections::HashSet;
use std::sync::Arc;

use atlaslog::{
    Config, FaultPlan, LogEntryType, LogError, LogManager, Lsn, RawItem, TraceRecord,
    FIRST_LOG_ENTRY_OFFSET,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open(dir: &TempDir) -> LogManager {
    LogManager::open(Config::builder().log_dir(dir.path()).build()).unwrap()
}

fn payload_of(log: &LogManager, lsn: Lsn) -> Bytes {
    log.get(lsn).unwrap().read_item::<Bytes>().unwrap()
}

fn item(text: &str) -> RawItem {
    RawItem::new(LogEntryType::Generic, text.as_bytes().to_vec())
}

// =============================================================================
// Basic Append Tests
// =============================================================================

#[test]
fn test_empty_log_starts_after_header() {
    let dir = TempDir::new().unwrap();
    let log = open(&dir);

    assert_eq!(log.next_lsn(), Lsn::new(0, FIRST_LOG_ENTRY_OFFSET));
    assert!(log.last_lsn().is_null());
    let lsn = log.log(&item("first")).unwrap();
    assert_eq!(lsn, Lsn::new(0, FIRST_LOG_ENTRY_OFFSET));
}

#[test]
fn test_lsns_increase() {
    let dir = TempDir::new().unwrap();
    let log = open(&dir);

    let mut previous = Lsn::NULL;
    for i in 0..100 {
        let lsn = log.log(&item(&format!("record-{}", i))).unwrap();
        assert!(previous.is_null() || lsn > previous);
        previous = lsn;
    }
    assert_eq!(log.last_lsn(), previous);
}

#[test]
fn test_read_back_each_type() {
    let dir = TempDir::new().unwrap();
    let log = open(&dir);

    let trace = log.log(&TraceRecord::new("hello")).unwrap();
    let provisional = log.log_provisional(&item("maybe")).unwrap();
    let txn = log.log(&item("leaf").with_txn(12)).unwrap();

    let entry = log.get(trace).unwrap();
    assert_eq!(entry.entry_type(), LogEntryType::Trace);
    assert_eq!(entry.read_item::<TraceRecord>().unwrap().message(), "hello");

    let entry = log.get(provisional).unwrap();
    assert!(entry.is_provisional());
    assert_eq!(entry.header().prev_offset(), trace.file_offset());

    assert_eq!(log.get(txn).unwrap().txn_id(), Some(12));
}

#[test]
fn test_get_null_lsn() {
    let dir = TempDir::new().unwrap();
    let log = open(&dir);
    assert!(matches!(log.get(Lsn::NULL), Err(LogError::NullLsn)));
}

#[test]
fn test_get_from_missing_file() {
    let dir = TempDir::new().unwrap();
    let log = open(&dir);
    assert!(matches!(
        log.get(Lsn::new(3, FIRST_LOG_ENTRY_OFFSET)),
        Err(LogError::LogFileNotFound { file_number: 3 })
    ));
}

// =============================================================================
// Buffer Pool Read Tests
// =============================================================================

#[test]
fn test_buffered_entry_needs_no_file_read() {
    let dir = TempDir::new().unwrap();
    let plan = Arc::new(FaultPlan::new());
    let config = Config::builder()
        .log_dir(dir.path())
        .fault_injector(plan.clone())
        .build();
    let log = LogManager::open(config).unwrap();

    let lsn = log.log(&item("in memory")).unwrap();
    let reads = plan.reads();
    assert_eq!(payload_of(&log, lsn), Bytes::from_static(b"in memory"));
    assert_eq!(plan.reads(), reads);
    assert_eq!(plan.writes(), 0);

    log.flush().unwrap();
    assert!(plan.writes() > 0);
    // still cached after the write
    assert_eq!(payload_of(&log, lsn), Bytes::from_static(b"in memory"));
    assert_eq!(plan.reads(), reads);
}

#[test]
fn test_get_after_reopen() {
    let dir = TempDir::new().unwrap();
    let big = vec![0xC3u8; 500];
    let (small_lsn, big_lsn) = {
        let log = open(&dir);
        let small = log.log(&item("small")).unwrap();
        let big = log
            .log_force_flush(&RawItem::new(LogEntryType::Bin, big.clone()), true)
            .unwrap();
        log.close().unwrap();
        (small, big)
    };

    let config = Config::builder()
        .log_dir(dir.path())
        .fault_read_size(64)
        .build();
    let log = LogManager::open(config).unwrap();
    assert_eq!(payload_of(&log, small_lsn), Bytes::from_static(b"small"));
    assert_eq!(payload_of(&log, big_lsn), Bytes::from(big));
    assert_eq!(log.stats().n_repeat_fault_reads, 1);
}

// =============================================================================
// File Flip Tests
// =============================================================================

#[test]
fn test_entries_span_files() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(dir.path())
        .file_max_size(256)
        .build();

    let mut written = Vec::new();
    {
        let log = LogManager::open(config.clone()).unwrap();
        for i in 0..20 {
            let text = format!("entry number {:04} with some padding", i);
            let lsn = log.log(&item(&text)).unwrap();
            let size = log.get(lsn).unwrap().entry_size() as u64;
            assert!(lsn.file_offset() as u64 + size <= 256);
            written.push((lsn, text));
        }
        log.close().unwrap();
    }

    let files: HashSet<u32> = written.iter().map(|(lsn, _)| lsn.file_number()).collect();
    assert!(files.len() > 2);

    let log = LogManager::open(config).unwrap();
    for (lsn, text) in &written {
        assert_eq!(payload_of(&log, *lsn), Bytes::from(text.clone()));
    }
}

#[test]
fn test_force_flip() {
    let dir = TempDir::new().unwrap();
    let log = open(&dir);

    let a = log.log(&item("a")).unwrap();
    let b = log.log_force_flip(&item("b")).unwrap();
    assert_eq!(b, Lsn::new(a.file_number() + 1, FIRST_LOG_ENTRY_OFFSET));
    assert_eq!(log.get(b).unwrap().header().prev_offset(), 0);
    assert_eq!(log.file_manager().all_file_numbers().unwrap(), vec![0, 1]);
    assert_eq!(
        log.file_manager().file_header_prev_offset(1).unwrap(),
        a.file_offset() as u64
    );
}

#[test]
fn test_entry_too_large() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(dir.path())
        .log_buffer_size(1024)
        .log_buffer_max_size(1024)
        .buffer_pool_budget(4096)
        .build();
    let log = LogManager::open(config).unwrap();

    let before = log.next_lsn();
    let err = log
        .log(&RawItem::new(LogEntryType::Generic, vec![0u8; 2000]))
        .unwrap_err();
    assert!(matches!(err, LogError::EntryTooLarge { max: 1024, .. }));
    assert_eq!(log.next_lsn(), before);
    assert!(!log.file_manager().files_exist().unwrap());

    assert_eq!(log.log(&item("fits")).unwrap(), before);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_appenders() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(dir.path())
        .file_max_size(4096)
        .log_buffer_size(1024)
        .log_buffer_max_size(1024)
        .buffer_pool_budget(4096)
        .build();
    let log = LogManager::open(config).unwrap();
    let written = Mutex::new(Vec::new());

    crossbeam::scope(|s| {
        for t in 0..8 {
            let log = &log;
            let written = &written;
            s.spawn(move |_| {
                for i in 0..50 {
                    let text = format!("thread {} entry {}", t, i);
                    let lsn = if i % 10 == 9 {
                        log.log_force_flush(&item(&text), true).unwrap()
                    } else {
                        log.log(&item(&text)).unwrap()
                    };
                    written.lock().push((lsn, text));
                }
            });
        }
    })
    .unwrap();
    log.sync().unwrap();

    let written = written.into_inner();
    let unique: HashSet<Lsn> = written.iter().map(|(lsn, _)| *lsn).collect();
    assert_eq!(unique.len(), 400);
    for (lsn, text) in &written {
        assert_eq!(payload_of(&log, *lsn), Bytes::from(text.clone()));
    }

    let stats = log.stats();
    assert!(stats.fsync.n_fsyncs <= stats.fsync.n_requests);
}

fn patterned(writer: usize, i: usize) -> Vec<u8> {
    (0..120 + i % 50)
        .map(|k| (writer * 61 + i * 7 + k) as u8)
        .collect()
}

#[test]
fn test_readers_see_complete_buffered_entries() {
    const WRITERS: usize = 4;
    const READERS: usize = 3;
    const PER_WRITER: usize = 100;

    let dir = TempDir::new().unwrap();
    let plan = Arc::new(FaultPlan::new());
    let config = Config::builder()
        .log_dir(dir.path())
        .fault_injector(plan.clone())
        .build();
    let log = LogManager::open(config).unwrap();
    let (tx, rx) = crossbeam::channel::unbounded::<(Lsn, usize, usize)>();
    let checked = Mutex::new(0usize);

    crossbeam::scope(|s| {
        for w in 0..WRITERS {
            let log = &log;
            let tx = tx.clone();
            s.spawn(move |_| {
                for i in 0..PER_WRITER {
                    let item = RawItem::new(LogEntryType::Generic, patterned(w, i));
                    let lsn = log.log(&item).unwrap();
                    tx.send((lsn, w, i)).unwrap();
                }
            });
        }
        drop(tx);

        for _ in 0..READERS {
            let log = &log;
            let rx = rx.clone();
            let checked = &checked;
            s.spawn(move |_| {
                for (lsn, w, i) in rx.iter() {
                    let entry = log.get(lsn).unwrap();
                    assert_eq!(entry.lsn(), lsn);
                    let payload = entry.read_item::<Bytes>().unwrap();
                    assert_eq!(payload, Bytes::from(patterned(w, i)));
                    *checked.lock() += 1;
                }
            });
        }
    })
    .unwrap();

    assert_eq!(checked.into_inner(), WRITERS * PER_WRITER);
    // every read was served from the buffer pool
    assert_eq!(plan.writes(), 0);
}
