//! Tests for write failures
//!
//! These tests verify:
//! - A failed write rolls the allocator back to the lost entry
//! - Transactions with lost entries must abort, and aborting clears that
//! - Torn and refused writes leave nothing behind on disk
//! - The log keeps working once the fault is gone

use std::sync::Arc;

use atlaslog::{
    Config, FaultPlan, FileReader, LogEntryType, LogError, LogManager, Lsn, RawItem, TxnEnd,
    FIRST_LOG_ENTRY_OFFSET,
};
use bytes::Bytes;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_with_plan(dir: &TempDir) -> (LogManager, Arc<FaultPlan>) {
    let plan = Arc::new(FaultPlan::new());
    let config = Config::builder()
        .log_dir(dir.path())
        .fault_injector(plan.clone())
        .build();
    (LogManager::open(config).unwrap(), plan)
}

fn item(text: &str) -> RawItem {
    RawItem::new(LogEntryType::Ln, text.as_bytes().to_vec())
}

/// Payloads of every entry in the log, in order.
fn scan_payloads(dir: &TempDir) -> Vec<Bytes> {
    let config = Config::builder().log_dir(dir.path()).build();
    let log = LogManager::open(config.clone()).unwrap();
    let mut reader =
        FileReader::forward(Arc::clone(log.file_manager()), &config, Lsn::NULL, Lsn::NULL)
            .unwrap();
    let mut payloads = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        payloads.push(entry.read_item::<Bytes>().unwrap());
    }
    payloads
}

// =============================================================================
// Rollback Tests
// =============================================================================

#[test]
fn test_failed_write_rewinds_allocator() {
    let dir = TempDir::new().unwrap();
    let (log, plan) = open_with_plan(&dir);

    let a = log.log_force_flush(&item("a"), false).unwrap();
    let expected = log.next_lsn();

    plan.fail_next_write();
    let err = log.log_force_flush(&item("lost"), false).unwrap_err();
    assert!(matches!(err, LogError::LogWrite(_)));
    assert_eq!(log.next_lsn(), expected);
    assert_eq!(log.stats().n_write_rollbacks, 1);
    assert!(log.is_valid());

    let c = log.log_force_flush(&item("c"), false).unwrap();
    assert_eq!(c, expected);
    assert_eq!(log.get(c).unwrap().header().prev_offset(), a.file_offset());
    log.close().unwrap();
    drop(log);

    assert_eq!(
        scan_payloads(&dir),
        vec![Bytes::from_static(b"a"), Bytes::from_static(b"c")]
    );
}

#[test]
fn test_buffered_entries_lost_with_failed_buffer() {
    let dir = TempDir::new().unwrap();
    let (log, plan) = open_with_plan(&dir);

    log.log_force_flush(&item("durable"), false).unwrap();
    let first_lost = log.log(&item("buffered").with_txn(5)).unwrap();

    plan.fail_next_write();
    assert!(log.log_force_flush(&item("flushed").with_txn(6), false).is_err());

    assert_eq!(log.next_lsn(), first_lost);
    assert!(log.must_abort(5));
    assert!(log.must_abort(6));
    assert!(!log.must_abort(7));
}

#[test]
fn test_failed_first_write_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let (log, plan) = open_with_plan(&dir);

    // the file header is the first physical write
    plan.fail_next_write();
    assert!(log.log_force_flush(&item("x"), false).is_err());
    assert!(!log.file_manager().files_exist().unwrap());

    let lsn = log.log_force_flush(&item("y"), false).unwrap();
    assert_eq!(lsn, Lsn::new(0, FIRST_LOG_ENTRY_OFFSET));
    assert_eq!(log.file_manager().file_header_prev_offset(0).unwrap(), 0);
}

#[test]
fn test_torn_write_is_cut_back() {
    let dir = TempDir::new().unwrap();
    let (log, plan) = open_with_plan(&dir);

    log.log_force_flush(&item("a"), false).unwrap();
    let expected = log.next_lsn();

    plan.tear_next_write(5);
    assert!(log.log_force_flush(&item("torn entry"), false).is_err());
    let len = std::fs::metadata(log.file_manager().full_path(0)).unwrap().len();
    assert_eq!(len, expected.file_offset() as u64);

    assert_eq!(log.log_force_flush(&item("b"), false).unwrap(), expected);
    log.close().unwrap();
    drop(log);

    assert_eq!(
        scan_payloads(&dir),
        vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]
    );
}

#[test]
fn test_disk_full_until_cleared() {
    let dir = TempDir::new().unwrap();
    let (log, plan) = open_with_plan(&dir);

    log.log_force_flush(&item("a"), false).unwrap();
    let expected = log.next_lsn();

    plan.set_disk_full(true);
    for _ in 0..3 {
        assert!(log.log_force_flush(&item("no room"), false).is_err());
        assert_eq!(log.next_lsn(), expected);
    }
    assert_eq!(log.stats().n_write_rollbacks, 3);

    plan.set_disk_full(false);
    assert_eq!(log.log_force_flush(&item("b"), false).unwrap(), expected);
}

#[test]
fn test_fsync_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let (log, plan) = open_with_plan(&dir);

    log.log_force_flush(&item("a"), true).unwrap();
    plan.fail_next_fsync();
    let err = log.log_force_flush(&item("b"), true).unwrap_err();
    assert!(matches!(err, LogError::Io(_)));

    assert!(log.log_force_flush(&item("c"), true).is_ok());
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[test]
fn test_commit_refused_until_abort() {
    let dir = TempDir::new().unwrap();
    let (log, plan) = open_with_plan(&dir);

    log.log_force_flush(&item("a"), false).unwrap();
    let leaf = log.log(&item("txn leaf").with_txn(42)).unwrap();

    plan.fail_next_write();
    assert!(log.flush().is_err());
    assert!(log.must_abort(42));

    let err = log
        .log_force_flush(&TxnEnd::commit(42, leaf), true)
        .unwrap_err();
    assert!(matches!(err, LogError::MustAbort { txn_id: 42 }));
    assert!(matches!(
        log.check_commit_allowed(42),
        Err(LogError::MustAbort { txn_id: 42 })
    ));

    log.log_force_flush(&TxnEnd::abort(42, Lsn::NULL), true).unwrap();
    assert!(!log.must_abort(42));
    assert!(log.check_commit_allowed(42).is_ok());
}

#[test]
fn test_other_transactions_unaffected() {
    let dir = TempDir::new().unwrap();
    let (log, plan) = open_with_plan(&dir);

    let kept = log.log_force_flush(&item("kept").with_txn(1), false).unwrap();
    log.log(&item("lost").with_txn(2)).unwrap();
    plan.fail_next_write();
    assert!(log.flush().is_err());

    assert!(!log.must_abort(1));
    let commit = log.log_force_flush(&TxnEnd::commit(1, kept), true).unwrap();
    assert!(log.get(commit).unwrap().read_txn_end().unwrap().is_commit());
}
