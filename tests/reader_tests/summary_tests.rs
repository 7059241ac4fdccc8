//! Tests for the per-type log summary
//!
//! These tests verify:
//! - Counts and sizes per entry type
//! - First and last LSN of the scan
//! - The printed table

use std::sync::Arc;

use atlaslog::reader::LogSummary;
use atlaslog::{
    Config, FileManager, FileReader, LogEntryType, LogManager, Lsn, RawItem, TraceRecord,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn summarize(config: &Config, include_headers: bool) -> LogSummary {
    let fm = Arc::new(FileManager::open(config).unwrap());
    let mut reader = FileReader::forward(fm, config, Lsn::NULL, Lsn::NULL)
        .unwrap()
        .include_file_headers(include_headers);
    LogSummary::collect(&mut reader).unwrap()
}

// =============================================================================
// Summary Tests
// =============================================================================

#[test]
fn test_counts_by_type() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder().log_dir(dir.path()).build();

    let (first, last) = {
        let log = LogManager::open(config.clone()).unwrap();
        let first = log.log(&RawItem::new(LogEntryType::Ln, vec![0; 10])).unwrap();
        log.log(&RawItem::new(LogEntryType::Ln, vec![0; 30])).unwrap();
        log.log_provisional(&RawItem::new(LogEntryType::Bin, vec![0; 100]))
            .unwrap();
        let last = log.log(&TraceRecord::new("done")).unwrap();
        log.close().unwrap();
        (first, last)
    };

    let summary = summarize(&config, false);
    assert_eq!(summary.total_entries(), 4);
    assert_eq!(summary.first_lsn, Some(first));
    assert_eq!(summary.last_lsn, Some(last));
    assert!(!summary.by_type.contains_key(&LogEntryType::FileHeader));

    let ln = summary.by_type[&LogEntryType::Ln];
    assert_eq!(ln.count, 2);
    assert_eq!(ln.min_bytes, 21);
    assert_eq!(ln.max_bytes, 41);
    assert_eq!(ln.total_bytes, 62);
    assert_eq!(ln.average_bytes(), 31);
    assert_eq!(ln.provisional, 0);

    let bin = summary.by_type[&LogEntryType::Bin];
    assert_eq!(bin.count, 1);
    assert_eq!(bin.provisional, 1);

    let with_headers = summarize(&config, true);
    assert_eq!(with_headers.total_entries(), 5);
    assert_eq!(with_headers.first_lsn, Some(Lsn::new(0, 0)));
}

#[test]
fn test_table_output() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder().log_dir(dir.path()).build();
    {
        let log = LogManager::open(config.clone()).unwrap();
        log.log(&TraceRecord::new("one")).unwrap();
        log.log(&TraceRecord::new("two")).unwrap();
        log.close().unwrap();
    }

    let table = summarize(&config, false).to_string();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("type"));
    assert!(lines[1].starts_with("Trace"));
    assert!(lines[2].starts_with("total"));
    assert!(lines[2].contains(" 2 "));
}

#[test]
fn test_empty_summary() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder().log_dir(dir.path()).build();

    let summary = summarize(&config, false);
    assert_eq!(summary.total_entries(), 0);
    assert_eq!(summary.total_bytes(), 0);
    assert!(summary.first_lsn.is_none());
}
