//! Tests for scanning the log
//!
//! These tests verify:
//! - Forward and backward scans return every entry across files
//! - Start and finish bounds are inclusive
//! - Type and provisional filters
//! - Large entries grow the read window
//! - Damage is corruption in an earlier file and a torn write at the end
//! - The last entry is found past empty trailing files

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use atlaslog::file::LOG_SUFFIX;
use atlaslog::{
    Config, FileManager, FileReader, LogEntry, LogEntryType, LogError, LogManager, Lsn, RawItem,
    FIRST_LOG_ENTRY_OFFSET,
};
use tempfile::TempDir;

const N_ENTRIES: usize = 24;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &TempDir) -> Config {
    Config::builder()
        .log_dir(dir.path())
        .file_max_size(300)
        .build()
}

/// Write entries of 51 bytes, five to a file; every fourth is provisional.
fn build_log(config: &Config) -> Vec<(Lsn, LogEntryType)> {
    let log = LogManager::open(config.clone()).unwrap();
    let mut written = Vec::new();
    for i in 0..N_ENTRIES {
        let entry_type = if i % 2 == 0 {
            LogEntryType::Ln
        } else {
            LogEntryType::In
        };
        let item = RawItem::new(entry_type, vec![i as u8; 40]);
        let lsn = if i % 4 == 1 {
            log.log_provisional(&item).unwrap()
        } else {
            log.log(&item).unwrap()
        };
        written.push((lsn, entry_type));
    }
    log.close().unwrap();
    written
}

fn file_manager(config: &Config) -> Arc<FileManager> {
    Arc::new(FileManager::open(config).unwrap())
}

fn drain(reader: &mut FileReader) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        entries.push(entry);
    }
    entries
}

fn lsns(entries: &[LogEntry]) -> Vec<Lsn> {
    entries.iter().map(|e| e.lsn()).collect()
}

fn log_path(dir: &TempDir, file_number: u32) -> std::path::PathBuf {
    dir.path().join(FileManager::file_name(file_number, LOG_SUFFIX))
}

// =============================================================================
// Forward Scan Tests
// =============================================================================

#[test]
fn test_forward_scan_reads_everything() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);
    let fm = file_manager(&config);
    assert_eq!(fm.all_file_numbers().unwrap(), vec![0, 1, 2, 3, 4]);

    let mut reader = FileReader::forward(fm, &config, Lsn::NULL, Lsn::NULL).unwrap();
    let entries = drain(&mut reader);

    let expected: Vec<Lsn> = written.iter().map(|(lsn, _)| *lsn).collect();
    assert_eq!(lsns(&entries), expected);
    for (entry, (_, entry_type)) in entries.iter().zip(&written) {
        assert_eq!(entry.entry_type(), *entry_type);
    }
    assert_eq!(reader.last_lsn(), *expected.last().unwrap());
    assert_eq!(reader.stats().n_read, N_ENTRIES as u64 + 5);
}

#[test]
fn test_forward_scan_with_file_headers() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);

    let mut reader = FileReader::forward(file_manager(&config), &config, Lsn::NULL, Lsn::NULL)
        .unwrap()
        .include_file_headers(true);
    let entries = drain(&mut reader);

    let (headers, others): (Vec<_>, Vec<_>) = entries
        .iter()
        .partition(|e| e.entry_type() == LogEntryType::FileHeader);
    assert_eq!(headers.len(), 5);
    for (n, header) in headers.iter().enumerate() {
        assert_eq!(header.lsn(), Lsn::new(n as u32, 0));
    }
    assert_eq!(others.len(), written.len());
}

#[test]
fn test_forward_bounds_are_inclusive() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);
    let start = written[3].0;
    let finish = written[17].0;

    let mut reader = FileReader::forward(file_manager(&config), &config, start, finish).unwrap();
    let expected: Vec<Lsn> = written[3..=17].iter().map(|(lsn, _)| *lsn).collect();
    assert_eq!(lsns(&drain(&mut reader)), expected);
}

#[test]
fn test_empty_log_scan() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let mut reader =
        FileReader::forward(file_manager(&config), &config, Lsn::NULL, Lsn::NULL).unwrap();
    assert!(reader.next_entry().unwrap().is_none());
    assert!(reader.last_lsn().is_null());
}

#[test]
fn test_single_file_scan() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);

    let mut reader = FileReader::single_file(file_manager(&config), &config, 2).unwrap();
    let expected: Vec<Lsn> = written
        .iter()
        .map(|(lsn, _)| *lsn)
        .filter(|lsn| lsn.file_number() == 2)
        .collect();
    assert_eq!(expected.len(), 5);
    assert_eq!(lsns(&drain(&mut reader)), expected);
}

// =============================================================================
// Backward Scan Tests
// =============================================================================

#[test]
fn test_backward_scan_reads_everything() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);
    let last = written.last().unwrap().0;

    let mut reader = FileReader::backward(file_manager(&config), &config, last, Lsn::NULL).unwrap();
    let expected: Vec<Lsn> = written.iter().rev().map(|(lsn, _)| *lsn).collect();
    assert_eq!(lsns(&drain(&mut reader)), expected);
}

#[test]
fn test_backward_scan_with_file_headers() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);
    let last = written.last().unwrap().0;

    let mut reader = FileReader::backward(file_manager(&config), &config, last, Lsn::NULL)
        .unwrap()
        .include_file_headers(true);
    let entries = drain(&mut reader);

    assert_eq!(entries.len(), written.len() + 5);
    for pair in entries.windows(2) {
        if pair[1].entry_type() == LogEntryType::FileHeader {
            // a header follows the first entry of its own file
            assert_eq!(pair[0].lsn(), Lsn::new(pair[1].lsn().file_number(), FIRST_LOG_ENTRY_OFFSET));
        }
    }
    assert_eq!(entries.last().unwrap().lsn(), Lsn::new(0, 0));
}

#[test]
fn test_backward_bounds_are_inclusive() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);

    let mut reader =
        FileReader::backward(file_manager(&config), &config, written[17].0, written[3].0)
            .unwrap();
    let expected: Vec<Lsn> = written[3..=17].iter().rev().map(|(lsn, _)| *lsn).collect();
    assert_eq!(lsns(&drain(&mut reader)), expected);
}

#[test]
fn test_backward_needs_start() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    assert!(matches!(
        FileReader::backward(file_manager(&config), &config, Lsn::NULL, Lsn::NULL),
        Err(LogError::NullLsn)
    ));
}

#[test]
fn test_backward_across_missing_file() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);
    fs::remove_file(log_path(&dir, 2)).unwrap();

    let start = written.iter().find(|(lsn, _)| lsn.file_number() == 3).unwrap().0;
    let mut reader = FileReader::backward(file_manager(&config), &config, start, Lsn::NULL).unwrap();
    let err = loop {
        match reader.next_entry() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("scan crossed a missing file"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, LogError::Corruption(_)));
}

// =============================================================================
// Filter Tests
// =============================================================================

#[test]
fn test_type_filter() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);

    let mut reader = FileReader::forward(file_manager(&config), &config, Lsn::NULL, Lsn::NULL)
        .unwrap()
        .with_target_types(&[LogEntryType::In]);
    let entries = drain(&mut reader);

    assert_eq!(entries.len(), N_ENTRIES / 2);
    assert!(entries.iter().all(|e| e.entry_type() == LogEntryType::In));
    // filtered entries are still read
    assert_eq!(reader.stats().n_read, written.len() as u64 + 5);
}

#[test]
fn test_skip_provisional() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    build_log(&config);

    let mut reader = FileReader::forward(file_manager(&config), &config, Lsn::NULL, Lsn::NULL)
        .unwrap()
        .skip_provisional(true);
    let entries = drain(&mut reader);
    assert_eq!(entries.len(), N_ENTRIES - N_ENTRIES / 4);
    assert!(entries.iter().all(|e| !e.is_provisional()));
}

// =============================================================================
// Read Window Tests
// =============================================================================

#[test]
fn test_large_entries_grow_window() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(dir.path())
        .iterator_read_size(64)
        .iterator_max_size(8192)
        .build();

    let mut written = Vec::new();
    {
        let log = LogManager::open(config.clone()).unwrap();
        for i in 0..10u8 {
            let size = if i % 3 == 0 { 2000 } else { 30 };
            let lsn = log
                .log(&RawItem::new(LogEntryType::Bin, vec![i; size]))
                .unwrap();
            written.push(lsn);
        }
        log.close().unwrap();
    }

    let mut reader =
        FileReader::forward(file_manager(&config), &config, Lsn::NULL, Lsn::NULL).unwrap();
    let entries = drain(&mut reader);
    assert_eq!(lsns(&entries), written);
    assert_eq!(entries[3].item().len(), 2000);
    assert!(entries[3].item().iter().all(|b| *b == 3));
    assert!(reader.stats().n_repeat_iterator_reads > 0);

    let mut reader =
        FileReader::backward(file_manager(&config), &config, written[9], Lsn::NULL).unwrap();
    let mut reversed = written.clone();
    reversed.reverse();
    assert_eq!(lsns(&drain(&mut reader)), reversed);
}

// =============================================================================
// Last Entry Tests
// =============================================================================

#[test]
fn test_find_last_entry() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);

    let fm = file_manager(&config);
    let last = FileReader::find_last_entry(&fm, &config).unwrap();
    assert_eq!(last, written.last().unwrap().0);
}

#[test]
fn test_find_last_entry_skips_zero_length_file() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);
    fs::write(log_path(&dir, 5), b"").unwrap();

    let fm = file_manager(&config);
    let last = FileReader::find_last_entry(&fm, &config).unwrap();
    assert_eq!(last, written.last().unwrap().0);
    assert_eq!(fs::metadata(log_path(&dir, 5)).unwrap().len(), 0);

    let mut reader = FileReader::backward(Arc::clone(&fm), &config, last, Lsn::NULL).unwrap();
    assert_eq!(drain(&mut reader).len(), written.len());
}

#[test]
fn test_find_last_entry_stops_before_torn_tail() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);
    OpenOptions::new()
        .append(true)
        .open(log_path(&dir, 4))
        .unwrap()
        .write_all(&[0xAB; 9])
        .unwrap();

    let fm = file_manager(&config);
    let last = FileReader::find_last_entry(&fm, &config).unwrap();
    assert_eq!(last, written.last().unwrap().0);
}

#[test]
fn test_find_last_entry_in_empty_log() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);

    let fm = file_manager(&config);
    assert!(FileReader::find_last_entry(&fm, &config).unwrap().is_null());
}

// =============================================================================
// Damage Tests
// =============================================================================

#[test]
fn test_damage_in_earlier_file_is_corruption() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);

    let mut bytes = fs::read(log_path(&dir, 1)).unwrap();
    let target = written.iter().find(|(lsn, _)| lsn.file_number() == 1).unwrap().0;
    bytes[target.file_offset() as usize + 20] ^= 0x40;
    fs::write(log_path(&dir, 1), &bytes).unwrap();

    let mut reader =
        FileReader::forward(file_manager(&config), &config, Lsn::NULL, Lsn::NULL).unwrap();
    let err = loop {
        match reader.next_entry() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("damage went unnoticed"),
            Err(e) => break e,
        }
    };
    assert!(err.is_corruption());
    assert!(!err.is_torn_write());
    assert_eq!(reader.last_lsn().file_number(), 0);
}

#[test]
fn test_garbage_at_end_is_torn_write() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let written = build_log(&config);

    let mut file = OpenOptions::new()
        .append(true)
        .open(log_path(&dir, 4))
        .unwrap();
    file.write_all(&[0xAB; 9]).unwrap();
    drop(file);

    let mut reader =
        FileReader::forward(file_manager(&config), &config, Lsn::NULL, Lsn::NULL).unwrap();
    let mut count = 0;
    let err = loop {
        match reader.next_entry() {
            Ok(Some(_)) => count += 1,
            Ok(None) => panic!("garbage went unnoticed"),
            Err(e) => break e,
        }
    };
    assert_eq!(count, written.len());
    assert!(matches!(err, LogError::TornWrite { lsn } if lsn.file_number() == 4));
}
