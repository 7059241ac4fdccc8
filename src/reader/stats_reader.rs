//! Per-type summary of a log scan.

use std::collections::BTreeMap;
use std::fmt;

use crate::entry::{LogEntry, LogEntryType};
use crate::error::Result;
use crate::lsn::Lsn;

use super::FileReader;

/// Counts for one entry type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TypeSummary {
    pub count: u64,
    pub total_bytes: u64,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub provisional: u64,
}

impl TypeSummary {
    fn add(&mut self, entry: &LogEntry) {
        let size = entry.entry_size();
        if self.count == 0 || size < self.min_bytes {
            self.min_bytes = size;
        }
        self.max_bytes = self.max_bytes.max(size);
        self.count += 1;
        self.total_bytes += size as u64;
        if entry.is_provisional() {
            self.provisional += 1;
        }
    }

    pub fn average_bytes(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_bytes / self.count
        }
    }
}

/// Summary of every entry a reader returns.
#[derive(Debug, Default, Clone)]
pub struct LogSummary {
    pub by_type: BTreeMap<LogEntryType, TypeSummary>,
    pub first_lsn: Option<Lsn>,
    pub last_lsn: Option<Lsn>,
}

impl LogSummary {
    /// Drain `reader` and summarize what it returns.
    pub fn collect(reader: &mut FileReader) -> Result<Self> {
        let mut summary = LogSummary::default();
        while let Some(entry) = reader.next_entry()? {
            summary.add(&entry);
        }
        Ok(summary)
    }

    pub fn add(&mut self, entry: &LogEntry) {
        self.by_type.entry(entry.entry_type()).or_default().add(entry);
        if self.first_lsn.is_none() {
            self.first_lsn = Some(entry.lsn());
        }
        self.last_lsn = Some(entry.lsn());
    }

    pub fn total_entries(&self) -> u64 {
        self.by_type.values().map(|s| s.count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.by_type.values().map(|s| s.total_bytes).sum()
    }
}

impl fmt::Display for LogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<18} {:>10} {:>14} {:>8} {:>8} {:>8} {:>12}",
            "type", "count", "bytes", "min", "max", "avg", "provisional"
        )?;
        for (entry_type, s) in &self.by_type {
            writeln!(
                f,
                "{:<18} {:>10} {:>14} {:>8} {:>8} {:>8} {:>12}",
                entry_type.name(),
                s.count,
                s.total_bytes,
                s.min_bytes,
                s.max_bytes,
                s.average_bytes(),
                s.provisional
            )?;
        }
        write!(
            f,
            "{:<18} {:>10} {:>14}",
            "total",
            self.total_entries(),
            self.total_bytes()
        )
    }
}
