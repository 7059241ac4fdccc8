//! Log Readers
//!
//! - `FileReader`: forward or backward scan over any LSN range
//! - `LastFileReader`: finds the end of the log at startup
//! - `LogSummary`: per-type counts over a scan

mod file_reader;
mod last_file_reader;
mod stats_reader;

pub use file_reader::{FileReader, ReaderStats};
pub use last_file_reader::LastFileReader;
pub use stats_reader::{LogSummary, TypeSummary};
