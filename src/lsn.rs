//! Log Sequence Numbers
//!
//! An LSN names one log entry by `(file_number, offset)`, packed into a
//! single `u64` so that comparison is one integer compare:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────┐
//! │ file number (32 bit) │ file offset (32 bit) │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! Ordering is by file number, then offset.

use std::fmt;

/// A log sequence number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(u64);

impl Lsn {
    /// Sentinel meaning "no LSN". Sorts after every real LSN.
    pub const NULL: Lsn = Lsn(u64::MAX);

    /// Build an LSN from its file number and byte offset.
    pub const fn new(file_number: u32, offset: u32) -> Self {
        Lsn(((file_number as u64) << 32) | offset as u64)
    }

    pub const fn from_u64(raw: u64) -> Self {
        Lsn(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn file_number(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn file_offset(self) -> u32 {
        self.0 as u32
    }

    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }

    /// Same file, different offset.
    pub const fn with_offset(self, offset: u32) -> Self {
        Lsn::new(self.file_number(), offset)
    }

    /// Parse `file/offset`, each part decimal or `0x` hex.
    ///
    /// `"0x7b/0x23"` and `"123/35"` name the same LSN.
    pub fn parse(s: &str) -> Option<Lsn> {
        let (file, offset) = s.trim().split_once('/')?;
        Some(Lsn::new(parse_u32(file)?, parse_u32(offset)?))
    }
}

fn parse_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Lsn::NULL
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL_LSN")
        } else {
            write!(f, "0x{:x}/0x{:x}", self.file_number(), self.file_offset())
        }
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lsn({})", self)
    }
}
