//! Log entry types
//!
//! Every entry header starts with a one-byte type number. The numbers are
//! part of the on-disk format and must never be reassigned.

use std::fmt;

/// The kind of record stored in a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogEntryType {
    /// First entry of every log file.
    FileHeader = 1,
    /// Leaf node written inside a transaction.
    LnTransactional = 2,
    /// Leaf node written outside a transaction.
    Ln = 3,
    /// Internal tree node.
    In = 4,
    /// Bottom internal node.
    Bin = 5,
    BinDelta = 6,
    InDelete = 7,
    /// Location of the tree root.
    Root = 8,
    TxnCommit = 9,
    TxnAbort = 10,
    CheckpointStart = 11,
    CheckpointEnd = 12,
    /// Free-form diagnostic message.
    Trace = 13,
    /// Opaque record owned by a higher layer.
    Generic = 14,
}

impl LogEntryType {
    pub const ALL: [LogEntryType; 14] = [
        LogEntryType::FileHeader,
        LogEntryType::LnTransactional,
        LogEntryType::Ln,
        LogEntryType::In,
        LogEntryType::Bin,
        LogEntryType::BinDelta,
        LogEntryType::InDelete,
        LogEntryType::Root,
        LogEntryType::TxnCommit,
        LogEntryType::TxnAbort,
        LogEntryType::CheckpointStart,
        LogEntryType::CheckpointEnd,
        LogEntryType::Trace,
        LogEntryType::Generic,
    ];

    pub fn from_u8(type_num: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.type_num() == type_num)
    }

    pub const fn type_num(self) -> u8 {
        self as u8
    }

    /// Current on-disk version of this type's item format.
    pub const fn version(self) -> u8 {
        1
    }

    pub const fn name(self) -> &'static str {
        match self {
            LogEntryType::FileHeader => "FileHeader",
            LogEntryType::LnTransactional => "LN_TX",
            LogEntryType::Ln => "LN",
            LogEntryType::In => "IN",
            LogEntryType::Bin => "BIN",
            LogEntryType::BinDelta => "BINDelta",
            LogEntryType::InDelete => "INDelete",
            LogEntryType::Root => "Root",
            LogEntryType::TxnCommit => "Commit",
            LogEntryType::TxnAbort => "Abort",
            LogEntryType::CheckpointStart => "CkptStart",
            LogEntryType::CheckpointEnd => "CkptEnd",
            LogEntryType::Trace => "Trace",
            LogEntryType::Generic => "Generic",
        }
    }

    /// Tree node types.
    pub const fn is_node_type(self) -> bool {
        matches!(
            self,
            LogEntryType::LnTransactional
                | LogEntryType::Ln
                | LogEntryType::In
                | LogEntryType::Bin
                | LogEntryType::BinDelta
        )
    }

    /// Types that always carry a transaction id.
    pub const fn is_transactional(self) -> bool {
        matches!(
            self,
            LogEntryType::LnTransactional | LogEntryType::TxnCommit | LogEntryType::TxnAbort
        )
    }
}

impl fmt::Display for LogEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
