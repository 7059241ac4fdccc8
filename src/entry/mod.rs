//! Log Entries
//!
//! An entry is a [`LogEntryHeader`] followed by an item:
//!
//! ```text
//! ┌─────────────────────────────┬──────────────────────────────┐
//! │ Header (11-24 bytes)        │ Item (header.item_size)      │
//! └─────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Items are written by [`Loggable`] implementations and read back by
//! [`FromLog`] implementations. The log engine never interprets item bytes
//! except for its own file headers.

mod entry_type;
mod file_header;
mod header;
mod items;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;

use crate::error::{LogError, Result};
use crate::lsn::Lsn;

pub use entry_type::LogEntryType;
pub use file_header::{FileHeader, FIRST_LOG_ENTRY_OFFSET, LOG_VERSION};
pub use header::{compute_checksum, seal_entry, verify_entry, verify_sealed, LogEntryHeader};
pub use items::{RawItem, TraceRecord, TxnEnd};

/// A record that can be appended to the log.
pub trait Loggable {
    fn entry_type(&self) -> LogEntryType;

    /// Exact number of bytes `write_to_log` produces.
    fn log_size(&self) -> usize;

    fn write_to_log(&self, buf: &mut BytesMut);

    /// Transaction that owns this record, if any.
    fn txn_id(&self) -> Option<u64> {
        None
    }
}

/// A record that can be decoded from a log item.
pub trait FromLog: Sized {
    fn read_from_log(buf: &mut &[u8], version: u8) -> Result<Self>;
}

/// Marshal `item` into a complete entry with a zero checksum and prev offset.
///
/// The caller seals it with [`seal_entry`] once the LSN is known.
pub fn marshal_entry(item: &dyn Loggable, provisional: bool) -> Result<BytesMut> {
    let item_size = item.log_size();
    let item_size_u32 = u32::try_from(item_size).map_err(|_| LogError::EntryTooLarge {
        size: item_size,
        max: u32::MAX as usize,
    })?;
    let header = LogEntryHeader::new(item.entry_type(), item_size_u32, provisional, item.txn_id());

    let mut buf = BytesMut::with_capacity(header.entry_size());
    header.write_to(&mut buf);
    item.write_to_log(&mut buf);

    if buf.len() != header.entry_size() {
        return Err(LogError::Serialization(format!(
            "{} item declared {} bytes but wrote {}",
            item.entry_type(),
            item_size,
            buf.len() - header.size()
        )));
    }
    Ok(buf)
}

/// One entry read back from the log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    lsn: Lsn,
    header: LogEntryHeader,
    item: Bytes,
}

impl LogEntry {
    /// Parse a complete entry. `bytes` may run past the end of the entry.
    pub fn from_bytes(lsn: Lsn, bytes: Bytes, verify_checksum: bool) -> Result<Self> {
        let header = LogEntryHeader::read_from(&bytes)?;
        let entry_size = header.entry_size();
        if bytes.len() < entry_size {
            return Err(LogError::BufferUnderflow {
                needed: entry_size,
                remaining: bytes.len(),
            });
        }
        if verify_checksum {
            verify_entry(lsn, &header, &bytes[..entry_size])?;
        }
        Ok(Self {
            lsn,
            item: bytes.slice(header.size()..entry_size),
            header,
        })
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn header(&self) -> &LogEntryHeader {
        &self.header
    }

    pub fn entry_type(&self) -> LogEntryType {
        self.header.entry_type()
    }

    /// Item bytes, header excluded.
    pub fn item(&self) -> &Bytes {
        &self.item
    }

    pub fn entry_size(&self) -> usize {
        self.header.entry_size()
    }

    pub fn is_provisional(&self) -> bool {
        self.header.is_provisional()
    }

    pub fn txn_id(&self) -> Option<u64> {
        self.header.txn_id()
    }

    /// Decode the item, which must be consumed exactly.
    pub fn read_item<T: FromLog>(&self) -> Result<T> {
        let mut buf: &[u8] = &self.item;
        let value = T::read_from_log(&mut buf, self.header.version())?;
        if !buf.is_empty() {
            return Err(items::trailing_bytes_error(self.entry_type(), buf.len()));
        }
        Ok(value)
    }

    /// Decode a commit or abort record.
    pub fn read_txn_end(&self) -> Result<TxnEnd> {
        let committed = match self.entry_type() {
            LogEntryType::TxnCommit => true,
            LogEntryType::TxnAbort => false,
            other => {
                return Err(LogError::Corruption(format!(
                    "{} at {} is not a transaction end",
                    other, self.lsn
                )))
            }
        };
        let mut buf: &[u8] = &self.item;
        let value = TxnEnd::decode(&mut buf, committed)?;
        if !buf.is_empty() {
            return Err(items::trailing_bytes_error(self.entry_type(), buf.len()));
        }
        Ok(value)
    }

    /// Decode a bincode payload written by [`RawItem::from_serde`].
    pub fn deserialize_item<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.item)?)
    }
}
