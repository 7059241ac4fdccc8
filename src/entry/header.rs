//! Log Entry Header
//!
//! ## Format
//! ```text
//! ┌──────────────┬─────────┬─────────────┬──────────┬────────────┬──────────────┐
//! │ Checksum (4) │ Type(1) │ Version (1) │ Prev (4) │ Size (1-5) │ Txn id (1-9) │
//! └──────────────┴─────────┴─────────────┴──────────┴────────────┴──────────────┘
//! ```
//!
//! - Checksum: CRC-32 of every byte after the checksum field, header and item
//! - Version: bit 7 provisional, bit 6 txn id present, bits 0..5 item version
//! - Prev: offset of the previous entry in the same file, 0 for the first
//! - Size: packed item size
//! - Txn id: packed, only present when bit 6 is set
//!
//! The previous-entry offset and checksum are only known once the entry has
//! an LSN, so they are filled in by [`seal_entry`] after marshalling.

use bytes::BufMut;

use crate::codec::packed;
use crate::codec::{LogBuf, LogBufMut};
use crate::error::{LogError, Result};
use crate::lsn::Lsn;

use super::LogEntryType;

const CHECKSUM_BYTES: usize = 4;
const PREV_OFFSET_POS: usize = 6;
const FIXED_BYTES: usize = 10;

const PROVISIONAL_MASK: u8 = 0x80;
const TXN_ID_MASK: u8 = 0x40;
const VERSION_MASK: u8 = 0x3F;

/// Header in front of every log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntryHeader {
    checksum: u32,
    entry_type: LogEntryType,
    version: u8,
    provisional: bool,
    prev_offset: u32,
    item_size: u32,
    txn_id: Option<u64>,
}

impl LogEntryHeader {
    /// Smallest possible header: one-byte size, no txn id.
    pub const MIN_SIZE: usize = FIXED_BYTES + 1;

    /// Largest possible header.
    pub const MAX_SIZE: usize =
        FIXED_BYTES + packed::MAX_PACKED_INT_LEN + packed::MAX_PACKED_LONG_LEN;

    pub fn new(
        entry_type: LogEntryType,
        item_size: u32,
        provisional: bool,
        txn_id: Option<u64>,
    ) -> Self {
        Self {
            checksum: 0,
            entry_type,
            version: entry_type.version(),
            provisional,
            prev_offset: 0,
            item_size,
            txn_id,
        }
    }

    /// Encoded size of this header.
    pub fn size(&self) -> usize {
        FIXED_BYTES
            + packed::packed_u32_len(self.item_size)
            + self.txn_id.map(packed::packed_u64_len).unwrap_or(0)
    }

    /// Header plus item.
    pub fn entry_size(&self) -> usize {
        self.size() + self.item_size as usize
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn entry_type(&self) -> LogEntryType {
        self.entry_type
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn prev_offset(&self) -> u32 {
        self.prev_offset
    }

    pub fn item_size(&self) -> u32 {
        self.item_size
    }

    pub fn txn_id(&self) -> Option<u64> {
        self.txn_id
    }

    /// Write the header. Checksum and prev offset are written as stored,
    /// normally zero until [`seal_entry`] runs.
    pub fn write_to<B: BufMut + ?Sized>(&self, buf: &mut B) {
        let mut flags = self.version & VERSION_MASK;
        if self.provisional {
            flags |= PROVISIONAL_MASK;
        }
        if self.txn_id.is_some() {
            flags |= TXN_ID_MASK;
        }

        buf.put_u32_le(self.checksum);
        buf.put_u8(self.entry_type.type_num());
        buf.put_u8(flags);
        buf.put_u32_le(self.prev_offset);
        buf.put_packed_u32(self.item_size);
        if let Some(txn_id) = self.txn_id {
            buf.put_packed_u64(txn_id);
        }
    }

    /// Decode a header from the front of `bytes`.
    ///
    /// `bytes` may extend past the header. Too few bytes yields
    /// `BufferUnderflow`; an unknown type yields `InvalidEntryType`.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        let (raw, _) = RawFields::read(bytes)?;
        let entry_type = LogEntryType::from_u8(raw.type_num)
            .ok_or(LogError::InvalidEntryType { type_num: raw.type_num })?;

        Ok(Self {
            checksum: raw.checksum,
            entry_type,
            version: raw.flags & VERSION_MASK,
            provisional: raw.flags & PROVISIONAL_MASK != 0,
            prev_offset: raw.prev_offset,
            item_size: raw.item_size,
            txn_id: raw.txn_id,
        })
    }

    /// Size of the entry starting at the front of `bytes`, header plus
    /// item, without validating the type number.
    ///
    /// Lets a reader checksum an entry before trusting any field the
    /// checksum covers.
    pub fn peek_entry_size(bytes: &[u8]) -> Result<usize> {
        let (raw, header_len) = RawFields::read(bytes)?;
        Ok(header_len + raw.item_size as usize)
    }
}

/// Header fields as stored, type number not yet checked.
struct RawFields {
    checksum: u32,
    type_num: u8,
    flags: u8,
    prev_offset: u32,
    item_size: u32,
    txn_id: Option<u64>,
}

impl RawFields {
    /// Decode the fields and report how many bytes they took.
    fn read(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut buf = bytes;
        let checksum = buf.get_log_u32()?;
        let type_num = buf.get_log_u8()?;
        let flags = buf.get_log_u8()?;
        let prev_offset = buf.get_log_u32()?;
        let item_size = buf.get_packed_u32()?;
        let txn_id = if flags & TXN_ID_MASK != 0 {
            Some(buf.get_packed_u64()?)
        } else {
            None
        };
        let fields = Self {
            checksum,
            type_num,
            flags,
            prev_offset,
            item_size,
            txn_id,
        };
        Ok((fields, bytes.len() - buf.len()))
    }
}

/// CRC-32 over the bytes an entry checksum covers.
pub fn compute_checksum(covered: &[u8]) -> u32 {
    crc32fast::hash(covered)
}

/// Fill in the previous-entry offset and checksum of a marshalled entry.
///
/// `entry` must hold exactly one complete entry, header first.
pub fn seal_entry(entry: &mut [u8], prev_offset: u32) {
    entry[PREV_OFFSET_POS..PREV_OFFSET_POS + 4].copy_from_slice(&prev_offset.to_le_bytes());
    let checksum = compute_checksum(&entry[CHECKSUM_BYTES..]);
    entry[..CHECKSUM_BYTES].copy_from_slice(&checksum.to_le_bytes());
}

/// Verify the checksum of one complete entry.
pub fn verify_entry(lsn: Lsn, header: &LogEntryHeader, entry: &[u8]) -> Result<()> {
    let actual = compute_checksum(&entry[CHECKSUM_BYTES..]);
    if actual != header.checksum() {
        return Err(LogError::ChecksumMismatch {
            lsn,
            expected: header.checksum(),
            actual,
        });
    }
    Ok(())
}

/// Verify a complete entry against the checksum stored in its first bytes.
pub fn verify_sealed(lsn: Lsn, entry: &[u8]) -> Result<()> {
    if entry.len() < CHECKSUM_BYTES {
        return Err(LogError::BufferUnderflow {
            needed: CHECKSUM_BYTES,
            remaining: entry.len(),
        });
    }
    let mut stored = [0u8; CHECKSUM_BYTES];
    stored.copy_from_slice(&entry[..CHECKSUM_BYTES]);
    let expected = u32::from_le_bytes(stored);
    let actual = compute_checksum(&entry[CHECKSUM_BYTES..]);
    if actual != expected {
        return Err(LogError::ChecksumMismatch {
            lsn,
            expected,
            actual,
        });
    }
    Ok(())
}
