//! Stock loggable records
//!
//! Records the log itself understands. Higher layers bring their own
//! [`Loggable`] types or wrap opaque bytes in a [`RawItem`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::codec::{
    string_log_size, LogBuf, LogBufMut, Timestamp, LONG_LOG_SIZE, TIMESTAMP_LOG_SIZE,
};
use crate::error::{LogError, Result};
use crate::lsn::Lsn;

use super::{FromLog, LogEntryType, Loggable};

// =============================================================================
// TraceRecord
// =============================================================================

/// A diagnostic message recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    time: Timestamp,
    message: String,
}

impl TraceRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            time: Timestamp::now(),
            message: message.into(),
        }
    }

    pub fn with_time(time: Timestamp, message: impl Into<String>) -> Self {
        Self {
            time,
            message: message.into(),
        }
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Loggable for TraceRecord {
    fn entry_type(&self) -> LogEntryType {
        LogEntryType::Trace
    }

    fn log_size(&self) -> usize {
        TIMESTAMP_LOG_SIZE + string_log_size(&self.message)
    }

    fn write_to_log(&self, buf: &mut BytesMut) {
        buf.put_timestamp(self.time);
        buf.put_log_string(&self.message);
    }
}

impl FromLog for TraceRecord {
    fn read_from_log(buf: &mut &[u8], _version: u8) -> Result<Self> {
        Ok(Self {
            time: buf.get_timestamp()?,
            message: buf.get_log_string()?,
        })
    }
}

// =============================================================================
// TxnEnd
// =============================================================================

/// Commit or abort record of a transaction.
///
/// ```text
/// ┌──────────────┬───────────────┬──────────────┐
/// │ Txn id (1-9) │ Timestamp (8) │ Last LSN (8) │
/// └──────────────┴───────────────┴──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnEnd {
    committed: bool,
    txn_id: u64,
    time: Timestamp,
    last_lsn: Lsn,
}

impl TxnEnd {
    pub fn commit(txn_id: u64, last_lsn: Lsn) -> Self {
        Self {
            committed: true,
            txn_id,
            time: Timestamp::now(),
            last_lsn,
        }
    }

    pub fn abort(txn_id: u64, last_lsn: Lsn) -> Self {
        Self {
            committed: false,
            txn_id,
            time: Timestamp::now(),
            last_lsn,
        }
    }

    pub fn is_commit(&self) -> bool {
        self.committed
    }

    pub fn id(&self) -> u64 {
        self.txn_id
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Last entry the transaction wrote before ending.
    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn
    }

    /// Decode a commit (`committed`) or abort record.
    pub fn decode(buf: &mut &[u8], committed: bool) -> Result<Self> {
        Ok(Self {
            committed,
            txn_id: buf.get_packed_u64()?,
            time: buf.get_timestamp()?,
            last_lsn: Lsn::from_u64(buf.get_log_u64()?),
        })
    }
}

impl Loggable for TxnEnd {
    fn entry_type(&self) -> LogEntryType {
        if self.committed {
            LogEntryType::TxnCommit
        } else {
            LogEntryType::TxnAbort
        }
    }

    fn log_size(&self) -> usize {
        crate::codec::packed::packed_u64_len(self.txn_id) + TIMESTAMP_LOG_SIZE + LONG_LOG_SIZE
    }

    fn write_to_log(&self, buf: &mut BytesMut) {
        buf.put_packed_u64(self.txn_id);
        buf.put_timestamp(self.time);
        buf.put_u64_le(self.last_lsn.as_u64());
    }

    fn txn_id(&self) -> Option<u64> {
        Some(self.txn_id)
    }
}

// =============================================================================
// RawItem
// =============================================================================

/// Opaque bytes logged under a caller-chosen type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    entry_type: LogEntryType,
    txn_id: Option<u64>,
    payload: Bytes,
}

impl RawItem {
    pub fn new(entry_type: LogEntryType, payload: impl Into<Bytes>) -> Self {
        Self {
            entry_type,
            txn_id: None,
            payload: payload.into(),
        }
    }

    /// Tag the item with the transaction that wrote it.
    pub fn with_txn(mut self, txn_id: u64) -> Self {
        self.txn_id = Some(txn_id);
        self
    }

    /// Serialize `value` with bincode as the payload.
    pub fn from_serde<T: Serialize>(entry_type: LogEntryType, value: &T) -> Result<Self> {
        let payload = bincode::serialize(value)?;
        Ok(Self::new(entry_type, payload))
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl Loggable for RawItem {
    fn entry_type(&self) -> LogEntryType {
        self.entry_type
    }

    fn log_size(&self) -> usize {
        self.payload.len()
    }

    fn write_to_log(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.payload);
    }

    fn txn_id(&self) -> Option<u64> {
        self.txn_id
    }
}

impl FromLog for Bytes {
    fn read_from_log(buf: &mut &[u8], _version: u8) -> Result<Self> {
        let out = Bytes::copy_from_slice(buf);
        *buf = &[];
        Ok(out)
    }
}

pub(crate) fn trailing_bytes_error(kind: LogEntryType, left: usize) -> LogError {
    LogError::Corruption(format!("{} item has {} trailing bytes", kind, left))
}
