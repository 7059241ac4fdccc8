use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut};

use crate::error::{LogError, Result};

use super::packed;

pub const INT_LOG_SIZE: usize = 4;
pub const LONG_LOG_SIZE: usize = 8;
pub const BOOLEAN_LOG_SIZE: usize = 1;
pub const TIMESTAMP_LOG_SIZE: usize = 8;

/// Encoded size of a byte array of `len` bytes.
pub fn byte_array_log_size(len: usize) -> usize {
    packed::packed_u32_len(len as u32) + len
}

pub fn string_log_size(s: &str) -> usize {
    byte_array_log_size(s.len())
}

/// Wall-clock time with millisecond precision, as stored in the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            Err(e) => -(e.duration().as_millis() as i64),
        };
        Timestamp(millis)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Log-format writers on top of [`BufMut`].
pub trait LogBufMut: BufMut {
    fn put_packed_u32(&mut self, value: u32) {
        packed::write_packed_u32(self, value);
    }

    fn put_packed_u64(&mut self, value: u64) {
        packed::write_packed_u64(self, value);
    }

    fn put_packed_i32(&mut self, value: i32) {
        packed::write_packed_i32(self, value);
    }

    fn put_packed_i64(&mut self, value: i64) {
        packed::write_packed_i64(self, value);
    }

    fn put_log_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_timestamp(&mut self, ts: Timestamp) {
        self.put_i64_le(ts.as_millis());
    }

    fn put_byte_array(&mut self, bytes: &[u8]) {
        self.put_packed_u32(bytes.len() as u32);
        self.put_slice(bytes);
    }

    fn put_log_string(&mut self, s: &str) {
        self.put_byte_array(s.as_bytes());
    }
}

impl<T: BufMut + ?Sized> LogBufMut for T {}

fn check_remaining<B: Buf + ?Sized>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(LogError::BufferUnderflow {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

/// Bounds-checked log-format readers on top of [`Buf`].
pub trait LogBuf: Buf {
    fn get_log_u8(&mut self) -> Result<u8> {
        check_remaining(self, 1)?;
        Ok(self.get_u8())
    }

    fn get_log_u32(&mut self) -> Result<u32> {
        check_remaining(self, INT_LOG_SIZE)?;
        Ok(self.get_u32_le())
    }

    fn get_log_i32(&mut self) -> Result<i32> {
        check_remaining(self, INT_LOG_SIZE)?;
        Ok(self.get_i32_le())
    }

    fn get_log_u64(&mut self) -> Result<u64> {
        check_remaining(self, LONG_LOG_SIZE)?;
        Ok(self.get_u64_le())
    }

    fn get_log_i64(&mut self) -> Result<i64> {
        check_remaining(self, LONG_LOG_SIZE)?;
        Ok(self.get_i64_le())
    }

    fn get_packed_u32(&mut self) -> Result<u32> {
        packed::read_packed_u32(self)
    }

    fn get_packed_u64(&mut self) -> Result<u64> {
        packed::read_packed_u64(self)
    }

    fn get_packed_i32(&mut self) -> Result<i32> {
        packed::read_packed_i32(self)
    }

    fn get_packed_i64(&mut self) -> Result<i64> {
        packed::read_packed_i64(self)
    }

    fn get_log_bool(&mut self) -> Result<bool> {
        match self.get_log_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(LogError::Corruption(format!(
                "invalid boolean byte {:#04x}",
                other
            ))),
        }
    }

    fn get_timestamp(&mut self) -> Result<Timestamp> {
        self.get_log_i64().map(Timestamp::from_millis)
    }

    fn get_byte_array(&mut self) -> Result<Vec<u8>> {
        let len = self.get_packed_u32()? as usize;
        check_remaining(self, len)?;
        let mut out = vec![0u8; len];
        self.copy_to_slice(&mut out);
        Ok(out)
    }

    fn get_log_string(&mut self) -> Result<String> {
        let bytes = self.get_byte_array()?;
        String::from_utf8(bytes)
            .map_err(|e| LogError::Corruption(format!("invalid UTF-8 in log string: {}", e)))
    }
}

impl<T: Buf + ?Sized> LogBuf for T {}
