//! Packed variable-length integers.
//!
//! Small values cost one byte; larger values cost a marker byte plus the
//! minimal number of little-endian bytes:
//!
//! ```text
//! first byte    meaning
//! 0x00..=0xF7   the value itself
//! 0xF8..=0xFF   n = first - 0xF7 bytes follow (n = 1..=8)
//! ```
//!
//! A `u32` therefore takes at most 5 bytes and a `u64` at most 9. Signed
//! values are zigzag-mapped first so that small negatives stay short.

use bytes::{Buf, BufMut};

use crate::error::{LogError, Result};

/// Values below this are stored in a single byte.
pub const SINGLE_BYTE_LIMIT: u64 = 0xF8;

/// Longest encoding of a 32-bit value.
pub const MAX_PACKED_INT_LEN: usize = 5;

/// Longest encoding of a 64-bit value.
pub const MAX_PACKED_LONG_LEN: usize = 9;

const LENGTH_MARKER_BASE: u8 = 0xF7;

fn significant_bytes(value: u64) -> usize {
    (64 - value.leading_zeros() as usize + 7) / 8
}

/// Encoded length of `value`.
pub fn packed_u64_len(value: u64) -> usize {
    if value < SINGLE_BYTE_LIMIT {
        1
    } else {
        1 + significant_bytes(value)
    }
}

pub fn packed_u32_len(value: u32) -> usize {
    packed_u64_len(value as u64)
}

pub fn packed_i64_len(value: i64) -> usize {
    packed_u64_len(zigzag(value))
}

pub fn packed_i32_len(value: i32) -> usize {
    packed_i64_len(value as i64)
}

/// Total encoded length announced by the first byte of a packed value.
pub fn packed_len_from_first_byte(first: u8) -> usize {
    if (first as u64) < SINGLE_BYTE_LIMIT {
        1
    } else {
        1 + (first - LENGTH_MARKER_BASE) as usize
    }
}

pub fn write_packed_u64<B: BufMut + ?Sized>(buf: &mut B, value: u64) {
    if value < SINGLE_BYTE_LIMIT {
        buf.put_u8(value as u8);
        return;
    }
    let n = significant_bytes(value);
    buf.put_u8(LENGTH_MARKER_BASE + n as u8);
    buf.put_uint_le(value, n);
}

pub fn write_packed_u32<B: BufMut + ?Sized>(buf: &mut B, value: u32) {
    write_packed_u64(buf, value as u64);
}

pub fn write_packed_i64<B: BufMut + ?Sized>(buf: &mut B, value: i64) {
    write_packed_u64(buf, zigzag(value));
}

pub fn write_packed_i32<B: BufMut + ?Sized>(buf: &mut B, value: i32) {
    write_packed_i64(buf, value as i64);
}

pub fn read_packed_u64<B: Buf + ?Sized>(buf: &mut B) -> Result<u64> {
    if !buf.has_remaining() {
        return Err(LogError::BufferUnderflow {
            needed: 1,
            remaining: 0,
        });
    }
    let first = buf.get_u8();
    let len = packed_len_from_first_byte(first);
    if len == 1 {
        return Ok(first as u64);
    }
    let n = len - 1;
    if buf.remaining() < n {
        return Err(LogError::BufferUnderflow {
            needed: n,
            remaining: buf.remaining(),
        });
    }
    Ok(buf.get_uint_le(n))
}

pub fn read_packed_u32<B: Buf + ?Sized>(buf: &mut B) -> Result<u32> {
    let value = read_packed_u64(buf)?;
    u32::try_from(value)
        .map_err(|_| LogError::Corruption(format!("packed int {} overflows u32", value)))
}

pub fn read_packed_i64<B: Buf + ?Sized>(buf: &mut B) -> Result<i64> {
    read_packed_u64(buf).map(unzigzag)
}

pub fn read_packed_i32<B: Buf + ?Sized>(buf: &mut B) -> Result<i32> {
    let value = read_packed_i64(buf)?;
    i32::try_from(value)
        .map_err(|_| LogError::Corruption(format!("packed int {} overflows i32", value)))
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
