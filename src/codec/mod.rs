//! Binary Codec
//!
//! Pure encoders/decoders shared by every on-disk structure. Nothing in
//! this module touches files or buffers owned by the log.
//!
//! ## Encodings
//! ```text
//! u32 / i32 / u64 / i64   fixed width, little-endian
//! packed int / long       1..=5 / 1..=9 bytes, see `packed`
//! bool                    1 byte (0 or 1)
//! timestamp               i64 milliseconds since the Unix epoch
//! byte array / string     packed length, then the bytes (UTF-8 for strings)
//! ```

pub mod packed;
mod primitives;

pub use packed::{MAX_PACKED_INT_LEN, MAX_PACKED_LONG_LEN};
pub use primitives::{
    byte_array_log_size, string_log_size, LogBuf, LogBufMut, Timestamp, BOOLEAN_LOG_SIZE,
    INT_LOG_SIZE, LONG_LOG_SIZE, TIMESTAMP_LOG_SIZE,
};
