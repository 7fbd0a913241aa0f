//! Length-prefixed binary framing shared by the wire codecs.
//!
//! Every variable-length field is written as a little-endian `i64` byte count
//! followed by exactly that many bytes. The value `-1` is reserved as an
//! "absent" sentinel for optional sub-records; every other negative count is
//! malformed.

use bytes::{Buf, BufMut};

/// Length value marking an absent optional sub-record.
pub const ABSENT: i64 = -1;

/// Size in bytes of a length prefix.
pub const PREFIX_LEN: usize = 8;

/// Errors produced while decoding a length-prefixed buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A length prefix, or the payload it announces, runs past the end of the buffer.
    #[error("truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: u64,
        remaining: usize,
    },
    /// The buffer is long enough but its contents are not valid.
    #[error("malformed {field}: {reason}")]
    Malformed {
        field: &'static str,
        reason: String,
    },
}

impl CodecError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Writes a length prefix.
pub fn put_len<B: BufMut>(buf: &mut B, len: i64) {
    buf.put_i64_le(len);
}

/// Writes `bytes` preceded by its length.
pub fn put_bytes<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    // Buffers never approach i64::MAX bytes.
    #[allow(clippy::cast_possible_wrap)]
    put_len(buf, bytes.len() as i64);
    buf.put_slice(bytes);
}

/// Writes a UTF-8 string preceded by its byte length.
pub fn put_str<B: BufMut>(buf: &mut B, s: &str) {
    put_bytes(buf, s.as_bytes());
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Reads a raw length prefix, which may be the [`ABSENT`] sentinel.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if fewer than eight bytes remain.
pub fn get_len<B: Buf>(buf: &mut B, field: &'static str) -> Result<i64, CodecError> {
    if buf.remaining() < PREFIX_LEN {
        return Err(CodecError::Truncated {
            field,
            needed: PREFIX_LEN as u64,
            remaining: buf.remaining(),
        });
    }
    Ok(buf.get_i64_le())
}

/// Validates a non-sentinel length against the remaining buffer.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for negative lengths and
/// [`CodecError::Truncated`] when the payload would overrun the buffer.
pub fn checked_len<B: Buf>(buf: &B, len: i64, field: &'static str) -> Result<usize, CodecError> {
    let Ok(len) = u64::try_from(len) else {
        return Err(CodecError::malformed(field, format!("negative length {len}")));
    };
    if len > buf.remaining() as u64 {
        return Err(CodecError::Truncated {
            field,
            needed: len,
            remaining: buf.remaining(),
        });
    }
    // Bounded by `remaining()` above.
    #[allow(clippy::cast_possible_truncation)]
    Ok(len as usize)
}

/// Reads a length-prefixed byte payload.
///
/// # Errors
///
/// Propagates truncation and negative-length errors.
pub fn get_bytes<B: Buf>(buf: &mut B, field: &'static str) -> Result<Vec<u8>, CodecError> {
    let len = get_len(buf, field)?;
    let len = checked_len(buf, len, field)?;
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Reads a length-prefixed UTF-8 string.
///
/// # Errors
///
/// Propagates framing errors; invalid UTF-8 is [`CodecError::Malformed`].
pub fn get_string<B: Buf>(buf: &mut B, field: &'static str) -> Result<String, CodecError> {
    let raw = get_bytes(buf, field)?;
    String::from_utf8(raw).map_err(|e| CodecError::malformed(field, e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
