//! Low-level readers and writers shared by the wire structures.
//!
//! Every reader checks the remaining length before touching the buffer and
//! reports [`ProtocolError::UnexpectedEof`] on a short read, so a caller
//! streaming packets can tell "need more data" apart from malformed input.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Ensure at least `n` bytes remain.
#[inline]
pub fn need(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        Err(ProtocolError::UnexpectedEof)
    } else {
        Ok(())
    }
}

/// Read a `u8`.
pub fn read_u8(src: &mut impl Buf) -> Result<u8, ProtocolError> {
    need(src, 1)?;
    Ok(src.get_u8())
}

/// Read a little-endian `u16`.
pub fn read_u16_le(src: &mut impl Buf) -> Result<u16, ProtocolError> {
    need(src, 2)?;
    Ok(src.get_u16_le())
}

/// Read a little-endian `u32`.
pub fn read_u32_le(src: &mut impl Buf) -> Result<u32, ProtocolError> {
    need(src, 4)?;
    Ok(src.get_u32_le())
}

/// Read a little-endian `i32`.
pub fn read_i32_le(src: &mut impl Buf) -> Result<i32, ProtocolError> {
    need(src, 4)?;
    Ok(src.get_i32_le())
}

/// Read a little-endian `u64`.
pub fn read_u64_le(src: &mut impl Buf) -> Result<u64, ProtocolError> {
    need(src, 8)?;
    Ok(src.get_u64_le())
}

/// Split off `n` bytes.
pub fn read_bytes(src: &mut Bytes, n: usize) -> Result<Bytes, ProtocolError> {
    need(src, n)?;
    Ok(src.split_to(n))
}

/// Skip `n` bytes.
pub fn skip(src: &mut impl Buf, n: usize) -> Result<(), ProtocolError> {
    need(src, n)?;
    src.advance(n);
    Ok(())
}

/// Read a UTF-16LE string of `char_count` code units.
pub fn read_utf16_string(src: &mut impl Buf, char_count: usize) -> Result<String, ProtocolError> {
    need(src, char_count * 2)?;
    let units: Vec<u16> = (0..char_count).map(|_| src.get_u16_le()).collect();
    String::from_utf16(&units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Read a string with a one-byte length prefix (in UTF-16 code units).
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    let len = read_u8(src)? as usize;
    read_utf16_string(src, len)
}

/// Read a string with a two-byte length prefix (in UTF-16 code units).
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    let len = read_u16_le(src)? as usize;
    read_utf16_string(src, len)
}

/// Read a byte string with a one-byte length prefix.
pub fn read_b_varbyte(src: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = read_u8(src)? as usize;
    read_bytes(src, len)
}

/// Write a string with a one-byte length prefix, truncated to 255 units.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u8::MAX as usize).collect();
    dst.put_u8(units.len() as u8);
    for unit in units {
        dst.put_u16_le(unit);
    }
}

/// Write a string with a two-byte length prefix, truncated to 65535 units.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u16::MAX as usize).collect();
    dst.put_u16_le(units.len() as u16);
    for unit in units {
        dst.put_u16_le(unit);
    }
}

/// Write a UTF-16LE string without length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Byte length of `s` once encoded as UTF-16.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}
