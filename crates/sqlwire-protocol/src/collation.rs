//! Column and session collations.
//!
//! A collation is five bytes on the wire: a little-endian `u32` holding the
//! LCID in its low 20 bits plus comparison flags and a version nibble, then
//! a one-byte SQL sort id. Only the character encoding it implies matters to
//! this client; single-byte text columns are transcoded with it.

use bytes::{Buf, BufMut};

use crate::codec::need;
use crate::error::ProtocolError;

/// Bit 27 of the info word marks a `_UTF8` collation.
pub const COLLATION_FLAG_UTF8: u32 = 0x0800_0000;

/// Low 20 bits of the info word carry the LCID.
pub const LCID_MASK: u32 = 0x000F_FFFF;

/// A 5-byte TDS collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Collation {
    /// LCID, flags and version.
    pub info: u32,
    /// SQL sort id (0 for Windows collations).
    pub sort_id: u8,
}

impl Default for Collation {
    /// `SQL_Latin1_General_CP1_CI_AS`.
    fn default() -> Self {
        Self::from_bytes([0x09, 0x04, 0xD0, 0x00, 0x34])
    }
}

impl Collation {
    /// Wire size.
    pub const SIZE: usize = 5;

    /// Build from the raw 5 bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 5]) -> Self {
        Self {
            info: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            sort_id: bytes[4],
        }
    }

    /// Raw 5 bytes.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 5] {
        let info = self.info.to_le_bytes();
        [info[0], info[1], info[2], info[3], self.sort_id]
    }

    /// Read a collation from a buffer.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        need(src, Self::SIZE)?;
        let info = src.get_u32_le();
        let sort_id = src.get_u8();
        Ok(Self { info, sort_id })
    }

    /// Write the collation.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.info);
        dst.put_u8(self.sort_id);
    }

    /// Locale identifier.
    #[must_use]
    pub const fn lcid(&self) -> u32 {
        self.info & LCID_MASK
    }

    /// Whether text under this collation is already UTF-8.
    #[must_use]
    pub const fn is_utf8(&self) -> bool {
        self.info & COLLATION_FLAG_UTF8 != 0
    }

    /// Windows code page implied by the LCID.
    ///
    /// Grouped by primary language (the low 10 bits); anything unlisted
    /// falls back to 1252.
    #[must_use]
    pub const fn code_page(&self) -> u16 {
        if self.is_utf8() {
            return 65001;
        }
        let lcid = self.lcid();
        match lcid & 0x3FF {
            0x11 => 932,
            0x04 => match lcid & 0xFFFF {
                0x0804 | 0x1004 => 936,
                _ => 950,
            },
            0x12 => 949,
            0x1E => 874,
            0x2A => 1258,
            0x05 | 0x15 | 0x0E | 0x1B | 0x24 | 0x18 | 0x1C => 1250,
            0x1A => match lcid & 0xFFFF {
                0x0C1A | 0x201A | 0x1C1A => 1251,
                _ => 1250,
            },
            0x19 | 0x22 | 0x23 | 0x02 | 0x2F | 0x40 | 0x44 | 0x50 => 1251,
            0x08 => 1253,
            0x1F | 0x2C => 1254,
            0x0D => 1255,
            0x01 | 0x29 | 0x20 | 0x63 | 0x8C => 1256,
            0x25..=0x27 => 1257,
            _ => 1252,
        }
    }

    /// Character encoding for single-byte text.
    #[cfg(feature = "encoding")]
    #[must_use]
    pub fn encoding(&self) -> &'static encoding_rs::Encoding {
        match self.code_page() {
            65001 => encoding_rs::UTF_8,
            932 => encoding_rs::SHIFT_JIS,
            936 => encoding_rs::GBK,
            949 => encoding_rs::EUC_KR,
            950 => encoding_rs::BIG5,
            874 => encoding_rs::WINDOWS_874,
            1250 => encoding_rs::WINDOWS_1250,
            1251 => encoding_rs::WINDOWS_1251,
            1253 => encoding_rs::WINDOWS_1253,
            1254 => encoding_rs::WINDOWS_1254,
            1255 => encoding_rs::WINDOWS_1255,
            1256 => encoding_rs::WINDOWS_1256,
            1257 => encoding_rs::WINDOWS_1257,
            1258 => encoding_rs::WINDOWS_1258,
            _ => encoding_rs::WINDOWS_1252,
        }
    }

    /// Decode single-byte text, failing on malformed sequences.
    #[cfg(feature = "encoding")]
    pub fn decode_str(&self, bytes: &[u8]) -> Result<String, ProtocolError> {
        let encoding = self.encoding();
        encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(std::borrow::Cow::into_owned)
            .ok_or_else(|| {
                ProtocolError::StringEncoding(format!("invalid {} text", encoding.name()))
            })
    }

    /// Decode single-byte text as UTF-8 when transcoding is compiled out.
    #[cfg(not(feature = "encoding"))]
    pub fn decode_str(&self, bytes: &[u8]) -> Result<String, ProtocolError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
    }
}
