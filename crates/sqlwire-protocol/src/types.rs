//! Wire type identifiers and TYPE_INFO.
//!
//! `TypeInfo` is the per-column (or per-parameter) type descriptor found in
//! COLMETADATA, RETURNVALUE and RPC parameters. Besides carrying size,
//! precision, scale and collation, it knows how a value of its type is framed
//! in a row, which lets the token decoder cut a value out of the stream
//! without interpreting it.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes};

use crate::codec::{need, read_bytes, read_u8, read_u16_le, read_u32_le, read_us_varchar, skip};
use crate::collation::Collation;
use crate::error::ProtocolError;
use crate::plp::{PlpResume, read_plp, write_plp};

/// TDS data type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    // Fixed-length
    /// Null type.
    Null = 0x1F,
    /// tinyint.
    Int1 = 0x30,
    /// bit.
    Bit = 0x32,
    /// smallint.
    Int2 = 0x34,
    /// int.
    Int4 = 0x38,
    /// bigint.
    Int8 = 0x7F,
    /// real.
    Float4 = 0x3B,
    /// float.
    Float8 = 0x3E,
    /// money.
    Money = 0x3C,
    /// smallmoney.
    Money4 = 0x7A,
    /// datetime.
    DateTime = 0x3D,
    /// smalldatetime.
    DateTime4 = 0x3A,

    // Byte-length prefixed
    /// uniqueidentifier.
    Guid = 0x24,
    /// Nullable integer.
    IntN = 0x26,
    /// Nullable bit.
    BitN = 0x68,
    /// Nullable float.
    FloatN = 0x6D,
    /// Nullable money.
    MoneyN = 0x6E,
    /// Nullable datetime.
    DateTimeN = 0x6F,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// decimal.
    DecimalN = 0x6A,
    /// numeric.
    NumericN = 0x6C,
    /// Legacy char.
    Char = 0x2F,
    /// Legacy varchar.
    VarChar = 0x27,
    /// Legacy binary.
    Binary = 0x2D,
    /// Legacy varbinary.
    VarBinary = 0x25,
    /// date.
    Date = 0x28,
    /// time.
    Time = 0x29,
    /// datetime2.
    DateTime2 = 0x2A,
    /// datetimeoffset.
    DateTimeOffset = 0x2B,

    // Two-byte length prefixed, PLP when declared MAX
    /// varchar.
    BigVarChar = 0xA7,
    /// varbinary.
    BigVarBinary = 0xA5,
    /// char.
    BigChar = 0xAF,
    /// binary.
    BigBinary = 0xAD,
    /// nchar.
    NChar = 0xEF,
    /// nvarchar.
    NVarChar = 0xE7,

    // Long types
    /// text.
    Text = 0x23,
    /// image.
    Image = 0x22,
    /// ntext.
    NText = 0x63,
    /// sql_variant.
    Variant = 0x62,
    /// CLR user-defined type.
    Udt = 0xF0,
    /// xml.
    Xml = 0xF1,
}

impl TypeId {
    /// Create a type ID from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3B => Self::Float4,
            0x3E => Self::Float8,
            0x3C => Self::Money,
            0x7A => Self::Money4,
            0x3D => Self::DateTime,
            0x3A => Self::DateTime4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x68 => Self::BitN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            0xF1 => Self::Xml,
            _ => return None,
        })
    }

    /// Width of a fixed-length type.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Whether text of this type is UTF-16.
    #[must_use]
    pub const fn is_unicode(self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Whether TYPE_INFO for this type carries a collation.
    #[must_use]
    pub const fn has_collation(self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::BigChar | Self::NChar | Self::NVarChar | Self::Text | Self::NText
        )
    }

    /// SQL name of the type.
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int1 => "tinyint",
            Self::Bit | Self::BitN => "bit",
            Self::Int2 => "smallint",
            Self::Int4 => "int",
            Self::Int8 => "bigint",
            Self::IntN => "int",
            Self::Float4 => "real",
            Self::Float8 | Self::FloatN => "float",
            Self::Money | Self::MoneyN => "money",
            Self::Money4 => "smallmoney",
            Self::DateTime | Self::DateTimeN => "datetime",
            Self::DateTime4 => "smalldatetime",
            Self::Guid => "uniqueidentifier",
            Self::Decimal | Self::DecimalN => "decimal",
            Self::Numeric | Self::NumericN => "numeric",
            Self::Char | Self::BigChar => "char",
            Self::VarChar | Self::BigVarChar => "varchar",
            Self::Binary | Self::BigBinary => "binary",
            Self::VarBinary | Self::BigVarBinary => "varbinary",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime2 => "datetime2",
            Self::DateTimeOffset => "datetimeoffset",
            Self::NChar => "nchar",
            Self::NVarChar => "nvarchar",
            Self::Text => "text",
            Self::Image => "image",
            Self::NText => "ntext",
            Self::Variant => "sql_variant",
            Self::Udt => "udt",
            Self::Xml => "xml",
        }
    }
}

bitflags! {
    /// Column flags from COLMETADATA.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        /// Column accepts NULL.
        const NULLABLE = 0x0001;
        /// Case-sensitive comparisons.
        const CASE_SENSITIVE = 0x0002;
        /// Column is read-write.
        const UPDATEABLE = 0x0004;
        /// Updateability unknown.
        const UPDATEABLE_UNKNOWN = 0x0008;
        /// Identity column.
        const IDENTITY = 0x0010;
        /// Computed column.
        const COMPUTED = 0x0020;
        /// Fixed-length CLR type.
        const FIXED_LEN_CLR_TYPE = 0x0100;
        /// Sparse column set.
        const SPARSE_COLUMN_SET = 0x0400;
        /// Always Encrypted column.
        const ENCRYPTED = 0x0800;
        /// Hidden column.
        const HIDDEN = 0x2000;
        /// Key column.
        const KEY = 0x4000;
        /// Nullability unknown.
        const NULLABLE_UNKNOWN = 0x8000;
    }
}

/// Sentinel `max_length` for `varchar(max)`, `nvarchar(max)` and `varbinary(max)`.
pub const MAX_LENGTH_PLP: u32 = 0xFFFF;

/// Schema binding of an `xml` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XmlSchemaRef {
    /// Database holding the schema collection.
    pub db_name: String,
    /// Owning schema.
    pub owner: String,
    /// Schema collection name.
    pub collection: String,
}

/// How a value is framed inside a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFraming {
    /// Fixed width, never NULL.
    Fixed(usize),
    /// `u8` length; 0 means NULL.
    ByteLen,
    /// `u16` length; 0xFFFF means NULL.
    UShortLen,
    /// `u32` length; 0 means NULL (`sql_variant`).
    LongLen,
    /// Text pointer, timestamp, `u32` length; empty pointer means NULL.
    TextPtr,
    /// Chunked PLP stream.
    Plp,
}

/// TYPE_INFO: type identifier plus type-specific metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Wire type.
    pub type_id: TypeId,
    /// Declared maximum length in bytes (fixed width for fixed types).
    pub max_length: u32,
    /// Precision for decimal and numeric.
    pub precision: u8,
    /// Scale for decimal, numeric and the fractional-second temporal types.
    pub scale: u8,
    /// Collation for character types.
    pub collation: Option<Collation>,
    /// Schema binding for `xml`.
    pub xml_schema: Option<XmlSchemaRef>,
}

impl TypeInfo {
    /// TYPE_INFO with just a type and length.
    #[must_use]
    pub const fn new(type_id: TypeId, max_length: u32) -> Self {
        Self {
            type_id,
            max_length,
            precision: 0,
            scale: 0,
            collation: None,
            xml_schema: None,
        }
    }

    /// Attach precision and scale.
    #[must_use]
    pub const fn with_precision_scale(mut self, precision: u8, scale: u8) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    /// Attach a scale.
    #[must_use]
    pub const fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    /// Attach a collation.
    #[must_use]
    pub const fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Whether values are sent as PLP.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        self.framing() == ValueFraming::Plp
    }

    /// Framing of a value of this type inside a row.
    #[must_use]
    pub fn framing(&self) -> ValueFraming {
        match self.type_id {
            TypeId::BigVarChar | TypeId::BigVarBinary | TypeId::NVarChar
                if self.max_length == MAX_LENGTH_PLP =>
            {
                ValueFraming::Plp
            }
            TypeId::Xml | TypeId::Udt => ValueFraming::Plp,
            TypeId::BigVarChar
            | TypeId::BigVarBinary
            | TypeId::BigChar
            | TypeId::BigBinary
            | TypeId::NChar
            | TypeId::NVarChar => ValueFraming::UShortLen,
            TypeId::Text | TypeId::NText | TypeId::Image => ValueFraming::TextPtr,
            TypeId::Variant => ValueFraming::LongLen,
            other => match other.fixed_size() {
                Some(width) => ValueFraming::Fixed(width),
                None => ValueFraming::ByteLen,
            },
        }
    }

    /// Decode TYPE_INFO.
    ///
    /// Table-name parts that COLMETADATA appends after text/ntext/image
    /// TYPE_INFO are not part of this structure; the caller skips them.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let raw = read_u8(src)?;
        let type_id = TypeId::from_u8(raw).ok_or(ProtocolError::InvalidDataType(raw))?;
        let mut info = Self::new(type_id, 0);

        match type_id {
            TypeId::Null
            | TypeId::Int1
            | TypeId::Bit
            | TypeId::Int2
            | TypeId::Int4
            | TypeId::Int8
            | TypeId::Float4
            | TypeId::Float8
            | TypeId::Money
            | TypeId::Money4
            | TypeId::DateTime
            | TypeId::DateTime4 => {
                info.max_length = type_id.fixed_size().unwrap_or(0) as u32;
            }
            TypeId::Date => info.max_length = 3,
            TypeId::Guid
            | TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN
            | TypeId::Char
            | TypeId::VarChar
            | TypeId::Binary
            | TypeId::VarBinary => {
                info.max_length = u32::from(read_u8(src)?);
            }
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                need(src, 3)?;
                info.max_length = u32::from(src.get_u8());
                info.precision = src.get_u8();
                info.scale = src.get_u8();
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                info.scale = read_u8(src)?;
                if info.scale > 7 {
                    return Err(ProtocolError::InvalidField {
                        field: "scale",
                        reason: format!("{} exceeds 7", info.scale),
                    });
                }
            }
            TypeId::BigVarChar | TypeId::BigChar | TypeId::NChar | TypeId::NVarChar => {
                info.max_length = u32::from(read_u16_le(src)?);
                info.collation = Some(Collation::decode(src)?);
            }
            TypeId::BigVarBinary | TypeId::BigBinary => {
                info.max_length = u32::from(read_u16_le(src)?);
            }
            TypeId::Text | TypeId::NText => {
                info.max_length = read_u32_le(src)?;
                info.collation = Some(Collation::decode(src)?);
            }
            TypeId::Image | TypeId::Variant => {
                info.max_length = read_u32_le(src)?;
            }
            TypeId::Xml => {
                if read_u8(src)? != 0 {
                    info.xml_schema = Some(XmlSchemaRef {
                        db_name: crate::codec::read_b_varchar(src)?,
                        owner: crate::codec::read_b_varchar(src)?,
                        collection: read_us_varchar(src)?,
                    });
                }
                info.max_length = u32::MAX;
            }
            TypeId::Udt => {
                info.max_length = u32::from(read_u16_le(src)?);
                // db name, schema, type name: b_varchar; assembly name: us_varchar
                for _ in 0..3 {
                    let len = read_u8(src)? as usize;
                    skip(src, len * 2)?;
                }
                let len = read_u16_le(src)? as usize;
                skip(src, len * 2)?;
            }
        }

        Ok(info)
    }

    /// Encode TYPE_INFO, as used for RPC parameters.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.type_id as u8);
        match self.type_id {
            TypeId::Guid
            | TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN
            | TypeId::Char
            | TypeId::VarChar
            | TypeId::Binary
            | TypeId::VarBinary => dst.put_u8(self.max_length as u8),
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                dst.put_u8(self.max_length as u8);
                dst.put_u8(self.precision);
                dst.put_u8(self.scale);
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => dst.put_u8(self.scale),
            TypeId::BigVarChar | TypeId::BigChar | TypeId::NChar | TypeId::NVarChar => {
                dst.put_u16_le(self.max_length as u16);
                self.collation.unwrap_or_default().encode(dst);
            }
            TypeId::BigVarBinary | TypeId::BigBinary | TypeId::Udt => {
                dst.put_u16_le(self.max_length as u16);
            }
            TypeId::Text | TypeId::NText => {
                dst.put_u32_le(self.max_length);
                self.collation.unwrap_or_default().encode(dst);
            }
            TypeId::Image | TypeId::Variant => dst.put_u32_le(self.max_length),
            TypeId::Xml => match &self.xml_schema {
                Some(schema) => {
                    dst.put_u8(1);
                    crate::codec::write_b_varchar(dst, &schema.db_name);
                    crate::codec::write_b_varchar(dst, &schema.owner);
                    crate::codec::write_us_varchar(dst, &schema.collection);
                }
                None => dst.put_u8(0),
            },
            _ => {}
        }
    }

    /// Cut one value of this type out of a row.
    ///
    /// Returns the value bytes without any length prefix (PLP chunks
    /// concatenated), or `None` for NULL.
    pub fn read_value(&self, src: &mut Bytes) -> Result<Option<Bytes>, ProtocolError> {
        match self.framing() {
            ValueFraming::Fixed(0) => Ok(None),
            ValueFraming::Fixed(width) => read_bytes(src, width).map(Some),
            ValueFraming::ByteLen => match read_u8(src)? {
                0 => Ok(None),
                len => read_bytes(src, len as usize).map(Some),
            },
            ValueFraming::UShortLen => match read_u16_le(src)? {
                0xFFFF => Ok(None),
                len => read_bytes(src, len as usize).map(Some),
            },
            ValueFraming::LongLen => match read_u32_le(src)? {
                0 => Ok(None),
                len => read_bytes(src, len as usize).map(Some),
            },
            ValueFraming::TextPtr => {
                let ptr_len = read_u8(src)? as usize;
                if ptr_len == 0 {
                    return Ok(None);
                }
                // text pointer + 8-byte timestamp
                skip(src, ptr_len + 8)?;
                let len = read_u32_le(src)? as usize;
                read_bytes(src, len).map(Some)
            }
            ValueFraming::Plp => read_plp(src),
        }
    }

    /// [`read_value`](Self::read_value) for a token that may still be
    /// arriving: PLP progress survives in `plp` between attempts.
    pub fn read_value_resumable(
        &self,
        src: &mut Bytes,
        plp: &mut PlpResume,
    ) -> Result<Option<Bytes>, ProtocolError> {
        match self.framing() {
            ValueFraming::Plp => plp.read(src),
            _ => self.read_value(src),
        }
    }

    /// Frame one value of this type, the inverse of [`TypeInfo::read_value`].
    ///
    /// Long types are written in the RPC parameter form (`u32` length,
    /// all-ones for NULL) rather than the text-pointer form used in rows.
    pub fn write_value(&self, dst: &mut impl BufMut, value: Option<&[u8]>) {
        match (self.framing(), value) {
            (ValueFraming::Fixed(_), Some(data)) => dst.put_slice(data),
            (ValueFraming::Fixed(_), None) => {}
            (ValueFraming::ByteLen, Some(data)) => {
                dst.put_u8(data.len() as u8);
                dst.put_slice(data);
            }
            (ValueFraming::ByteLen, None) => dst.put_u8(0),
            (ValueFraming::UShortLen, Some(data)) => {
                dst.put_u16_le(data.len() as u16);
                dst.put_slice(data);
            }
            (ValueFraming::UShortLen, None) => dst.put_u16_le(0xFFFF),
            (ValueFraming::LongLen, Some(data)) => {
                dst.put_u32_le(data.len() as u32);
                dst.put_slice(data);
            }
            (ValueFraming::LongLen, None) => dst.put_u32_le(0),
            (ValueFraming::TextPtr, Some(data)) => {
                dst.put_u32_le(data.len() as u32);
                dst.put_slice(data);
            }
            (ValueFraming::TextPtr, None) => dst.put_u32_le(u32::MAX),
            (ValueFraming::Plp, value) => write_plp(dst, value),
        }
    }

    /// Type as written in an `sp_executesql` parameter declaration.
    #[must_use]
    pub fn declaration(&self) -> String {
        let sized = |name: &str, units: u32| {
            if self.max_length == MAX_LENGTH_PLP {
                format!("{name}(max)")
            } else {
                format!("{name}({})", units.max(1))
            }
        };
        match self.type_id {
            TypeId::IntN => match self.max_length {
                1 => "tinyint".into(),
                2 => "smallint".into(),
                8 => "bigint".into(),
                _ => "int".into(),
            },
            TypeId::FloatN => match self.max_length {
                4 => "real".into(),
                _ => "float".into(),
            },
            TypeId::MoneyN => match self.max_length {
                4 => "smallmoney".into(),
                _ => "money".into(),
            },
            TypeId::DateTimeN => match self.max_length {
                4 => "smalldatetime".into(),
                _ => "datetime".into(),
            },
            TypeId::Decimal | TypeId::DecimalN | TypeId::Numeric | TypeId::NumericN => {
                format!("{}({},{})", self.type_id.sql_name(), self.precision, self.scale)
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                format!("{}({})", self.type_id.sql_name(), self.scale)
            }
            TypeId::NVarChar | TypeId::NChar => sized(self.type_id.sql_name(), self.max_length / 2),
            TypeId::BigVarChar | TypeId::BigChar | TypeId::BigVarBinary | TypeId::BigBinary => {
                sized(self.type_id.sql_name(), self.max_length)
            }
            other => other.sql_name().into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_type_id_from_u8() {
        assert_eq!(TypeId::from_u8(0x38), Some(TypeId::Int4));
        assert_eq!(TypeId::from_u8(0xE7), Some(TypeId::NVarChar));
        assert_eq!(TypeId::from_u8(0x99), None);
    }

    #[test]
    fn test_framing() {
        assert_eq!(TypeInfo::new(TypeId::Int4, 4).framing(), ValueFraming::Fixed(4));
        assert_eq!(TypeInfo::new(TypeId::IntN, 4).framing(), ValueFraming::ByteLen);
        assert_eq!(TypeInfo::new(TypeId::NVarChar, 100).framing(), ValueFraming::UShortLen);
        assert_eq!(
            TypeInfo::new(TypeId::NVarChar, MAX_LENGTH_PLP).framing(),
            ValueFraming::Plp
        );
        assert_eq!(TypeInfo::new(TypeId::Xml, 0).framing(), ValueFraming::Plp);
        assert_eq!(TypeInfo::new(TypeId::Image, 0).framing(), ValueFraming::TextPtr);
    }

    #[test]
    fn test_decode_nvarchar_info() {
        let mut src: &[u8] = &[0xE7, 0x64, 0x00, 0x09, 0x04, 0xD0, 0x00, 0x34];
        let info = TypeInfo::decode(&mut src).unwrap();
        assert_eq!(info.type_id, TypeId::NVarChar);
        assert_eq!(info.max_length, 100);
        assert_eq!(info.collation, Some(Collation::default()));
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_decimal_info() {
        let mut src: &[u8] = &[0x6A, 0x11, 38, 4];
        let info = TypeInfo::decode(&mut src).unwrap();
        assert_eq!((info.max_length, info.precision, info.scale), (17, 38, 4));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let mut src: &[u8] = &[0x99];
        assert_eq!(TypeInfo::decode(&mut src), Err(ProtocolError::InvalidDataType(0x99)));
    }

    #[test]
    fn test_decode_rejects_large_time_scale() {
        let mut src: &[u8] = &[0x29, 9];
        assert!(matches!(
            TypeInfo::decode(&mut src),
            Err(ProtocolError::InvalidField { field: "scale", .. })
        ));
    }

    #[test]
    fn test_encode_matches_decode() {
        let info = TypeInfo::new(TypeId::NumericN, 17).with_precision_scale(18, 2);
        let mut buf = BytesMut::new();
        info.encode(&mut buf);
        assert_eq!(&buf[..], &[0x6C, 17, 18, 2]);
    }

    #[test]
    fn test_read_values() {
        let int_n = TypeInfo::new(TypeId::IntN, 4);
        let mut src = Bytes::from_static(&[0x04, 1, 0, 0, 0, 0x00, 0xFF]);
        assert_eq!(int_n.read_value(&mut src).unwrap().unwrap().as_ref(), &[1, 0, 0, 0]);
        assert_eq!(int_n.read_value(&mut src).unwrap(), None);
        assert_eq!(src.as_ref(), &[0xFF]);

        let nvarchar = TypeInfo::new(TypeId::NVarChar, 20);
        let mut src = Bytes::from_static(&[0xFF, 0xFF, 0x02, 0x00, b'a', 0x00]);
        assert_eq!(nvarchar.read_value(&mut src).unwrap(), None);
        assert_eq!(nvarchar.read_value(&mut src).unwrap().unwrap().as_ref(), b"a\0");
    }

    #[test]
    fn test_read_text_pointer_value() {
        let text = TypeInfo::new(TypeId::Image, 0x7FFF_FFFF);
        let mut raw = BytesMut::new();
        raw.put_u8(16);
        raw.put_slice(&[0xAB; 16]);
        raw.put_slice(&[0u8; 8]);
        raw.put_u32_le(3);
        raw.put_slice(b"xyz");
        raw.put_u8(0);
        let mut src = raw.freeze();
        assert_eq!(text.read_value(&mut src).unwrap().unwrap().as_ref(), b"xyz");
        assert_eq!(text.read_value(&mut src).unwrap(), None);
    }

    #[test]
    fn test_declarations() {
        assert_eq!(TypeInfo::new(TypeId::IntN, 8).declaration(), "bigint");
        assert_eq!(TypeInfo::new(TypeId::NVarChar, 8000).declaration(), "nvarchar(4000)");
        assert_eq!(TypeInfo::new(TypeId::NVarChar, 2).declaration(), "nvarchar(1)");
        assert_eq!(
            TypeInfo::new(TypeId::NVarChar, MAX_LENGTH_PLP).declaration(),
            "nvarchar(max)"
        );
        assert_eq!(
            TypeInfo::new(TypeId::DecimalN, 17)
                .with_precision_scale(38, 4)
                .declaration(),
            "decimal(38,4)"
        );
        assert_eq!(TypeInfo::new(TypeId::DateTimeOffset, 10).with_scale(7).declaration(), "datetimeoffset(7)");
        assert_eq!(TypeInfo::new(TypeId::Guid, 16).declaration(), "uniqueidentifier");
    }

    #[test]
    fn test_write_value_null_markers() {
        let mut buf = BytesMut::new();
        TypeInfo::new(TypeId::IntN, 4).write_value(&mut buf, None);
        TypeInfo::new(TypeId::NVarChar, 20).write_value(&mut buf, None);
        TypeInfo::new(TypeId::BigVarBinary, MAX_LENGTH_PLP).write_value(&mut buf, None);
        assert_eq!(&buf[..3], &[0x00, 0xFF, 0xFF]);
        assert_eq!(&buf[3..], &[0xFF; 8]);
    }

    #[test]
    fn test_short_value_is_eof() {
        let int_n = TypeInfo::new(TypeId::IntN, 8);
        let mut src = Bytes::from_static(&[0x08, 1, 2]);
        assert_eq!(int_n.read_value(&mut src), Err(ProtocolError::UnexpectedEof));
    }
}
