//! Encoding [`SqlValue`]s as RPC parameters.
//!
//! Each value maps to a TYPE_INFO to declare and the unframed value bytes;
//! the protocol layer adds the framing for that TYPE_INFO.

use bytes::{BufMut, Bytes, BytesMut};
use sqlwire_protocol::{Collation, MAX_LENGTH_PLP, RpcParam, TypeId, TypeInfo};

use crate::error::TypeError;
use crate::guid::encode_guid;
use crate::numeric::{MAX_PRECISION, NUMERIC_WIRE_LEN, Numeric};
use crate::temporal::{Date, DateTime, SmallDateTime};
use crate::value::SqlValue;

/// Largest non-PLP `nvarchar`/`varbinary` payload in bytes.
const MAX_INLINE_LEN: usize = 8000;

/// A value ready to bind: declared type plus unframed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamData {
    /// Declared type.
    pub type_info: TypeInfo,
    /// Value bytes, `None` for NULL.
    pub value: Option<Bytes>,
}

impl ParamData {
    /// A parameter of the given type.
    #[must_use]
    pub fn new(type_info: TypeInfo, value: Option<Bytes>) -> Self {
        Self { type_info, value }
    }

    /// Type as declared in `sp_executesql`'s `@params`.
    #[must_use]
    pub fn declaration(&self) -> String {
        self.type_info.declaration()
    }

    /// Turn into a positional RPC parameter.
    #[must_use]
    pub fn into_rpc_param(self, name: impl Into<String>) -> RpcParam {
        RpcParam::new(name, self.type_info, self.value)
    }
}

/// Encoder for parameter types outside the built-in set.
///
/// Wrap an implementation in [`crate::CustomValue`] and bind it as
/// [`SqlValue::Custom`].
pub trait ParamEncoder: Send + Sync {
    /// Produce the declared type and bytes.
    fn encode(&self) -> Result<ParamData, TypeError>;

    /// Name used in debug output.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

fn bytes_of(len: usize, write: impl FnOnce(&mut BytesMut)) -> Option<Bytes> {
    let mut buf = BytesMut::with_capacity(len);
    write(&mut buf);
    Some(buf.freeze())
}

fn variable_len(len: usize, min: usize) -> u32 {
    if len > MAX_INLINE_LEN {
        MAX_LENGTH_PLP
    } else {
        len.max(min) as u32
    }
}

/// `nvarchar(n)` or `nvarchar(max)` for `text`.
#[must_use]
pub fn nvarchar_param(text: &str) -> ParamData {
    let mut buf = BytesMut::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        buf.put_u16_le(unit);
    }
    let type_info = TypeInfo::new(TypeId::NVarChar, variable_len(buf.len(), 2))
        .with_collation(Collation::default());
    ParamData::new(type_info, Some(buf.freeze()))
}

impl SqlValue {
    /// The declared type and bytes used to bind this value.
    ///
    /// An untyped NULL binds as `nvarchar(1)`.
    pub fn to_param(&self) -> Result<ParamData, TypeError> {
        Ok(match self {
            SqlValue::Null => ParamData::new(
                TypeInfo::new(TypeId::NVarChar, 2).with_collation(Collation::default()),
                None,
            ),
            SqlValue::Bool(v) => ParamData::new(
                TypeInfo::new(TypeId::BitN, 1),
                Some(Bytes::copy_from_slice(&[u8::from(*v)])),
            ),
            SqlValue::U8(v) => ParamData::new(
                TypeInfo::new(TypeId::IntN, 1),
                Some(Bytes::copy_from_slice(&[*v])),
            ),
            SqlValue::I16(v) => ParamData::new(
                TypeInfo::new(TypeId::IntN, 2),
                Some(Bytes::copy_from_slice(&v.to_le_bytes())),
            ),
            SqlValue::I32(v) => ParamData::new(
                TypeInfo::new(TypeId::IntN, 4),
                Some(Bytes::copy_from_slice(&v.to_le_bytes())),
            ),
            SqlValue::I64(v) => ParamData::new(
                TypeInfo::new(TypeId::IntN, 8),
                Some(Bytes::copy_from_slice(&v.to_le_bytes())),
            ),
            SqlValue::F32(v) => ParamData::new(
                TypeInfo::new(TypeId::FloatN, 4),
                Some(Bytes::copy_from_slice(&v.to_le_bytes())),
            ),
            SqlValue::F64(v) => ParamData::new(
                TypeInfo::new(TypeId::FloatN, 8),
                Some(Bytes::copy_from_slice(&v.to_le_bytes())),
            ),
            SqlValue::Numeric(n) => ParamData::new(
                TypeInfo::new(TypeId::DecimalN, NUMERIC_WIRE_LEN as u32)
                    .with_precision_scale(MAX_PRECISION, n.scale()),
                bytes_of(NUMERIC_WIRE_LEN, |buf| n.encode(buf)),
            ),
            SqlValue::Money(n) => {
                let value = i64::try_from(n.rescale(4)?.value())
                    .map_err(|_| TypeError::Overflow { target: "money" })?;
                ParamData::new(
                    TypeInfo::new(TypeId::MoneyN, 8),
                    bytes_of(8, |buf| {
                        buf.put_i32_le((value >> 32) as i32);
                        buf.put_u32_le(value as u32);
                    }),
                )
            }
            SqlValue::String(s) => nvarchar_param(s),
            SqlValue::Binary(b) => ParamData::new(
                TypeInfo::new(TypeId::BigVarBinary, variable_len(b.len(), 1)),
                Some(b.clone()),
            ),
            SqlValue::Guid(id) => ParamData::new(
                TypeInfo::new(TypeId::Guid, 16),
                Some(Bytes::copy_from_slice(&encode_guid(id))),
            ),
            SqlValue::Date(d) => ParamData::new(
                TypeInfo::new(TypeId::Date, Date::WIRE_LEN as u32),
                bytes_of(Date::WIRE_LEN, |buf| d.encode(buf)),
            ),
            SqlValue::Time(t) => ParamData::new(
                TypeInfo::new(TypeId::Time, t.wire_len() as u32).with_scale(t.scale()),
                bytes_of(t.wire_len(), |buf| t.encode(buf)),
            ),
            SqlValue::DateTime2(dt) => ParamData::new(
                TypeInfo::new(TypeId::DateTime2, dt.wire_len() as u32)
                    .with_scale(dt.time().scale()),
                bytes_of(dt.wire_len(), |buf| dt.encode(buf)),
            ),
            SqlValue::DateTimeOffset(dto) => ParamData::new(
                TypeInfo::new(TypeId::DateTimeOffset, dto.wire_len() as u32)
                    .with_scale(dto.datetime2().time().scale()),
                bytes_of(dto.wire_len(), |buf| dto.encode(buf)),
            ),
            SqlValue::DateTime(dt) => ParamData::new(
                TypeInfo::new(TypeId::DateTimeN, DateTime::WIRE_LEN as u32),
                bytes_of(DateTime::WIRE_LEN, |buf| dt.encode(buf)),
            ),
            SqlValue::SmallDateTime(dt) => ParamData::new(
                TypeInfo::new(TypeId::DateTimeN, SmallDateTime::WIRE_LEN as u32),
                bytes_of(SmallDateTime::WIRE_LEN, |buf| dt.encode(buf)),
            ),
            SqlValue::Xml(xml) => {
                let text = nvarchar_param(xml.as_str());
                ParamData::new(TypeInfo::new(TypeId::Xml, MAX_LENGTH_PLP), text.value)
            }
            SqlValue::Variant(inner) => inner.to_param()?,
            SqlValue::Custom(custom) => custom.encoder().encode()?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decode::decode_value;
    use crate::guid::Uuid;
    use crate::temporal::{DateTime2, DateTimeOffset, Time};
    use crate::value::CustomValue;
    use crate::xml::XmlData;

    fn declared(value: SqlValue) -> String {
        value.to_param().unwrap().declaration()
    }

    #[test]
    fn test_declarations() {
        assert_eq!(declared(SqlValue::Null), "nvarchar(1)");
        assert_eq!(declared(SqlValue::Bool(true)), "bit");
        assert_eq!(declared(SqlValue::U8(1)), "tinyint");
        assert_eq!(declared(SqlValue::I16(1)), "smallint");
        assert_eq!(declared(SqlValue::I32(1)), "int");
        assert_eq!(declared(SqlValue::I64(1)), "bigint");
        assert_eq!(declared(SqlValue::F32(1.0)), "real");
        assert_eq!(declared(SqlValue::F64(1.0)), "float");
        assert_eq!(
            declared(SqlValue::Numeric(Numeric::new_with_scale(1, 3))),
            "decimal(38,3)"
        );
        assert_eq!(declared(SqlValue::String("abc".into())), "nvarchar(3)");
        assert_eq!(declared(SqlValue::String("x".repeat(4001))), "nvarchar(max)");
        assert_eq!(declared(SqlValue::Binary(Bytes::new())), "varbinary(1)");
        assert_eq!(
            declared(SqlValue::Binary(Bytes::from(vec![0u8; 9000]))),
            "varbinary(max)"
        );
        assert_eq!(declared(SqlValue::Guid(Uuid::nil())), "uniqueidentifier");
        assert_eq!(declared(SqlValue::Date(Date::new(1).unwrap())), "date");
        assert_eq!(declared(SqlValue::Time(Time::new(1, 3).unwrap())), "time(3)");
        assert_eq!(declared(SqlValue::DateTime(DateTime::new(0, 0).unwrap())), "datetime");
        assert_eq!(
            declared(SqlValue::SmallDateTime(SmallDateTime::new(0, 0).unwrap())),
            "smalldatetime"
        );
        assert_eq!(declared(SqlValue::Xml(XmlData::new("<a/>"))), "xml");
        assert_eq!(declared(SqlValue::Money(Numeric::new_with_scale(1, 2))), "money");
    }

    #[test]
    fn test_values_decode_back() {
        let dto = DateTimeOffset::new(
            DateTime2::new(Date::new(738_000).unwrap(), Time::new(12_345, 5).unwrap()),
            120,
        )
        .unwrap();
        let values = [
            SqlValue::I32(-9),
            SqlValue::Numeric(Numeric::new_with_scale(-123_456_789, 4)),
            SqlValue::Money(Numeric::new_with_scale(-15_000, 4)),
            SqlValue::String("snowman ☃".into()),
            SqlValue::DateTimeOffset(dto),
            SqlValue::Guid(Uuid::from_u128(0x0011_2233_4455_6677_8899_AABB_CCDD_EEFF)),
        ];
        for value in values {
            let param = value.to_param().unwrap();
            let decoded = decode_value(&param.type_info, param.value.as_ref()).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_money_rescales_and_overflows() {
        let param = SqlValue::Money(Numeric::new_with_scale(15, 1)).to_param().unwrap();
        let decoded = decode_value(&param.type_info, param.value.as_ref()).unwrap();
        assert_eq!(decoded, SqlValue::Money(Numeric::new_with_scale(15_000, 4)));

        let huge = SqlValue::Money(Numeric::new_with_scale(i128::from(i64::MAX) * 10, 4));
        assert_eq!(
            huge.to_param(),
            Err(TypeError::Overflow { target: "money" })
        );
    }

    #[derive(Debug)]
    struct Point(i32, i32);

    impl ParamEncoder for Point {
        fn encode(&self) -> Result<ParamData, TypeError> {
            Ok(nvarchar_param(&format!("POINT({} {})", self.0, self.1)))
        }
    }

    #[test]
    fn test_custom_encoder() {
        let value = SqlValue::Custom(CustomValue::new(Point(1, 2)));
        let param = value.to_param().unwrap();
        assert_eq!(param.declaration(), "nvarchar(10)");
        let rpc = param.into_rpc_param("@P1");
        assert_eq!(rpc.name, "@P1");
        assert!(format!("{value:?}").contains("Point"));
    }

    #[test]
    fn test_null_has_no_bytes() {
        assert_eq!(SqlValue::Null.to_param().unwrap().value, None);
    }
}
