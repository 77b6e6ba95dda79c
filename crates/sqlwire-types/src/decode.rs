//! Decoding raw column bytes into [`SqlValue`]s.
//!
//! The token decoder has already cut each value out of its row using the
//! column's framing, so every function here sees exactly one value's bytes
//! with length prefixes removed and PLP chunks joined. NULL arrives as
//! `None`.

use bytes::Bytes;
use sqlwire_protocol::{Collation, TypeId, TypeInfo};

use crate::error::TypeError;
use crate::guid::decode_guid;
use crate::numeric::Numeric;
use crate::temporal::{Date, DateTime, DateTime2, DateTimeOffset, SmallDateTime, Time};
use crate::value::SqlValue;
use crate::xml::{XmlData, XmlSchema};

/// Decode one column value according to its TYPE_INFO.
pub fn decode_value(info: &TypeInfo, raw: Option<&Bytes>) -> Result<SqlValue, TypeError> {
    let Some(raw) = raw else {
        return Ok(SqlValue::Null);
    };
    let bytes = raw.as_ref();

    Ok(match info.type_id {
        TypeId::Null => SqlValue::Null,
        TypeId::Int1 => SqlValue::U8(fixed::<1>("tinyint", bytes)?[0]),
        TypeId::Bit | TypeId::BitN => SqlValue::Bool(fixed::<1>("bit", bytes)?[0] != 0),
        TypeId::Int2 => SqlValue::I16(i16::from_le_bytes(fixed("smallint", bytes)?)),
        TypeId::Int4 => SqlValue::I32(i32::from_le_bytes(fixed("int", bytes)?)),
        TypeId::Int8 => SqlValue::I64(i64::from_le_bytes(fixed("bigint", bytes)?)),
        TypeId::IntN => match bytes.len() {
            1 => SqlValue::U8(bytes[0]),
            2 => SqlValue::I16(i16::from_le_bytes(fixed("smallint", bytes)?)),
            4 => SqlValue::I32(i32::from_le_bytes(fixed("int", bytes)?)),
            8 => SqlValue::I64(i64::from_le_bytes(fixed("bigint", bytes)?)),
            actual => return Err(invalid_length("intn", actual)),
        },
        TypeId::Float4 => SqlValue::F32(f32::from_le_bytes(fixed("real", bytes)?)),
        TypeId::Float8 => SqlValue::F64(f64::from_le_bytes(fixed("float", bytes)?)),
        TypeId::FloatN => match bytes.len() {
            4 => SqlValue::F32(f32::from_le_bytes(fixed("real", bytes)?)),
            8 => SqlValue::F64(f64::from_le_bytes(fixed("float", bytes)?)),
            actual => return Err(invalid_length("floatn", actual)),
        },
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => SqlValue::Money(decode_money(bytes)?),
        TypeId::DateTime => SqlValue::DateTime(DateTime::decode(bytes)?),
        TypeId::DateTime4 => SqlValue::SmallDateTime(SmallDateTime::decode(bytes)?),
        TypeId::DateTimeN => match bytes.len() {
            DateTime::WIRE_LEN => SqlValue::DateTime(DateTime::decode(bytes)?),
            SmallDateTime::WIRE_LEN => SqlValue::SmallDateTime(SmallDateTime::decode(bytes)?),
            actual => return Err(invalid_length("datetimen", actual)),
        },
        TypeId::Guid => SqlValue::Guid(decode_guid(bytes)?),
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            SqlValue::Numeric(Numeric::decode(bytes, info.scale)?)
        }
        TypeId::Date => SqlValue::Date(Date::decode(bytes)?),
        TypeId::Time => SqlValue::Time(Time::decode(bytes, info.scale)?),
        TypeId::DateTime2 => SqlValue::DateTime2(DateTime2::decode(bytes, info.scale)?),
        TypeId::DateTimeOffset => {
            SqlValue::DateTimeOffset(DateTimeOffset::decode(bytes, info.scale)?)
        }
        TypeId::NChar | TypeId::NVarChar | TypeId::NText => {
            SqlValue::String(decode_utf16_string(bytes)?)
        }
        TypeId::BigVarChar | TypeId::BigChar | TypeId::VarChar | TypeId::Char | TypeId::Text => {
            let collation = info.collation.unwrap_or_default();
            SqlValue::String(collation.decode_str(bytes)?)
        }
        TypeId::BigVarBinary
        | TypeId::BigBinary
        | TypeId::VarBinary
        | TypeId::Binary
        | TypeId::Image
        | TypeId::Udt => SqlValue::Binary(raw.clone()),
        TypeId::Xml => {
            let text = decode_utf16_string(bytes)?;
            let text = text.strip_prefix('\u{FEFF}').map(str::to_owned).unwrap_or(text);
            let mut xml = XmlData::new(text);
            if let Some(schema) = &info.xml_schema {
                xml = xml.with_schema(XmlSchema::from(schema));
            }
            SqlValue::Xml(xml)
        }
        TypeId::Variant => decode_variant(raw)?,
    })
}

/// Decode UTF-16LE text.
pub fn decode_utf16_string(bytes: &[u8]) -> Result<String, TypeError> {
    if bytes.len() % 2 != 0 {
        return Err(TypeError::Encoding(format!(
            "odd UTF-16 byte length {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| TypeError::Encoding(e.to_string()))
}

fn invalid_length(type_name: &'static str, actual: usize) -> TypeError {
    TypeError::InvalidLength { type_name, actual }
}

fn fixed<const N: usize>(type_name: &'static str, bytes: &[u8]) -> Result<[u8; N], TypeError> {
    bytes
        .try_into()
        .map_err(|_| invalid_length(type_name, bytes.len()))
}

/// `money` is the high then low 32 bits of an i64; `smallmoney` an i32.
/// Both count ten-thousandths.
fn decode_money(bytes: &[u8]) -> Result<Numeric, TypeError> {
    let value = match bytes.len() {
        8 => {
            let high = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let low = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            (i64::from(high) << 32) | i64::from(low)
        }
        4 => i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        actual => return Err(invalid_length("money", actual)),
    };
    Ok(Numeric::new_with_scale(i128::from(value), 4))
}

/// `sql_variant`: base type, property length, type properties, then the
/// value in its base type's unframed form.
fn decode_variant(raw: &Bytes) -> Result<SqlValue, TypeError> {
    let (base, prop_len) = match raw.as_ref() {
        [base, prop_len, ..] => (*base, usize::from(*prop_len)),
        _ => return Err(invalid_length("sql_variant", raw.len())),
    };
    if raw.len() < 2 + prop_len {
        return Err(invalid_length("sql_variant", raw.len()));
    }
    let props = &raw[2..2 + prop_len];
    let data = raw.slice(2 + prop_len..);

    let type_id = TypeId::from_u8(base)
        .ok_or_else(|| TypeError::UnsupportedType(format!("sql_variant base type {base:#04x}")))?;
    let mut info = TypeInfo::new(type_id, data.len() as u32);

    match (type_id, props) {
        (TypeId::Variant, _) => {
            return Err(TypeError::InvalidValue("nested sql_variant".into()));
        }
        (TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset, [scale]) => {
            info.scale = *scale;
        }
        (
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN,
            [precision, scale],
        ) => {
            info.precision = *precision;
            info.scale = *scale;
        }
        (TypeId::BigVarBinary | TypeId::BigBinary, [_, _]) => {}
        (
            TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar,
            [c0, c1, c2, c3, c4, _, _],
        ) => {
            info.collation = Some(Collation::from_bytes([*c0, *c1, *c2, *c3, *c4]));
        }
        (_, []) if type_id.fixed_size().is_some() || type_id == TypeId::Guid => {}
        (TypeId::Date, []) => {}
        (other, props) => {
            return Err(TypeError::InvalidValue(format!(
                "sql_variant {} with {} property bytes",
                other.sql_name(),
                props.len()
            )));
        }
    }

    Ok(SqlValue::Variant(Box::new(decode_value(&info, Some(&data))?)))
}
