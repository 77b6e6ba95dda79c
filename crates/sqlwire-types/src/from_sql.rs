//! Reading Rust values out of decoded [`SqlValue`]s.

use bytes::Bytes;

use crate::error::TypeError;
use crate::guid::Uuid;
use crate::numeric::Numeric;
use crate::temporal::{Date, DateTime, DateTime2, DateTimeOffset, SmallDateTime, Time};
use crate::value::SqlValue;
use crate::xml::XmlData;

/// Types that can be read from a column value.
///
/// `sql_variant` values are unwrapped to their base type first. NULL fails
/// with [`TypeError::UnexpectedNull`] unless the target is an `Option`.
pub trait FromSql: Sized {
    /// Convert from a SQL value.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert, mapping NULL to `None`.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.unwrap_variant().is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

fn mismatch(expected: &'static str, value: &SqlValue) -> TypeError {
    if value.is_null() {
        TypeError::UnexpectedNull
    } else {
        TypeError::TypeMismatch {
            expected,
            actual: value.type_name().to_string(),
        }
    }
}

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value.unwrap_variant() {
            SqlValue::Bool(v) => Ok(*v),
            other => other
                .as_i64()
                .map(|v| v != 0)
                .ok_or_else(|| mismatch("bool", other)),
        }
    }
}

macro_rules! from_sql_int {
    ($($t:ty => $name:literal),*) => {
        $(
            impl FromSql for $t {
                fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
                    let value = value.unwrap_variant();
                    let wide = value.as_i64().ok_or_else(|| mismatch($name, value))?;
                    <$t>::try_from(wide).map_err(|_| TypeError::Overflow { target: $name })
                }
            }
        )*
    };
}

from_sql_int!(u8 => "u8", i16 => "i16", i32 => "i32", i64 => "i64", u16 => "u16", u32 => "u32", u64 => "u64");

impl FromSql for f32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value.unwrap_variant() {
            SqlValue::F32(v) => Ok(*v),
            other => Err(mismatch("f32", other)),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        let value = value.unwrap_variant();
        match value {
            SqlValue::F32(_) | SqlValue::F64(_) | SqlValue::Numeric(_) | SqlValue::Money(_) => {
                value.as_f64().ok_or_else(|| mismatch("f64", value))
            }
            other => Err(mismatch("f64", other)),
        }
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        let value = value.unwrap_variant();
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| mismatch("String", value))
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        let value = value.unwrap_variant();
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch("Vec<u8>", value))
    }
}

impl FromSql for Bytes {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value.unwrap_variant() {
            SqlValue::Binary(b) => Ok(b.clone()),
            other => Err(mismatch("Bytes", other)),
        }
    }
}

impl FromSql for Numeric {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value.unwrap_variant() {
            SqlValue::Numeric(n) | SqlValue::Money(n) => Ok(*n),
            other => other
                .as_i64()
                .map(Numeric::from)
                .ok_or_else(|| mismatch("Numeric", other)),
        }
    }
}

impl FromSql for XmlData {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value.unwrap_variant() {
            SqlValue::Xml(x) => Ok(x.clone()),
            other => Err(mismatch("XmlData", other)),
        }
    }
}

macro_rules! from_sql_copy {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl FromSql for $t {
                fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
                    match value.unwrap_variant() {
                        SqlValue::$variant(v) => Ok(*v),
                        other => Err(mismatch(stringify!($t), other)),
                    }
                }
            }
        )*
    };
}

from_sql_copy!(
    Uuid => Guid,
    Date => Date,
    Time => Time,
    DateTime2 => DateTime2,
    DateTimeOffset => DateTimeOffset,
    DateTime => DateTime,
    SmallDateTime => SmallDateTime
);

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}

#[cfg(feature = "decimal")]
impl FromSql for rust_decimal::Decimal {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Numeric::from_sql(value)?.try_into()
    }
}

#[cfg(feature = "chrono")]
mod chrono_impls {
    use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    use super::{FromSql, mismatch};
    use crate::error::TypeError;
    use crate::value::SqlValue;

    impl FromSql for NaiveDate {
        fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
            match value.unwrap_variant() {
                SqlValue::Date(d) => NaiveDate::try_from(*d),
                other => Err(mismatch("NaiveDate", other)),
            }
        }
    }

    impl FromSql for NaiveTime {
        fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
            match value.unwrap_variant() {
                SqlValue::Time(t) => NaiveTime::try_from(*t),
                other => Err(mismatch("NaiveTime", other)),
            }
        }
    }

    impl FromSql for NaiveDateTime {
        fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
            match value.unwrap_variant() {
                SqlValue::DateTime2(dt) => NaiveDateTime::try_from(*dt),
                SqlValue::DateTime(dt) => NaiveDateTime::try_from(*dt),
                SqlValue::SmallDateTime(dt) => NaiveDateTime::try_from(*dt),
                other => Err(mismatch("NaiveDateTime", other)),
            }
        }
    }

    impl FromSql for chrono::DateTime<FixedOffset> {
        fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
            match value.unwrap_variant() {
                SqlValue::DateTimeOffset(dto) => chrono::DateTime::try_from(*dto),
                other => Err(mismatch("DateTime<FixedOffset>", other)),
            }
        }
    }

    impl FromSql for chrono::DateTime<Utc> {
        fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
            match value.unwrap_variant() {
                SqlValue::DateTimeOffset(dto) => chrono::DateTime::try_from(*dto),
                other => Err(mismatch("DateTime<Utc>", other)),
            }
        }
    }
}
