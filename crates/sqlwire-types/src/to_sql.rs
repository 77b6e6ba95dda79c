//! Converting Rust values into bindable [`SqlValue`]s.

use bytes::Bytes;

use crate::error::TypeError;
use crate::guid::Uuid;
use crate::numeric::Numeric;
use crate::temporal::{Date, DateTime, DateTime2, DateTimeOffset, SmallDateTime, Time};
use crate::value::SqlValue;
use crate::xml::XmlData;

/// Types that can be bound as query parameters.
pub trait ToSql {
    /// Convert to a SQL value.
    fn to_sql(&self) -> Result<SqlValue, TypeError>;
}

macro_rules! to_sql_into {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl ToSql for $t {
                fn to_sql(&self) -> Result<SqlValue, TypeError> {
                    Ok(SqlValue::$variant((*self).into()))
                }
            }
        )*
    };
}

to_sql_into!(
    bool => Bool,
    u8 => U8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u16 => I32,
    u32 => I64,
    f32 => F32,
    f64 => F64,
    Numeric => Numeric,
    Uuid => Guid,
    Date => Date,
    Time => Time,
    DateTime2 => DateTime2,
    DateTimeOffset => DateTimeOffset,
    DateTime => DateTime,
    SmallDateTime => SmallDateTime
);

impl ToSql for i8 {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::I16(i16::from(*self)))
    }
}

impl ToSql for u64 {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        i64::try_from(*self)
            .map(SqlValue::I64)
            .map_err(|_| TypeError::Overflow { target: "bigint" })
    }
}

impl ToSql for str {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::String(self.to_owned()))
    }
}

impl ToSql for String {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::String(self.clone()))
    }
}

impl ToSql for [u8] {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Binary(Bytes::copy_from_slice(self)))
    }
}

impl ToSql for Vec<u8> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Binary(Bytes::copy_from_slice(self)))
    }
}

impl ToSql for Bytes {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Binary(self.clone()))
    }
}

impl ToSql for XmlData {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Xml(self.clone()))
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(self.clone())
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        match self {
            Some(v) => v.to_sql(),
            None => Ok(SqlValue::Null),
        }
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        (**self).to_sql()
    }
}

#[cfg(feature = "decimal")]
impl ToSql for rust_decimal::Decimal {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Numeric(Numeric::from(*self)))
    }
}

#[cfg(feature = "chrono")]
mod chrono_impls {
    use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    use super::ToSql;
    use crate::error::TypeError;
    use crate::temporal::{Date, DateTime2, DateTimeOffset, Time};
    use crate::value::SqlValue;

    impl ToSql for NaiveDate {
        fn to_sql(&self) -> Result<SqlValue, TypeError> {
            Date::try_from(*self).map(SqlValue::Date)
        }
    }

    impl ToSql for NaiveTime {
        fn to_sql(&self) -> Result<SqlValue, TypeError> {
            Ok(SqlValue::Time(Time::from(*self)))
        }
    }

    impl ToSql for NaiveDateTime {
        fn to_sql(&self) -> Result<SqlValue, TypeError> {
            DateTime2::try_from(*self).map(SqlValue::DateTime2)
        }
    }

    impl ToSql for chrono::DateTime<FixedOffset> {
        fn to_sql(&self) -> Result<SqlValue, TypeError> {
            DateTimeOffset::try_from(*self).map(SqlValue::DateTimeOffset)
        }
    }

    impl ToSql for chrono::DateTime<Utc> {
        fn to_sql(&self) -> Result<SqlValue, TypeError> {
            DateTimeOffset::try_from(*self).map(SqlValue::DateTimeOffset)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(true.to_sql().unwrap(), SqlValue::Bool(true));
        assert_eq!(7u16.to_sql().unwrap(), SqlValue::I32(7));
        assert_eq!(7u32.to_sql().unwrap(), SqlValue::I64(7));
        assert_eq!((-1i8).to_sql().unwrap(), SqlValue::I16(-1));
        assert_eq!(
            u64::MAX.to_sql(),
            Err(TypeError::Overflow { target: "bigint" })
        );
    }

    #[test]
    fn test_references_and_options() {
        let s = "text";
        assert_eq!(s.to_sql().unwrap(), SqlValue::String("text".into()));
        assert_eq!(None::<i32>.to_sql().unwrap(), SqlValue::Null);
        assert_eq!(Some(5i64).to_sql().unwrap(), SqlValue::I64(5));
        assert_eq!(
            (&b"ab"[..]).to_sql().unwrap(),
            SqlValue::Binary(Bytes::from_static(b"ab"))
        );
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn test_chrono_binds_as_datetime2() {
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(12, 0, 0, 5)
            .unwrap();
        let SqlValue::DateTime2(value) = dt.to_sql().unwrap() else {
            panic!("expected datetime2");
        };
        assert_eq!(value.time().scale(), 7);
        assert_eq!(value.time().increments(), 12 * 3600 * 10_000_000 + 50);
    }
}
