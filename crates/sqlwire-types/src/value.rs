//! SQL value representation.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::encode::ParamEncoder;
use crate::guid::Uuid;
use crate::numeric::Numeric;
use crate::temporal::{Date, DateTime, DateTime2, DateTimeOffset, SmallDateTime, Time};
use crate::xml::XmlData;

/// A decoded column value or a parameter to bind.
///
/// Every built-in wire type has its own variant. [`SqlValue::Custom`] is the
/// one open extension point: it only appears on the binding side and carries
/// a caller-supplied encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL.
    Null,
    /// `bit`.
    Bool(bool),
    /// `tinyint`.
    U8(u8),
    /// `smallint`.
    I16(i16),
    /// `int`.
    I32(i32),
    /// `bigint`.
    I64(i64),
    /// `real`.
    F32(f32),
    /// `float`.
    F64(f64),
    /// `decimal` and `numeric`.
    Numeric(Numeric),
    /// `money` and `smallmoney`, always at scale 4.
    Money(Numeric),
    /// Character types.
    String(String),
    /// Binary types.
    Binary(Bytes),
    /// `uniqueidentifier`.
    Guid(Uuid),
    /// `date`.
    Date(Date),
    /// `time`.
    Time(Time),
    /// `datetime2`.
    DateTime2(DateTime2),
    /// `datetimeoffset`.
    DateTimeOffset(DateTimeOffset),
    /// `datetime`.
    DateTime(DateTime),
    /// `smalldatetime`.
    SmallDateTime(SmallDateTime),
    /// `xml`.
    Xml(XmlData),
    /// `sql_variant`, holding the value of its base type.
    Variant(Box<SqlValue>),
    /// A parameter encoded by caller code.
    Custom(CustomValue),
}

impl SqlValue {
    /// Whether the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bit",
            Self::U8(_) => "tinyint",
            Self::I16(_) => "smallint",
            Self::I32(_) => "int",
            Self::I64(_) => "bigint",
            Self::F32(_) => "real",
            Self::F64(_) => "float",
            Self::Numeric(_) => "numeric",
            Self::Money(_) => "money",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::Guid(_) => "uniqueidentifier",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime2(_) => "datetime2",
            Self::DateTimeOffset(_) => "datetimeoffset",
            Self::DateTime(_) => "datetime",
            Self::SmallDateTime(_) => "smalldatetime",
            Self::Xml(_) => "xml",
            Self::Variant(_) => "sql_variant",
            Self::Custom(_) => "custom",
        }
    }

    /// The value with any `sql_variant` wrapping removed.
    #[must_use]
    pub fn unwrap_variant(&self) -> &SqlValue {
        match self {
            Self::Variant(inner) => inner.unwrap_variant(),
            other => other,
        }
    }

    /// Borrow character data.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self.unwrap_variant() {
            Self::String(s) => Some(s),
            Self::Xml(x) => Some(x.as_str()),
            _ => None,
        }
    }

    /// Borrow binary data.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.unwrap_variant() {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Widen any integer variant.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self.unwrap_variant() {
            Self::U8(v) => Some(i64::from(*v)),
            Self::I16(v) => Some(i64::from(*v)),
            Self::I32(v) => Some(i64::from(*v)),
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Any numeric variant as a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self.unwrap_variant() {
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            Self::Numeric(n) | Self::Money(n) => Some(f64::from(*n)),
            other => other.as_i64().map(|v| v as f64),
        }
    }
}

/// A caller-supplied parameter encoder wrapped for [`SqlValue::Custom`].
///
/// Two custom values are equal only if they share the same encoder.
#[derive(Clone)]
pub struct CustomValue(Arc<dyn ParamEncoder>);

impl CustomValue {
    /// Wrap an encoder.
    pub fn new(encoder: impl ParamEncoder + 'static) -> Self {
        Self(Arc::new(encoder))
    }

    /// The wrapped encoder.
    #[must_use]
    pub fn encoder(&self) -> &dyn ParamEncoder {
        self.0.as_ref()
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomValue").field(&self.0.type_name()).finish()
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
