//! # sqlwire-types
//!
//! The value codec between SQL Server wire formats and Rust.
//!
//! Decoding takes the raw bytes the token decoder cut out of a row plus the
//! column's TYPE_INFO and produces a [`SqlValue`]. Encoding goes the other
//! way for parameters: [`SqlValue::to_param`] yields the declared type and
//! bytes for an RPC parameter.
//!
//! ## Features
//!
//! - `chrono` (default): conversions between the temporal wire types and chrono
//! - `decimal` (default): conversions to and from `rust_decimal::Decimal`
//! - `encoding` (default): collation-aware decoding of `char`/`varchar`
//!
//! ## Type Mappings
//!
//! | SQL Server Type | [`SqlValue`] | Rust Type |
//! |-----------------|--------------|-----------|
//! | `bit` | `Bool` | `bool` |
//! | `tinyint` | `U8` | `u8` |
//! | `smallint` | `I16` | `i16` |
//! | `int` | `I32` | `i32` |
//! | `bigint` | `I64` | `i64` |
//! | `real` | `F32` | `f32` |
//! | `float` | `F64` | `f64` |
//! | `decimal`/`numeric` | `Numeric` | [`Numeric`], `rust_decimal::Decimal` |
//! | `money`/`smallmoney` | `Money` | [`Numeric`] |
//! | character types | `String` | `String` |
//! | binary types | `Binary` | `Vec<u8>`, `Bytes` |
//! | `uniqueidentifier` | `Guid` | [`Uuid`] (`uuid::Uuid`) |
//! | `date` | `Date` | [`Date`], `chrono::NaiveDate` |
//! | `time` | `Time` | [`Time`], `chrono::NaiveTime` |
//! | `datetime2` | `DateTime2` | [`DateTime2`], `chrono::NaiveDateTime` |
//! | `datetimeoffset` | `DateTimeOffset` | [`DateTimeOffset`], `chrono::DateTime<FixedOffset>` |
//! | `datetime` | `DateTime` | [`DateTime`], `chrono::NaiveDateTime` |
//! | `smalldatetime` | `SmallDateTime` | [`SmallDateTime`], `chrono::NaiveDateTime` |
//! | `xml` | `Xml` | [`XmlData`] |
//! | `sql_variant` | `Variant` | any of the above |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod decode;
pub mod encode;
pub mod error;
pub mod from_sql;
pub mod guid;
pub mod numeric;
pub mod temporal;
pub mod to_sql;
pub mod value;
pub mod xml;

pub use decode::{decode_utf16_string, decode_value};
pub use encode::{ParamData, ParamEncoder, nvarchar_param};
pub use error::TypeError;
pub use from_sql::FromSql;
pub use guid::{Uuid, Variant};
pub use numeric::Numeric;
pub use temporal::{Date, DateTime, DateTime2, DateTimeOffset, SmallDateTime, Time};
pub use to_sql::ToSql;
pub use value::{CustomValue, SqlValue};
pub use xml::{XmlData, XmlSchema};

pub use sqlwire_protocol::plp::{PLP_NULL, PLP_UNKNOWN_LEN, read_plp, write_plp};
