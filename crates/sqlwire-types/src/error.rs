//! Value codec errors.

use sqlwire_protocol::ProtocolError;
use thiserror::Error;

/// Errors from decoding a wire value or converting between SQL and Rust
/// values.
///
/// These are scoped to a single value: the surrounding token stream stays
/// positioned correctly and later values can still be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Value is NULL where a value was required.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// The SQL value cannot be read as the requested Rust type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Requested type.
        expected: &'static str,
        /// Type actually present.
        actual: String,
    },

    /// The value does not fit the target type.
    #[error("value out of range for {target}")]
    Overflow {
        /// Target type name.
        target: &'static str,
    },

    /// A fixed-width payload had the wrong size.
    #[error("invalid length for {type_name}: {actual} bytes")]
    InvalidLength {
        /// SQL type being decoded.
        type_name: &'static str,
        /// Bytes received.
        actual: usize,
    },

    /// Text could not be transcoded.
    #[error("invalid string encoding: {0}")]
    Encoding(String),

    /// Structurally valid bytes describing an impossible value.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The wire type has no decoder.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
}

impl TypeError {
    /// Whether this is a text transcoding failure rather than a value
    /// conversion failure.
    #[must_use]
    pub fn is_encoding(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }
}

impl From<ProtocolError> for TypeError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::StringEncoding(msg) => Self::Encoding(msg),
            other => Self::InvalidValue(other.to_string()),
        }
    }
}
