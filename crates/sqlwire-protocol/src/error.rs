//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS wire structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A packet or structure was shorter than its fixed layout requires.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The buffer ended in the middle of a token or value.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Unknown packet type byte.
    #[error("invalid packet type: {0:#04x}")]
    InvalidPacketType(u8),

    /// Status byte carried bits outside the known set.
    #[error("invalid packet status: {0:#04x}")]
    InvalidPacketStatus(u8),

    /// Header length outside `[8, max]`.
    #[error("invalid packet length {length} (allowed {min}..={max})")]
    InvalidPacketLength {
        /// Length from the header.
        length: usize,
        /// Smallest allowed length.
        min: usize,
        /// Largest allowed length.
        max: usize,
    },

    /// Unknown encryption level byte in a prelogin message.
    #[error("invalid encryption level: {0:#04x}")]
    InvalidEncryptionLevel(u8),

    /// Token tag not present in the decoding table.
    #[error("invalid token type: {0:#04x}")]
    InvalidTokenType(u8),

    /// Unknown column data type.
    #[error("invalid data type: {0:#04x}")]
    InvalidDataType(u8),

    /// A row token arrived before any column metadata.
    #[error("row received without column metadata")]
    MissingMetadata,

    /// A field on the wire could not be decoded as text.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// A field value violates its documented constraints.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A PLP value's chunks do not add up to its announced length.
    #[error("plp value announced {announced} bytes but carried {received}")]
    PlpLengthMismatch {
        /// Total from the value header.
        announced: u64,
        /// Sum of the chunk lengths.
        received: usize,
    },
}

impl ProtocolError {
    /// True when the error only means the buffer ends early.
    ///
    /// A streaming reader that has not yet seen end-of-message can fetch
    /// another packet and retry instead of failing.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::UnexpectedEof | Self::IncompletePacket { .. })
    }

    /// True when only one value is bad and the stream is still positioned
    /// on the field after it.
    #[must_use]
    pub fn is_value_scoped(&self) -> bool {
        matches!(self, Self::PlpLengthMismatch { .. })
    }
}
