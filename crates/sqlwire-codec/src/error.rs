//! Codec error types.

use sqlwire_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by the framing layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed packet or token.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A packet exceeded the accepted size.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Size of the offending packet.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer closed the connection mid-message.
    #[error("connection closed")]
    ConnectionClosed,

    /// No cancel acknowledgment arrived within the grace period.
    #[error("no attention acknowledgment within {0:?}")]
    CancelTimeout(std::time::Duration),
}

impl CodecError {
    /// Whether the transport itself failed.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}
