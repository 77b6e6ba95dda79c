//! TLS error types.

use sqlwire_protocol::EncryptionLevel;
use thiserror::Error;

/// Errors raised while negotiating or running the encrypted channel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TlsError {
    /// Client and server encryption settings cannot be reconciled.
    #[error("encryption mismatch: client {client:?}, server {server:?}")]
    EncryptionMismatch {
        /// Level requested by the client.
        client: EncryptionLevel,
        /// Level reported by the server.
        server: EncryptionLevel,
    },

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The host name cannot be used for SNI or certificate validation.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// A configured root certificate was rejected.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// The transport cannot be taken back out of the TLS layer.
    #[error("transport is not encrypted")]
    NotEncrypted,

    /// IO error during TLS operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Rustls error.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}
