//! Client error types.
//!
//! Lower-layer errors are classified on conversion: transport failures
//! become [`Error::Io`], malformed frames or tokens [`Error::Protocol`],
//! value failures [`Error::Encoding`] or [`Error::Conversion`].

use std::sync::Arc;

use sqlwire_codec::CodecError;
use sqlwire_protocol::{ProtocolError, ServerMessage};
use sqlwire_tls::TlsError;
use sqlwire_types::TypeError;
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Transport failure, including the server closing the socket.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Malformed packet or token.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Encryption negotiation, handshake or certificate failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Text could not be transcoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A value could not be decoded or converted.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Server returned an error.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Error state.
        state: u8,
        /// Error class/severity (0-25).
        class: u8,
        /// Error message.
        message: String,
        /// Server name where error occurred.
        server: String,
        /// Stored procedure name, empty for batches.
        procedure: String,
        /// Line number in the SQL batch or procedure.
        line: i32,
    },

    /// The server acknowledged a cancel request.
    #[error("query canceled")]
    Canceled,

    /// A previous result has not been drained.
    #[error("connection busy: previous result not drained")]
    Busy,

    /// The connection is broken and must be closed.
    #[error("connection unusable: {0}")]
    Unusable(String),

    /// Invalid configuration, detected before any network traffic.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server redirected the login to another host.
    #[error("routing required to {host}:{port}")]
    Routing {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },

    /// Too many redirects during connection.
    #[error("too many redirects (max {max})")]
    TooManyRedirects {
        /// Maximum redirects allowed.
        max: u8,
    },

    /// Connecting did not finish in time.
    #[error("connection timed out")]
    ConnectTimeout,
}

impl Error {
    /// Whether the connection must be discarded after this error.
    ///
    /// Framing position cannot be trusted after transport, protocol or TLS
    /// failures.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Protocol(_) | Self::Tls(_) | Self::Unusable(_)
        )
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server { number: n, .. } if *n == number)
    }

    /// Get the error class/severity if this is a server error.
    ///
    /// SQL Server error classes range from 0-25:
    /// - 0-10: Informational
    /// - 11-16: User errors
    /// - 17-19: Resource/hardware errors
    /// - 20-25: System errors (connection terminating)
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Alias for `class()`.
    #[must_use]
    pub fn severity(&self) -> Option<u8> {
        self.class()
    }
}

impl From<ServerMessage> for Error {
    fn from(msg: ServerMessage) -> Self {
        Self::Server {
            number: msg.number,
            state: msg.state,
            class: msg.class,
            message: msg.message,
            server: msg.server,
            procedure: msg.procedure,
            line: msg.line,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io) => Self::Io(Arc::new(io)),
            CodecError::ConnectionClosed => Self::Io(Arc::new(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            ))),
            CodecError::CancelTimeout(grace) => {
                Self::Unusable(format!("no cancel acknowledgment within {grace:?}"))
            }
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<TlsError> for Error {
    fn from(e: TlsError) -> Self {
        match e {
            TlsError::Io(io) => Self::Io(Arc::new(io)),
            other => Self::Tls(other.to_string()),
        }
    }
}

impl From<TypeError> for Error {
    fn from(e: TypeError) -> Self {
        if e.is_encoding() {
            Self::Encoding(e.to_string())
        } else {
            Self::Conversion(e.to_string())
        }
    }
}

impl From<sqlwire_auth::AuthError> for Error {
    fn from(e: sqlwire_auth::AuthError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
