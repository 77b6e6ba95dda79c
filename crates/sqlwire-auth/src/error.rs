//! Authentication error types.

use thiserror::Error;

/// Errors that can occur while preparing or exchanging login credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credentials are malformed.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The method needs a platform security provider that is not available.
    #[error("{method} authentication is not supported on this platform")]
    UnsupportedPlatform {
        /// Authentication method name.
        method: &'static str,
    },

    /// The security provider failed to produce or accept a token.
    #[error("SSPI error: {0}")]
    Sspi(String),
}
