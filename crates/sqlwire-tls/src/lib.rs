//! # sqlwire-tls
//!
//! The encrypted channel of a TDS session.
//!
//! Encryption is negotiated in PreLogin; the TLS handshake that follows is
//! itself carried inside PreLogin packets:
//!
//! ```text
//! TCP connect → PreLogin (cleartext) → TLS handshake (in PreLogin packets) → Login7
//! ```
//!
//! When the negotiated level covers only the login, the client drops back
//! to plaintext right after Login7 with [`MaybeTlsStream::into_plain`].
//!
//! Server certificates are validated against the Mozilla roots unless
//! `trust_server_certificate` is set, which logs a warning.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod prelogin_wrapper;
pub mod stream;

pub use config::TlsConfig;
pub use connector::TlsConnector;
pub use error::TlsError;
pub use prelogin_wrapper::TlsPreloginWrapper;
pub use stream::MaybeTlsStream;

pub use tokio_rustls::client::TlsStream;
