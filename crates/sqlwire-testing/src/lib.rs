//! # sqlwire-testing
//!
//! Test infrastructure for the sqlwire client.
//!
//! The centerpiece is an in-process mock TDS server that runs the full
//! connection lifecycle: PRELOGIN, optional TLS, LOGIN7 (SQL or SSPI),
//! routing, and canned responses to batches and RPCs. Everything it
//! receives lands in a [`RequestLog`] for assertions.
//!
//! ## Features
//!
//! - Mock TDS server over TCP or in-memory duplex streams
//! - Self-signed TLS for every encryption level
//! - A token writer for building server responses by hand
//! - Decoders for LOGIN7, SQL batch and RPC messages
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlwire_testing::{MockColumn, MockResponse, MockTdsServer};
//! use sqlwire_types::SqlValue;
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockTdsServer::builder()
//!         .with_response(
//!             "SELECT * FROM users WHERE id = 1",
//!             MockResponse::rows(
//!                 vec![MockColumn::int("id"), MockColumn::nvarchar("name", 50)],
//!                 vec![vec![SqlValue::I32(1), SqlValue::String("Alice".into())]],
//!             ),
//!         )
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let stream = server.connect_duplex();
//!     // hand `stream` to the client...
//!     assert_eq!(server.log().statements().len(), 0);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;
pub mod requests;
pub mod tls;
pub mod tokens;

pub use mock_server::{
    MockResponse, MockServerBuilder, MockServerConfig, MockServerError, MockTdsServer,
};
pub use requests::{FrameInfo, LoginRecord, Request, RequestLog};
pub use tls::MockTlsAcceptor;
pub use tokens::{MockColumn, TokenWriter};
