//! # sqlwire-client
//!
//! Async TDS client for SQL Server.
//!
//! The client negotiates encryption in PreLogin, upgrades the transport to
//! TLS when required, logs in with SQL or integrated credentials and then
//! runs one command at a time. Results are read lazily, one packet at a
//! time, as the caller pulls rows.
//!
//! ## Connection state
//!
//! ```text
//! Idle -> AwaitingResponse -> ProcessingTokens -> Idle
//!                  \________________/
//!                          | cancel
//!                       Draining -> Idle
//! any fatal error -> Poisoned
//! ```
//!
//! A command issued while a previous result is undrained fails with
//! [`Error::Busy`]; after a transport, protocol or TLS failure every
//! command fails with [`Error::Unusable`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlwire_client::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_ado_string(
//!         "Server=localhost;Database=test;User Id=sa;Password=Password123;TrustServerCertificate=true",
//!     )?;
//!     let mut client = Client::connect_tcp(config).await?;
//!
//!     let mut result = client
//!         .query("SELECT id, name FROM users WHERE id > @P1", &[&10i32])
//!         .await?;
//!     while let Some(row) = result.next_row().await? {
//!         let id: i32 = row.get(0)?;
//!         let name: Option<String> = row.try_get("name")?;
//!         println!("{id}: {name:?}");
//!     }
//!
//!     let done = client.execute("DELETE FROM users WHERE id > @P1", &[&100i32]).await?;
//!     println!("{} rows deleted", done.total());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod browser;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod query;
pub mod result;
pub mod row;
pub mod state;

pub use cancel::CancelHandle;
pub use client::Client;
pub use config::{Config, MAX_REDIRECTS};
pub use error::{Error, Result};
pub use query::Query;
pub use result::{ExecuteResult, OutputParam, QueryItem, QueryResult, ResultMetadata};
pub use row::{Column, Row, RowIndex};
pub use state::ProtocolState;

pub use sqlwire_auth::{AuthMethod, SecurityContext, SecurityContextProvider, SecurityProviderHandle};
pub use sqlwire_protocol::{Collation, EncryptionLevel, TdsVersion, TypeId};
pub use sqlwire_tls::TlsConfig;
pub use sqlwire_types::{
    CustomValue, Date, DateTime, DateTime2, DateTimeOffset, FromSql, Numeric, ParamEncoder,
    SmallDateTime, SqlValue, Time, ToSql, Uuid, XmlData, XmlSchema,
};

#[cfg(feature = "chrono")]
pub use chrono;
#[cfg(feature = "decimal")]
pub use rust_decimal;
#[cfg(feature = "uuid")]
pub use uuid;
