//! # sqlwire-auth
//!
//! Login credentials and the security contexts behind Windows logins.
//!
//! | Method | Feature Flag | Wire form |
//! |--------|--------------|-----------|
//! | SQL Server login | default | user name and scrambled password in LOGIN7 |
//! | Windows, explicit credentials | custom provider | SSPI tokens |
//! | Windows integrated | `integrated-auth` or custom provider | SSPI tokens (SPNEGO) |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod context;
pub mod credentials;
pub mod error;
#[cfg(feature = "integrated-auth")]
pub mod integrated_auth;
pub mod scramble;

pub use context::{
    SecurityContext, SecurityContextProvider, SecurityProviderHandle, default_provider,
};
pub use credentials::AuthMethod;
pub use error::AuthError;
#[cfg(feature = "integrated-auth")]
pub use integrated_auth::{GssapiContext, GssapiProvider, service_principal};
pub use scramble::scramble_password;
