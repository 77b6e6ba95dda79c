//! Security contexts producing SSPI tokens for Windows logins.
//!
//! LOGIN7 carries the first token; every SSPI token the server answers with
//! is fed to [`SecurityContext::step`] and any reply is sent back in an SSPI
//! message until the context reports completion.

use std::fmt;
use std::sync::Arc;

use crate::credentials::AuthMethod;
use crate::error::AuthError;

/// One client-side authentication handshake.
pub trait SecurityContext: Send {
    /// Token placed in LOGIN7.
    fn initial_token(&mut self) -> Result<Vec<u8>, AuthError>;

    /// Consume a server token, returning the reply or `None` once the
    /// handshake is complete.
    fn step(&mut self, server_token: &[u8]) -> Result<Option<Vec<u8>>, AuthError>;
}

/// Creates a [`SecurityContext`] per connection attempt.
pub trait SecurityContextProvider: Send + Sync {
    /// Start a handshake for `method` against `host:port`.
    fn create(
        &self,
        method: &AuthMethod,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn SecurityContext>, AuthError>;
}

impl<F> SecurityContextProvider for F
where
    F: Fn(&AuthMethod, &str, u16) -> Result<Box<dyn SecurityContext>, AuthError> + Send + Sync,
{
    fn create(
        &self,
        method: &AuthMethod,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn SecurityContext>, AuthError> {
        self(method, host, port)
    }
}

/// Shared handle to a provider, as stored in connection configuration.
#[derive(Clone)]
pub struct SecurityProviderHandle(Arc<dyn SecurityContextProvider>);

impl SecurityProviderHandle {
    /// Wrap a provider.
    pub fn new(provider: impl SecurityContextProvider + 'static) -> Self {
        Self(Arc::new(provider))
    }

    /// Start a handshake.
    pub fn create(
        &self,
        method: &AuthMethod,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn SecurityContext>, AuthError> {
        tracing::debug!(method = method.method_name(), host, port, "creating security context");
        self.0.create(method, host, port)
    }
}

impl fmt::Debug for SecurityProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecurityProviderHandle(..)")
    }
}

/// The provider compiled into this build, if any.
///
/// With `integrated-auth` this is GSSAPI/SPNEGO for `WindowsIntegrated`.
#[must_use]
pub fn default_provider() -> Option<SecurityProviderHandle> {
    #[cfg(feature = "integrated-auth")]
    {
        Some(SecurityProviderHandle::new(
            crate::integrated_auth::GssapiProvider,
        ))
    }
    #[cfg(not(feature = "integrated-auth"))]
    {
        None
    }
}
