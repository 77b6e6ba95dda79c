//! GSSAPI/SPNEGO security contexts for integrated logins.
//!
//! Requires the Kerberos development libraries and a ticket in the default
//! cache (`kinit user@REALM`). The service principal must be registered as
//! `MSSQLSvc/host:port`.

use libgssapi::{
    context::{ClientCtx, CtxFlags, SecurityContext as _},
    credential::{Cred, CredUsage},
    name::Name,
    oid::{GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE, Oid, OidSet},
};

use crate::context::{SecurityContext, SecurityContextProvider};
use crate::credentials::AuthMethod;
use crate::error::AuthError;

/// 1.3.6.1.5.5.2
const GSS_MECH_SPNEGO: Oid = Oid::from_slice(&[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02]);

fn gss_err(what: &str) -> impl FnOnce(libgssapi::error::Error) -> AuthError + '_ {
    move |e| AuthError::Sspi(format!("{what}: {e}"))
}

/// Service principal name for a server endpoint.
#[must_use]
pub fn service_principal(host: &str, port: u16) -> String {
    format!("MSSQLSvc/{host}:{port}")
}

/// A SPNEGO handshake against one server.
pub struct GssapiContext {
    spn: String,
    ctx: Option<ClientCtx>,
}

impl GssapiContext {
    /// Prepare a context for `spn`. Credentials are acquired on the first token.
    #[must_use]
    pub fn new(spn: impl Into<String>) -> Self {
        Self {
            spn: spn.into(),
            ctx: None,
        }
    }

    /// The target principal.
    #[must_use]
    pub fn spn(&self) -> &str {
        &self.spn
    }
}

impl SecurityContext for GssapiContext {
    fn initial_token(&mut self) -> Result<Vec<u8>, AuthError> {
        let name = Name::new(self.spn.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))
            .map_err(gss_err("invalid service name"))?;

        let mut mechs = OidSet::new().map_err(gss_err("mechanism set"))?;
        mechs.add(&GSS_MECH_SPNEGO).map_err(gss_err("mechanism set"))?;
        mechs.add(&GSS_MECH_KRB5).map_err(gss_err("mechanism set"))?;

        let cred = Cred::acquire(None, None, CredUsage::Initiate, Some(&mechs))
            .map_err(gss_err("no usable Kerberos credentials"))?;

        let mut ctx = ClientCtx::new(
            Some(cred),
            name,
            CtxFlags::GSS_C_MUTUAL_FLAG | CtxFlags::GSS_C_REPLAY_FLAG,
            Some(&GSS_MECH_SPNEGO),
        );
        let token = ctx
            .step(None, None)
            .map_err(gss_err("context initialization"))?
            .ok_or_else(|| AuthError::Sspi("no initial token produced".into()))?
            .to_vec();
        tracing::debug!(spn = %self.spn, len = token.len(), "SPNEGO initial token");
        self.ctx = Some(ctx);
        Ok(token)
    }

    fn step(&mut self, server_token: &[u8]) -> Result<Option<Vec<u8>>, AuthError> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| AuthError::Sspi("server token before initial token".into()))?;
        let reply = ctx
            .step(Some(server_token), None)
            .map_err(gss_err("SPNEGO step"))?
            .map(|t| t.to_vec());
        tracing::debug!(
            complete = ctx.is_complete(),
            reply = reply.as_ref().map_or(0, Vec::len),
            "SPNEGO step"
        );
        Ok(reply)
    }
}

impl std::fmt::Debug for GssapiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GssapiContext")
            .field("spn", &self.spn)
            .field("started", &self.ctx.is_some())
            .finish()
    }
}

/// Provider backed by the platform GSSAPI library.
///
/// Serves `WindowsIntegrated` only; explicit Windows credentials need a
/// custom provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct GssapiProvider;

impl SecurityContextProvider for GssapiProvider {
    fn create(
        &self,
        method: &AuthMethod,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn SecurityContext>, AuthError> {
        match method {
            AuthMethod::WindowsIntegrated => {
                Ok(Box::new(GssapiContext::new(service_principal(host, port))))
            }
            other => Err(AuthError::UnsupportedPlatform {
                method: other.method_name(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_service_principal() {
        assert_eq!(
            service_principal("sql.example.com", 1433),
            "MSSQLSvc/sql.example.com:1433"
        );
    }

    #[test]
    fn test_provider_rejects_explicit_credentials() {
        let method = AuthMethod::windows("CORP", "alice", "pw");
        assert!(matches!(
            GssapiProvider.create(&method, "db", 1433),
            Err(AuthError::UnsupportedPlatform { method: "Windows" })
        ));
    }

    #[test]
    fn test_step_before_start_fails() {
        let mut ctx = GssapiContext::new("MSSQLSvc/db:1433");
        assert!(ctx.step(b"token").is_err());
        assert!(format!("{ctx:?}").contains("started: false"));
    }
}
