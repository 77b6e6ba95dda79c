//! Self-signed TLS for the mock server.

use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::mock_server::MockServerError;

/// A TLS 1.2 acceptor with a freshly generated certificate for `localhost`.
///
/// TLS 1.2 keeps the handshake free of post-handshake messages, so the
/// login-only mode can drop back to plaintext right after LOGIN7.
pub struct MockTlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
    certificate: CertificateDer<'static>,
}

impl MockTlsAcceptor {
    /// Generate a certificate and build the acceptor.
    pub fn generate() -> Result<Self, MockServerError> {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| MockServerError::Tls(e.to_string()))?;
        let certificate = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.signing_key.serialize_der(),
        ));

        let provider = rustls::crypto::ring::default_provider();
        let config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&[&rustls::version::TLS12])
            .map_err(|e| MockServerError::Tls(format!("protocol versions: {e}")))?
            .with_no_client_auth()
            .with_single_cert(vec![certificate.clone()], key)
            .map_err(|e| MockServerError::Tls(format!("certificate: {e}")))?;

        Ok(Self {
            inner: tokio_rustls::TlsAcceptor::from(Arc::new(config)),
            certificate,
        })
    }

    /// The acceptor.
    pub fn acceptor(&self) -> &tokio_rustls::TlsAcceptor {
        &self.inner
    }

    /// The server certificate, for clients that validate it.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }
}

impl std::fmt::Debug for MockTlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTlsAcceptor").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_certificate() {
        let tls = MockTlsAcceptor::generate().unwrap();
        assert!(!tls.certificate().is_empty());
    }
}
