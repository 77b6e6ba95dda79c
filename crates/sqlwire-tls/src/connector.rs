//! TLS connector.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::TlsConfig;
use crate::error::TlsError;
use crate::prelogin_wrapper::TlsPreloginWrapper;

// =============================================================================
// Accept-all verifier (trust_server_certificate)
// =============================================================================

/// Accepts any certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Performs the TLS handshake for a TDS session.
pub struct TlsConnector {
    config: TlsConfig,
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Build a connector from `config`.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let client_config = build_client_config(&config)?;
        Ok(Self {
            config,
            inner: TokioTlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Handshake over `stream` with the records carried in PreLogin packets.
    ///
    /// On success the wrapper is switched to pass-through, so the returned
    /// stream carries plain TLS records from then on.
    pub async fn connect_with_prelogin<S>(
        &self,
        stream: S,
        host: &str,
    ) -> Result<TlsStream<TlsPreloginWrapper<S>>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = self.config.server_name.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| TlsError::InvalidServerName(name.to_string()))?;

        tracing::debug!(server_name = %name, "performing TLS handshake");

        let mut tls = self
            .inner
            .connect(server_name, TlsPreloginWrapper::new(stream))
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;
        tls.get_mut().0.handshake_complete();

        tracing::debug!("TLS handshake completed");
        Ok(tls)
    }

    /// The configuration this connector was built from.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    if config.trust_server_certificate {
        tracing::warn!(
            "trust_server_certificate is enabled: server certificate validation is disabled"
        );
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
            .with_no_client_auth());
    }

    let mut roots = RootCertStore::empty();
    if config.root_certificates.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    } else {
        for cert in &config.root_certificates {
            roots
                .add(cert.clone())
                .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        }
    }

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}
