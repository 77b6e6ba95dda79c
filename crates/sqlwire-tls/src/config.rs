//! TLS configuration.

use rustls::pki_types::CertificateDer;

/// TLS settings for a connection.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Accept any server certificate.
    ///
    /// Leaves the connection open to man-in-the-middle attacks; meant for
    /// development servers with self-signed certificates.
    pub trust_server_certificate: bool,

    /// Trust anchors; the Mozilla roots when empty.
    pub root_certificates: Vec<CertificateDer<'static>>,

    /// Name to validate the certificate against instead of the host.
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Validate certificates against the Mozilla roots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip certificate validation.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Trust `cert` in addition to any roots already added.
    #[must_use]
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Validate against `name` rather than the connection host.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}
