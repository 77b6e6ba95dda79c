//! Plain-or-TLS transport.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream;

use crate::error::TlsError;
use crate::prelogin_wrapper::TlsPreloginWrapper;

/// The transport under the packet codec.
#[derive(Debug)]
pub enum MaybeTlsStream<S> {
    /// Unencrypted.
    Raw(S),
    /// Encrypted after a prelogin-wrapped handshake.
    Tls(Box<TlsStream<TlsPreloginWrapper<S>>>),
}

impl<S> MaybeTlsStream<S> {
    /// Whether bytes are encrypted.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Drop the TLS layer and continue in plaintext.
    ///
    /// Used when encryption covers only the login message. Fails for a
    /// stream that was never encrypted.
    pub fn into_plain(self) -> Result<S, TlsError> {
        match self {
            Self::Raw(_) => Err(TlsError::NotEncrypted),
            Self::Tls(tls) => {
                let (wrapper, _session) = tls.into_inner();
                Ok(wrapper.into_inner())
            }
        }
    }
}

impl<S> From<TlsStream<TlsPreloginWrapper<S>>> for MaybeTlsStream<S> {
    fn from(tls: TlsStream<TlsPreloginWrapper<S>>) -> Self {
        Self::Tls(Box::new(tls))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
