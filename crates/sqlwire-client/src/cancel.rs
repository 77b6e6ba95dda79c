//! Query cancellation from another task.
//!
//! The transport is split into read and write halves, so an Attention
//! packet can go out while the task owning the [`Client`](crate::Client) is
//! blocked reading results. That task then sees [`Error::Canceled`] once
//! the server acknowledges.
//!
//! ```rust,ignore
//! let cancel = client.cancel_handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     let _ = cancel.cancel().await;
//! });
//!
//! let rows = client.simple_query("SELECT * FROM big_table").await?.into_first().await;
//! ```
//!
//! [`Error::Canceled`]: crate::Error::Canceled

use sqlwire_codec::CancelHandle as CodecCancelHandle;
use sqlwire_tls::MaybeTlsStream;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Sends Attention for the connection it was taken from.
///
/// Cheap to clone; `Send + Sync` when the transport is.
pub struct CancelHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    inner: CodecCancelHandle<MaybeTlsStream<S>>,
}

impl<S> CancelHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(inner: CodecCancelHandle<MaybeTlsStream<S>>) -> Self {
        Self { inner }
    }

    /// Ask the server to stop the running command.
    ///
    /// Returns once the Attention packet is written. Sending it while no
    /// command runs is harmless; the acknowledgment is consumed before the
    /// next command.
    pub async fn cancel(&self) -> Result<()> {
        self.inner.cancel().await?;
        Ok(())
    }

    /// Whether a cancel was sent and not yet acknowledged.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.is_cancelling()
    }
}

impl<S> Clone for CancelHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> std::fmt::Debug for CancelHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("pending", &self.is_pending())
            .finish()
    }
}
