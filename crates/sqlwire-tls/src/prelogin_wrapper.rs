//! PreLogin framing for the TLS handshake.
//!
//! Before TDS 8.0 the TLS handshake is not sent raw: every handshake record
//! travels as the payload of PreLogin packets. The wrapper frames outgoing
//! records and strips headers from incoming packets until
//! [`handshake_complete`](TlsPreloginWrapper::handshake_complete) is called,
//! after which it is a transparent pass-through.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use sqlwire_protocol::packet::{
    DEFAULT_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream adapter that carries TLS handshake bytes inside PreLogin packets.
#[derive(Debug)]
pub struct TlsPreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,

    header_buf: [u8; PACKET_HEADER_SIZE],
    header_pos: usize,
    read_remaining: usize,

    write_buf: Vec<u8>,
    framed: Vec<u8>,
    framed_pos: usize,
}

impl<S> TlsPreloginWrapper<S> {
    /// Wrap `stream` in handshake mode.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending_handshake: true,
            header_buf: [0u8; PACKET_HEADER_SIZE],
            header_pos: 0,
            read_remaining: 0,
            write_buf: Vec::new(),
            framed: Vec::new(),
            framed_pos: 0,
        }
    }

    /// Stop framing; later bytes pass through unchanged.
    pub fn handshake_complete(&mut self) {
        self.pending_handshake = false;
    }

    /// Whether handshake framing is still active.
    #[must_use]
    pub fn is_pending_handshake(&self) -> bool {
        self.pending_handshake
    }

    /// The wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Release the wrapped stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Frame buffered handshake bytes as PreLogin packets.
    fn frame_pending(&mut self) {
        let chunk_size = DEFAULT_PACKET_SIZE - PACKET_HEADER_SIZE;
        let chunks: Vec<&[u8]> = self.write_buf.chunks(chunk_size).collect();
        let last = chunks.len().saturating_sub(1);

        self.framed.clear();
        self.framed_pos = 0;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let status = if i == last {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            PacketHeader::new(
                PacketType::PreLogin,
                status,
                (PACKET_HEADER_SIZE + chunk.len()) as u16,
            )
            .with_packet_id((i + 1) as u8)
            .encode(&mut self.framed);
            self.framed.extend_from_slice(chunk);
        }
        self.write_buf.clear();

        tracing::trace!(bytes = self.framed.len(), "framed TLS handshake data");
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        while this.read_remaining == 0 {
            while this.header_pos < PACKET_HEADER_SIZE {
                let mut header = ReadBuf::new(&mut this.header_buf[this.header_pos..]);
                ready!(Pin::new(&mut this.stream).poll_read(cx, &mut header))?;
                let n = header.filled().len();
                if n == 0 {
                    if this.header_pos == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                }
                this.header_pos += n;
            }

            let header = PacketHeader::decode(&mut &this.header_buf[..])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if header.packet_type != PacketType::PreLogin {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected PreLogin packet, got {:?}", header.packet_type),
                )));
            }
            this.header_pos = 0;
            this.read_remaining = header.payload_length();
        }

        let max = this.read_remaining.min(buf.remaining());
        if max == 0 {
            return Poll::Ready(Ok(()));
        }

        let dst = buf.initialize_unfilled_to(max);
        let mut inner = ReadBuf::new(dst);
        ready!(Pin::new(&mut this.stream).poll_read(cx, &mut inner))?;
        let n = inner.filled().len();
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
        }
        buf.advance(n);
        this.read_remaining -= n;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        this.write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.framed_pos == this.framed.len() && !this.write_buf.is_empty() {
            this.frame_pending();
        }

        while this.framed_pos < this.framed.len() {
            let n = ready!(
                Pin::new(&mut this.stream).poll_write(cx, &this.framed[this.framed_pos..])
            )?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.framed_pos += n;
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_handshake_bytes_are_framed() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0x12, 0x01, 0x00, 0x0B, 0x00, 0x00, 0x01, 0x00, 0x16, 0x03, 0x01])
            .build();
        let mut wrapper = TlsPreloginWrapper::new(mock);
        wrapper.write_all(&[0x16, 0x03]).await.unwrap();
        wrapper.write_all(&[0x01]).await.unwrap();
        wrapper.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_incoming_headers_are_stripped() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0x12, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x01, 0x00, 0xAA, 0xBB])
            .read(&[0x12, 0x01, 0x00, 0x09, 0x00, 0x00, 0x02, 0x00, 0xCC])
            .build();
        let mut wrapper = TlsPreloginWrapper::new(mock);
        let mut out = [0u8; 3];
        wrapper.read_exact(&mut out).await.unwrap();
        assert_eq!(out, [0xAA, 0xBB, 0xCC]);
    }

    #[tokio::test]
    async fn test_wrong_packet_type_is_rejected() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0x04, 0x01, 0x00, 0x09, 0x00, 0x00, 0x01, 0x00, 0xAA])
            .build();
        let mut wrapper = TlsPreloginWrapper::new(mock);
        let mut out = [0u8; 1];
        let err = wrapper.read_exact(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_pass_through_after_handshake() {
        let mock = tokio_test::io::Builder::new()
            .write(b"raw")
            .read(b"xyz")
            .build();
        let mut wrapper = TlsPreloginWrapper::new(mock);
        wrapper.handshake_complete();
        wrapper.write_all(b"raw").await.unwrap();
        let mut out = [0u8; 3];
        wrapper.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"xyz");
    }
}
