//! Framed packet streams.
//!
//! - [`PacketStream`] reads and writes over one transport; the handshake
//!   runs on it because the transport changes hands (TLS upgrade and
//!   downgrade) between messages.
//! - [`PacketReader`] and [`PacketWriter`] are the halves used by
//!   [`Connection`](crate::Connection) once the session is established.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use pin_project_lite::pin_project;
use sqlwire_protocol::packet::{Packet, PacketType, split_message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, FramedRead, FramedWrite};

use crate::error::CodecError;
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::TdsCodec;

pin_project! {
    /// Packets over a single bidirectional transport.
    pub struct PacketStream<T> {
        #[pin]
        inner: Framed<T, TdsCodec>,
        assembler: MessageAssembler,
    }
}

impl<T> PacketStream<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Frame `transport` with the default codec.
    pub fn new(transport: T) -> Self {
        Self {
            inner: Framed::new(transport, TdsCodec::new()),
            assembler: MessageAssembler::new(),
        }
    }

    /// The transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Mutable access to the transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Release the transport.
    ///
    /// Bytes already read but not yet decoded are lost, so only call this at
    /// a message boundary.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Whether read bytes are buffered beyond the last decoded packet.
    pub fn has_buffered_input(&self) -> bool {
        !self.inner.read_buffer().is_empty()
    }
}

impl<T> PacketStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Split `payload` at `packet_size` and send it as one message.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
        packet_size: usize,
    ) -> Result<(), CodecError> {
        for packet in split_message(packet_type, payload, packet_size, 1)? {
            self.inner.feed(packet).await?;
        }
        self.inner.flush().await
    }

    /// Read packets until a message is complete.
    pub async fn read_message(&mut self) -> Result<Message, CodecError> {
        loop {
            match self.inner.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.assembler.push(packet) {
                        return Ok(message);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(CodecError::ConnectionClosed),
            }
        }
    }
}

impl<T> Stream for PacketStream<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Packet, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> std::fmt::Debug for PacketStream<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStream")
            .field("transport", self.inner.get_ref())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Split halves
// =============================================================================

pin_project! {
    /// Read half: a stream of packets.
    pub struct PacketReader<T> {
        #[pin]
        inner: FramedRead<T, TdsCodec>,
    }
}

impl<T> PacketReader<T>
where
    T: AsyncRead,
{
    /// Frame the read half with `codec`.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self {
            inner: FramedRead::new(transport, codec),
        }
    }

    /// The codec, for adjusting the size limit.
    pub fn codec_mut(&mut self) -> &mut TdsCodec {
        self.inner.decoder_mut()
    }
}

impl<T> Stream for PacketReader<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Packet, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

pin_project! {
    /// Write half: a sink of packets.
    pub struct PacketWriter<T> {
        #[pin]
        inner: FramedWrite<T, TdsCodec>,
    }
}

impl<T> PacketWriter<T>
where
    T: AsyncWrite,
{
    /// Frame the write half with the default codec.
    pub fn new(transport: T) -> Self {
        Self {
            inner: FramedWrite::new(transport, TdsCodec::new()),
        }
    }

    /// The underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T> Sink<Packet> for PacketWriter<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Packet) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}
