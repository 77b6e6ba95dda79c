//! Split read/write connection.
//!
//! The transport is split so an Attention packet can be written while
//! another task is blocked reading a large result.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use sqlwire_protocol::packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, Packet, PacketHeader, PacketStatus,
    PacketType, split_message,
};
use sqlwire_protocol::token::DoneStatus;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::TdsCodec;

/// A session transport with split halves.
///
/// # Example
///
/// ```rust,ignore
/// use sqlwire_codec::Connection;
///
/// let mut conn = Connection::new(stream);
/// let cancel = conn.cancel_handle();
///
/// tokio::spawn(async move {
///     cancel.cancel().await
/// });
/// ```
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: PacketReader<ReadHalf<T>>,
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    assembler: MessageAssembler,
    packet_size: usize,
    cancel: Arc<CancelState>,
}

/// When an unacknowledged Attention went out.
#[derive(Debug, Default)]
struct CancelState {
    sent_at: SyncMutex<Option<Instant>>,
}

impl CancelState {
    fn sent_at(&self) -> Option<Instant> {
        *self.sent_at.lock()
    }

    /// A second Attention before the acknowledgment keeps the first time.
    fn mark_sent(&self) {
        self.sent_at.lock().get_or_insert_with(Instant::now);
    }

    fn clear(&self) {
        *self.sent_at.lock() = None;
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Split `transport` and frame both halves.
    pub fn new(transport: T) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: PacketReader::with_codec(read_half, TdsCodec::new()),
            writer: Arc::new(Mutex::new(PacketWriter::new(write_half))),
            assembler: MessageAssembler::new(),
            packet_size: DEFAULT_PACKET_SIZE,
            cancel: Arc::default(),
        }
    }

    /// Set the packet size used to split outgoing messages.
    #[must_use]
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.set_packet_size(size);
        self
    }

    /// Apply a negotiated packet size.
    pub fn set_packet_size(&mut self, size: usize) {
        self.packet_size = size.clamp(PACKET_HEADER_SIZE + 1, MAX_PACKET_SIZE);
        tracing::debug!(packet_size = self.packet_size, "packet size changed");
    }

    /// Packet size used for outgoing messages.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Limit the size of incoming packets.
    pub fn set_max_read_packet_size(&mut self, size: usize) {
        self.reader.codec_mut().set_max_packet_size(size);
    }

    /// A handle that can send Attention from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        CancelHandle {
            writer: Arc::clone(&self.writer),
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Whether Attention was sent and not yet acknowledged.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancel.sent_at().is_some()
    }

    /// When the pending Attention was sent, from this connection or any
    /// of its handles.
    #[must_use]
    pub fn cancel_sent_at(&self) -> Option<Instant> {
        self.cancel.sent_at()
    }

    /// Record that the server acknowledged an Attention.
    pub fn clear_cancelling(&self) {
        self.cancel.clear();
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send `payload` as one message, split at the negotiated packet size.
    ///
    /// Packet ids start at 1 and wrap; only the last packet carries
    /// `END_OF_MESSAGE`.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<(), CodecError> {
        let packets = split_message(packet_type, payload, self.packet_size, 1)?;
        tracing::trace!(?packet_type, packets = packets.len(), "sending message");

        let mut writer = self.writer.lock().await;
        for packet in packets {
            writer.feed(packet).await?;
        }
        writer.flush().await
    }

    /// Flush pending output and shut down the write half.
    ///
    /// Over TLS this sends close_notify. The peer sees end of stream even
    /// while cancel handles keep the write half alive.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        writer.get_mut().shutdown().await?;
        tracing::debug!("transport shut down");
        Ok(())
    }

    /// Read one packet; `None` when the peer closed between messages.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        match self.reader.next().await {
            Some(result) => result.map(Some),
            None if self.assembler.has_partial() => Err(CodecError::ConnectionClosed),
            None => Ok(None),
        }
    }

    /// Read packets until a message is complete.
    pub async fn read_message(&mut self) -> Result<Message, CodecError> {
        loop {
            match self.reader.next().await {
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

    /// Discard incoming messages until the server acknowledges Attention.
    ///
    /// The acknowledgment is a message ending with a DONE token that has the
    /// ATTN bit. Fails with [`CodecError::CancelTimeout`] when it does not
    /// arrive within `grace`.
    pub async fn drain_after_cancel(&mut self, grace: Duration) -> Result<(), CodecError> {
        tracing::debug!(?grace, "draining after cancel");
        self.assembler.clear();

        let drain = async {
            loop {
                let message = self.read_message().await?;
                if message.packet_type == PacketType::TabularResult
                    && ends_with_attention_ack(&message.payload)
                {
                    return Ok::<_, CodecError>(());
                }
            }
        };

        match tokio::time::timeout(grace, drain).await {
            Ok(Ok(())) => {
                tracing::debug!("attention acknowledged");
                self.clear_cancelling();
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CodecError::CancelTimeout(grace)),
        }
    }
}

/// Whether the message ends with DONE(ATTN), in either row-count width.
fn ends_with_attention_ack(payload: &[u8]) -> bool {
    [13usize, 9].iter().any(|&len| {
        payload.len() >= len && {
            let done = &payload[payload.len() - len..];
            let status = DoneStatus::from_bits_retain(u16::from_le_bytes([done[1], done[2]]));
            done[0] == 0xFD && status.contains(DoneStatus::ATTN)
        }
    })
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("packet_size", &self.packet_size)
            .field("cancelling", &self.is_cancelling())
            .field("has_partial_message", &self.assembler.has_partial())
            .finish_non_exhaustive()
    }
}

/// Sends Attention on a [`Connection`] from any task.
pub struct CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    cancel: Arc<CancelState>,
}

impl<T> CancelHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Write a header-only Attention packet.
    ///
    /// Waits for any message being written to finish first, so the packet
    /// never lands inside another message.
    pub async fn cancel(&self) -> Result<(), CodecError> {
        let header = PacketHeader::new(
            PacketType::Attention,
            PacketStatus::END_OF_MESSAGE,
            PACKET_HEADER_SIZE as u16,
        );

        let mut writer = self.writer.lock().await;
        self.cancel.mark_sent();
        tracing::debug!("sending attention");
        writer.send(Packet::new(header, Bytes::new())).await
    }

    /// Whether Attention was sent and not yet acknowledged.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancel.sent_at().is_some()
    }
}

impl<T> Clone for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            cancel: Arc::clone(&self.cancel),
        }
    }
}

impl<T> std::fmt::Debug for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelling", &self.is_cancelling())
            .finish_non_exhaustive()
    }
}
