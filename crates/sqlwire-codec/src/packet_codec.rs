//! TDS packet codec for `tokio_util` framing.

use bytes::{BufMut, BytesMut};
use sqlwire_protocol::packet::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, Packet, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Encodes and decodes single packets.
///
/// Packet ids and status bits are taken from the packet as given; splitting
/// a message into packets is [`sqlwire_protocol::split_message`]'s job.
#[derive(Debug, Clone)]
pub struct TdsCodec {
    max_packet_size: usize,
}

impl TdsCodec {
    /// A codec accepting packets up to [`MAX_PACKET_SIZE`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Limit accepted packets to `size` bytes.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.set_max_packet_size(size);
        self
    }

    /// Change the limit, e.g. after a packet-size env-change.
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size.clamp(PACKET_HEADER_SIZE + 1, MAX_PACKET_SIZE);
    }

    /// Current limit.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::decode(&mut &src[..PACKET_HEADER_SIZE])?;
        header.check_length(self.max_packet_size)?;

        let length = header.length as usize;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        let payload = frame.split_off(PACKET_HEADER_SIZE).freeze();

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            packet_id = header.packet_id,
            is_eom = header.is_end_of_message(),
            "decoded packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total_length = item.total_size();
        if total_length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: total_length,
                max: self.max_packet_size,
            });
        }

        dst.reserve(total_length);
        let mut header = item.header;
        header.length = total_length as u16;
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total_length,
            packet_id = header.packet_id,
            "encoded packet"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sqlwire_protocol::ProtocolError;
    use sqlwire_protocol::packet::{PacketStatus, PacketType};

    fn raw_packet(length: u16, payload: &[u8]) -> BytesMut {
        let mut data = BytesMut::new();
        data.put_u8(PacketType::TabularResult as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(length);
        data.put_u16(52);
        data.put_u8(1);
        data.put_u8(0);
        data.put_slice(payload);
        data
    }

    #[test]
    fn test_decode_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(12, b"test");
        data.put_slice(&[0x04]);

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::TabularResult);
        assert_eq!(packet.header.spid, 52);
        assert!(packet.is_end_of_message());
        assert_eq!(&packet.payload[..], b"test");
        // The next packet's first byte is left in the buffer.
        assert_eq!(&data[..], &[0x04]);
    }

    #[test]
    fn test_partial_packet_waits() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(12, b"te");
        assert!(codec.decode(&mut data).unwrap().is_none());
        data.put_slice(b"st");
        assert!(codec.decode(&mut data).unwrap().is_some());
    }

    #[test]
    fn test_length_below_header_is_rejected() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(4, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::Protocol(ProtocolError::InvalidPacketLength { length: 4, .. }))
        ));
    }

    #[test]
    fn test_length_above_limit_is_rejected() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let mut data = raw_packet(600, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::Protocol(ProtocolError::InvalidPacketLength { max: 512, .. }))
        ));
    }

    #[test]
    fn test_encode_sets_length() {
        let mut codec = TdsCodec::new();
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0)
            .with_packet_id(3);
        let mut dst = BytesMut::new();
        codec
            .encode(Packet::new(header, Bytes::from_static(b"test")), &mut dst)
            .unwrap();

        assert_eq!(dst.len(), 12);
        assert_eq!(&dst[..8], &[0x01, 0x01, 0x00, 0x0C, 0x00, 0x00, 0x03, 0x00]);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);
        let result = codec.encode(
            Packet::new(header, Bytes::from(vec![0u8; 600])),
            &mut BytesMut::new(),
        );
        assert!(matches!(result, Err(CodecError::PacketTooLarge { size: 608, max: 512 })));
    }
}
