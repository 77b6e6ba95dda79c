//! Message reassembly.
//!
//! A message spans one or more packets; the last one carries
//! `END_OF_MESSAGE`.

use bytes::{Bytes, BytesMut};
use sqlwire_protocol::packet::{Packet, PacketType};

/// A complete message reassembled from one or more packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Type of the first packet.
    pub packet_type: PacketType,
    /// Concatenated payloads.
    pub payload: Bytes,
}

impl Message {
    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Buffers packet payloads until a message is complete.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
}

impl MessageAssembler {
    /// An empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a packet; returns the message once its last packet arrives.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let packet_type = *self.packet_type.get_or_insert(packet.header.packet_type);
        let is_eom = packet.is_end_of_message();

        // A single-packet message keeps the payload without copying.
        if is_eom && self.packet_count == 0 {
            self.packet_type = None;
            return Some(Message {
                packet_type,
                payload: packet.payload,
            });
        }

        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            ?packet_type,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom,
            "assembling message"
        );

        if !is_eom {
            return None;
        }

        self.packet_type = None;
        self.packet_count = 0;
        Some(Message {
            packet_type,
            payload: self.buffer.split().freeze(),
        })
    }

    /// Whether a message is partially buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Packets buffered for the current message.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sqlwire_protocol::packet::{PacketHeader, PacketStatus, split_message};

    fn make_packet(is_eom: bool, payload: &'static [u8]) -> Packet {
        let status = if is_eom {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let header = PacketHeader::new(PacketType::TabularResult, status, 0);
        Packet::new(header, Bytes::from_static(payload))
    }

    #[test]
    fn test_single_packet_message() {
        let mut assembler = MessageAssembler::new();
        let message = assembler.push(make_packet(true, b"hello")).unwrap();
        assert_eq!(message.packet_type, PacketType::TabularResult);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_multi_packet_message() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(make_packet(false, b"hello ")).is_none());
        assert!(assembler.has_partial());
        assert!(assembler.push(make_packet(false, b"world")).is_none());
        assert_eq!(assembler.packet_count(), 2);

        let message = assembler.push(make_packet(true, b"!")).unwrap();
        assert_eq!(&message.payload[..], b"hello world!");
        assert!(!assembler.has_partial());
        assert_eq!(assembler.packet_count(), 0);
    }

    #[test]
    fn test_reassembles_split_message() {
        let payload = Bytes::from((0..=255u8).cycle().take(3000).collect::<Vec<_>>());
        let packets = split_message(PacketType::TabularResult, payload.clone(), 1024, 1).unwrap();
        assert_eq!(packets.len(), 3);

        let mut assembler = MessageAssembler::new();
        let mut result = None;
        for packet in packets {
            result = assembler.push(packet);
        }
        assert_eq!(result.unwrap().payload, payload);
    }

    #[test]
    fn test_clear() {
        let mut assembler = MessageAssembler::new();
        assembler.push(make_packet(false, b"partial"));
        assembler.clear();
        assert!(!assembler.has_partial());
        let message = assembler.push(make_packet(true, b"new")).unwrap();
        assert_eq!(&message.payload[..], b"new");
    }
}
