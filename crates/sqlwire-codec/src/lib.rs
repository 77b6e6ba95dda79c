//! # sqlwire-codec
//!
//! Async framing for TDS: packets over a byte stream, reassembly into
//! messages, and the split connection used for cancellation.
//!
//! ```text
//! transport → TdsCodec (packets) → MessageAssembler (messages) → client
//! ```
//!
//! [`Connection`] splits the transport into halves so a [`CancelHandle`]
//! can send Attention while a reader is blocked on a result set.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use connection::{CancelHandle, Connection};
pub use error::CodecError;
pub use framed::{PacketReader, PacketStream, PacketWriter};
pub use message::{Message, MessageAssembler};
pub use packet_codec::TdsCodec;
pub use sqlwire_protocol::packet::Packet;
