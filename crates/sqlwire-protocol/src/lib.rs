//! # sqlwire-protocol
//!
//! Wire layouts of the MS-TDS protocol spoken by Microsoft SQL Server.
//!
//! This crate is IO-agnostic: it turns bytes into packets, prelogin and
//! login messages, request payloads and response tokens, and back. It does
//! not open sockets or depend on an async runtime; `sqlwire-codec` and
//! `sqlwire-client` build the transport on top of it.
//!
//! ## Example
//!
//! ```rust
//! use sqlwire_protocol::{PacketHeader, PacketStatus, PacketType};
//!
//! let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
//! assert_eq!(header.payload_length(), 92);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod collation;
pub mod error;
pub mod login7;
pub mod packet;
pub mod plp;
pub mod prelogin;
pub mod rpc;
pub mod sql_batch;
pub mod token;
pub mod types;
pub mod version;

pub use collation::Collation;
pub use error::ProtocolError;
pub use login7::{
    LIBRARY_NAME, Login7, LoginCredentials, OptionFlags1, OptionFlags2, OptionFlags3, TypeFlags,
};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, Packet,
    PacketHeader, PacketStatus, PacketType, split_message,
};
pub use plp::{PLP_NULL, PLP_UNKNOWN_LEN, PlpResume, read_plp, write_plp};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption, ServerVersion, TraceId};
pub use rpc::{ParamStatus, ProcId, RpcOptionFlags, RpcParam, RpcRequest};
pub use sql_batch::SqlBatch;
pub use token::{
    ColMetaData, ColumnData, Done, DoneStatus, EnvChange, FeatureAck, LoginAck, RawRow,
    ReturnValue, ServerMessage, Token, TokenStream, TokenType,
};
pub use types::{ColumnFlags, MAX_LENGTH_PLP, TypeId, TypeInfo, ValueFraming, XmlSchemaRef};
pub use version::TdsVersion;
