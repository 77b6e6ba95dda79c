//! Token stream decoding.
//!
//! Every server response is a sequence of tokens, each introduced by a tag
//! byte. [`TokenStream`] pulls tokens off a growing buffer: when a token is
//! cut short by a packet boundary it reports
//! [`ProtocolError::UnexpectedEof`] and leaves the buffer untouched, so the
//! caller can [`push`](TokenStream::push) the next packet and try again.
//! PLP values that span packets resume from their last whole chunk on the
//! retry instead of being walked again from the start.
//!
//! Row values are cut out of the stream as raw bytes using the column's
//! [`TypeInfo`]; interpreting them is left to the type layer, so a value
//! that fails to convert never desynchronises the stream.

use std::sync::Arc;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{
    need, read_b_varbyte, read_b_varchar, read_bytes, read_i32_le, read_u8, read_u16_le,
    read_u32_le, read_u64_le, read_us_varchar, skip,
};
use crate::collation::Collation;
use crate::error::ProtocolError;
use crate::plp::PlpResume;
use crate::types::{ColumnFlags, TypeId, TypeInfo};
use crate::version::TdsVersion;

/// Token tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Stored procedure return status.
    ReturnStatus = 0x79,
    /// Column metadata.
    ColMetaData = 0x81,
    /// Table names for browse mode.
    TabName = 0xA4,
    /// Column info for browse mode.
    ColInfo = 0xA5,
    /// ORDER BY columns.
    Order = 0xA9,
    /// Error message.
    Error = 0xAA,
    /// Informational message.
    Info = 0xAB,
    /// Output parameter value.
    ReturnValue = 0xAC,
    /// Login acknowledgment.
    LoginAck = 0xAD,
    /// Feature extension acknowledgment.
    FeatureExtAck = 0xAE,
    /// Row.
    Row = 0xD1,
    /// Null-bitmap compressed row.
    NbcRow = 0xD2,
    /// Environment change.
    EnvChange = 0xE3,
    /// Session state.
    SessionState = 0xE4,
    /// SSPI challenge.
    Sspi = 0xED,
    /// Federated authentication info.
    FedAuthInfo = 0xEE,
    /// End of statement.
    Done = 0xFD,
    /// End of stored procedure.
    DoneProc = 0xFE,
    /// End of statement inside a procedure.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Map a tag byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0xA4 => Self::TabName,
            0xA5 => Self::ColInfo,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAC => Self::ReturnValue,
            0xAD => Self::LoginAck,
            0xAE => Self::FeatureExtAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xE4 => Self::SessionState,
            0xED => Self::Sspi,
            0xEE => Self::FedAuthInfo,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            _ => return None,
        })
    }
}

/// A decoded token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Start of a result set.
    ColMetaData(Arc<ColMetaData>),
    /// Row.
    Row(RawRow),
    /// Null-bitmap compressed row.
    NbcRow(RawRow),
    /// End of statement.
    Done(Done),
    /// End of stored procedure.
    DoneProc(Done),
    /// End of statement inside a procedure.
    DoneInProc(Done),
    /// Server error.
    Error(ServerMessage),
    /// Server informational message.
    Info(ServerMessage),
    /// Environment change.
    EnvChange(EnvChange),
    /// Login acknowledgment.
    LoginAck(LoginAck),
    /// Return status of a stored procedure.
    ReturnStatus(i32),
    /// Output parameter.
    ReturnValue(ReturnValue),
    /// ORDER BY column numbers.
    Order(Vec<u16>),
    /// Acknowledged feature extensions.
    FeatureExtAck(Vec<FeatureAck>),
    /// SSPI challenge from the server.
    Sspi(Bytes),
    /// A token this client reads past without interpreting.
    Opaque {
        /// Tag.
        token_type: TokenType,
        /// Body without the length prefix.
        data: Bytes,
    },
}

// =============================================================================
// Metadata and rows
// =============================================================================

/// One column of COLMETADATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnData {
    /// Column name; empty for unnamed expressions.
    pub name: String,
    /// User type.
    pub user_type: u32,
    /// Flags.
    pub flags: ColumnFlags,
    /// Type descriptor.
    pub type_info: TypeInfo,
}

impl ColumnData {
    /// Whether the column accepts NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }
}

/// Column metadata of one result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColMetaData {
    /// Columns in select-list order.
    pub columns: Vec<ColumnData>,
}

impl ColMetaData {
    fn decode(src: &mut Bytes, version: TdsVersion) -> Result<Self, ProtocolError> {
        let count = read_u16_le(src)?;
        if count == 0xFFFF {
            return Ok(Self::default());
        }

        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let user_type = if version >= TdsVersion::V7_2 {
                read_u32_le(src)?
            } else {
                u32::from(read_u16_le(src)?)
            };
            let flags = ColumnFlags::from_bits_retain(read_u16_le(src)?);
            let type_info = TypeInfo::decode(src)?;

            if matches!(type_info.type_id, TypeId::Text | TypeId::NText | TypeId::Image) {
                let parts = read_u8(src)?;
                for _ in 0..parts {
                    let len = read_u16_le(src)? as usize;
                    skip(src, len * 2)?;
                }
            }

            let name = read_b_varchar(src)?;
            columns.push(ColumnData {
                name,
                user_type,
                flags,
                type_info,
            });
        }

        Ok(Self { columns })
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the result set has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Raw column values of one row, `None` for NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// Unframed value bytes per column.
    pub values: Vec<Option<Bytes>>,
    /// Columns whose value was framed correctly but is unusable, by index.
    /// Their slot in `values` is `None`.
    pub errors: Vec<(usize, ProtocolError)>,
}

impl RawRow {
    fn decode(
        src: &mut Bytes,
        metadata: &ColMetaData,
        plp: &mut PlpResume,
    ) -> Result<Self, ProtocolError> {
        let mut row = Self::with_capacity(metadata.len());
        for (i, col) in metadata.columns.iter().enumerate() {
            row.push(i, col.type_info.read_value_resumable(src, plp))?;
        }
        Ok(row)
    }

    fn decode_nbc(
        src: &mut Bytes,
        metadata: &ColMetaData,
        plp: &mut PlpResume,
    ) -> Result<Self, ProtocolError> {
        let bitmap = read_bytes(src, metadata.len().div_ceil(8))?;
        let mut row = Self::with_capacity(metadata.len());
        for (i, col) in metadata.columns.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                row.values.push(None);
            } else {
                row.push(i, col.type_info.read_value_resumable(src, plp))?;
            }
        }
        Ok(row)
    }

    fn with_capacity(columns: usize) -> Self {
        Self {
            values: Vec::with_capacity(columns),
            errors: Vec::new(),
        }
    }

    fn push(
        &mut self,
        index: usize,
        value: Result<Option<Bytes>, ProtocolError>,
    ) -> Result<(), ProtocolError> {
        match value {
            Ok(value) => self.values.push(value),
            Err(e) if e.is_value_scoped() => {
                tracing::debug!(column = index, error = %e, "unusable column value");
                self.values.push(None);
                self.errors.push((index, e));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

// =============================================================================
// DONE
// =============================================================================

bitflags! {
    /// DONE status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// The row count is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention.
        const ATTN = 0x0020;
        /// Severe server error; the results are discarded.
        const SRVERROR = 0x0100;
    }
}

/// DONE, DONEPROC and DONEINPROC body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Current command token.
    pub cur_cmd: u16,
    /// Affected rows, valid when `COUNT` is set.
    pub row_count: u64,
}

impl Done {
    /// Decode with the row-count width of `version`.
    pub fn decode(src: &mut impl Buf, version: TdsVersion) -> Result<Self, ProtocolError> {
        let status = DoneStatus::from_bits_retain(read_u16_le(src)?);
        let cur_cmd = read_u16_le(src)?;
        let row_count = if version.has_64bit_row_count() {
            read_u64_le(src)?
        } else {
            u64::from(read_u32_le(src)?)
        };
        Ok(Self {
            status,
            cur_cmd,
            row_count,
        })
    }

    /// Encode with a 64-bit row count.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }

    /// More results follow.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// The statement failed.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.contains(DoneStatus::ERROR) || self.status.contains(DoneStatus::SRVERROR)
    }

    /// Acknowledges a cancel.
    #[must_use]
    pub const fn is_attention(&self) -> bool {
        self.status.contains(DoneStatus::ATTN)
    }

    /// Affected-row count, when the server reported one.
    #[must_use]
    pub const fn rows(&self) -> Option<u64> {
        if self.status.contains(DoneStatus::COUNT) {
            Some(self.row_count)
        } else {
            None
        }
    }
}

// =============================================================================
// ERROR / INFO
// =============================================================================

/// ERROR or INFO token body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// State.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number in the batch or procedure.
    pub line: i32,
}

impl ServerMessage {
    fn decode(src: &mut Bytes, version: TdsVersion) -> Result<Self, ProtocolError> {
        let len = read_u16_le(src)? as usize;
        let mut body = read_bytes(src, len)?;
        let number = read_i32_le(&mut body)?;
        let state = read_u8(&mut body)?;
        let class = read_u8(&mut body)?;
        let message = read_us_varchar(&mut body)?;
        let server = read_b_varchar(&mut body)?;
        let procedure = read_b_varchar(&mut body)?;
        let line = if version >= TdsVersion::V7_2 {
            read_i32_le(&mut body)?
        } else {
            i32::from(read_u16_le(&mut body)?)
        };
        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Severity 20 and above closes the connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }
}

// =============================================================================
// LOGINACK / FEATUREEXTACK
// =============================================================================

/// LOGINACK token body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// SQL interface type.
    pub interface: u8,
    /// Negotiated TDS version.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version (major, minor, build).
    pub prog_version: (u8, u8, u16),
}

impl LoginAck {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let len = read_u16_le(src)? as usize;
        let mut body = read_bytes(src, len)?;
        let interface = read_u8(&mut body)?;
        need(&body, 4)?;
        let tds_version = TdsVersion::new(body.get_u32());
        let prog_name = read_b_varchar(&mut body)?;
        need(&body, 4)?;
        let major = body.get_u8();
        let minor = body.get_u8();
        let build = body.get_u16();
        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version: (major, minor, build),
        })
    }
}

/// One acknowledged feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAck {
    /// Feature id.
    pub feature_id: u8,
    /// Feature-specific data.
    pub data: Bytes,
}

fn decode_feature_ext_ack(src: &mut Bytes) -> Result<Vec<FeatureAck>, ProtocolError> {
    let mut features = Vec::new();
    loop {
        let feature_id = read_u8(src)?;
        if feature_id == 0xFF {
            return Ok(features);
        }
        let len = read_u32_le(src)? as usize;
        features.push(FeatureAck {
            feature_id,
            data: read_bytes(src, len)?,
        });
    }
}

// =============================================================================
// ENVCHANGE
// =============================================================================

/// ENVCHANGE token body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database.
        new: String,
        /// Previous database.
        old: String,
    },
    /// Session language changed.
    Language {
        /// New language.
        new: String,
        /// Previous language.
        old: String,
    },
    /// Character set changed.
    CharacterSet(String),
    /// Packet size changed.
    PacketSize {
        /// New packet size.
        new: u32,
        /// Previous packet size.
        old: u32,
    },
    /// Session collation changed.
    Collation(Option<Collation>),
    /// A transaction started.
    BeginTransaction(u64),
    /// A transaction committed.
    CommitTransaction(u64),
    /// A transaction rolled back.
    RollbackTransaction(u64),
    /// The connection was reset.
    ResetConnection,
    /// Reconnect to another server.
    Routing {
        /// Alternate server host.
        host: String,
        /// Alternate server port.
        port: u16,
    },
    /// A type this client ignores.
    Other(u8),
}

fn descriptor(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    let n = bytes.len().min(8);
    raw[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(raw)
}

impl EnvChange {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let len = read_u16_le(src)? as usize;
        let mut body = read_bytes(src, len)?;
        let env_type = read_u8(&mut body)?;

        Ok(match env_type {
            1 => Self::Database {
                new: read_b_varchar(&mut body)?,
                old: read_b_varchar(&mut body)?,
            },
            2 => Self::Language {
                new: read_b_varchar(&mut body)?,
                old: read_b_varchar(&mut body)?,
            },
            3 => Self::CharacterSet(read_b_varchar(&mut body)?),
            4 => {
                let parse = |s: String| {
                    s.parse::<u32>().map_err(|_| ProtocolError::InvalidField {
                        field: "packet size",
                        reason: format!("not a number: {s:?}"),
                    })
                };
                let new = parse(read_b_varchar(&mut body)?)?;
                let old = read_b_varchar(&mut body)?;
                Self::PacketSize {
                    new,
                    old: old.parse().unwrap_or(0),
                }
            }
            7 => {
                let new = read_b_varbyte(&mut body)?;
                Self::Collation(match <[u8; 5]>::try_from(new.as_ref()) {
                    Ok(raw) => Some(Collation::from_bytes(raw)),
                    Err(_) => None,
                })
            }
            8 => Self::BeginTransaction(descriptor(&read_b_varbyte(&mut body)?)),
            9 | 10 => {
                let _new = read_b_varbyte(&mut body)?;
                let old = descriptor(&read_b_varbyte(&mut body)?);
                if env_type == 9 {
                    Self::CommitTransaction(old)
                } else {
                    Self::RollbackTransaction(old)
                }
            }
            18 => Self::ResetConnection,
            20 => {
                let _value_len = read_u16_le(&mut body)?;
                let _protocol = read_u8(&mut body)?;
                let port = read_u16_le(&mut body)?;
                let host = read_us_varchar(&mut body)?;
                Self::Routing { host, port }
            }
            other => Self::Other(other),
        })
    }
}

// =============================================================================
// RETURNVALUE
// =============================================================================

/// Output parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnValue {
    /// Ordinal of the parameter.
    pub ordinal: u16,
    /// Parameter name.
    pub name: String,
    /// Status (1 = output parameter, 2 = UDF return value).
    pub status: u8,
    /// Type of the value.
    pub type_info: TypeInfo,
    /// Raw value, `None` for NULL.
    pub value: Option<Bytes>,
    /// Set when the value was framed correctly but is unusable.
    pub error: Option<ProtocolError>,
}

impl ReturnValue {
    fn decode(
        src: &mut Bytes,
        version: TdsVersion,
        plp: &mut PlpResume,
    ) -> Result<Self, ProtocolError> {
        let ordinal = read_u16_le(src)?;
        let name = read_b_varchar(src)?;
        let status = read_u8(src)?;
        if version >= TdsVersion::V7_2 {
            skip(src, 4)?;
        } else {
            skip(src, 2)?;
        }
        let _flags = read_u16_le(src)?;
        let type_info = TypeInfo::decode(src)?;
        let (value, error) = match type_info.read_value_resumable(src, plp) {
            Ok(value) => (value, None),
            Err(e) if e.is_value_scoped() => (None, Some(e)),
            Err(e) => return Err(e),
        };
        Ok(Self {
            ordinal,
            name,
            status,
            type_info,
            value,
            error,
        })
    }
}

// =============================================================================
// Token stream
// =============================================================================

/// Pull-based decoder over a response that may arrive in several packets.
#[derive(Debug)]
pub struct TokenStream {
    buf: Bytes,
    plp: PlpResume,
    metadata: Option<Arc<ColMetaData>>,
    version: TdsVersion,
}

impl TokenStream {
    /// An empty stream decoding for `version`.
    #[must_use]
    pub fn new(version: TdsVersion) -> Self {
        Self::from_bytes(Bytes::new(), version)
    }

    /// A stream over a complete buffer.
    #[must_use]
    pub fn from_bytes(data: Bytes, version: TdsVersion) -> Self {
        Self {
            buf: data,
            plp: PlpResume::default(),
            metadata: None,
            version,
        }
    }

    /// Append the payload of the next packet.
    ///
    /// The buffer grows in place: once a partial token has been moved into
    /// an allocation of its own, later packets are appended to it without
    /// copying what is already there.
    pub fn push(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        if self.buf.is_empty() {
            self.buf = data;
            return;
        }
        // Copies only while the bytes are still shared with handed-out
        // tokens or the packet they arrived in.
        let mut buf = BytesMut::from(std::mem::take(&mut self.buf));
        buf.reserve(data.len());
        buf.extend_from_slice(&data);
        self.buf = buf.freeze();
    }

    /// Undecoded bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Drop undecoded bytes and the current metadata.
    pub fn clear(&mut self) {
        self.buf = Bytes::new();
        self.plp.reset();
        self.metadata = None;
    }

    /// Negotiated version, which decides DONE row-count width.
    #[must_use]
    pub fn version(&self) -> TdsVersion {
        self.version
    }

    /// Switch version after LOGINACK.
    pub fn set_version(&mut self, version: TdsVersion) {
        self.version = version;
    }

    /// Metadata of the current result set.
    #[must_use]
    pub fn metadata(&self) -> Option<&Arc<ColMetaData>> {
        self.metadata.as_ref()
    }

    /// Tag of the next token, if a byte is available.
    #[must_use]
    pub fn peek_token_type(&self) -> Option<Result<TokenType, ProtocolError>> {
        self.buf
            .first()
            .map(|&tag| TokenType::from_u8(tag).ok_or(ProtocolError::InvalidTokenType(tag)))
    }

    /// Decode the next token.
    ///
    /// `Ok(None)` means the buffer is exhausted at a token boundary.
    /// On any error the buffer is left at the start of the failed token.
    pub fn next_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut src = self.buf.clone();
        let mut plp = std::mem::take(&mut self.plp);
        plp.begin(src.len());
        let decoded = self.decode_one(&mut src, &mut plp);
        if matches!(&decoded, Err(e) if e.is_incomplete()) {
            // Keep the walked chunks for the retry after the next push.
            self.plp = plp;
        }
        let token = decoded?;
        self.buf = src;

        if let Token::ColMetaData(meta) = &token {
            self.metadata = Some(Arc::clone(meta));
        }
        Ok(Some(token))
    }

    fn decode_one(&self, src: &mut Bytes, plp: &mut PlpResume) -> Result<Token, ProtocolError> {
        let tag = read_u8(src)?;
        let token_type = TokenType::from_u8(tag).ok_or(ProtocolError::InvalidTokenType(tag))?;
        let version = self.version;

        Ok(match token_type {
            TokenType::ColMetaData => {
                Token::ColMetaData(Arc::new(ColMetaData::decode(src, version)?))
            }
            TokenType::Row => {
                let meta = self.metadata.as_ref().ok_or(ProtocolError::MissingMetadata)?;
                Token::Row(RawRow::decode(src, meta, plp)?)
            }
            TokenType::NbcRow => {
                let meta = self.metadata.as_ref().ok_or(ProtocolError::MissingMetadata)?;
                Token::NbcRow(RawRow::decode_nbc(src, meta, plp)?)
            }
            TokenType::Done => Token::Done(Done::decode(src, version)?),
            TokenType::DoneProc => Token::DoneProc(Done::decode(src, version)?),
            TokenType::DoneInProc => Token::DoneInProc(Done::decode(src, version)?),
            TokenType::Error => Token::Error(ServerMessage::decode(src, version)?),
            TokenType::Info => Token::Info(ServerMessage::decode(src, version)?),
            TokenType::EnvChange => Token::EnvChange(EnvChange::decode(src)?),
            TokenType::LoginAck => Token::LoginAck(LoginAck::decode(src)?),
            TokenType::ReturnStatus => Token::ReturnStatus(read_i32_le(src)?),
            TokenType::ReturnValue => Token::ReturnValue(ReturnValue::decode(src, version, plp)?),
            TokenType::Order => {
                let len = read_u16_le(src)? as usize;
                let mut body = read_bytes(src, len)?;
                let mut columns = Vec::with_capacity(len / 2);
                while body.remaining() >= 2 {
                    columns.push(body.get_u16_le());
                }
                Token::Order(columns)
            }
            TokenType::FeatureExtAck => Token::FeatureExtAck(decode_feature_ext_ack(src)?),
            TokenType::Sspi => {
                let len = read_u16_le(src)? as usize;
                Token::Sspi(read_bytes(src, len)?)
            }
            TokenType::TabName | TokenType::ColInfo => {
                let len = read_u16_le(src)? as usize;
                tracing::trace!(?token_type, len, "skipping token");
                Token::Opaque {
                    token_type,
                    data: read_bytes(src, len)?,
                }
            }
            TokenType::SessionState | TokenType::FedAuthInfo => {
                let len = read_u32_le(src)? as usize;
                tracing::trace!(?token_type, len, "skipping token");
                Token::Opaque {
                    token_type,
                    data: read_bytes(src, len)?,
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{write_b_varchar, write_us_varchar};

    fn int_column(buf: &mut BytesMut, name: &str, nullable: bool) {
        buf.put_u32_le(0);
        buf.put_u16_le(u16::from(nullable));
        buf.put_u8(TypeId::IntN as u8);
        buf.put_u8(4);
        write_b_varchar(buf, name);
    }

    fn metadata_and_rows() -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(0x81);
        buf.put_u16_le(2);
        int_column(&mut buf, "id", false);
        buf.put_u32_le(0);
        buf.put_u16_le(1);
        buf.put_u8(TypeId::NVarChar as u8);
        buf.put_u16_le(100);
        buf.put_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
        write_b_varchar(&mut buf, "name");

        buf.put_u8(0xD1);
        buf.put_slice(&[4, 1, 0, 0, 0]);
        buf.put_u16_le(4);
        buf.put_slice(&[b'h', 0, b'i', 0]);

        // NBC row: second column NULL.
        buf.put_u8(0xD2);
        buf.put_u8(0b0000_0010);
        buf.put_slice(&[4, 2, 0, 0, 0]);

        buf.put_u8(0xFD);
        Done {
            status: DoneStatus::COUNT,
            cur_cmd: 0xC1,
            row_count: 2,
        }
        .encode(&mut buf);
        buf.freeze()
    }

    fn collect(stream: &mut TokenStream) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = stream.next_token().unwrap() {
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn test_metadata_rows_done() {
        let mut stream = TokenStream::from_bytes(metadata_and_rows(), TdsVersion::V7_4);
        let tokens = collect(&mut stream);
        assert_eq!(tokens.len(), 4);

        let Token::ColMetaData(meta) = &tokens[0] else {
            panic!("expected metadata");
        };
        assert_eq!(meta.columns[0].name, "id");
        assert!(!meta.columns[0].is_nullable());
        assert!(meta.columns[1].is_nullable());

        let Token::Row(row) = &tokens[1] else {
            panic!("expected row");
        };
        assert_eq!(row.values[0].as_deref(), Some(&[1, 0, 0, 0][..]));
        assert_eq!(row.values[1].as_deref(), Some(&[b'h', 0, b'i', 0][..]));

        let Token::NbcRow(row) = &tokens[2] else {
            panic!("expected nbc row");
        };
        assert_eq!(row.values[1], None);

        let Token::Done(done) = &tokens[3] else {
            panic!("expected done");
        };
        assert_eq!(done.rows(), Some(2));
        assert!(!done.has_more());
    }

    #[test]
    fn test_split_across_packets_matches_whole() {
        let whole = metadata_and_rows();
        let mut expected = TokenStream::from_bytes(whole.clone(), TdsVersion::V7_4);
        let expected = collect(&mut expected);

        let mut stream = TokenStream::new(TdsVersion::V7_4);
        let mut tokens = Vec::new();
        for piece in [whole.slice(..7), whole.slice(7..30), whole.slice(30..)] {
            stream.push(piece);
            loop {
                match stream.next_token() {
                    Ok(Some(token)) => tokens.push(token),
                    Ok(None) | Err(ProtocolError::UnexpectedEof) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }
        assert_eq!(tokens, expected);
        assert_eq!(stream.remaining(), 0);
    }

    fn blob_column(buf: &mut BytesMut, name: &str) {
        buf.put_u32_le(0);
        buf.put_u16_le(1);
        buf.put_u8(TypeId::BigVarBinary as u8);
        buf.put_u16_le(0xFFFF);
        write_b_varchar(buf, name);
    }

    fn blob_rows(values: &[(u64, &[&[u8]])]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(0x81);
        buf.put_u16_le(2);
        blob_column(&mut buf, "a");
        blob_column(&mut buf, "b");
        for pair in values.chunks(2) {
            buf.put_u8(0xD1);
            for (total, chunks) in pair {
                buf.put_u64_le(*total);
                for chunk in *chunks {
                    buf.put_u32_le(chunk.len() as u32);
                    buf.put_slice(chunk);
                }
                buf.put_u32_le(0);
            }
        }
        buf.freeze()
    }

    #[test]
    fn test_plp_value_across_many_packets() {
        let value: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let chunks: Vec<&[u8]> = value.chunks(100).collect();
        let whole = blob_rows(&[(value.len() as u64, chunks.as_slice()), (1, &[&b"z"[..]])]);

        let mut stream = TokenStream::new(TdsVersion::V7_4);
        let mut tokens = Vec::new();
        let mut packets = 0;
        let mut resumed_packets = 0;
        let mut max_resumed = 0;
        for piece in whole.chunks(50) {
            stream.push(Bytes::copy_from_slice(piece));
            packets += 1;
            loop {
                match stream.next_token() {
                    Ok(Some(token)) => tokens.push(token),
                    Ok(None) | Err(ProtocolError::UnexpectedEof) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            if let Some(walked) = stream.plp.pending() {
                resumed_packets += 1;
                max_resumed = max_resumed.max(walked);
            }
        }

        assert!(packets >= 1000);
        assert!(resumed_packets >= 1000);
        assert!(max_resumed > value.len() / 2);
        assert_eq!(stream.remaining(), 0);
        assert_eq!(stream.plp.pending(), None);
        let [Token::ColMetaData(_), Token::Row(row)] = tokens.as_slice() else {
            panic!("expected metadata and one row, got {tokens:?}");
        };
        assert_eq!(row.values[0].as_deref(), Some(value.as_slice()));
        assert_eq!(row.values[1].as_deref(), Some(&b"z"[..]));
        assert!(row.errors.is_empty());
    }

    #[test]
    fn test_plp_length_mismatch_keeps_stream_in_step() {
        let mut buf = BytesMut::from(&blob_rows(&[(10, &[&b"abc"[..]]), (2, &[&b"ok"[..]])])[..]);
        buf.put_u8(0xFD);
        Done::default().encode(&mut buf);

        let mut stream = TokenStream::from_bytes(buf.freeze(), TdsVersion::V7_4);
        let tokens = collect(&mut stream);
        assert_eq!(tokens.len(), 3);
        let Token::Row(row) = &tokens[1] else {
            panic!("expected row");
        };
        assert_eq!(row.values[0], None);
        assert_eq!(row.values[1].as_deref(), Some(&b"ok"[..]));
        assert_eq!(
            row.errors,
            vec![(
                0,
                ProtocolError::PlpLengthMismatch {
                    announced: 10,
                    received: 3
                }
            )]
        );
        assert!(matches!(tokens[2], Token::Done(_)));
    }

    #[test]
    fn test_eof_leaves_buffer_untouched() {
        let whole = metadata_and_rows();
        let mut stream = TokenStream::from_bytes(whole.slice(..10), TdsVersion::V7_4);
        assert_eq!(stream.next_token(), Err(ProtocolError::UnexpectedEof));
        assert_eq!(stream.remaining(), 10);
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let mut stream = TokenStream::from_bytes(Bytes::from_static(&[0x42, 0, 0]), TdsVersion::V7_4);
        assert_eq!(stream.next_token(), Err(ProtocolError::InvalidTokenType(0x42)));
    }

    #[test]
    fn test_row_without_metadata() {
        let mut stream = TokenStream::from_bytes(Bytes::from_static(&[0xD1, 0]), TdsVersion::V7_4);
        assert_eq!(stream.next_token(), Err(ProtocolError::MissingMetadata));
    }

    #[test]
    fn test_done_row_count_width() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xFD);
        buf.put_u16_le(0x0011);
        buf.put_u16_le(0);
        buf.put_u32_le(7);
        let mut stream = TokenStream::from_bytes(buf.freeze(), TdsVersion::V7_1);
        let Some(Token::Done(done)) = stream.next_token().unwrap() else {
            panic!("expected done");
        };
        assert_eq!(done.rows(), Some(7));
        assert!(done.has_more());
    }

    #[test]
    fn test_error_token() {
        let mut body = BytesMut::new();
        body.put_i32_le(208);
        body.put_u8(1);
        body.put_u8(16);
        write_us_varchar(&mut body, "Invalid object name 'x'.");
        write_b_varchar(&mut body, "srv");
        write_b_varchar(&mut body, "");
        body.put_i32_le(3);

        let mut buf = BytesMut::new();
        buf.put_u8(0xAA);
        buf.put_u16_le(body.len() as u16);
        buf.put_slice(&body);

        let mut stream = TokenStream::from_bytes(buf.freeze(), TdsVersion::V7_4);
        let Some(Token::Error(err)) = stream.next_token().unwrap() else {
            panic!("expected error");
        };
        assert_eq!(err.number, 208);
        assert_eq!(err.class, 16);
        assert_eq!(err.message, "Invalid object name 'x'.");
        assert_eq!(err.line, 3);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_env_changes() {
        let mut body = BytesMut::new();
        body.put_u8(4);
        write_b_varchar(&mut body, "8192");
        write_b_varchar(&mut body, "4096");
        let mut buf = BytesMut::new();
        buf.put_u8(0xE3);
        buf.put_u16_le(body.len() as u16);
        buf.put_slice(&body);

        let mut body = BytesMut::new();
        body.put_u8(8);
        body.put_u8(8);
        body.put_u64_le(0xABCD);
        body.put_u8(0);
        buf.put_u8(0xE3);
        buf.put_u16_le(body.len() as u16);
        buf.put_slice(&body);

        let mut body = BytesMut::new();
        body.put_u8(20);
        body.put_u16_le(13);
        body.put_u8(0);
        body.put_u16_le(1444);
        write_us_varchar(&mut body, "node2");
        body.put_u16_le(0);
        buf.put_u8(0xE3);
        buf.put_u16_le(body.len() as u16);
        buf.put_slice(&body);

        let mut stream = TokenStream::from_bytes(buf.freeze(), TdsVersion::V7_4);
        let tokens = collect(&mut stream);
        assert_eq!(
            tokens,
            vec![
                Token::EnvChange(EnvChange::PacketSize { new: 8192, old: 4096 }),
                Token::EnvChange(EnvChange::BeginTransaction(0xABCD)),
                Token::EnvChange(EnvChange::Routing {
                    host: "node2".into(),
                    port: 1444
                }),
            ]
        );
    }

    #[test]
    fn test_login_ack() {
        let mut body = BytesMut::new();
        body.put_u8(1);
        body.put_u32(0x7400_0004);
        write_b_varchar(&mut body, "Microsoft SQL Server");
        body.put_slice(&[16, 0, 0x03, 0xE8]);
        let mut buf = BytesMut::new();
        buf.put_u8(0xAD);
        buf.put_u16_le(body.len() as u16);
        buf.put_slice(&body);

        let mut stream = TokenStream::from_bytes(buf.freeze(), TdsVersion::V7_4);
        let Some(Token::LoginAck(ack)) = stream.next_token().unwrap() else {
            panic!("expected loginack");
        };
        assert_eq!(ack.tds_version, TdsVersion::V7_4);
        assert_eq!(ack.prog_version, (16, 0, 1000));
    }
}
