//! Server-side token encoding.
//!
//! [`TokenWriter`] is the inverse of the client's token decoder: it builds
//! the body of a TabularResult message one token at a time.

use bytes::{BufMut, Bytes, BytesMut};
use sqlwire_protocol::codec::{utf16_byte_len, write_b_varchar, write_us_varchar};
use sqlwire_protocol::token::{DoneStatus, EnvChange, LoginAck, ServerMessage, TokenType};
use sqlwire_protocol::types::{ColumnFlags, ValueFraming};
use sqlwire_protocol::{Collation, MAX_LENGTH_PLP, TdsVersion, TypeId, TypeInfo};
use sqlwire_types::{SqlValue, TypeError};

/// DONE current-command value for SELECT.
pub const CMD_SELECT: u16 = 0xC1;

/// DONE current-command value for INSERT.
pub const CMD_INSERT: u16 = 0xC3;

/// Column definition of a mock result set.
#[derive(Debug, Clone)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub type_info: TypeInfo,
    /// Whether the column is nullable.
    pub nullable: bool,
    /// Split PLP values into chunks of this many bytes.
    pub plp_chunk_size: Option<usize>,
}

impl MockColumn {
    /// A column of the given type.
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            type_info,
            nullable: true,
            plp_chunk_size: None,
        }
    }

    /// The column a server would describe for `value`.
    pub fn for_value(name: impl Into<String>, value: &SqlValue) -> Result<Self, TypeError> {
        Ok(Self::new(name, value.to_param()?.type_info))
    }

    /// An INT column.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::IntN, 4))
    }

    /// A BIGINT column.
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::IntN, 8))
    }

    /// A non-nullable INT column, sent with the fixed-width type.
    pub fn int_not_null(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::Int4, 4)).with_nullable(false)
    }

    /// A BIT column.
    pub fn bit(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::BitN, 1))
    }

    /// A FLOAT column.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::FloatN, 8))
    }

    /// A DECIMAL(precision, scale) column.
    pub fn decimal(name: impl Into<String>, precision: u8, scale: u8) -> Self {
        Self::new(
            name,
            TypeInfo::new(TypeId::DecimalN, 17).with_precision_scale(precision, scale),
        )
    }

    /// An NVARCHAR(chars) column.
    pub fn nvarchar(name: impl Into<String>, chars: u32) -> Self {
        Self::new(
            name,
            TypeInfo::new(TypeId::NVarChar, chars * 2).with_collation(Collation::default()),
        )
    }

    /// An NVARCHAR(MAX) column.
    pub fn nvarchar_max(name: impl Into<String>) -> Self {
        Self::new(
            name,
            TypeInfo::new(TypeId::NVarChar, MAX_LENGTH_PLP).with_collation(Collation::default()),
        )
    }

    /// A VARBINARY(MAX) column.
    pub fn varbinary_max(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::BigVarBinary, MAX_LENGTH_PLP))
    }

    /// A UNIQUEIDENTIFIER column.
    pub fn uniqueidentifier(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::Guid, 16))
    }

    /// A DATETIME2(scale) column.
    pub fn datetime2(name: impl Into<String>, scale: u8) -> Self {
        let len = match scale {
            0..=2 => 6,
            3..=4 => 7,
            _ => 8,
        };
        Self::new(name, TypeInfo::new(TypeId::DateTime2, len).with_scale(scale))
    }

    /// Set the nullable flag.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Send PLP values in chunks of `size` bytes.
    #[must_use]
    pub fn with_plp_chunks(mut self, size: usize) -> Self {
        self.plp_chunk_size = Some(size.max(1));
        self
    }
}

/// Builds a TabularResult payload.
#[derive(Debug, Clone)]
pub struct TokenWriter {
    buf: BytesMut,
    version: TdsVersion,
}

impl Default for TokenWriter {
    fn default() -> Self {
        Self::new(TdsVersion::V7_4)
    }
}

impl TokenWriter {
    /// An empty payload encoded for `version`.
    pub fn new(version: TdsVersion) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            version,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the payload, leaving the writer empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Finish the payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Append pre-encoded bytes.
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    fn wide(&self) -> bool {
        self.version.has_64bit_row_count()
    }

    fn with_u16_len(&mut self, tag: TokenType, body: impl FnOnce(&mut BytesMut)) -> &mut Self {
        let mut data = BytesMut::new();
        body(&mut data);
        self.buf.put_u8(tag as u8);
        self.buf.put_u16_le(data.len() as u16);
        self.buf.put_slice(&data);
        self
    }

    /// COLMETADATA for `columns`.
    pub fn col_metadata(&mut self, columns: &[MockColumn]) -> &mut Self {
        self.buf.put_u8(TokenType::ColMetaData as u8);
        if columns.is_empty() {
            self.buf.put_u16_le(0xFFFF);
            return self;
        }
        self.buf.put_u16_le(columns.len() as u16);
        for col in columns {
            if self.wide() {
                self.buf.put_u32_le(0);
            } else {
                self.buf.put_u16_le(0);
            }
            let flags = if col.nullable {
                ColumnFlags::NULLABLE
            } else {
                ColumnFlags::empty()
            };
            self.buf.put_u16_le(flags.bits());
            col.type_info.encode(&mut self.buf);
            if matches!(
                col.type_info.type_id,
                TypeId::Text | TypeId::NText | TypeId::Image
            ) {
                // no table name parts
                self.buf.put_u8(0);
            }
            write_b_varchar(&mut self.buf, &col.name);
        }
        self
    }

    /// ROW with one value per column.
    pub fn row(&mut self, columns: &[MockColumn], values: &[SqlValue]) -> Result<&mut Self, TypeError> {
        self.buf.put_u8(TokenType::Row as u8);
        for (col, value) in columns.iter().zip(values) {
            let bytes = value_bytes(value)?;
            self.value(col, bytes.as_deref());
        }
        Ok(self)
    }

    /// NBCROW: NULL columns are flagged in the bitmap and omitted.
    pub fn nbc_row(
        &mut self,
        columns: &[MockColumn],
        values: &[SqlValue],
    ) -> Result<&mut Self, TypeError> {
        self.buf.put_u8(TokenType::NbcRow as u8);
        let mut bitmap = vec![0u8; columns.len().div_ceil(8)];
        for (i, value) in values.iter().enumerate().take(columns.len()) {
            if value.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        self.buf.put_slice(&bitmap);
        for (col, value) in columns.iter().zip(values) {
            if !value.is_null() {
                let bytes = value_bytes(value)?;
                self.value(col, bytes.as_deref());
            }
        }
        Ok(self)
    }

    fn value(&mut self, col: &MockColumn, value: Option<&[u8]>) {
        match (col.type_info.framing(), value) {
            (ValueFraming::TextPtr, None) => self.buf.put_u8(0),
            (ValueFraming::TextPtr, Some(data)) => {
                self.buf.put_u8(16);
                self.buf.put_slice(&[0u8; 16]);
                self.buf.put_slice(&[0u8; 8]);
                self.buf.put_u32_le(data.len() as u32);
                self.buf.put_slice(data);
            }
            (ValueFraming::Plp, Some(data)) if col.plp_chunk_size.is_some() => {
                let size = col.plp_chunk_size.unwrap_or(data.len().max(1));
                self.buf.put_u64_le(data.len() as u64);
                for chunk in data.chunks(size) {
                    self.buf.put_u32_le(chunk.len() as u32);
                    self.buf.put_slice(chunk);
                }
                self.buf.put_u32_le(0);
            }
            (_, value) => col.type_info.write_value(&mut self.buf, value),
        }
    }

    fn done_token(&mut self, tag: TokenType, status: DoneStatus, cur_cmd: u16, rows: u64) -> &mut Self {
        self.buf.put_u8(tag as u8);
        self.buf.put_u16_le(status.bits());
        self.buf.put_u16_le(cur_cmd);
        if self.wide() {
            self.buf.put_u64_le(rows);
        } else {
            self.buf.put_u32_le(rows as u32);
        }
        self
    }

    /// DONE.
    pub fn done(&mut self, status: DoneStatus, cur_cmd: u16, rows: u64) -> &mut Self {
        self.done_token(TokenType::Done, status, cur_cmd, rows)
    }

    /// DONEINPROC.
    pub fn done_in_proc(&mut self, status: DoneStatus, cur_cmd: u16, rows: u64) -> &mut Self {
        self.done_token(TokenType::DoneInProc, status, cur_cmd, rows)
    }

    /// DONEPROC.
    pub fn done_proc(&mut self, status: DoneStatus, rows: u64) -> &mut Self {
        self.done_token(TokenType::DoneProc, status, 0, rows)
    }

    /// ERROR.
    pub fn error(&mut self, message: &ServerMessage) -> &mut Self {
        self.message(TokenType::Error, message)
    }

    /// INFO.
    pub fn info(&mut self, message: &ServerMessage) -> &mut Self {
        self.message(TokenType::Info, message)
    }

    fn message(&mut self, tag: TokenType, msg: &ServerMessage) -> &mut Self {
        let wide = self.wide();
        self.with_u16_len(tag, |body| {
            body.put_i32_le(msg.number);
            body.put_u8(msg.state);
            body.put_u8(msg.class);
            write_us_varchar(body, &msg.message);
            write_b_varchar(body, &msg.server);
            write_b_varchar(body, &msg.procedure);
            if wide {
                body.put_i32_le(msg.line);
            } else {
                body.put_u16_le(msg.line as u16);
            }
        })
    }

    /// ENVCHANGE.
    pub fn env_change(&mut self, change: &EnvChange) -> &mut Self {
        self.with_u16_len(TokenType::EnvChange, |body| match change {
            EnvChange::Database { new, old } => {
                body.put_u8(1);
                write_b_varchar(body, new);
                write_b_varchar(body, old);
            }
            EnvChange::Language { new, old } => {
                body.put_u8(2);
                write_b_varchar(body, new);
                write_b_varchar(body, old);
            }
            EnvChange::CharacterSet(new) => {
                body.put_u8(3);
                write_b_varchar(body, new);
                write_b_varchar(body, "");
            }
            EnvChange::PacketSize { new, old } => {
                body.put_u8(4);
                write_b_varchar(body, &new.to_string());
                write_b_varchar(body, &old.to_string());
            }
            EnvChange::Collation(collation) => {
                body.put_u8(7);
                match collation {
                    Some(c) => {
                        body.put_u8(Collation::SIZE as u8);
                        c.encode(body);
                    }
                    None => body.put_u8(0),
                }
                body.put_u8(0);
            }
            EnvChange::BeginTransaction(descriptor) => {
                body.put_u8(8);
                body.put_u8(8);
                body.put_u64_le(*descriptor);
                body.put_u8(0);
            }
            EnvChange::CommitTransaction(descriptor) | EnvChange::RollbackTransaction(descriptor) => {
                body.put_u8(if matches!(change, EnvChange::CommitTransaction(_)) {
                    9
                } else {
                    10
                });
                body.put_u8(0);
                body.put_u8(8);
                body.put_u64_le(*descriptor);
            }
            EnvChange::ResetConnection => {
                body.put_u8(18);
                body.put_u8(0);
                body.put_u8(0);
            }
            EnvChange::Routing { host, port } => {
                body.put_u8(20);
                body.put_u16_le((1 + 2 + 2 + utf16_byte_len(host)) as u16);
                // protocol: TCP
                body.put_u8(0);
                body.put_u16_le(*port);
                write_us_varchar(body, host);
                body.put_u16_le(0);
            }
            EnvChange::Other(env_type) => {
                body.put_u8(*env_type);
                body.put_u8(0);
                body.put_u8(0);
            }
        })
    }

    /// LOGINACK.
    pub fn login_ack(&mut self, ack: &LoginAck) -> &mut Self {
        self.with_u16_len(TokenType::LoginAck, |body| {
            body.put_u8(ack.interface);
            body.put_u32(ack.tds_version.raw());
            write_b_varchar(body, &ack.prog_name);
            body.put_u8(ack.prog_version.0);
            body.put_u8(ack.prog_version.1);
            body.put_u16(ack.prog_version.2);
        })
    }

    /// RETURNSTATUS.
    pub fn return_status(&mut self, status: i32) -> &mut Self {
        self.buf.put_u8(TokenType::ReturnStatus as u8);
        self.buf.put_i32_le(status);
        self
    }

    /// RETURNVALUE for an output parameter.
    pub fn return_value(
        &mut self,
        ordinal: u16,
        name: &str,
        value: &SqlValue,
    ) -> Result<&mut Self, TypeError> {
        let param = value.to_param()?;
        self.buf.put_u8(TokenType::ReturnValue as u8);
        self.buf.put_u16_le(ordinal);
        write_b_varchar(&mut self.buf, name);
        // output parameter
        self.buf.put_u8(0x01);
        if self.wide() {
            self.buf.put_u32_le(0);
        } else {
            self.buf.put_u16_le(0);
        }
        self.buf.put_u16_le(ColumnFlags::NULLABLE.bits());
        param.type_info.encode(&mut self.buf);
        param
            .type_info
            .write_value(&mut self.buf, param.value.as_deref());
        Ok(self)
    }

    /// SSPI challenge.
    pub fn sspi(&mut self, blob: &[u8]) -> &mut Self {
        self.buf.put_u8(TokenType::Sspi as u8);
        self.buf.put_u16_le(blob.len() as u16);
        self.buf.put_slice(blob);
        self
    }
}

fn value_bytes(value: &SqlValue) -> Result<Option<Bytes>, TypeError> {
    if value.is_null() {
        return Ok(None);
    }
    Ok(value.to_param()?.value)
}
