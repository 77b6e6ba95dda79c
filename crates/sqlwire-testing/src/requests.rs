//! Server-side decoding of client messages, and the log of what arrived.

use std::sync::Arc;

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use sqlwire_protocol::codec::{
    read_b_varchar, read_bytes, read_u8, read_u16_le, read_u32_le, read_utf16_string, skip,
};
use sqlwire_protocol::{PacketType, PreLogin, ProtocolError, TypeInfo};
use sqlwire_types::{SqlValue, decode_utf16_string, decode_value};

use crate::mock_server::MockServerError;

/// Fields of a LOGIN7 message as the server saw them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginRecord {
    /// Requested TDS version.
    pub tds_version: u32,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client host name.
    pub hostname: String,
    /// Login name.
    pub username: String,
    /// Password after undoing the scramble.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial database.
    pub database: String,
    /// Whether integrated security was requested.
    pub integrated_security: bool,
    /// First SSPI blob.
    pub sspi: Vec<u8>,
}

/// A request received after login.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// A SQL batch.
    SqlBatch {
        /// SQL text.
        sql: String,
        /// Transaction descriptor from ALL_HEADERS.
        transaction: u64,
    },
    /// A remote procedure call.
    Rpc {
        /// Procedure name, or `#id` for well-known procedures.
        procedure: String,
        /// The `@stmt` of `sp_executesql`, empty for other procedures.
        sql: String,
        /// Bound parameter values after the statement and declarations.
        params: Vec<SqlValue>,
        /// Parameter declarations.
        declarations: String,
        /// Transaction descriptor from ALL_HEADERS.
        transaction: u64,
    },
    /// An Attention signal.
    Attention,
}

impl Request {
    /// The SQL text the response is looked up by.
    pub fn sql(&self) -> &str {
        match self {
            Self::SqlBatch { sql, .. } | Self::Rpc { sql, .. } => sql,
            Self::Attention => "",
        }
    }
}

/// Packet-level shape of one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Message type.
    pub packet_type: PacketType,
    /// Number of packets the message spanned.
    pub packets: usize,
    /// Largest packet, header included.
    pub largest_packet: usize,
}

#[derive(Debug, Default)]
struct LogInner {
    prelogins: Vec<PreLogin>,
    logins: Vec<LoginRecord>,
    sspi: Vec<Vec<u8>>,
    requests: Vec<Request>,
    frames: Vec<FrameInfo>,
}

/// Everything the mock server received, shared across its connections.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    inner: Arc<Mutex<LogInner>>,
}

impl RequestLog {
    pub(crate) fn prelogin(&self, prelogin: PreLogin) {
        self.inner.lock().prelogins.push(prelogin);
    }

    pub(crate) fn login(&self, login: LoginRecord) {
        self.inner.lock().logins.push(login);
    }

    pub(crate) fn sspi_response(&self, blob: Vec<u8>) {
        self.inner.lock().sspi.push(blob);
    }

    pub(crate) fn request(&self, request: Request) {
        self.inner.lock().requests.push(request);
    }

    pub(crate) fn frame(&self, frame: FrameInfo) {
        self.inner.lock().frames.push(frame);
    }

    /// PRELOGIN messages received.
    pub fn prelogins(&self) -> Vec<PreLogin> {
        self.inner.lock().prelogins.clone()
    }

    /// LOGIN7 messages received.
    pub fn logins(&self) -> Vec<LoginRecord> {
        self.inner.lock().logins.clone()
    }

    /// SSPI blobs the client answered challenges with.
    pub fn sspi_responses(&self) -> Vec<Vec<u8>> {
        self.inner.lock().sspi.clone()
    }

    /// Requests received after login.
    pub fn requests(&self) -> Vec<Request> {
        self.inner.lock().requests.clone()
    }

    /// SQL text of every batch and RPC, in arrival order.
    pub fn statements(&self) -> Vec<String> {
        self.inner
            .lock()
            .requests
            .iter()
            .filter(|r| !matches!(r, Request::Attention))
            .map(|r| r.sql().to_owned())
            .collect()
    }

    /// Number of Attention signals received.
    pub fn attention_count(&self) -> usize {
        self.inner
            .lock()
            .requests
            .iter()
            .filter(|r| matches!(r, Request::Attention))
            .count()
    }

    /// Packet shape of every message received.
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.inner.lock().frames.clone()
    }
}

/// Undo the LOGIN7 password scramble.
pub fn unscramble_password(scrambled: &[u8]) -> Vec<u8> {
    scrambled
        .iter()
        .map(|b| {
            let x = b ^ 0xA5;
            x.rotate_left(4)
        })
        .collect()
}

fn utf16(bytes: &[u8]) -> Result<String, MockServerError> {
    decode_utf16_string(bytes).map_err(|e| MockServerError::Unexpected(e.to_string()))
}

/// Decode a LOGIN7 payload.
pub fn parse_login7(payload: &[u8]) -> Result<LoginRecord, MockServerError> {
    const HEADER: usize = 94;
    if payload.len() < HEADER {
        return Err(ProtocolError::IncompletePacket {
            expected: HEADER,
            actual: payload.len(),
        }
        .into());
    }

    let u16_at = |at: usize| u16::from_le_bytes([payload[at], payload[at + 1]]) as usize;
    let u32_at = |at: usize| {
        u32::from_le_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
    };
    let field = |at: usize, unit: usize| -> Result<&[u8], MockServerError> {
        let offset = u16_at(at);
        let len = u16_at(at + 2) * unit;
        payload
            .get(offset..offset + len)
            .ok_or_else(|| MockServerError::Unexpected(format!("login field at {at} out of range")))
    };

    let option_flags2 = payload[25];
    let password = unscramble_password(field(44, 2)?);

    Ok(LoginRecord {
        tds_version: u32_at(4),
        packet_size: u32_at(8),
        hostname: utf16(field(36, 2)?)?,
        username: utf16(field(40, 2)?)?,
        password: utf16(&password)?,
        app_name: utf16(field(48, 2)?)?,
        server_name: utf16(field(52, 2)?)?,
        library_name: utf16(field(60, 2)?)?,
        database: utf16(field(68, 2)?)?,
        integrated_security: option_flags2 & 0x80 != 0,
        sspi: field(78, 1)?.to_vec(),
    })
}

fn read_all_headers(src: &mut Bytes) -> Result<u64, ProtocolError> {
    let total = read_u32_le(src)? as usize;
    let mut headers = read_bytes(src, total.saturating_sub(4))?;
    let mut transaction = 0;
    while headers.has_remaining() {
        let len = read_u32_le(&mut headers)? as usize;
        let kind = read_u16_le(&mut headers)?;
        if kind == 0x0002 && headers.remaining() >= 8 {
            transaction = headers.get_u64_le();
            skip(&mut headers, len.saturating_sub(14))?;
        } else {
            skip(&mut headers, len.saturating_sub(6))?;
        }
    }
    Ok(transaction)
}

/// Decode a SQL batch payload.
pub fn parse_sql_batch(payload: Bytes) -> Result<Request, MockServerError> {
    let mut src = payload;
    let transaction = read_all_headers(&mut src)?;
    Ok(Request::SqlBatch {
        sql: utf16(&src)?,
        transaction,
    })
}

/// Decode an RPC payload, unpacking `sp_executesql`.
pub fn parse_rpc(payload: Bytes) -> Result<Request, MockServerError> {
    let mut src = payload;
    let transaction = read_all_headers(&mut src)?;

    let name_len = read_u16_le(&mut src)?;
    let procedure = if name_len == 0xFFFF {
        format!("#{}", read_u16_le(&mut src)?)
    } else {
        read_utf16_string(&mut src, name_len as usize)?
    };
    let _options = read_u16_le(&mut src)?;

    let mut values = Vec::new();
    while src.has_remaining() {
        let _name = read_b_varchar(&mut src)?;
        let _status = read_u8(&mut src)?;
        let type_info = TypeInfo::decode(&mut src)?;
        let raw = type_info.read_value(&mut src)?;
        values.push(decode_value(&type_info, raw.as_ref())?);
    }

    let is_execute_sql = procedure == "#10" || procedure.eq_ignore_ascii_case("sp_executesql");
    if !is_execute_sql {
        return Ok(Request::Rpc {
            procedure,
            sql: String::new(),
            params: values,
            declarations: String::new(),
            transaction,
        });
    }

    let mut values = values.into_iter();
    let text = |value: Option<SqlValue>| match value {
        Some(SqlValue::String(s)) => s,
        _ => String::new(),
    };
    let sql = text(values.next());
    let declarations = text(values.next());
    Ok(Request::Rpc {
        procedure,
        sql,
        params: values.collect(),
        declarations,
        transaction,
    })
}
