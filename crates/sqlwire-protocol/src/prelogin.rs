//! PRELOGIN message encoding, decoding and encryption negotiation.
//!
//! PRELOGIN is the first exchange on every connection. The payload is an
//! option table of `(token, offset, length)` entries closed by `0xFF`,
//! followed by the option data the offsets point into. Offsets are absolute
//! from the start of the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{need, read_u8};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Pre-login option tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name.
    Instance = 0x02,
    /// Client thread ID.
    ThreadId = 0x03,
    /// MARS flag.
    Mars = 0x04,
    /// Trace ID.
    TraceId = 0x05,
    /// Federated authentication required.
    FedAuthRequired = 0x06,
    /// Nonce.
    Nonce = 0x07,
    /// End of option table.
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Map a raw token; `None` for tokens this client does not know.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Version),
            0x01 => Some(Self::Encryption),
            0x02 => Some(Self::Instance),
            0x03 => Some(Self::ThreadId),
            0x04 => Some(Self::Mars),
            0x05 => Some(Self::TraceId),
            0x06 => Some(Self::FedAuthRequired),
            0x07 => Some(Self::Nonce),
            0xFF => Some(Self::Terminator),
            _ => None,
        }
    }
}

/// Encryption capability announced in PRELOGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt the login packet only.
    Off = 0x00,
    /// Encryption is available and wanted.
    #[default]
    On = 0x01,
    /// Encryption is not available.
    NotSupported = 0x02,
    /// Encryption is mandatory.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Decode the ENCRYPTION option byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::On),
            0x02 => Ok(Self::NotSupported),
            0x03 => Ok(Self::Required),
            other => Err(ProtocolError::InvalidEncryptionLevel(other)),
        }
    }

    /// Combine the client request with the server's answer.
    ///
    /// Returns `None` when one side insists on encryption the other side
    /// cannot provide. The result is one of `Off` (login-only TLS),
    /// `On` (full TLS) or `NotSupported` (no TLS).
    #[must_use]
    pub const fn negotiate(client: Self, server: Self) -> Option<Self> {
        use EncryptionLevel::{NotSupported, Off, On, Required};
        match (client, server) {
            (Off, Off) => Some(Off),
            (Off | On | Required, On | Required) => Some(On),
            (On | Required, Off) => Some(On),
            (Off, NotSupported) | (NotSupported, Off | NotSupported) => Some(NotSupported),
            (On | Required, NotSupported) | (NotSupported, On | Required) => None,
        }
    }

    /// Whether a TLS handshake happens at all for this effective level.
    #[must_use]
    pub const fn uses_tls(self) -> bool {
        !matches!(self, Self::NotSupported)
    }

    /// Whether TLS stays in place after login.
    #[must_use]
    pub const fn is_full_session(self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// Server product version reported in the PRELOGIN response.
///
/// Unlike the client's request, the server's VERSION option is the product
/// version (e.g. 16.0.1000), not a TDS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Build number.
    pub build: u16,
    /// Sub-build number.
    pub sub_build: u16,
}

impl core::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.sub_build)
    }
}

/// Trace identifier carried in the TRACEID option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceId {
    /// Client connection ID (GUID bytes).
    pub connection_id: [u8; 16],
    /// Activity ID (GUID bytes).
    pub activity_id: [u8; 16],
    /// Activity sequence number.
    pub activity_sequence: u32,
}

/// PRELOGIN message, used for both the request and the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreLogin {
    /// Requested TDS version (client to server).
    pub version: TdsVersion,
    /// Product version (server to client).
    pub server_version: Option<ServerVersion>,
    /// Encryption level.
    pub encryption: EncryptionLevel,
    /// Instance name.
    pub instance: Option<String>,
    /// Client thread ID.
    pub thread_id: Option<u32>,
    /// MARS requested or granted.
    pub mars: bool,
    /// Trace identifier.
    pub trace_id: Option<TraceId>,
    /// Federated authentication required.
    pub fed_auth_required: bool,
    /// Nonce.
    pub nonce: Option<[u8; 32]>,
}

impl Default for PreLogin {
    fn default() -> Self {
        Self::new()
    }
}

impl PreLogin {
    /// A request for TDS 7.4 with encryption `On` and MARS off.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: TdsVersion::V7_4,
            server_version: None,
            encryption: EncryptionLevel::On,
            instance: None,
            thread_id: None,
            mars: false,
            trace_id: None,
            fed_auth_required: false,
            nonce: None,
        }
    }

    /// Set the requested TDS version.
    #[must_use]
    pub fn with_version(mut self, version: TdsVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the encryption level.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the client thread ID.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Set the trace identifier.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Encode as a client request.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut entries: Vec<(PreLoginOption, BytesMut)> = Vec::with_capacity(8);

        let mut version = BytesMut::with_capacity(6);
        match self.server_version {
            Some(sv) => {
                version.put_u8(sv.major);
                version.put_u8(sv.minor);
                version.put_u16(sv.build);
                version.put_u16_le(sv.sub_build);
            }
            None => {
                version.put_u32(self.version.raw());
                version.put_u16_le(0);
            }
        }
        entries.push((PreLoginOption::Version, version));

        let mut encryption = BytesMut::with_capacity(1);
        encryption.put_u8(self.encryption as u8);
        entries.push((PreLoginOption::Encryption, encryption));

        if let Some(instance) = &self.instance {
            let mut data = BytesMut::with_capacity(instance.len() + 1);
            data.put_slice(instance.as_bytes());
            data.put_u8(0);
            entries.push((PreLoginOption::Instance, data));
        }

        if let Some(thread_id) = self.thread_id {
            let mut data = BytesMut::with_capacity(4);
            data.put_u32(thread_id);
            entries.push((PreLoginOption::ThreadId, data));
        }

        let mut mars = BytesMut::with_capacity(1);
        mars.put_u8(u8::from(self.mars));
        entries.push((PreLoginOption::Mars, mars));

        if let Some(trace) = &self.trace_id {
            let mut data = BytesMut::with_capacity(36);
            data.put_slice(&trace.connection_id);
            data.put_slice(&trace.activity_id);
            data.put_u32_le(trace.activity_sequence);
            entries.push((PreLoginOption::TraceId, data));
        }

        if self.fed_auth_required {
            entries.push((PreLoginOption::FedAuthRequired, BytesMut::from(&[1u8][..])));
        }

        if let Some(nonce) = &self.nonce {
            entries.push((PreLoginOption::Nonce, BytesMut::from(&nonce[..])));
        }

        let table_len = entries.len() * 5 + 1;
        let data_len: usize = entries.iter().map(|(_, d)| d.len()).sum();
        let mut buf = BytesMut::with_capacity(table_len + data_len);

        let mut offset = table_len;
        for (option, data) in &entries {
            buf.put_u8(*option as u8);
            buf.put_u16(offset as u16);
            buf.put_u16(data.len() as u16);
            offset += data.len();
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        for (_, data) in entries {
            buf.put_slice(&data);
        }

        buf.freeze()
    }

    /// Decode a PRELOGIN payload.
    ///
    /// The VERSION option is interpreted as the server product version.
    /// Unknown option tokens are skipped.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut table = payload;
        let mut entries = Vec::new();
        loop {
            let token = read_u8(&mut table)?;
            if token == PreLoginOption::Terminator as u8 {
                break;
            }
            need(&table, 4)?;
            let offset = table.get_u16() as usize;
            let length = table.get_u16() as usize;
            entries.push((token, offset, length));
        }

        let mut prelogin = Self {
            encryption: EncryptionLevel::NotSupported,
            ..Self::new()
        };

        for (token, offset, length) in entries {
            let Some(data) = payload.get(offset..offset + length) else {
                return Err(ProtocolError::InvalidField {
                    field: "prelogin option",
                    reason: format!("option 0x{token:02X} points outside the payload"),
                });
            };

            match PreLoginOption::from_u8(token) {
                Some(PreLoginOption::Version) if length >= 4 => {
                    let sub_build = if length >= 6 {
                        u16::from_le_bytes([data[4], data[5]])
                    } else {
                        0
                    };
                    prelogin.server_version = Some(ServerVersion {
                        major: data[0],
                        minor: data[1],
                        build: u16::from_be_bytes([data[2], data[3]]),
                        sub_build,
                    });
                }
                Some(PreLoginOption::Encryption) if length >= 1 => {
                    prelogin.encryption = EncryptionLevel::from_u8(data[0])?;
                }
                Some(PreLoginOption::Instance) => {
                    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                    let name = String::from_utf8_lossy(&data[..end]);
                    if !name.is_empty() {
                        prelogin.instance = Some(name.into_owned());
                    }
                }
                Some(PreLoginOption::ThreadId) if length >= 4 => {
                    prelogin.thread_id =
                        Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
                }
                Some(PreLoginOption::Mars) if length >= 1 => {
                    prelogin.mars = data[0] != 0;
                }
                Some(PreLoginOption::TraceId) if length >= 36 => {
                    let mut connection_id = [0u8; 16];
                    let mut activity_id = [0u8; 16];
                    connection_id.copy_from_slice(&data[..16]);
                    activity_id.copy_from_slice(&data[16..32]);
                    prelogin.trace_id = Some(TraceId {
                        connection_id,
                        activity_id,
                        activity_sequence: u32::from_le_bytes([
                            data[32], data[33], data[34], data[35],
                        ]),
                    });
                }
                Some(PreLoginOption::FedAuthRequired) if length >= 1 => {
                    prelogin.fed_auth_required = data[0] != 0;
                }
                Some(PreLoginOption::Nonce) if length >= 32 => {
                    let mut nonce = [0u8; 32];
                    nonce.copy_from_slice(&data[..32]);
                    prelogin.nonce = Some(nonce);
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use EncryptionLevel::{NotSupported, Off, On, Required};

    #[test]
    fn test_negotiation_table() {
        let cases = [
            (Off, Off, Some(Off)),
            (Off, On, Some(On)),
            (Off, NotSupported, Some(NotSupported)),
            (Off, Required, Some(On)),
            (On, Off, Some(On)),
            (On, On, Some(On)),
            (On, NotSupported, None),
            (On, Required, Some(On)),
            (NotSupported, Off, Some(NotSupported)),
            (NotSupported, On, None),
            (NotSupported, NotSupported, Some(NotSupported)),
            (NotSupported, Required, None),
            (Required, Off, Some(On)),
            (Required, On, Some(On)),
            (Required, NotSupported, None),
            (Required, Required, Some(On)),
        ];
        for (client, server, expected) in cases {
            assert_eq!(
                EncryptionLevel::negotiate(client, server),
                expected,
                "client={client:?} server={server:?}"
            );
        }
    }

    #[test]
    fn test_request_layout() {
        let encoded = PreLogin::new().with_encryption(Required).encode();
        // VERSION, ENCRYPTION, MARS + terminator = 16 bytes of table.
        assert_eq!(&encoded[..5], &[0x00, 0x00, 16, 0x00, 6]);
        assert_eq!(&encoded[5..10], &[0x01, 0x00, 22, 0x00, 1]);
        assert_eq!(&encoded[10..15], &[0x04, 0x00, 23, 0x00, 1]);
        assert_eq!(encoded[15], 0xFF);
        assert_eq!(&encoded[16..20], &[0x74, 0x00, 0x00, 0x04]);
        assert_eq!(encoded[22], Required as u8);
        assert_eq!(encoded[23], 0);
        assert_eq!(encoded.len(), 24);
    }

    #[test]
    fn test_decode_out_of_order_options() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x01);
        buf.put_u16(16);
        buf.put_u16(1);
        buf.put_u8(0x00);
        buf.put_u16(17);
        buf.put_u16(6);
        // Unknown option 0x42 is skipped.
        buf.put_u8(0x42);
        buf.put_u16(23);
        buf.put_u16(0);
        buf.put_u8(0xFF);
        buf.put_u8(0x02);
        buf.put_slice(&[16, 0, 0x03, 0xE8, 0x05, 0x00]);

        let decoded = PreLogin::decode(&buf).unwrap();
        assert_eq!(decoded.encryption, NotSupported);
        assert_eq!(
            decoded.server_version,
            Some(ServerVersion {
                major: 16,
                minor: 0,
                build: 1000,
                sub_build: 5
            })
        );
    }

    #[test]
    fn test_decode_rejects_bad_offset() {
        let buf = [0x01, 0x00, 0x40, 0x00, 0x01, 0xFF];
        assert!(matches!(
            PreLogin::decode(&buf),
            Err(ProtocolError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_table() {
        assert_eq!(
            PreLogin::decode(&[0x01, 0x00]),
            Err(ProtocolError::UnexpectedEof)
        );
    }

    #[test]
    fn test_instance_option() {
        let encoded = PreLogin::new().with_instance("SQLEXPRESS").encode();
        let decoded = PreLogin::decode(&encoded).unwrap();
        assert_eq!(decoded.instance.as_deref(), Some("SQLEXPRESS"));
    }
}
