//! LOGIN7 message construction.
//!
//! The message is a 94-byte fixed header followed by a variable data area.
//! The header points into the data area with `(offset, length)` pairs; string
//! lengths count UTF-16 code units, the SSPI length counts bytes.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16_string;
use crate::error::ProtocolError;
use crate::packet::DEFAULT_PACKET_SIZE;
use crate::version::TdsVersion;

/// Size of the fixed part of LOGIN7.
pub const LOGIN7_HEADER_SIZE: usize = 94;

/// Client interface name sent in LOGIN7.
pub const LIBRARY_NAME: &str = "sqlwire";

bitflags! {
    /// LOGIN7 OptionFlags1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn on database change.
        const USE_DB_ON = 0x20;
        /// Failure to switch to the initial database is fatal.
        const INIT_DB_FATAL = 0x40;
        /// Warn on language change.
        const SET_LANG_ON = 0x80;
    }
}

bitflags! {
    /// LOGIN7 OptionFlags2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags2: u8 {
        /// Failure to set the initial language is fatal.
        const INIT_LANG_FATAL = 0x01;
        /// ODBC client.
        const ODBC_ON = 0x02;
        /// Integrated security; credentials travel in the SSPI field.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// LOGIN7 TypeFlags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        /// OLEDB client.
        const OLEDB = 0x10;
        /// Application intent is read-only.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// LOGIN7 OptionFlags3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags3: u8 {
        /// Password change requested.
        const CHANGE_PASSWORD = 0x01;
        /// Binary XML requested.
        const BINARY_XML = 0x02;
        /// User instance requested.
        const USER_INSTANCE = 0x04;
        /// Client tolerates unknown collations.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
        /// Feature extension block present.
        const EXTENSION = 0x10;
    }
}

/// Credential material carried by LOGIN7.
#[derive(Clone, PartialEq, Eq)]
pub enum LoginCredentials {
    /// SQL Server login; the password is already scrambled.
    Sql {
        /// Login name.
        username: String,
        /// Scrambled UTF-16 password bytes.
        scrambled_password: Vec<u8>,
    },
    /// Integrated security; first SSPI token.
    Sspi(Vec<u8>),
}

impl core::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Sql { username, .. } => f
                .debug_struct("Sql")
                .field("username", username)
                .field("scrambled_password", &"[REDACTED]")
                .finish(),
            Self::Sspi(blob) => f.debug_tuple("Sspi").field(&blob.len()).finish(),
        }
    }
}

/// LOGIN7 message.
#[derive(Debug, Clone)]
pub struct Login7 {
    /// Requested TDS version.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process ID.
    pub client_pid: u32,
    /// Connection ID.
    pub connection_id: u32,
    /// OptionFlags1.
    pub option_flags1: OptionFlags1,
    /// OptionFlags2.
    pub option_flags2: OptionFlags2,
    /// TypeFlags.
    pub type_flags: TypeFlags,
    /// OptionFlags3.
    pub option_flags3: OptionFlags3,
    /// Client time zone in minutes.
    pub client_timezone: i32,
    /// Client LCID.
    pub client_lcid: u32,
    /// Client host name.
    pub hostname: String,
    /// Application name.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client interface (library) name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client ID (MAC address).
    pub client_id: [u8; 6],
    /// Credentials.
    pub credentials: LoginCredentials,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: DEFAULT_PACKET_SIZE as u32,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            option_flags1: OptionFlags1::USE_DB_ON
                | OptionFlags1::INIT_DB_FATAL
                | OptionFlags1::SET_LANG_ON,
            option_flags2: OptionFlags2::INIT_LANG_FATAL | OptionFlags2::ODBC_ON,
            type_flags: TypeFlags::empty(),
            option_flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            app_name: String::from(LIBRARY_NAME),
            server_name: String::new(),
            library_name: String::from(LIBRARY_NAME),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
            credentials: LoginCredentials::Sql {
                username: String::new(),
                scrambled_password: Vec::new(),
            },
        }
    }
}

impl Login7 {
    /// A LOGIN7 with default flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TDS version.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Use SQL Server authentication.
    #[must_use]
    pub fn with_sql_login(mut self, username: impl Into<String>, scrambled_password: Vec<u8>) -> Self {
        self.credentials = LoginCredentials::Sql {
            username: username.into(),
            scrambled_password,
        };
        self.option_flags2.remove(OptionFlags2::INTEGRATED_SECURITY);
        self
    }

    /// Use integrated security with the first SSPI token.
    #[must_use]
    pub fn with_sspi(mut self, token: Vec<u8>) -> Self {
        self.credentials = LoginCredentials::Sspi(token);
        self.option_flags2.insert(OptionFlags2::INTEGRATED_SECURITY);
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client host name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Encode the message.
    ///
    /// Offsets and lengths in the fixed header are 16-bit; a field that
    /// does not fit fails with [`ProtocolError::InvalidField`]. The SSPI
    /// blob is written last and may exceed 64 KiB through its 32-bit
    /// length field.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let (username, password, sspi): (&str, &[u8], &[u8]) = match &self.credentials {
            LoginCredentials::Sql {
                username,
                scrambled_password,
            } => (username, scrambled_password, &[]),
            LoginCredentials::Sspi(token) => ("", &[], token),
        };

        let mut data = BytesMut::with_capacity(256);
        let mut pointers = BytesMut::with_capacity(LOGIN7_HEADER_SIZE - 36);
        let put_string = |pointers: &mut BytesMut,
                          data: &mut BytesMut,
                          field: &'static str,
                          value: &str| {
            put_pointer(pointers, field, data.len(), value.encode_utf16().count())?;
            write_utf16_string(data, value);
            Ok::<_, ProtocolError>(())
        };

        put_string(&mut pointers, &mut data, "hostname", &self.hostname)?;
        put_string(&mut pointers, &mut data, "username", username)?;

        // Password is already UTF-16 and scrambled.
        put_pointer(&mut pointers, "password", data.len(), password.len() / 2)?;
        data.put_slice(password);

        put_string(&mut pointers, &mut data, "app name", &self.app_name)?;
        put_string(&mut pointers, &mut data, "server name", &self.server_name)?;
        // Unused extension slot.
        put_string(&mut pointers, &mut data, "extension", "")?;
        put_string(&mut pointers, &mut data, "library name", &self.library_name)?;
        put_string(&mut pointers, &mut data, "language", &self.language)?;
        put_string(&mut pointers, &mut data, "database", &self.database)?;

        pointers.put_slice(&self.client_id);

        let sspi_long = u32::try_from(sspi.len()).map_err(|_| ProtocolError::InvalidField {
            field: "sspi",
            reason: format!("{} bytes exceeds 4 GiB", sspi.len()),
        })?;
        let (sspi_short, sspi_long) = match u16::try_from(sspi_long) {
            Ok(short) => (usize::from(short), 0),
            Err(_) => (usize::from(u16::MAX), sspi_long),
        };
        put_pointer(&mut pointers, "sspi", data.len(), sspi_short)?;

        // Attach-db file and change-password are never sent; as empty
        // fields they point at the SSPI blob, which follows everything else.
        put_pointer(&mut pointers, "attach db file", data.len(), 0)?;
        put_pointer(&mut pointers, "change password", data.len(), 0)?;
        pointers.put_u32_le(sspi_long);
        data.put_slice(sspi);

        let total = LOGIN7_HEADER_SIZE + data.len();
        let total_len = u32::try_from(total).map_err(|_| ProtocolError::InvalidField {
            field: "length",
            reason: format!("{total} bytes exceeds 4 GiB"),
        })?;
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32_le(total_len);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(self.option_flags3.bits());
        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);
        buf.put_slice(&pointers);
        debug_assert_eq!(buf.len(), LOGIN7_HEADER_SIZE);
        buf.put_slice(&data);

        Ok(buf.freeze())
    }
}

/// Offset (from the start of the message) and length of one variable field.
fn put_pointer(
    pointers: &mut BytesMut,
    field: &'static str,
    data_offset: usize,
    len: usize,
) -> Result<(), ProtocolError> {
    let too_large = |what: &str, value: usize| ProtocolError::InvalidField {
        field,
        reason: format!("{what} {value} does not fit in 16 bits"),
    };
    let offset = LOGIN7_HEADER_SIZE + data_offset;
    pointers.put_u16_le(u16::try_from(offset).map_err(|_| too_large("offset", offset))?);
    pointers.put_u16_le(u16::try_from(len).map_err(|_| too_large("length", len))?);
    Ok(())
}
