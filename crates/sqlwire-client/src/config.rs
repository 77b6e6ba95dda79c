//! Client configuration.

use std::fmt;
use std::time::Duration;

use sqlwire_auth::{AuthMethod, SecurityProviderHandle};
use sqlwire_protocol::{EncryptionLevel, MAX_PACKET_SIZE, MIN_PACKET_SIZE, TdsVersion};
use sqlwire_tls::TlsConfig;

use crate::error::{Error, Result};

/// Maximum number of routing redirects followed by [`Client::connect_tcp`].
///
/// [`Client::connect_tcp`]: crate::Client::connect_tcp
pub const MAX_REDIRECTS: u8 = 2;

/// Connection configuration.
///
/// Immutable once handed to [`Client::connect`](crate::Client::connect);
/// the setters consume and return the value.
#[derive(Clone)]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 1433).
    pub port: u16,

    /// Initial database.
    pub database: Option<String>,

    /// Named instance, resolved through the SQL Browser service.
    pub instance_name: Option<String>,

    /// Application name (shown in server management tools).
    pub application_name: String,

    /// Client host name sent in LOGIN7.
    pub workstation_id: Option<String>,

    /// Requested encryption level.
    pub encryption: EncryptionLevel,

    /// Whether to skip server certificate validation.
    pub trust_server_certificate: bool,

    /// Trust anchors and server name override for certificate validation.
    pub tls: TlsConfig,

    /// Authentication method.
    pub authentication: AuthMethod,

    /// Requested TDS packet size.
    pub packet_size: u32,

    /// Requested TDS protocol version.
    pub tds_version: TdsVersion,

    /// How long a cancel may wait for the server's acknowledgment.
    pub cancel_grace_period: Duration,

    /// Time allowed for opening the TCP connection.
    pub connect_timeout: Duration,

    /// Security contexts for Windows logins.
    ///
    /// Falls back to the provider compiled into this build.
    pub security_provider: Option<SecurityProviderHandle>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            database: None,
            instance_name: None,
            application_name: "sqlwire".to_string(),
            workstation_id: None,
            encryption: EncryptionLevel::On,
            trust_server_certificate: false,
            tls: TlsConfig::default(),
            authentication: AuthMethod::default(),
            packet_size: 4096,
            tds_version: TdsVersion::V7_4,
            cancel_grace_period: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(15),
            security_provider: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("instance_name", &self.instance_name)
            .field("application_name", &self.application_name)
            .field("encryption", &self.encryption)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("authentication", &self.authentication)
            .field("packet_size", &self.packet_size)
            .field("tds_version", &self.tds_version)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an ADO.NET-style connection string.
    ///
    /// ```text
    /// server=tcp:db.example.com,1433;database=app;user id=sa;password='p;w';TrustServerCertificate=true
    /// ```
    ///
    /// Keys are case-insensitive and spaces inside them are ignored. Values
    /// may be quoted with `'` or `"` (a doubled quote escapes it) or wrapped
    /// in `{}`. Unknown keys are ignored.
    pub fn from_ado_string(s: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut user = String::new();
        let mut password = String::new();
        let mut integrated = false;

        for (key, value) in split_ado(s)? {
            match key.as_str() {
                "server" | "datasource" | "address" | "addr" | "networkaddress" => {
                    config.apply_server(&value)?;
                }
                "database" | "initialcatalog" => {
                    config.database = Some(value);
                }
                "userid" | "uid" | "user" => user = value,
                "password" | "pwd" => password = value,
                "integratedsecurity" | "trustedconnection" => {
                    integrated = value.eq_ignore_ascii_case("sspi") || parse_bool(&key, &value)?;
                }
                "trustservercertificate" => {
                    config.trust_server_certificate = parse_bool(&key, &value)?;
                }
                "encrypt" => {
                    config.encryption = parse_encrypt(&value)?;
                }
                "applicationname" | "app" => {
                    config.application_name = value;
                }
                "workstationid" | "wsid" => {
                    config.workstation_id = Some(value);
                }
                "packetsize" => {
                    config.packet_size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid packet size: {value}")))?;
                }
                "connecttimeout" | "connectiontimeout" | "timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                "tdsversion" | "protocolversion" => {
                    config.tds_version = TdsVersion::parse(&value)
                        .ok_or_else(|| Error::Config(format!("invalid TDS version: {value}")))?;
                }
                _ => {
                    tracing::debug!(key = key, "ignoring unknown connection string option");
                }
            }
        }

        config.authentication = if integrated {
            AuthMethod::WindowsIntegrated
        } else if let Some(windows) = AuthMethod::windows_from_login(&user, password.clone()) {
            windows
        } else {
            AuthMethod::sql_server(user, password)
        };

        Ok(config)
    }

    fn apply_server(&mut self, value: &str) -> Result<()> {
        let value = value.trim();
        let value = match value.get(..4) {
            Some(prefix) if prefix.eq_ignore_ascii_case("tcp:") => &value[4..],
            _ => value,
        };

        let (rest, port) = match value.split_once(',') {
            Some((rest, port)) => {
                let port = port
                    .trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid port: {port}")))?;
                (rest, Some(port))
            }
            None => (value, None),
        };

        let (host, instance) = match rest.split_once('\\') {
            Some((host, instance)) => (host, Some(instance)),
            None => (rest, None),
        };

        self.host = match host.trim() {
            "." | "(local)" => "localhost".to_string(),
            other => other.to_string(),
        };
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(instance) = instance.filter(|i| !i.is_empty()) {
            self.instance_name = Some(instance.to_string());
        }
        Ok(())
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Connect to a named instance.
    ///
    /// The instance's port is looked up from the SQL Browser service on UDP
    /// port 1434 before connecting.
    #[must_use]
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the client host name reported to the server.
    #[must_use]
    pub fn workstation_id(mut self, name: impl Into<String>) -> Self {
        self.workstation_id = Some(name.into());
        self
    }

    /// Set the preferred encryption level.
    #[must_use]
    pub fn encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Accept the server certificate without validating it.
    #[must_use]
    pub fn trust_cert(mut self) -> Self {
        self.trust_server_certificate = true;
        self
    }

    /// Set TLS trust anchors or a server name override.
    #[must_use]
    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set the authentication method.
    #[must_use]
    pub fn authentication(mut self, auth: AuthMethod) -> Self {
        self.authentication = auth;
        self
    }

    /// Set the requested packet size (512..=32767).
    #[must_use]
    pub fn packet_size(mut self, size: u32) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the requested TDS version.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set how long a cancel waits for the server's acknowledgment.
    #[must_use]
    pub fn cancel_grace_period(mut self, grace: Duration) -> Self {
        self.cancel_grace_period = grace;
        self
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Supply security contexts for Windows logins.
    #[must_use]
    pub fn security_provider(mut self, provider: SecurityProviderHandle) -> Self {
        self.security_provider = Some(provider);
        self
    }

    /// The `host:port` pair to connect to.
    #[must_use]
    pub fn get_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The security context provider in effect.
    pub(crate) fn effective_provider(&self) -> Option<SecurityProviderHandle> {
        self.security_provider
            .clone()
            .or_else(sqlwire_auth::default_provider)
    }

    /// The TLS settings in effect.
    pub(crate) fn effective_tls(&self) -> TlsConfig {
        let tls = self.tls.clone();
        if self.trust_server_certificate {
            tls.trust_server_certificate(true)
        } else {
            tls
        }
    }

    /// Reject configurations that cannot work, before touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if !(MIN_PACKET_SIZE as u32..=MAX_PACKET_SIZE as u32).contains(&self.packet_size) {
            return Err(Error::Config(format!(
                "packet size {} outside {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}",
                self.packet_size
            )));
        }
        if self.cancel_grace_period.is_zero() {
            return Err(Error::Config("cancel grace period must be positive".into()));
        }
        self.authentication
            .check_platform_support(self.security_provider.is_some())?;
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid boolean for {key}: {value}"))),
    }
}

fn parse_encrypt(value: &str) -> Result<EncryptionLevel> {
    if value == "DANGER_PLAINTEXT" {
        return Ok(EncryptionLevel::NotSupported);
    }
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "strict" | "mandatory" => Ok(EncryptionLevel::On),
        "false" | "no" | "0" | "optional" => Ok(EncryptionLevel::Off),
        _ => Err(Error::Config(format!("invalid encrypt value: {value}"))),
    }
}

/// Split a connection string into normalized keys and unquoted values.
fn split_ado(s: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        let mut key = String::new();
        let mut saw_eq = false;
        for c in chars.by_ref() {
            match c {
                '=' => {
                    saw_eq = true;
                    break;
                }
                ';' if key.trim().is_empty() => key.clear(),
                ';' => return Err(Error::Config(format!("missing value for key: {}", key.trim()))),
                c => key.push(c),
            }
        }
        if !saw_eq {
            if key.trim().is_empty() {
                return Ok(pairs);
            }
            return Err(Error::Config(format!("missing value for key: {}", key.trim())));
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let value = match chars.peek().copied() {
            Some(quote @ ('\'' | '"')) => {
                chars.next();
                let value = read_delimited(&mut chars, quote, quote)?;
                skip_to_separator(&mut chars)?;
                value
            }
            Some('{') => {
                chars.next();
                let value = read_delimited(&mut chars, '{', '}')?;
                skip_to_separator(&mut chars)?;
                value
            }
            _ => {
                let mut value = String::new();
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
                value.trim().to_string()
            }
        };

        let key: String = key
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        pairs.push((key, value));
    }
}

/// Read up to `close`; a doubled `close` stands for itself.
fn read_delimited(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    open: char,
    close: char,
) -> Result<String> {
    let mut value = String::new();
    while let Some(c) = chars.next() {
        if c == close {
            if chars.peek() == Some(&close) {
                chars.next();
                value.push(close);
            } else {
                return Ok(value);
            }
        } else {
            value.push(c);
        }
    }
    Err(Error::Config(format!("unterminated value starting with {open}")))
}

fn skip_to_separator(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<()> {
    for c in chars.by_ref() {
        match c {
            ';' => return Ok(()),
            c if c.is_whitespace() => {}
            c => return Err(Error::Config(format!("unexpected {c:?} after quoted value"))),
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.get_addr(), "localhost:1433");
        assert_eq!(config.encryption, EncryptionLevel::On);
        assert_eq!(config.packet_size, 4096);
        assert_eq!(config.cancel_grace_period, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ado_string_basic() {
        let config = Config::from_ado_string(
            "Server=tcp:db.example.com,1434;Initial Catalog=app;User ID=sa;Password=secret;TrustServerCertificate=true",
        )
        .unwrap();

        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 1434);
        assert_eq!(config.database.as_deref(), Some("app"));
        assert!(config.trust_server_certificate);
        assert_eq!(config.authentication, AuthMethod::sql_server("sa", "secret"));
    }

    #[test]
    fn test_ado_string_instance_and_local() {
        let config = Config::from_ado_string("data source=(local)\\SQLEXPRESS").unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.instance_name.as_deref(), Some("SQLEXPRESS"));

        let config = Config::from_ado_string("server=.").unwrap();
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn test_ado_string_quoting() {
        let config = Config::from_ado_string(
            "password='it''s;secret';user=\"bob\";database={we}}ird}; app = reports ",
        )
        .unwrap();
        assert_eq!(config.authentication, AuthMethod::sql_server("bob", "it's;secret"));
        assert_eq!(config.database.as_deref(), Some("we}ird"));
        assert_eq!(config.application_name, "reports");
    }

    #[test]
    fn test_ado_string_encrypt_values() {
        let level = |v: &str| {
            Config::from_ado_string(&format!("encrypt={v}"))
                .unwrap()
                .encryption
        };
        assert_eq!(level("true"), EncryptionLevel::On);
        assert_eq!(level("Strict"), EncryptionLevel::On);
        assert_eq!(level("no"), EncryptionLevel::Off);
        assert_eq!(level("DANGER_PLAINTEXT"), EncryptionLevel::NotSupported);
        assert!(Config::from_ado_string("encrypt=maybe").is_err());
    }

    #[test]
    fn test_ado_string_auth_selection() {
        let config = Config::from_ado_string("integrated security=SSPI").unwrap();
        assert_eq!(config.authentication, AuthMethod::WindowsIntegrated);

        let config = Config::from_ado_string("user id=CORP\\alice;password=pw").unwrap();
        assert_eq!(
            config.authentication,
            AuthMethod::windows("CORP", "alice", "pw")
        );
    }

    #[test]
    fn test_ado_string_rejects_garbage() {
        assert!(Config::from_ado_string("server").is_err());
        assert!(Config::from_ado_string("password='open").is_err());
        assert!(Config::from_ado_string("server=a,notaport").is_err());
        assert!(Config::from_ado_string("packet size=big").is_err());
    }

    #[test]
    fn test_ado_string_unknown_keys_ignored() {
        let config = Config::from_ado_string(";;Pooling=false;server=h;;").unwrap();
        assert_eq!(config.host, "h");
    }

    #[test]
    fn test_validate_packet_size() {
        assert!(matches!(
            Config::new().packet_size(100).validate(),
            Err(Error::Config(_))
        ));
        assert!(Config::new().packet_size(32767).validate().is_ok());
    }

    #[test]
    fn test_validate_windows_without_provider() {
        let config = Config::new().authentication(AuthMethod::windows("CORP", "bob", "pw"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
