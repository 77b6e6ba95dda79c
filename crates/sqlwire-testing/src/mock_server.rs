//! Mock TDS server for integration tests.
//!
//! The server speaks enough of the protocol to drive a real client:
//! PRELOGIN with every encryption level (TLS from a self-signed
//! certificate), LOGIN7 with SQL or SSPI credentials, routing, and canned
//! responses to SQL batches and RPCs, including stalled responses that only
//! finish when the client sends Attention.
//!
//! Connections are accepted over TCP or handed out as in-memory
//! [`DuplexStream`]s.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlwire_testing::{MockColumn, MockResponse, MockTdsServer};
//! use sqlwire_types::SqlValue;
//!
//! let server = MockTdsServer::builder()
//!     .with_response("SELECT 1", MockResponse::scalar(SqlValue::I32(1)))
//!     .build()
//!     .await?;
//!
//! let stream = server.connect_duplex();
//! // Client::connect(config, stream)...
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::StreamExt;
use rustls::pki_types::CertificateDer;
use sqlwire_codec::{CodecError, Message, MessageAssembler, PacketStream};
use sqlwire_protocol::packet::{PacketStatus, split_message};
use sqlwire_protocol::prelogin::ServerVersion;
use sqlwire_protocol::token::{DoneStatus, EnvChange, LoginAck, ServerMessage};
use sqlwire_protocol::{EncryptionLevel, PacketType, PreLogin, ProtocolError, TdsVersion};
use sqlwire_tls::TlsPreloginWrapper;
use sqlwire_types::{SqlValue, TypeError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::requests::{
    FrameInfo, Request, RequestLog, parse_login7, parse_rpc, parse_sql_batch,
};
use crate::tls::MockTlsAcceptor;
use crate::tokens::{CMD_INSERT, CMD_SELECT, MockColumn, TokenWriter};

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Malformed client message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A value could not be encoded or decoded.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The client sent something out of sequence.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Handler computing a response from the request.
pub type ResponseFn = Arc<dyn Fn(&Request) -> MockResponse + Send + Sync>;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// A single unnamed column with one row.
    Scalar(SqlValue),

    /// One result set.
    Rows {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Row data.
        rows: Vec<Vec<SqlValue>>,
        /// Send rows as NBCROW tokens.
        compressed: bool,
    },

    /// Several statements in one batch, each ending in its own DONE.
    Batch(Vec<MockResponse>),

    /// A server error for the statement.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
        /// Severity class.
        severity: u8,
    },

    /// An informational message ahead of another response.
    Info {
        /// Message number.
        number: i32,
        /// Message text.
        message: String,
        /// What follows the message.
        then: Box<MockResponse>,
    },

    /// Rows affected by INSERT/UPDATE/DELETE.
    RowsAffected(u64),

    /// An environment change followed by an empty DONE.
    EnvChange(EnvChange),

    /// A stored procedure: its statements, return status and output parameters.
    Procedure {
        /// Result of each statement in the procedure.
        results: Vec<MockResponse>,
        /// Value of RETURNSTATUS.
        return_status: i32,
        /// Output parameters by name.
        outputs: Vec<(String, SqlValue)>,
    },

    /// Send metadata and rows without finishing, then wait for Attention.
    Stall {
        /// Column definitions; empty sends nothing before stalling.
        columns: Vec<MockColumn>,
        /// Rows sent before stalling.
        rows: Vec<Vec<SqlValue>>,
        /// Whether Attention is acknowledged.
        acknowledge: bool,
    },

    /// Close the connection instead of answering.
    Disconnect,

    /// Pre-encoded TDS tokens.
    Raw(Bytes),

    /// Compute the response from the request.
    Custom(ResponseFn),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Rows {
                columns,
                rows,
                compressed,
            } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", &rows.len())
                .field("compressed", compressed)
                .finish(),
            Self::Batch(items) => f.debug_tuple("Batch").field(items).finish(),
            Self::Error {
                number,
                message,
                severity,
            } => f
                .debug_struct("Error")
                .field("number", number)
                .field("message", message)
                .field("severity", severity)
                .finish(),
            Self::Info { number, then, .. } => f
                .debug_struct("Info")
                .field("number", number)
                .field("then", then)
                .finish_non_exhaustive(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::EnvChange(env) => f.debug_tuple("EnvChange").field(env).finish(),
            Self::Procedure {
                results,
                return_status,
                outputs,
            } => f
                .debug_struct("Procedure")
                .field("results", results)
                .field("return_status", return_status)
                .field("outputs", outputs)
                .finish(),
            Self::Stall {
                columns,
                rows,
                acknowledge,
            } => f
                .debug_struct("Stall")
                .field("columns", &columns.len())
                .field("rows", &rows.len())
                .field("acknowledge", acknowledge)
                .finish(),
            Self::Disconnect => f.write_str("Disconnect"),
            Self::Raw(data) => f.debug_tuple("Raw").field(&data.len()).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// A single-value result.
    pub fn scalar(value: SqlValue) -> Self {
        Self::Scalar(value)
    }

    /// A scalar integer result.
    pub fn scalar_int(value: i32) -> Self {
        Self::Scalar(SqlValue::I32(value))
    }

    /// A scalar string result.
    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self::Scalar(SqlValue::String(value.into()))
    }

    /// A statement with no rows.
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Rows affected by a statement.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// A severity 16 error.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity: 16,
        }
    }

    /// A result set of ROW tokens.
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows {
            columns,
            rows,
            compressed: false,
        }
    }

    /// A result set of NBCROW tokens.
    pub fn nbc_rows(columns: Vec<MockColumn>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows {
            columns,
            rows,
            compressed: true,
        }
    }

    /// Several statement results in one response.
    pub fn batch(items: Vec<MockResponse>) -> Self {
        Self::Batch(items)
    }

    /// Prefix with an INFO message.
    pub fn with_info(self, number: i32, message: impl Into<String>) -> Self {
        Self::Info {
            number,
            message: message.into(),
            then: Box::new(self),
        }
    }

    /// A response that stalls after sending `rows` and acknowledges Attention.
    pub fn stall(columns: Vec<MockColumn>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Stall {
            columns,
            rows,
            acknowledge: true,
        }
    }

    /// A response that stalls and never acknowledges Attention.
    pub fn stall_forever(columns: Vec<MockColumn>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Stall {
            columns,
            rows,
            acknowledge: false,
        }
    }

    /// A response computed from the request.
    pub fn custom(handler: impl Fn(&Request) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(handler))
    }

    fn resolve(self, request: &Request) -> Self {
        match self {
            Self::Custom(handler) => handler(request).resolve(request),
            other => other,
        }
    }
}

/// Configuration for the mock TDS server.
pub struct MockServerConfig {
    /// Responses keyed by normalized SQL text.
    responses: HashMap<String, MockResponse>,
    /// Response for unmatched SQL.
    default_response: MockResponse,
    /// Program name in LOGINACK.
    server_name: String,
    /// TDS version in LOGINACK.
    tds_version: TdsVersion,
    /// Database reported after login.
    database: String,
    /// Encryption capability in the PRELOGIN response.
    encryption: EncryptionLevel,
    /// Packet size granted after login; the client's request when `None`.
    packet_size: Option<u32>,
    /// Redirect every login to this server.
    routing: Option<(String, u16)>,
    /// Reject every login with this error.
    login_error: Option<ServerMessage>,
    /// SSPI challenges sent before accepting integrated logins.
    sspi_challenges: Vec<Vec<u8>>,
}

impl fmt::Debug for MockServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServerConfig")
            .field("responses", &self.responses.len())
            .field("server_name", &self.server_name)
            .field("tds_version", &self.tds_version)
            .field("database", &self.database)
            .field("encryption", &self.encryption)
            .field("packet_size", &self.packet_size)
            .field("routing", &self.routing)
            .finish_non_exhaustive()
    }
}

fn normalize(sql: &str) -> String {
    sql.trim().to_uppercase()
}

impl MockServerConfig {
    fn find_response(&self, request: &Request) -> MockResponse {
        self.responses
            .get(&normalize(request.sql()))
            .unwrap_or(&self.default_response)
            .clone()
            .resolve(request)
    }
}

/// Builder for [`MockTdsServer`].
#[derive(Debug)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: MockServerConfig {
                responses: HashMap::new(),
                default_response: MockResponse::empty(),
                server_name: "Microsoft SQL Server".to_string(),
                tds_version: TdsVersion::V7_4,
                database: "master".to_string(),
                encryption: EncryptionLevel::NotSupported,
                packet_size: None,
                routing: None,
                login_error: None,
                sspi_challenges: Vec::new(),
            },
        }
    }

    /// Add a response for a specific SQL text (case and surrounding
    /// whitespace are ignored).
    #[must_use]
    pub fn with_response(mut self, sql: impl AsRef<str>, response: MockResponse) -> Self {
        self.config.responses.insert(normalize(sql.as_ref()), response);
        self
    }

    /// Set the response for unmatched SQL.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Set the program name reported in LOGINACK.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Set the database reported after login.
    #[must_use]
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Set the TDS version reported in LOGINACK.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.config.tds_version = version;
        self
    }

    /// Set the encryption capability. Anything but `NotSupported` generates
    /// a self-signed certificate.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.config.encryption = level;
        self
    }

    /// Grant this packet size instead of the client's request.
    #[must_use]
    pub fn with_packet_size(mut self, size: u32) -> Self {
        self.config.packet_size = Some(size);
        self
    }

    /// Redirect logins to another server.
    #[must_use]
    pub fn with_routing(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.routing = Some((host.into(), port));
        self
    }

    /// Reject logins with a severity 14 error.
    #[must_use]
    pub fn with_login_error(mut self, number: i32, message: impl Into<String>) -> Self {
        self.config.login_error = Some(ServerMessage {
            number,
            state: 1,
            class: 14,
            message: message.into(),
            server: self.config.server_name.clone(),
            procedure: String::new(),
            line: 1,
        });
        self
    }

    /// Challenge integrated logins with these SSPI blobs, one round each.
    #[must_use]
    pub fn with_sspi_challenges(mut self, challenges: Vec<Vec<u8>>) -> Self {
        self.config.sspi_challenges = challenges;
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config).await
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    config: MockServerConfig,
    log: RequestLog,
    tls: Option<MockTlsAcceptor>,
    connections: AtomicUsize,
}

/// A mock TDS server for testing.
pub struct MockTdsServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
}

impl fmt::Debug for MockTdsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTdsServer")
            .field("addr", &self.addr)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl MockTdsServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let tls = match config.encryption {
            EncryptionLevel::NotSupported => None,
            _ => Some(MockTlsAcceptor::generate()?),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            config,
            log: RequestLog::default(),
            tls,
            connections: AtomicUsize::new(0),
        });

        let mut shutdown_rx = shutdown_tx.subscribe();
        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                tracing::debug!(%peer, "mock server accepted connection");
                                let _ = stream.set_nodelay(true);
                                spawn_connection(stream, Arc::clone(&accept_shared));
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "accept error");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx,
            shared,
        })
    }

    /// Open an in-memory connection to the server.
    pub fn connect_duplex(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        spawn_connection(server, Arc::clone(&self.shared));
        client
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::Acquire)
    }

    /// What the server received so far.
    pub fn log(&self) -> &RequestLog {
        &self.shared.log
    }

    /// The self-signed certificate, when TLS is enabled.
    pub fn certificate(&self) -> Option<CertificateDer<'static>> {
        self.shared.tls.as_ref().map(|tls| tls.certificate().clone())
    }

    /// Stop accepting TCP connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Anything a session can run over.
trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

fn spawn_connection<S>(stream: S, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        shared.connections.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = handle_connection(stream, Arc::clone(&shared)).await {
            tracing::debug!(error = %e, "mock connection ended with error");
        }
        shared.connections.fetch_sub(1, Ordering::AcqRel);
    });
}

async fn expect_message<T>(framed: &mut PacketStream<T>, expected: PacketType) -> Result<Message>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let message = framed.read_message().await?;
    if message.packet_type != expected {
        return Err(MockServerError::Unexpected(format!(
            "expected {expected:?}, got {:?}",
            message.packet_type
        )));
    }
    Ok(message)
}

/// Handle a single client connection.
async fn handle_connection<S>(stream: S, shared: Arc<Shared>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = &shared.config;

    // PRELOGIN
    let mut framed = PacketStream::new(stream);
    let request = expect_message(&mut framed, PacketType::PreLogin).await?;
    let client = PreLogin::decode(&request.payload)?;
    shared.log.prelogin(client.clone());

    let mut response = PreLogin::new().with_encryption(config.encryption);
    response.server_version = Some(ServerVersion {
        major: 16,
        minor: 0,
        build: 1000,
        sub_build: 0,
    });
    framed
        .send_message(PacketType::TabularResult, response.encode(), 4096)
        .await?;

    let Some(effective) = EncryptionLevel::negotiate(client.encryption, config.encryption) else {
        tracing::debug!(client = ?client.encryption, server = ?config.encryption, "encryption mismatch");
        // No login may follow a failed negotiation.
        return match framed.read_message().await {
            Ok(message) => Err(MockServerError::Unexpected(format!(
                "{:?} after failed negotiation",
                message.packet_type
            ))),
            Err(_) => Ok(()),
        };
    };

    // LOGIN7, possibly inside TLS
    let (transport, login): (Box<dyn Transport>, Message) = if effective.uses_tls() {
        let tls = shared
            .tls
            .as_ref()
            .ok_or_else(|| MockServerError::Tls("no certificate configured".into()))?;
        let raw = framed.into_inner();
        let mut stream = tls.acceptor().accept(TlsPreloginWrapper::new(raw)).await?;
        stream.get_mut().0.handshake_complete();
        tracing::debug!(?effective, "mock TLS handshake complete");

        let mut framed = PacketStream::new(stream);
        let login = expect_message(&mut framed, PacketType::Tds7Login).await?;
        let stream = framed.into_inner();
        if effective.is_full_session() {
            (Box::new(stream), login)
        } else {
            let (wrapper, _session) = stream.into_inner();
            (Box::new(wrapper.into_inner()), login)
        }
    } else {
        let login = expect_message(&mut framed, PacketType::Tds7Login).await?;
        (Box::new(framed.into_inner()), login)
    };

    let mut session = Session {
        framed: PacketStream::new(transport),
        shared: Arc::clone(&shared),
        packet_size: 4096,
    };
    if session.login(&login.payload).await? {
        session.serve().await?;
    }
    Ok(())
}

struct Session {
    framed: PacketStream<Box<dyn Transport>>,
    shared: Arc<Shared>,
    packet_size: usize,
}

impl Session {
    fn writer(&self) -> TokenWriter {
        TokenWriter::new(self.shared.config.tds_version)
    }

    async fn send(&mut self, payload: Bytes) -> Result<()> {
        self.framed
            .send_message(PacketType::TabularResult, payload, self.packet_size)
            .await?;
        Ok(())
    }

    /// Write `payload` as packets none of which ends the message.
    async fn send_unfinished(&mut self, payload: Bytes) -> Result<()> {
        let mut buf = BytesMut::new();
        for mut packet in split_message(PacketType::TabularResult, payload, self.packet_size, 1)? {
            packet.header.status = PacketStatus::NORMAL;
            packet.header.encode(&mut buf);
            buf.put_slice(&packet.payload);
        }
        let transport = self.framed.get_mut();
        transport.write_all(&buf).await?;
        transport.flush().await?;
        Ok(())
    }

    /// Read one message; `None` when the client hung up.
    async fn read_message(&mut self) -> Result<Option<Message>> {
        let mut assembler = MessageAssembler::new();
        let mut packets = 0;
        let mut largest = 0;
        loop {
            let packet = match self.framed.next().await {
                Some(Ok(packet)) => packet,
                Some(Err(e)) if e.is_io() && packets == 0 => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                None if packets == 0 => return Ok(None),
                None => return Err(CodecError::ConnectionClosed.into()),
            };
            packets += 1;
            largest = largest.max(packet.total_size());
            if let Some(message) = assembler.push(packet) {
                self.shared.log.frame(FrameInfo {
                    packet_type: message.packet_type,
                    packets,
                    largest_packet: largest,
                });
                return Ok(Some(message));
            }
        }
    }

    /// Run the login exchange; `false` when the connection ends here.
    async fn login(&mut self, payload: &[u8]) -> Result<bool> {
        let shared = Arc::clone(&self.shared);
        let config = &shared.config;
        let login = parse_login7(payload)?;
        tracing::debug!(user = %login.username, database = %login.database, "mock login");
        shared.log.login(login.clone());

        if let Some(error) = &config.login_error {
            let mut w = self.writer();
            w.error(error).done(DoneStatus::ERROR, 0, 0);
            self.send(w.finish()).await?;
            return Ok(false);
        }

        if login.integrated_security {
            for challenge in &config.sspi_challenges {
                let mut w = self.writer();
                w.sspi(challenge);
                self.send(w.finish()).await?;
                let Some(reply) = self.read_message().await? else {
                    return Ok(false);
                };
                if reply.packet_type != PacketType::Sspi {
                    return Err(MockServerError::Unexpected(format!(
                        "expected SSPI, got {:?}",
                        reply.packet_type
                    )));
                }
                shared.log.sspi_response(reply.payload.to_vec());
            }
        }

        let packet_size = config.packet_size.unwrap_or(login.packet_size);
        let mut w = self.writer();
        w.env_change(&EnvChange::Database {
            new: config.database.clone(),
            old: "master".into(),
        });
        w.info(&ServerMessage {
            number: 5701,
            state: 2,
            class: 0,
            message: format!("Changed database context to '{}'.", config.database),
            server: config.server_name.clone(),
            procedure: String::new(),
            line: 1,
        });
        w.env_change(&EnvChange::Language {
            new: "us_english".into(),
            old: String::new(),
        });
        w.env_change(&EnvChange::PacketSize {
            new: packet_size,
            old: 4096,
        });
        w.login_ack(&LoginAck {
            interface: 1,
            tds_version: config.tds_version,
            prog_name: config.server_name.clone(),
            prog_version: (16, 0, 1000),
        });
        if let Some((host, port)) = &config.routing {
            w.env_change(&EnvChange::Routing {
                host: host.clone(),
                port: *port,
            });
        }
        w.done(DoneStatus::empty(), 0, 0);

        self.packet_size = packet_size as usize;
        self.send(w.finish()).await?;
        Ok(config.routing.is_none())
    }

    async fn serve(&mut self) -> Result<()> {
        while let Some(message) = self.read_message().await? {
            let request = match message.packet_type {
                PacketType::SqlBatch => parse_sql_batch(message.payload)?,
                PacketType::Rpc => parse_rpc(message.payload)?,
                PacketType::Attention => {
                    self.shared.log.request(Request::Attention);
                    self.acknowledge_attention().await?;
                    continue;
                }
                other => {
                    tracing::debug!(packet_type = ?other, "ignoring message");
                    continue;
                }
            };
            tracing::debug!(sql = %request.sql(), "mock request");
            self.shared.log.request(request.clone());
            if !self.respond(&request).await? {
                break;
            }
        }
        Ok(())
    }

    async fn acknowledge_attention(&mut self) -> Result<()> {
        let mut w = self.writer();
        w.done(DoneStatus::ATTN, 0, 0);
        self.send(w.finish()).await
    }

    /// Answer one request; `false` closes the connection.
    async fn respond(&mut self, request: &Request) -> Result<bool> {
        match self.shared.config.find_response(request) {
            MockResponse::Disconnect => Ok(false),
            MockResponse::Stall {
                columns,
                rows,
                acknowledge,
            } => {
                let mut w = self.writer();
                if !columns.is_empty() {
                    w.col_metadata(&columns);
                    for row in &rows {
                        w.row(&columns, row)?;
                    }
                }
                if !w.is_empty() {
                    self.send_unfinished(w.finish()).await?;
                }
                self.await_attention(acknowledge).await
            }
            response => {
                let mut w = self.writer();
                encode_response(&mut w, &response, request, Scope::TOP)?;
                self.send(w.finish()).await?;
                if let MockResponse::EnvChange(EnvChange::PacketSize { new, .. }) = response {
                    self.packet_size = new as usize;
                }
                Ok(true)
            }
        }
    }

    async fn await_attention(&mut self, acknowledge: bool) -> Result<bool> {
        while let Some(message) = self.read_message().await? {
            if message.packet_type == PacketType::Attention {
                self.shared.log.request(Request::Attention);
                if acknowledge {
                    self.acknowledge_attention().await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn more(last: bool) -> DoneStatus {
    if last {
        DoneStatus::empty()
    } else {
        DoneStatus::MORE
    }
}

/// Where a statement result is being written.
#[derive(Clone, Copy)]
struct Scope {
    last: bool,
    in_proc: bool,
}

impl Scope {
    const TOP: Self = Self {
        last: true,
        in_proc: false,
    };

    fn end(self, w: &mut TokenWriter, status: DoneStatus, cur_cmd: u16, rows: u64) {
        let status = status | more(self.last);
        if self.in_proc {
            w.done_in_proc(status, cur_cmd, rows);
        } else {
            w.done(status, cur_cmd, rows);
        }
    }
}

/// Encode `response` as the tokens of one or more statements.
fn encode_response(
    w: &mut TokenWriter,
    response: &MockResponse,
    request: &Request,
    scope: Scope,
) -> Result<()> {
    match response {
        MockResponse::Scalar(value) => {
            let columns = [MockColumn::for_value("", value)?];
            w.col_metadata(&columns);
            w.row(&columns, std::slice::from_ref(value))?;
            scope.end(w, DoneStatus::COUNT, CMD_SELECT, 1);
        }
        MockResponse::Rows {
            columns,
            rows,
            compressed,
        } => {
            w.col_metadata(columns);
            for row in rows {
                if *compressed {
                    w.nbc_row(columns, row)?;
                } else {
                    w.row(columns, row)?;
                }
            }
            scope.end(w, DoneStatus::COUNT, CMD_SELECT, rows.len() as u64);
        }
        MockResponse::Batch(items) => {
            let n = items.len();
            for (i, item) in items.iter().enumerate() {
                let inner = Scope {
                    last: scope.last && i + 1 == n,
                    ..scope
                };
                encode_response(w, item, request, inner)?;
            }
            if n == 0 {
                scope.end(w, DoneStatus::empty(), 0, 0);
            }
        }
        MockResponse::Error {
            number,
            message,
            severity,
        } => {
            w.error(&ServerMessage {
                number: *number,
                state: 1,
                class: *severity,
                message: message.clone(),
                server: "mock".into(),
                procedure: String::new(),
                line: 1,
            });
            scope.end(w, DoneStatus::ERROR, 0, 0);
        }
        MockResponse::Info {
            number,
            message,
            then,
        } => {
            w.info(&ServerMessage {
                number: *number,
                state: 1,
                class: 0,
                message: message.clone(),
                server: "mock".into(),
                procedure: String::new(),
                line: 1,
            });
            encode_response(w, then, request, scope)?;
        }
        MockResponse::RowsAffected(count) => {
            scope.end(w, DoneStatus::COUNT, CMD_INSERT, *count);
        }
        MockResponse::EnvChange(change) => {
            w.env_change(change);
            scope.end(w, DoneStatus::empty(), 0, 0);
        }
        MockResponse::Procedure {
            results,
            return_status,
            outputs,
        } => {
            let inner = Scope {
                last: false,
                in_proc: true,
            };
            for result in results {
                encode_response(w, result, request, inner)?;
            }
            w.return_status(*return_status);
            for (i, (name, value)) in outputs.iter().enumerate() {
                w.return_value(i as u16 + 1, name, value)?;
            }
            w.done_proc(more(scope.last), 0);
        }
        MockResponse::Raw(data) => {
            w.raw(data);
        }
        MockResponse::Custom(handler) => {
            encode_response(w, &handler(request), request, scope)?;
        }
        MockResponse::Stall { .. } | MockResponse::Disconnect => {
            return Err(MockServerError::Unexpected(
                "stall and disconnect cannot be nested".into(),
            ));
        }
    }
    Ok(())
}
