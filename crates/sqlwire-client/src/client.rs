//! The connection and its command API.
//!
//! A [`Client`] owns one transport and runs one request at a time. The
//! handshake is PreLogin, then TLS when negotiated, then LOGIN7 with any
//! SSPI round trips. After login the client accepts commands:
//!
//! ```rust,ignore
//! let config = Config::from_ado_string("Server=db,1433;User Id=sa;Password=secret")?;
//! let mut client = Client::connect_tcp(config).await?;
//!
//! let rows = client
//!     .query("SELECT name FROM sys.databases WHERE database_id > @P1", &[&4i32])
//!     .await?
//!     .into_first()
//!     .await?;
//! ```

use std::time::Duration;

use bytes::Bytes;
use sqlwire_auth::{AuthMethod, SecurityContext, scramble_password};
use sqlwire_codec::{Connection, PacketStream};
use sqlwire_protocol::{
    Collation, DEFAULT_PACKET_SIZE, EncryptionLevel, EnvChange, Login7, Packet, PacketStatus,
    PacketType, PreLogin, RpcParam, RpcRequest, ServerVersion, SqlBatch, TdsVersion, Token,
    TokenStream,
};
use sqlwire_tls::{MaybeTlsStream, TlsConnector, TlsError};
use sqlwire_types::ToSql;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};

use crate::browser;
use crate::cancel::CancelHandle;
use crate::config::{Config, MAX_REDIRECTS};
use crate::error::{Error, Result};
use crate::result::{ExecuteResult, QueryResult};
use crate::state::ProtocolState;

/// Session values reported by the server.
#[derive(Debug, Clone)]
struct Session {
    database: Option<String>,
    language: Option<String>,
    collation: Option<Collation>,
    transaction: u64,
    tds_version: TdsVersion,
    encryption: EncryptionLevel,
    server_name: Option<String>,
    server_program_version: Option<(u8, u8, u16)>,
    server_version: Option<ServerVersion>,
    routing: Option<(String, u16)>,
}

/// An established connection.
pub struct Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    conn: Connection<MaybeTlsStream<S>>,
    tokens: TokenStream,
    /// Whether the last packet pushed into `tokens` ended its message.
    message_complete: bool,
    state: ProtocolState,
    session: Session,
    cancel_grace: Duration,
}

impl Client<TcpStream> {
    /// Open a TCP connection and log in.
    ///
    /// Resolves named instances through SQL Browser and follows routing
    /// redirects up to [`MAX_REDIRECTS`] times.
    pub async fn connect_tcp(config: Config) -> Result<Self> {
        config.validate()?;
        let mut config = config;
        let mut redirects = 0u8;

        loop {
            let port = match &config.instance_name {
                Some(instance) => {
                    browser::resolve_instance_port(&config.host, instance, config.connect_timeout)
                        .await?
                }
                None => config.port,
            };

            let addr = format!("{}:{}", config.host, port);
            tracing::debug!(addr = %addr, "opening TCP connection");
            let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| Error::ConnectTimeout)??;
            stream.set_nodelay(true)?;

            match Self::connect(config.clone(), stream).await {
                Err(Error::Routing { host, port }) => {
                    redirects += 1;
                    if redirects > MAX_REDIRECTS {
                        return Err(Error::TooManyRedirects { max: MAX_REDIRECTS });
                    }
                    tracing::info!(host = %host, port, redirects, "following routing redirect");
                    config.instance_name = None;
                    config = config.host(host).port(port);
                }
                other => return other,
            }
        }
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run the handshake over an already connected transport.
    ///
    /// Fails with [`Error::Routing`] when the server redirects the login;
    /// [`Client::connect_tcp`] follows redirects itself.
    pub async fn connect(config: Config, stream: S) -> Result<Self> {
        config.validate()?;
        tracing::debug!(host = %config.host, port = config.port, "starting handshake");

        let mut framed = PacketStream::new(stream);
        let mut prelogin = PreLogin::new()
            .with_version(config.tds_version)
            .with_encryption(config.encryption);
        if let Some(instance) = &config.instance_name {
            prelogin = prelogin.with_instance(instance.clone());
        }
        framed
            .send_message(PacketType::PreLogin, prelogin.encode(), DEFAULT_PACKET_SIZE)
            .await?;

        let response = framed.read_message().await?;
        if !matches!(
            response.packet_type,
            PacketType::PreLogin | PacketType::TabularResult
        ) {
            return Err(Error::Protocol(format!(
                "expected PreLogin response, got {:?}",
                response.packet_type
            )));
        }
        let server = PreLogin::decode(&response.payload)?;
        tracing::debug!(
            server_version = ?server.server_version.map(|v| v.to_string()),
            server_encryption = ?server.encryption,
            "received PreLogin response"
        );

        let encryption = EncryptionLevel::negotiate(config.encryption, server.encryption)
            .ok_or(TlsError::EncryptionMismatch {
                client: config.encryption,
                server: server.encryption,
            })?;
        tracing::debug!(encryption = ?encryption, "negotiated encryption");

        if framed.has_buffered_input() {
            return Err(Error::Protocol(
                "unexpected data after PreLogin response".into(),
            ));
        }
        let stream = framed.into_inner();

        let transport = if encryption.uses_tls() {
            let connector = TlsConnector::new(config.effective_tls())?;
            MaybeTlsStream::from(connector.connect_with_prelogin(stream, &config.host).await?)
        } else {
            tracing::warn!(host = %config.host, "connection is not encrypted");
            MaybeTlsStream::Raw(stream)
        };

        let (login, security) = build_login(&config)?;
        let mut framed = PacketStream::new(transport);
        framed
            .send_message(PacketType::Tds7Login, login.encode()?, DEFAULT_PACKET_SIZE)
            .await?;
        tracing::debug!(method = config.authentication.method_name(), "sent LOGIN7");

        let mut transport = framed.into_inner();
        if transport.is_tls() && !encryption.is_full_session() {
            tracing::debug!("login sent encrypted, continuing in plaintext");
            transport = MaybeTlsStream::Raw(transport.into_plain()?);
        }

        let mut client = Self {
            conn: Connection::new(transport),
            tokens: TokenStream::new(config.tds_version),
            message_complete: false,
            state: ProtocolState::AwaitingResponse,
            session: Session {
                database: None,
                language: None,
                collation: None,
                transaction: 0,
                tds_version: config.tds_version,
                encryption,
                server_name: None,
                server_program_version: None,
                server_version: server.server_version,
                routing: None,
            },
            cancel_grace: config.cancel_grace_period,
        };
        client.login(security).await?;

        if let Some((host, port)) = client.session.routing.take() {
            return Err(Error::Routing { host, port });
        }
        Ok(client)
    }

    async fn login(&mut self, mut security: Option<Box<dyn SecurityContext>>) -> Result<()> {
        let mut acknowledged = false;
        let mut failure = None;

        while let Some(token) = self.next_token().await? {
            match token {
                Token::LoginAck(ack) => {
                    tracing::info!(
                        server = %ack.prog_name,
                        tds_version = %ack.tds_version,
                        "login acknowledged"
                    );
                    self.tokens.set_version(ack.tds_version);
                    self.session.tds_version = ack.tds_version;
                    self.session.server_name = Some(ack.prog_name);
                    self.session.server_program_version = Some(ack.prog_version);
                    acknowledged = true;
                }
                Token::Sspi(challenge) => {
                    let context = security
                        .as_mut()
                        .ok_or_else(|| Error::Protocol("unexpected SSPI challenge".into()))?;
                    if let Some(reply) = context.step(&challenge)? {
                        tracing::debug!(len = reply.len(), "sending SSPI reply");
                        if let Err(e) = self
                            .conn
                            .send_message(PacketType::Sspi, Bytes::from(reply))
                            .await
                        {
                            return Err(self.poison(e.into()));
                        }
                        self.message_complete = false;
                    }
                }
                Token::Error(message) => {
                    failure.get_or_insert(message);
                }
                _ => {}
            }
        }

        if let Some(message) = failure {
            return Err(message.into());
        }
        if !acknowledged {
            return Err(self.poison(Error::Protocol(
                "login response had no LOGINACK".into(),
            )));
        }
        Ok(())
    }

    /// Run a statement and collect its affected-row counts.
    ///
    /// The whole response is read before returning. The first server error
    /// is returned after the response is drained, so the connection stays
    /// usable.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<ExecuteResult> {
        tracing::debug!(sql = sql, params = params.len(), "executing statement");
        self.send_command(sql, params).await?;
        ExecuteResult::read(self).await
    }

    /// Run a query and stream its result sets.
    ///
    /// Parameters are bound by position as `@P1`, `@P2`, ...
    pub async fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<QueryResult<'a, S>> {
        tracing::debug!(sql = sql, params = params.len(), "executing query");
        self.send_command(sql, params).await?;
        QueryResult::new(self).await
    }

    /// Run a batch without parameters.
    pub async fn simple_query(&mut self, sql: &str) -> Result<QueryResult<'_, S>> {
        tracing::debug!(sql = sql, "executing batch");
        let batch = SqlBatch::new(sql).with_transaction(self.session.transaction);
        self.begin_request(PacketType::SqlBatch, batch.encode())
            .await?;
        QueryResult::new(self).await
    }

    async fn send_command(&mut self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<()> {
        if params.is_empty() {
            let batch = SqlBatch::new(sql).with_transaction(self.session.transaction);
            return self.begin_request(PacketType::SqlBatch, batch.encode()).await;
        }

        let params = convert_params(params)?;
        let payload =
            RpcRequest::execute_sql(sql, params).encode_with_transaction(self.session.transaction);
        self.begin_request(PacketType::Rpc, payload).await
    }

    /// Read and discard what is left of an abandoned result.
    ///
    /// Server errors in the discarded part are ignored.
    pub async fn drain(&mut self) -> Result<()> {
        match self.state {
            ProtocolState::Poisoned => return Err(unusable()),
            ProtocolState::Idle => return Ok(()),
            _ => {}
        }
        tracing::debug!(state = ?self.state, "draining response");
        loop {
            match self.next_token().await {
                Ok(Some(_)) => {}
                Ok(None) | Err(Error::Canceled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Close the connection.
    ///
    /// Flushes and shuts down the transport, sending TLS close_notify when
    /// encrypted. Outstanding cancel handles can no longer write.
    pub async fn close(mut self) -> Result<()> {
        tracing::debug!(state = ?self.state, "closing connection");
        self.conn.shutdown().await?;
        Ok(())
    }

    /// A handle that cancels the running command from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<S> {
        CancelHandle::new(self.conn.cancel_handle())
    }

    /// Current database.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.session.database.as_deref()
    }

    /// Session language.
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.session.language.as_deref()
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.conn.packet_size()
    }

    /// TDS version acknowledged by the server.
    #[must_use]
    pub fn tds_version(&self) -> TdsVersion {
        self.session.tds_version
    }

    /// Negotiated encryption level.
    #[must_use]
    pub fn encryption(&self) -> EncryptionLevel {
        self.session.encryption
    }

    /// Session collation, once the server has reported one.
    #[must_use]
    pub fn collation(&self) -> Option<Collation> {
        self.session.collation
    }

    /// Descriptor of the open transaction, 0 outside a transaction.
    #[must_use]
    pub fn transaction_descriptor(&self) -> u64 {
        self.session.transaction
    }

    /// Server program name from LOGINACK.
    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        self.session.server_name.as_deref()
    }

    /// Server program version from LOGINACK.
    #[must_use]
    pub fn server_program_version(&self) -> Option<(u8, u8, u16)> {
        self.session.server_program_version
    }

    /// Server version from the PreLogin response.
    #[must_use]
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.session.server_version
    }

    /// Whether commands can still be sent.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.state.is_usable()
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ProtocolState) {
        self.state = state;
    }

    /// Mark the connection poisoned if `err` is fatal, and hand it back.
    pub(crate) fn poison(&mut self, err: Error) -> Error {
        if err.is_connection_fatal() && self.state != ProtocolState::Poisoned {
            tracing::warn!(error = %err, "connection poisoned");
            self.state = ProtocolState::Poisoned;
        }
        err
    }

    async fn check_ready(&mut self) -> Result<()> {
        match self.state {
            ProtocolState::Poisoned => return Err(unusable()),
            state if state.is_busy() => return Err(Error::Busy),
            _ => {}
        }
        if self.conn.is_cancelling() {
            tracing::debug!("consuming late cancel acknowledgment");
            if let Err(e) = self.conn.drain_after_cancel(self.cancel_grace).await {
                return Err(self.poison(e.into()));
            }
        }
        Ok(())
    }

    async fn begin_request(&mut self, packet_type: PacketType, payload: Bytes) -> Result<()> {
        self.check_ready().await?;
        self.tokens.clear();
        self.message_complete = false;
        self.state = ProtocolState::AwaitingResponse;
        if let Err(e) = self.conn.send_message(packet_type, payload).await {
            return Err(self.poison(e.into()));
        }
        Ok(())
    }

    /// The next token the caller has to look at.
    ///
    /// Env-changes and INFO messages are applied here and never returned.
    /// `None` marks the end of the response and returns the connection to
    /// [`ProtocolState::Idle`]. DONE with ATTN yields [`Error::Canceled`].
    pub(crate) async fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            match self.tokens.next_token() {
                Ok(Some(token)) => {
                    if let Some(token) = self.on_token(token)? {
                        return Ok(Some(token));
                    }
                    continue;
                }
                Ok(None) if self.message_complete => {
                    if !self.conn.is_cancelling() {
                        self.state = ProtocolState::Idle;
                        return Ok(None);
                    }
                    // the acknowledgment arrives as its own message
                    self.message_complete = false;
                }
                Ok(None) => {}
                Err(e) if e.is_incomplete() && !self.message_complete => {}
                Err(e) => return Err(self.poison(e.into())),
            }

            let packet = self.read_packet().await?;
            if packet.header.packet_type != PacketType::TabularResult {
                return Err(self.poison(Error::Protocol(format!(
                    "expected tabular result, got {:?}",
                    packet.header.packet_type
                ))));
            }
            self.message_complete = packet.header.status.contains(PacketStatus::END_OF_MESSAGE);
            tracing::trace!(
                len = packet.payload.len(),
                last = self.message_complete,
                "received packet"
            );
            self.tokens.push(packet.payload);
        }
    }

    /// Read a packet, giving up when a cancel stays unacknowledged for the
    /// grace period after it was sent.
    async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            // Without a cancel in flight, wake up once per grace period to
            // notice one sent from another task.
            let since = self.conn.cancel_sent_at().unwrap_or_else(Instant::now);
            match timeout_at(since + self.cancel_grace, self.conn.read_packet()).await {
                Ok(Ok(Some(packet))) => return Ok(packet),
                Ok(Ok(None)) => {
                    let closed = std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "server closed the connection",
                    );
                    return Err(self.poison(closed.into()));
                }
                Ok(Err(e)) => return Err(self.poison(e.into())),
                Err(_) => {
                    let expired = self
                        .conn
                        .cancel_sent_at()
                        .is_some_and(|sent| sent.elapsed() >= self.cancel_grace);
                    if expired {
                        return Err(self.poison(Error::Unusable(
                            "cancel was not acknowledged in time".into(),
                        )));
                    }
                }
            }
        }
    }

    fn on_token(&mut self, token: Token) -> Result<Option<Token>> {
        match token {
            Token::EnvChange(change) => {
                self.apply_env_change(change);
                Ok(None)
            }
            Token::Info(message) => {
                tracing::info!(
                    number = message.number,
                    class = message.class,
                    message = %message.message,
                    "server message"
                );
                Ok(None)
            }
            Token::Order(_) | Token::FeatureExtAck(_) | Token::Opaque { .. } => Ok(None),
            Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done)
                if done.is_attention() =>
            {
                tracing::debug!("cancel acknowledged");
                self.conn.clear_cancelling();
                self.tokens.clear();
                self.message_complete = true;
                self.state = ProtocolState::Idle;
                Err(Error::Canceled)
            }
            other => Ok(Some(other)),
        }
    }

    fn apply_env_change(&mut self, change: EnvChange) {
        match change {
            EnvChange::Database { new, old } => {
                tracing::debug!(database = %new, previous = %old, "database changed");
                self.session.database = Some(new);
            }
            EnvChange::Language { new, old } => {
                tracing::debug!(language = %new, previous = %old, "language changed");
                self.session.language = Some(new);
            }
            EnvChange::PacketSize { new, .. } => {
                let size = new as usize;
                self.conn.set_packet_size(size);
                self.conn.set_max_read_packet_size(size);
            }
            EnvChange::Collation(collation) => {
                tracing::debug!(collation = ?collation, "collation changed");
                if collation.is_some() {
                    self.session.collation = collation;
                }
            }
            EnvChange::BeginTransaction(descriptor) => {
                tracing::debug!(descriptor, "transaction started");
                self.session.transaction = descriptor;
            }
            EnvChange::CommitTransaction(_) | EnvChange::RollbackTransaction(_) => {
                tracing::debug!("transaction ended");
                self.session.transaction = 0;
            }
            EnvChange::Routing { host, port } => {
                tracing::info!(host = %host, port, "server requested routing");
                self.session.routing = Some((host, port));
            }
            other => tracing::trace!(change = ?other, "ignoring env change"),
        }
    }

    /// Send Attention and discard the response up to its acknowledgment.
    pub(crate) async fn cancel_request(&mut self) -> Result<()> {
        if !self.state.is_busy() {
            return Ok(());
        }
        tracing::debug!(state = ?self.state, "cancelling request");
        self.state = ProtocolState::Draining;

        if let Err(e) = self.conn.cancel_handle().cancel().await {
            return Err(self.poison(e.into()));
        }
        if let Err(e) = self.conn.drain_after_cancel(self.cancel_grace).await {
            return Err(self.poison(e.into()));
        }
        self.tokens.clear();
        self.message_complete = true;
        self.state = ProtocolState::Idle;
        Ok(())
    }
}

impl<S> std::fmt::Debug for Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("database", &self.session.database)
            .field("packet_size", &self.conn.packet_size())
            .field("encryption", &self.session.encryption)
            .finish_non_exhaustive()
    }
}

fn unusable() -> Error {
    Error::Unusable("connection was poisoned by an earlier failure".into())
}

fn build_login(config: &Config) -> Result<(Login7, Option<Box<dyn SecurityContext>>)> {
    let mut login = Login7::new()
        .with_tds_version(config.tds_version)
        .with_app_name(config.application_name.clone())
        .with_server_name(config.host.clone())
        .with_packet_size(config.packet_size);
    if let Some(database) = &config.database {
        login = login.with_database(database.clone());
    }
    if let Some(workstation) = &config.workstation_id {
        login = login.with_hostname(workstation.clone());
    }

    let security = match &config.authentication {
        AuthMethod::SqlServer { user, password } => {
            login = login.with_sql_login(user.clone(), scramble_password(password));
            None
        }
        method => {
            let provider = config.effective_provider().ok_or_else(|| {
                Error::Config(format!(
                    "{} authentication needs a security provider",
                    method.method_name()
                ))
            })?;
            let mut context = provider.create(method, &config.host, config.port)?;
            login = login.with_sspi(context.initial_token()?);
            Some(context)
        }
    };
    Ok((login, security))
}

fn convert_params(params: &[&(dyn ToSql + Sync)]) -> Result<Vec<RpcParam>> {
    params
        .iter()
        .map(|p| Ok(p.to_sql()?.to_param()?.into_rpc_param("")))
        .collect()
}
