//! Per-connection session driver
//!
//! A [`Session`] owns one client transport and walks it through startup,
//! authentication and the simple-query loop. It reads with the phase-aware
//! [`Decoder`], hands SQL text to the [`Engine`] and streams the resulting
//! rows back one DataRow at a time.

pub mod state;
pub mod tls;
pub mod transport;

pub use state::SessionState;
pub use tls::{TlsConfig, TlsConfigBuilder, TlsOutcome};
pub use transport::Transport;

use crate::auth::{self, AuthMethod, ScramError, ScramServer, UserStore};
use crate::bridge::{text, Engine, EngineError, MAX_COLUMNS};
use crate::config::ServerConfig;
use crate::metrics::labels;
use crate::protocol::constants::{frontend_tags, ssl_response, PROTOCOL_MAJOR};
use crate::protocol::{
    encode_backend_into, sql_state, AuthenticationMessage, BackendMessage, Decoder, ErrorFields,
    FrontendMessage, FrontendPhase, ProtocolError,
};
use crate::server::registry::{BackendKey, CancelRegistry};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

// Pending DataRows are written out once this many bytes are buffered
const WRITE_FLUSH_THRESHOLD: usize = 8192;

/// State shared by every session of one server
pub struct SessionContext<E> {
    engine: Arc<E>,
    auth: AuthMethod,
    users: UserStore,
    tls: Option<TlsConfig>,
    registry: Arc<CancelRegistry>,
    server_version: String,
    max_frame_len: usize,
}

impl<E> std::fmt::Debug for SessionContext<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("auth", &self.auth)
            .field("users", &self.users.len())
            .field("tls", &self.tls)
            .field("server_version", &self.server_version)
            .field("max_frame_len", &self.max_frame_len)
            .finish()
    }
}

impl<E: Engine> SessionContext<E> {
    /// Derive user verifiers and load TLS material from `config`
    pub fn new(config: &ServerConfig, engine: Arc<E>, registry: Arc<CancelRegistry>) -> Result<Self> {
        let tls = match &config.tls {
            Some(files) => Some(
                TlsConfig::builder()
                    .cert_path(&files.cert_path)
                    .key_path(&files.key_path)
                    .build()?,
            ),
            None => None,
        };
        Ok(Self {
            engine,
            auth: config.auth,
            users: UserStore::from_passwords(&config.users),
            tls,
            registry,
            server_version: config.server_version.clone(),
            max_frame_len: config.max_frame_len,
        })
    }

    /// Replace the TLS configuration (e.g. with in-memory PEM material)
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Cancel registry shared with the accept loop
    pub fn registry(&self) -> &Arc<CancelRegistry> {
        &self.registry
    }

    /// Engine handle
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }
}

/// One client connection
pub struct Session<S, E> {
    transport: Option<Transport<S>>,
    state: SessionState,
    read_buf: BytesMut,
    write_buf: BytesMut,
    decoder: Decoder,
    key: BackendKey,
    registered: bool,
    user: Option<String>,
    tls_version: Option<String>,
    // Set once a FATAL has been written, so it is not sent twice
    reported: bool,
    // After an extended-protocol error, input is discarded until Sync
    skip_until_sync: bool,
    ctx: Arc<SessionContext<E>>,
}

impl<S, E> Session<S, E>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    E: Engine,
{
    /// Wrap an accepted stream
    pub fn new(stream: S, key: BackendKey, ctx: Arc<SessionContext<E>>) -> Self {
        Self {
            transport: Some(Transport::Plain(stream)),
            state: SessionState::AwaitingStartup,
            read_buf: BytesMut::with_capacity(8192),
            write_buf: BytesMut::with_capacity(8192),
            decoder: Decoder::new(ctx.max_frame_len),
            key,
            registered: false,
            user: None,
            tls_version: None,
            reported: false,
            skip_until_sync: false,
            ctx,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated TLS protocol version, if the client upgraded
    pub fn tls_version(&self) -> Option<&str> {
        self.tls_version.as_deref()
    }

    /// Drive the connection until it closes and return the final state.
    ///
    /// Fatal errors are reported to the client (when the transport is still
    /// usable) and logged; they never propagate out of the session.
    pub async fn run(mut self) -> SessionState {
        crate::metrics::gauges::session_opened();

        match self.drive().await {
            Ok(()) | Err(Error::ConnectionClosed) => {
                if !self.state.is_terminal() {
                    let _ = self.state.transition(SessionState::Closed);
                }
                tracing::info!(user = self.user.as_deref().unwrap_or(""), "session closed");
            }
            Err(err) => {
                crate::metrics::counters::error(err.category());
                if !self.reported && reportable(&err) {
                    let fields = ErrorFields::fatal(err.sql_state(), err.client_message());
                    if let Err(send_err) = self.send_now(BackendMessage::ErrorResponse(fields)).await {
                        tracing::debug!("could not report fatal error: {}", send_err);
                    }
                }
                if !self.state.is_terminal() {
                    let _ = self.state.transition(SessionState::Failed);
                }
                match err {
                    Error::Authentication(_) => tracing::warn!("{}", err),
                    Error::Io(_) | Error::Tls(_) => tracing::warn!("session aborted: {}", err),
                    _ => tracing::error!(category = err.category(), "session failed: {}", err),
                }
            }
        }

        if self.registered {
            self.ctx.registry.unregister(self.key.process_id);
        }
        if let Some(transport) = self.transport.as_mut() {
            let _ = transport.shutdown().await;
        }
        crate::metrics::gauges::session_closed();
        self.state
    }

    async fn drive(&mut self) -> Result<()> {
        let Some(params) = self.startup().await? else {
            return Ok(());
        };
        self.authenticate().await?;
        self.greet(&params).await?;
        self.query_loop().await
    }

    /// Handle the untagged startup family. `None` means the connection was
    /// a CancelRequest and is done.
    async fn startup(&mut self) -> Result<Option<Vec<(String, String)>>> {
        loop {
            match self.read_message(FrontendPhase::Startup).await? {
                FrontendMessage::SslRequest => {
                    let pipelined = self.read_buf.len();
                    tls::check_request(self.transport()?, pipelined)?;
                    let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
                    let (transport, outcome) =
                        tls::negotiate(transport, self.ctx.tls.as_ref(), pipelined).await?;
                    self.transport = Some(transport);
                    if let TlsOutcome::Established { version } = outcome {
                        self.tls_version = Some(version);
                    }
                }
                FrontendMessage::GssEncRequest => {
                    tracing::debug!("declining GSSENCRequest");
                    if !self.read_buf.is_empty() {
                        return Err(ProtocolError::Violation(
                            "received unencrypted data after GSSENCRequest".into(),
                        )
                        .into());
                    }
                    let transport = self.transport()?;
                    transport.write_all(&[ssl_response::DECLINE]).await?;
                    transport.flush().await?;
                }
                FrontendMessage::CancelRequest {
                    process_id,
                    secret_key,
                } => {
                    let matched = self.ctx.registry.cancel(BackendKey {
                        process_id,
                        secret_key,
                    });
                    crate::metrics::counters::cancel_requested(matched);
                    tracing::info!(target_pid = process_id, matched, "cancel request");
                    self.state.transition(SessionState::Closed)?;
                    return Ok(None);
                }
                FrontendMessage::Startup { version, params } => {
                    let major = version >> 16;
                    let minor = version & 0xFFFF;
                    if major != PROTOCOL_MAJOR {
                        let msg = format!(
                            "unsupported frontend protocol {}.{}: server supports 3.0 to 3.0",
                            major, minor
                        );
                        let err = ProtocolError::Violation(msg.clone()).into();
                        return self.fail(sql_state::FEATURE_NOT_SUPPORTED, msg, err).await;
                    }

                    let user = params
                        .iter()
                        .find(|(k, _)| k == "user")
                        .map(|(_, v)| v.clone())
                        .filter(|u| !u.is_empty());
                    let Some(user) = user else {
                        let msg = "no PostgreSQL user name specified in startup packet";
                        return self
                            .fail(
                                sql_state::INVALID_AUTHORIZATION_SPECIFICATION,
                                msg.to_string(),
                                Error::Authentication(msg.into()),
                            )
                            .await;
                    };

                    tracing::debug!(user = %user, "startup message received");
                    self.user = Some(user);
                    self.state.transition(SessionState::Authenticating)?;
                    return Ok(Some(params));
                }
                other => {
                    return Err(ProtocolError::Violation(format!(
                        "unexpected {} during startup",
                        other.name()
                    ))
                    .into())
                }
            }
        }
    }

    async fn authenticate(&mut self) -> Result<()> {
        let user = self.user.clone().unwrap_or_default();
        let mechanism = match self.ctx.auth {
            AuthMethod::Trust => labels::MECHANISM_TRUST,
            AuthMethod::Password => labels::MECHANISM_CLEARTEXT,
            AuthMethod::ScramSha256 => labels::MECHANISM_SCRAM,
        };
        crate::metrics::counters::auth_attempted(mechanism);
        let started = Instant::now();

        let result = match self.ctx.auth {
            AuthMethod::Trust => Ok(()),
            AuthMethod::Password => self.authenticate_cleartext(&user).await,
            AuthMethod::ScramSha256 => self.authenticate_scram(&user).await,
        };

        match &result {
            Ok(()) => {
                crate::metrics::counters::auth_successful(mechanism);
                tracing::debug!(user = %user, mechanism, "authentication successful");
            }
            Err(err) => {
                crate::metrics::counters::auth_failed(mechanism, err.category());
            }
        }
        crate::metrics::histograms::auth_duration(mechanism, started.elapsed());
        result
    }

    async fn authenticate_cleartext(&mut self, user: &str) -> Result<()> {
        self.send_now(BackendMessage::Authentication(
            AuthenticationMessage::CleartextPassword,
        ))
        .await?;

        match self.read_message(FrontendPhase::Password).await? {
            FrontendMessage::Password(password) => self.ctx.users.verify_password(user, &password),
            other => Err(unexpected(&other, "password")),
        }
    }

    async fn authenticate_scram(&mut self, user: &str) -> Result<()> {
        self.send_now(BackendMessage::Authentication(AuthenticationMessage::Sasl {
            mechanisms: vec![auth::scram::MECHANISM.to_string()],
        }))
        .await?;

        let (mechanism, data) = match self.read_message(FrontendPhase::SaslInitial).await? {
            FrontendMessage::SaslInitialResponse { mechanism, data } => (mechanism, data),
            other => return Err(unexpected(&other, "SASLInitialResponse")),
        };
        if mechanism != auth::scram::MECHANISM {
            return Err(ProtocolError::Violation(format!(
                "client selected an invalid SASL authentication mechanism: {}",
                mechanism
            ))
            .into());
        }

        let server = ScramServer::new(self.ctx.users.scram_secret(user));
        let (server_first, exchange) = server
            .server_first(&data)
            .map_err(|e| scram_failure(e, user))?;
        self.send_now(BackendMessage::Authentication(
            AuthenticationMessage::SaslContinue {
                data: server_first.into_bytes(),
            },
        ))
        .await?;

        let data = match self.read_message(FrontendPhase::SaslResponse).await? {
            FrontendMessage::SaslResponse { data } => data,
            other => return Err(unexpected(&other, "SASLResponse")),
        };
        let server_final = exchange
            .server_final(&data)
            .map_err(|e| scram_failure(e, user))?;
        self.send(&BackendMessage::Authentication(
            AuthenticationMessage::SaslFinal {
                data: server_final.into_bytes(),
            },
        ));
        Ok(())
    }

    /// AuthenticationOk, ParameterStatus, BackendKeyData, ReadyForQuery
    async fn greet(&mut self, params: &[(String, String)]) -> Result<()> {
        self.send(&BackendMessage::Authentication(AuthenticationMessage::Ok));

        let application_name = params
            .iter()
            .find(|(k, _)| k == "application_name")
            .map(|(_, v)| v.as_str())
            .unwrap_or("");
        let ctx = self.ctx.clone();
        let statuses = [
            ("server_version", ctx.server_version.as_str()),
            ("server_encoding", "UTF8"),
            ("client_encoding", "UTF8"),
            ("DateStyle", "ISO, MDY"),
            ("TimeZone", "UTC"),
            ("integer_datetimes", "on"),
            ("standard_conforming_strings", "on"),
            ("application_name", application_name),
        ];
        for (name, value) in statuses {
            self.send(&BackendMessage::ParameterStatus {
                name: name.to_string(),
                value: value.to_string(),
            });
        }

        self.ctx.registry.register(self.key);
        self.registered = true;
        self.send(&BackendMessage::BackendKeyData {
            process_id: self.key.process_id,
            secret_key: self.key.secret_key,
        });
        self.send(&BackendMessage::ready_for_query());
        self.flush().await?;

        self.state.transition(SessionState::Idle)?;
        crate::metrics::counters::session_started(if self.transport()?.is_tls() {
            labels::TRANSPORT_TLS
        } else {
            labels::TRANSPORT_PLAIN
        });
        tracing::info!(
            user = self.user.as_deref().unwrap_or(""),
            tls = self.tls_version.as_deref().unwrap_or("off"),
            "session ready"
        );
        Ok(())
    }

    async fn query_loop(&mut self) -> Result<()> {
        loop {
            let msg = self.read_message(FrontendPhase::Ready).await?;

            if self.skip_until_sync
                && !matches!(msg, FrontendMessage::Sync | FrontendMessage::Terminate)
            {
                continue;
            }

            match msg {
                FrontendMessage::Query(sql) => self.simple_query(&sql).await?,
                FrontendMessage::Sync => {
                    self.skip_until_sync = false;
                    self.send_now(BackendMessage::ready_for_query()).await?;
                }
                FrontendMessage::Flush => self.flush().await?,
                FrontendMessage::Terminate => {
                    tracing::debug!("client sent Terminate");
                    self.state.transition(SessionState::Closed)?;
                    return Ok(());
                }
                FrontendMessage::Unsupported { tag, .. } if tag == frontend_tags::PASSWORD => {
                    return Err(ProtocolError::Violation(
                        "unexpected password message after authentication".into(),
                    )
                    .into());
                }
                FrontendMessage::Unsupported { tag, .. } => {
                    let name = msg.name();
                    tracing::debug!(message = name, "rejecting unsupported message");
                    self.send(&BackendMessage::ErrorResponse(ErrorFields::error(
                        sql_state::FEATURE_NOT_SUPPORTED,
                        format!("{} is not supported; use the simple query protocol", name),
                    )));
                    if matches!(tag, frontend_tags::FUNCTION_CALL | frontend_tags::COPY_FAIL) {
                        self.send(&BackendMessage::ready_for_query());
                    } else {
                        self.skip_until_sync = true;
                    }
                    self.flush().await?;
                }
                other => {
                    return Err(ProtocolError::Violation(format!(
                        "unexpected {} after authentication",
                        other.name()
                    ))
                    .into())
                }
            }
        }
    }

    /// Run one simple-protocol query: Idle → Executing → Idle
    async fn simple_query(&mut self, sql: &str) -> Result<()> {
        if sql.trim().trim_end_matches(';').trim().is_empty() {
            self.send(&BackendMessage::EmptyQueryResponse);
            self.send_now(BackendMessage::ready_for_query()).await?;
            return Ok(());
        }

        self.state.transition(SessionState::Executing)?;
        let token = self.ctx.registry.begin_query(self.key.process_id);
        let started = Instant::now();

        let span = tracing::debug_span!("query", sql = %truncate(sql, 128));
        let outcome = self.execute(sql, token).instrument(span).await;
        self.ctx.registry.end_query(self.key.process_id);

        let (status, rows) = match outcome {
            Ok((tag, rows)) => {
                self.send(&BackendMessage::CommandComplete(tag));
                (labels::STATUS_SUCCESS, rows)
            }
            Err(Error::Engine(err)) => {
                let status = if err.is_canceled() {
                    labels::STATUS_CANCELLED
                } else {
                    labels::STATUS_ERROR
                };
                tracing::debug!(code = err.code(), "query failed: {}", err);
                let mut fields = ErrorFields::error(err.code(), err.message());
                if let Some(detail) = err.detail() {
                    fields = fields.with_detail(detail);
                }
                self.send(&BackendMessage::ErrorResponse(fields));
                (status, 0)
            }
            Err(other) => return Err(other),
        };

        crate::metrics::counters::query_completed(status);
        crate::metrics::histograms::query_duration(status, started.elapsed());
        crate::metrics::histograms::query_rows(rows);

        self.send(&BackendMessage::ready_for_query());
        self.flush().await?;
        self.state.transition(SessionState::Idle)?;
        Ok(())
    }

    /// Execute `sql` and stream its rows; returns the CommandComplete tag.
    ///
    /// The client socket is watched while rows are pulled, so a disconnect or
    /// a Terminate drops the engine-side stream and ends the session.
    async fn execute(&mut self, sql: &str, token: CancellationToken) -> Result<(String, u64)> {
        let engine = self.ctx.engine.clone();
        let stream = tokio::select! {
            biased;
            _ = token.cancelled() => Err(EngineError::query_canceled()),
            result = engine.execute(sql) => result,
        }?;
        let mut stream = stream.with_cancel_token(token);

        let width = stream.columns().len();
        if width > MAX_COLUMNS {
            return Err(EngineError::too_many_columns(width).into());
        }
        if stream.has_row_description() {
            let fields = stream.columns().iter().map(|c| c.field_description()).collect();
            self.send(&BackendMessage::RowDescription(fields));
            self.flush().await?;
        }

        // Once a whole message is buffered there is nothing left to watch for
        let mut watching = self.pending_terminate().is_none();
        loop {
            let row = if watching {
                let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
                tokio::select! {
                    row = stream.next_row() => row,
                    read = transport.read_buf(&mut self.read_buf) => {
                        if read? == 0 {
                            tracing::debug!("client disconnected during query");
                            stream.cancel();
                            return Err(Error::ConnectionClosed);
                        }
                        match self.pending_terminate() {
                            Some(true) => {
                                tracing::debug!("client sent Terminate during query");
                                stream.cancel();
                                self.read_buf.clear();
                                self.state.transition(SessionState::Closed)?;
                                return Err(Error::ConnectionClosed);
                            }
                            Some(false) => watching = false,
                            None => {}
                        }
                        continue;
                    }
                }
            } else {
                stream.next_row().await
            };

            let Some(row) = row else {
                break;
            };
            let row = row?;
            self.send(&BackendMessage::DataRow(text::encode_row(&row)));
            if self.write_buf.len() >= WRITE_FLUSH_THRESHOLD {
                self.flush().await?;
            }
        }

        let rows = stream.rows_returned();
        crate::metrics::counters::rows_sent(rows);
        Ok((stream.command_tag(), rows))
    }

    /// Whether the next buffered message is Terminate; `None` until a whole
    /// message has arrived
    fn pending_terminate(&self) -> Option<bool> {
        match self.decoder.frontend(&self.read_buf, FrontendPhase::Ready) {
            Ok(Some((msg, _))) => Some(matches!(msg, FrontendMessage::Terminate)),
            Ok(None) => None,
            // Left for the query loop to report
            Err(_) => Some(false),
        }
    }

    /// Read one frontend message decoded for `phase`
    async fn read_message(&mut self, phase: FrontendPhase) -> Result<FrontendMessage> {
        loop {
            if let Some((msg, consumed)) = self.decoder.frontend(&self.read_buf, phase)? {
                self.read_buf.advance(consumed);
                tracing::trace!(message = msg.name(), "received");
                return Ok(msg);
            }

            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Queue a backend message
    fn send(&mut self, msg: &BackendMessage) {
        encode_backend_into(&mut self.write_buf, msg);
    }

    /// Queue a backend message and flush
    async fn send_now(&mut self, msg: BackendMessage) -> Result<()> {
        self.send(&msg);
        self.flush().await
    }

    async fn flush(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        transport.write_all(&self.write_buf).await?;
        transport.flush().await?;
        self.write_buf.clear();
        Ok(())
    }

    /// Send a FATAL with an explicit SQLSTATE, then fail with `err`
    async fn fail<T>(&mut self, code: &str, message: String, err: Error) -> Result<T> {
        self.reported = true;
        self.send_now(BackendMessage::ErrorResponse(ErrorFields::fatal(code, message)))
            .await?;
        Err(err)
    }

    fn transport(&mut self) -> Result<&mut Transport<S>> {
        self.transport.as_mut().ok_or(Error::ConnectionClosed)
    }
}

/// Whether the client can still be told about `err`
fn reportable(err: &Error) -> bool {
    !matches!(err, Error::Io(_) | Error::Tls(_) | Error::ConnectionClosed)
}

fn unexpected(msg: &FrontendMessage, expected: &str) -> Error {
    ProtocolError::Violation(format!("expected {}, got {}", expected, msg.name())).into()
}

fn scram_failure(err: ScramError, user: &str) -> Error {
    match err {
        ScramError::InvalidClientProof => auth::password_failed(user),
        other => ProtocolError::Malformed(format!("malformed SCRAM message: {}", other)).into(),
    }
}

fn truncate(sql: &str, max: usize) -> &str {
    match sql.char_indices().nth(max) {
        Some((idx, _)) => &sql[..idx],
        None => sql,
    }
}
