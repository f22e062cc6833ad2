//! Protocol session state machine.
//!
//! Owns the connection lifecycle: signs and sends the auth request once
//! the transport opens, sends the configured subscriptions once the
//! server accepts it, and correlates command responses by request id.
//!
//! All transport callbacks and caller commands serialize on one mutex.
//! Transport `open`, `send` and `close` are issued while holding it;
//! handler notifications are delivered after it is released, so handlers
//! may call back into the session.

use crate::dispatcher::{dispatch, Outcome};
use crate::error::{StreamError, StreamResult};
use crate::message::{
    decode, encode, parse_price_updates, AuthRequest, DataRequestType, OutboundRequest,
    PriceUpdatesResult, SignatureField, SubscriptionSpec, TokenPair,
};
use crate::signer::{unix_timestamp, Credentials, DEFAULT_SIGNING_PATH};
use crate::transport::{Transport, TransportListener};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ============================================================================
// Configuration and state
// ============================================================================

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Connection URL handed to the transport.
    pub url: String,
    /// Path used in the signature pre-hash string.
    #[serde(default = "default_signing_path")]
    pub signing_path: String,
    /// Wire name of the auth signature field.
    #[serde(default)]
    pub signature_field: SignatureField,
    /// Subscriptions sent automatically after every successful auth.
    #[serde(default)]
    pub initial_subscriptions: Vec<SubscriptionSpec>,
}

fn default_signing_path() -> String {
    DEFAULT_SIGNING_PATH.to_string()
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            signing_path: default_signing_path(),
            signature_field: SignatureField::default(),
            initial_subscriptions: Vec::new(),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Authenticated,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a correlated command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
    Data,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command awaiting its response.
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    pub(crate) kind: RequestKind,
    /// Pair or data type, for logs.
    pub(crate) target: String,
    pub(crate) sent_at: DateTime<Utc>,
}

/// Message counters for one session, across reconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages_received: u64,
    pub decode_errors: u64,
    /// Messages that arrived while the session was closed or stale.
    pub discarded: u64,
    pub unknown_events: u64,
    pub unmatched_responses: u64,
    pub price_updates: u64,
}

// ============================================================================
// Events delivered to the caller
// ============================================================================

/// Outcome of a subscribe, unsubscribe or data request.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub request_id: Option<String>,
    pub ok: bool,
    /// Error payload on failure, body otherwise.
    pub detail: Option<serde_json::Value>,
    /// Whether the id matched a pending command of the same kind.
    pub matched: bool,
}

/// A `stream` push.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUpdate {
    pub request_id: Option<String>,
    pub body: serde_json::Value,
}

impl StreamUpdate {
    pub fn price_updates(&self) -> PriceUpdatesResult {
        parse_price_updates(&self.body)
    }
}

/// Why the session left the connected states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller invoked `close()`.
    ClientClosed,
    /// The server closed the stream.
    ServerClosed { code: u16, reason: String },
    /// The transport failed.
    TransportError(String),
    /// The server rejected the auth request.
    AuthenticationFailed(String),
}

impl DisconnectReason {
    /// Whether a reconnect policy should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerClosed { .. } | Self::TransportError(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ServerClosed { .. } => "server_closed",
            Self::TransportError(_) => "transport_error",
            Self::AuthenticationFailed(_) => "auth_failed",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "closed by client"),
            Self::ServerClosed { code, reason } => {
                write!(f, "closed by server: code={code}, reason={reason}")
            }
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::AuthenticationFailed(reason) => write!(f, "authentication failed: {reason}"),
        }
    }
}

/// Notification delivered to the session handler.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Authenticated,
    AuthFailed { reason: String },
    SubscribeResult(CommandResult),
    UnsubscribeResult(CommandResult),
    DataResponse(CommandResult),
    PriceUpdate(StreamUpdate),
    /// A `stream` push carrying an error status.
    StreamError {
        request_id: Option<String>,
        reason: String,
    },
    Disconnected(DisconnectReason),
}

/// Receiver of session notifications.
pub trait SessionHandler: Send + Sync {
    fn handle(&self, event: SessionEvent);
}

impl<F> SessionHandler for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn handle(&self, event: SessionEvent) {
        self(event)
    }
}

/// Forwards every notification into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionHandler for ChannelHandler {
    fn handle(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            warn!("Session event receiver dropped");
        }
    }
}

// ============================================================================
// Session
// ============================================================================

pub(crate) struct SessionCore {
    pub(crate) state: SessionState,
    /// Incremented on every `open()`; callbacks carry the value they were
    /// opened with.
    pub(crate) generation: u64,
    pub(crate) pending: HashMap<String, PendingRequest>,
    pub(crate) auth_request_id: Option<String>,
    pub(crate) stats: SessionStats,
}

impl SessionCore {
    fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && self.state != SessionState::Closed
    }

    pub(crate) fn close_locally(&mut self) {
        self.state = SessionState::Closed;
        self.pending.clear();
        self.auth_request_id = None;
    }
}

pub(crate) struct SessionInner {
    credentials: Credentials,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn SessionHandler>,
    core: Mutex<SessionCore>,
}

/// Authenticated streaming session.
///
/// Cheap to clone; clones share the same connection and state.
#[derive(Clone)]
pub struct ProtocolSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl ProtocolSession {
    /// Create a disconnected session.
    pub fn new(
        credentials: Credentials,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        handler: impl SessionHandler + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                credentials,
                config,
                transport,
                handler: Arc::new(handler),
                core: Mutex::new(SessionCore {
                    state: SessionState::Disconnected,
                    generation: 0,
                    pending: HashMap::new(),
                    auth_request_id: None,
                    stats: SessionStats::default(),
                }),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.core.lock().stats
    }

    /// Ids and kinds of commands still awaiting a response.
    pub fn pending_requests(&self) -> Vec<(String, RequestKind)> {
        let core = self.inner.core.lock();
        let mut pending: Vec<_> = core
            .pending
            .iter()
            .map(|(id, p)| (id.clone(), p.kind))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        pending
    }

    /// Ask the transport to connect.
    ///
    /// Returns once the request is submitted; authentication continues
    /// asynchronously. Allowed from `Disconnected` and `Closed`.
    ///
    /// # Errors
    /// - `StreamError::AlreadyOpen` if a connection is active
    /// - the transport's error if it refuses to open (state becomes `Closed`)
    pub fn open(&self) -> StreamResult<()> {
        // Held across `transport.open` so a concurrent `close` cannot tear
        // down the connection this call is about to start.
        let mut core = self.inner.core.lock();
        match core.state {
            SessionState::Disconnected | SessionState::Closed => {}
            state => return Err(StreamError::AlreadyOpen { state }),
        }
        core.generation += 1;
        core.pending.clear();
        core.auth_request_id = None;
        core.state = SessionState::Connecting;
        let generation = core.generation;

        info!(url = %self.inner.config.url, generation, "Opening stream session");

        let listener = Arc::new(SessionListener {
            session: Arc::downgrade(&self.inner),
            generation,
        });

        if let Err(e) = self.inner.transport.open(&self.inner.config.url, listener) {
            error!(error = %e, "Transport refused to open");
            core.close_locally();
            return Err(e);
        }

        Ok(())
    }

    /// Close the session. Idempotent.
    ///
    /// Pending commands are dropped and any response arriving afterwards
    /// is discarded.
    pub fn close(&self) -> StreamResult<()> {
        let result = {
            let mut core = self.inner.core.lock();
            let previous = core.state;
            if previous == SessionState::Closed {
                return Ok(());
            }
            core.close_locally();

            if previous == SessionState::Disconnected {
                debug!("Closing session that was never opened");
                return Ok(());
            }

            info!(from = %previous, "Closing stream session");
            self.inner.transport.close()
        };

        self.inner
            .emit(vec![SessionEvent::Disconnected(DisconnectReason::ClientClosed)]);
        result
    }

    /// Subscribe to a price stream.
    ///
    /// Returns the request id used (generated when `request_id` is `None`).
    ///
    /// # Errors
    /// - `StreamError::NotAuthenticated` unless the session is authenticated
    /// - `StreamError::DuplicateRequestId` if the id is still pending
    pub fn subscribe(
        &self,
        spec: &SubscriptionSpec,
        request_id: Option<String>,
    ) -> StreamResult<String> {
        let mut core = self.inner.core.lock();
        self.inner.send_command(
            &mut core,
            RequestKind::Subscribe,
            spec.pair.to_string(),
            request_id,
            |id| OutboundRequest::subscribe(spec, id),
        )
    }

    /// Unsubscribe from a price stream.
    ///
    /// # Errors
    /// Same as [`ProtocolSession::subscribe`].
    pub fn unsubscribe(&self, pair: &TokenPair, request_id: Option<String>) -> StreamResult<String> {
        let mut core = self.inner.core.lock();
        self.inner.send_command(
            &mut core,
            RequestKind::Unsubscribe,
            pair.to_string(),
            request_id,
            |id| OutboundRequest::unsubscribe(pair, id),
        )
    }

    /// Ask the server for one of its static limits.
    ///
    /// # Errors
    /// Same as [`ProtocolSession::subscribe`].
    pub fn request_data(
        &self,
        request_type: DataRequestType,
        request_id: Option<String>,
    ) -> StreamResult<String> {
        let mut core = self.inner.core.lock();
        self.inner.send_command(
            &mut core,
            RequestKind::Data,
            format!("{request_type:?}"),
            request_id,
            |id| OutboundRequest::data(request_type, id),
        )
    }
}

impl SessionInner {
    fn emit(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.handler.handle(event);
        }
    }

    /// Encode, send and register a correlated command.
    fn send_command(
        &self,
        core: &mut SessionCore,
        kind: RequestKind,
        target: String,
        request_id: Option<String>,
        build: impl FnOnce(&str) -> OutboundRequest,
    ) -> StreamResult<String> {
        if core.state != SessionState::Authenticated {
            return Err(StreamError::NotAuthenticated { state: core.state });
        }

        let request_id = request_id.unwrap_or_else(|| generate_request_id(kind.as_str()));
        if core.pending.contains_key(&request_id) {
            return Err(StreamError::DuplicateRequestId(request_id));
        }

        let text = encode(&build(&request_id))?;
        self.transport.send(text)?;

        debug!(%kind, request_id = %request_id, %target, "Command sent");
        core.pending.insert(
            request_id.clone(),
            PendingRequest {
                kind,
                target,
                sent_at: Utc::now(),
            },
        );
        Ok(request_id)
    }

    /// Send the configured subscriptions right after auth succeeds.
    pub(crate) fn send_initial_subscriptions(&self, core: &mut SessionCore) {
        for spec in &self.config.initial_subscriptions {
            let result = self.send_command(
                core,
                RequestKind::Subscribe,
                spec.pair.to_string(),
                None,
                |id| OutboundRequest::subscribe(spec, id),
            );
            if let Err(e) = result {
                error!(pair = %spec.pair, error = %e, "Failed to send initial subscription");
            }
        }
    }

    fn handle_open(&self, generation: u64) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if !core.accepts(generation) || core.state != SessionState::Connecting {
                debug!(generation, "Ignoring open for inactive connection");
                return;
            }

            let timestamp = unix_timestamp();
            let request_id = generate_request_id("auth");
            let sent = self
                .credentials
                .sign(&self.config.signing_path, timestamp)
                .map(|signature| {
                    OutboundRequest::Auth(AuthRequest {
                        api_key: self.credentials.api_key().to_string(),
                        passphrase: self.credentials.passphrase().to_string(),
                        signature,
                        timestamp,
                        request_id: request_id.clone(),
                        signature_field: self.config.signature_field,
                    })
                })
                .and_then(|request| encode(&request))
                .and_then(|text| self.transport.send(text));

            match sent {
                Ok(()) => {
                    info!(request_id = %request_id, timestamp, "Auth request sent");
                    core.state = SessionState::AwaitingAuth;
                    core.auth_request_id = Some(request_id);
                }
                Err(e) => {
                    error!(error = %e, "Failed to send auth request");
                    core.close_locally();
                    self.close_transport();
                    events.push(SessionEvent::Disconnected(DisconnectReason::TransportError(
                        e.to_string(),
                    )));
                }
            }
        }

        self.emit(events);
    }

    /// Must be called with the core lock held.
    fn close_transport(&self) {
        if let Err(e) = self.transport.close() {
            debug!(error = %e, "Transport close failed");
        }
    }

    fn handle_message(&self, generation: u64, text: &str) {
        let mut outcome = Outcome::default();
        {
            let mut core = self.core.lock();
            if !core.accepts(generation) {
                core.stats.discarded += 1;
                debug!(generation, "Discarding message for inactive connection");
                return;
            }
            core.stats.messages_received += 1;

            let envelope = match decode(text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    core.stats.decode_errors += 1;
                    warn!(error = %e, "Dropping undecodable message");
                    return;
                }
            };

            dispatch(self, &mut core, envelope, &mut outcome);
            if outcome.close_transport {
                self.close_transport();
            }
        }

        self.emit(outcome.events);
    }

    fn handle_disconnect(&self, generation: u64, reason: DisconnectReason) {
        {
            let mut core = self.core.lock();
            if !core.accepts(generation) {
                debug!(generation, %reason, "Ignoring disconnect for inactive connection");
                return;
            }
            if !core.pending.is_empty() {
                warn!(pending = core.pending.len(), "Dropping pending commands on disconnect");
            }
            core.close_locally();
        }

        warn!(%reason, "Stream session disconnected");
        self.emit(vec![SessionEvent::Disconnected(reason)]);
    }
}

fn generate_request_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Listener handed to the transport for one connection generation.
struct SessionListener {
    session: Weak<SessionInner>,
    generation: u64,
}

impl TransportListener for SessionListener {
    fn on_open(&self) {
        if let Some(session) = self.session.upgrade() {
            session.handle_open(self.generation);
        }
    }

    fn on_message(&self, text: &str) {
        if let Some(session) = self.session.upgrade() {
            session.handle_message(self.generation, text);
        }
    }

    fn on_close(&self, code: u16, reason: &str) {
        if let Some(session) = self.session.upgrade() {
            session.handle_disconnect(
                self.generation,
                DisconnectReason::ServerClosed {
                    code,
                    reason: reason.to_string(),
                },
            );
        }
    }

    fn on_error(&self, error: &str) {
        if let Some(session) = self.session.upgrade() {
            session.handle_disconnect(
                self.generation,
                DisconnectReason::TransportError(error.to_string()),
            );
        }
    }
}
