//! Main application orchestration.
//!
//! Owns one `ProtocolSession` on a WebSocket transport and drives it:
//! - Records every session event in metrics
//! - Issues the configured data requests after each auth
//! - Reopens the session with exponential backoff after retryable disconnects
//! - Closes cleanly on Ctrl-C

use crate::config::{AppConfig, ReconnectConfig};
use crate::error::{AppError, AppResult};
use fxstream_telemetry::Metrics;
use fxstream_ws::{
    ChannelHandler, CommandResult, ConnectionConfig, Credentials, DisconnectReason,
    ProtocolSession, SessionEvent, StreamError, StreamUpdate, Transport, WsTransport,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Session counters are mirrored into metrics at this interval.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// What the event loop should do after an event.
#[derive(Debug, PartialEq)]
enum Next {
    Continue,
    Reconnect(DisconnectReason),
    Stop,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    session: ProtocolSession,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    log_price_updates: bool,
    /// Consecutive reconnect attempts since the last successful auth.
    reconnect_attempt: u32,
}

impl Application {
    /// Create an application on a tokio-tungstenite transport.
    pub fn new(config: AppConfig, credentials: Credentials) -> Self {
        let transport = WsTransport::new(ConnectionConfig {
            connect_timeout_ms: config.stream.connect_timeout_ms,
            ..Default::default()
        });
        Self::with_transport(config, credentials, Arc::new(transport))
    }

    pub fn with_transport(
        config: AppConfig,
        credentials: Credentials,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (handler, events) = ChannelHandler::new();
        let session = ProtocolSession::new(credentials, config.session_config(), transport, handler);
        Self {
            config,
            session,
            events,
            log_price_updates: false,
            reconnect_attempt: 0,
        }
    }

    /// Log every parsed price level at info.
    pub fn log_price_updates(mut self, enabled: bool) -> Self {
        self.log_price_updates = enabled;
        self
    }

    pub fn session(&self) -> &ProtocolSession {
        &self.session
    }

    /// Run until Ctrl-C, a non-retryable disconnect or reconnect exhaustion.
    pub async fn run(&mut self) -> AppResult<()> {
        info!(
            url = %self.session.config().url,
            subscriptions = self.config.subscriptions.len(),
            "Starting stream session"
        );
        self.session.open()?;
        self.publish_state();

        let mut stats_interval = tokio::time::interval(STATS_INTERVAL);
        let result = loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        warn!("Session event channel closed");
                        break Ok(());
                    };
                    match self.handle_event(event) {
                        Ok(Next::Continue) => {}
                        Ok(Next::Stop) => break Ok(()),
                        Ok(Next::Reconnect(reason)) => {
                            match self.reconnect(&reason).await {
                                Ok(true) => {}
                                Ok(false) => break Ok(()),
                                Err(e) => break Err(e),
                            }
                        }
                        Err(e) => break Err(e),
                    }
                }

                _ = stats_interval.tick() => {
                    self.publish_stats();
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        self.shutdown();
        result
    }

    /// Close the session and flush counters.
    pub fn shutdown(&self) {
        if let Err(e) = self.session.close() {
            warn!(error = %e, "Error while closing session");
        }
        self.publish_stats();
        info!(stats = ?self.session.stats(), "Stream session stopped");
    }

    fn handle_event(&mut self, event: SessionEvent) -> AppResult<Next> {
        Metrics::event(event_label(&event));

        let next = match event {
            SessionEvent::Authenticated => {
                info!("Authenticated");
                self.reconnect_attempt = 0;
                self.send_data_requests();
                Next::Continue
            }
            SessionEvent::AuthFailed { reason } => {
                error!(%reason, "Authentication failed");
                Metrics::auth_failure();
                Next::Continue
            }
            SessionEvent::SubscribeResult(result) => {
                log_command("subscribe", &result);
                Next::Continue
            }
            SessionEvent::UnsubscribeResult(result) => {
                log_command("unsubscribe", &result);
                Next::Continue
            }
            SessionEvent::DataResponse(result) => {
                log_command("data", &result);
                if result.ok {
                    info!(
                        request_id = ?result.request_id,
                        body = %result.detail.unwrap_or_default(),
                        "Data response"
                    );
                }
                Next::Continue
            }
            SessionEvent::PriceUpdate(update) => {
                self.record_price_update(&update);
                Next::Continue
            }
            SessionEvent::StreamError { request_id, reason } => {
                warn!(?request_id, %reason, "Stream error");
                Next::Continue
            }
            SessionEvent::Disconnected(reason) => {
                Metrics::disconnect(reason.label());
                self.on_disconnected(reason)?
            }
        };

        self.publish_state();
        Ok(next)
    }

    fn on_disconnected(&self, reason: DisconnectReason) -> AppResult<Next> {
        match reason {
            DisconnectReason::ClientClosed => {
                info!("Session closed by client");
                Ok(Next::Stop)
            }
            DisconnectReason::AuthenticationFailed(reason) => {
                Err(StreamError::AuthenticationFailed(reason).into())
            }
            reason if self.config.reconnect.enabled => {
                warn!(%reason, "Session disconnected, will reconnect");
                Ok(Next::Reconnect(reason))
            }
            reason => Err(StreamError::Transport(reason.to_string()).into()),
        }
    }

    /// Wait out the backoff and reopen.
    ///
    /// Returns `Ok(false)` if Ctrl-C arrived during the wait.
    async fn reconnect(&mut self, reason: &DisconnectReason) -> AppResult<bool> {
        let policy = &self.config.reconnect;
        self.reconnect_attempt += 1;
        let attempt = self.reconnect_attempt;

        if policy.max_attempts > 0 && attempt > policy.max_attempts {
            error!(max_attempts = policy.max_attempts, "Reconnect attempts exhausted");
            return Err(AppError::ReconnectExhausted {
                attempts: policy.max_attempts,
            });
        }

        let delay = backoff_delay(policy, attempt);
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested during backoff");
                return Ok(false);
            }
        }

        Metrics::reconnect(reason.label());
        // A refused open emits no disconnect event, so it ends the run.
        if let Err(e) = self.session.open() {
            error!(error = %e, attempt, "Reopen failed");
            return Err(e.into());
        }
        self.publish_state();
        Ok(true)
    }

    fn send_data_requests(&self) {
        for request_type in &self.config.data_requests {
            match self.session.request_data(*request_type, None) {
                Ok(request_id) => debug!(?request_type, %request_id, "Data request sent"),
                Err(e) => warn!(?request_type, error = %e, "Data request failed"),
            }
        }
    }

    fn record_price_update(&self, update: &StreamUpdate) {
        let parsed = update.price_updates();
        Metrics::price_parse_failures(parsed.failed_count);
        if parsed.failed_count > 0 {
            warn!(
                request_id = ?update.request_id,
                failed = parsed.failed_count,
                "Some price levels failed to parse"
            );
        }

        let now_ms = now_millis();
        for price in &parsed.updates {
            let pair = price.pair().to_string();
            let age_ms = (price.t_create > 0).then(|| (now_ms - price.t_create).max(0) as f64);
            Metrics::price_update(&pair, price.quantity, price.spread(), age_ms);

            if self.log_price_updates {
                info!(
                    %pair,
                    quantity = price.quantity,
                    quantity_token = %price.quantity_token,
                    buy = ?price.buy_price,
                    sell = ?price.sell_price,
                    t_create = price.t_create,
                    "Price"
                );
            }
        }
    }

    fn publish_state(&self) {
        Metrics::session_state(self.session.state().as_str());
    }

    fn publish_stats(&self) {
        let stats = self.session.stats();
        Metrics::session_counter("messages_received", stats.messages_received);
        Metrics::session_counter("decode_errors", stats.decode_errors);
        Metrics::session_counter("discarded", stats.discarded);
        Metrics::session_counter("unknown_events", stats.unknown_events);
        Metrics::session_counter("unmatched_responses", stats.unmatched_responses);
        Metrics::session_counter("price_updates", stats.price_updates);
    }
}

fn log_command(kind: &str, result: &CommandResult) {
    Metrics::command_result(kind, result.ok);
    if result.ok {
        debug!(kind, request_id = ?result.request_id, matched = result.matched, "Command succeeded");
    } else {
        warn!(
            kind,
            request_id = ?result.request_id,
            detail = ?result.detail,
            "Command failed"
        );
    }
}

fn event_label(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Authenticated => "authenticated",
        SessionEvent::AuthFailed { .. } => "auth_failed",
        SessionEvent::SubscribeResult(_) => "subscribe_result",
        SessionEvent::UnsubscribeResult(_) => "unsubscribe_result",
        SessionEvent::DataResponse(_) => "data_response",
        SessionEvent::PriceUpdate(_) => "price_update",
        SessionEvent::StreamError { .. } => "stream_error",
        SessionEvent::Disconnected(_) => "disconnected",
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`, plus
/// 0-999ms of jitter.
pub fn backoff_delay(policy: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = policy
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(policy.max_delay_ms);
    Duration::from_millis(delay + rand_jitter())
}

/// Random jitter (0-999ms).
fn rand_jitter() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos % 1000)
}
