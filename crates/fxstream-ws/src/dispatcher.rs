//! Inbound event routing.
//!
//! Maps each decoded envelope to the branch of the session state machine
//! that owns it. Unknown events are logged and ignored; they never change
//! state.

use crate::message::{EventKind, InboundEnvelope};
use crate::session::{
    CommandResult, DisconnectReason, RequestKind, SessionCore, SessionEvent, SessionInner,
    SessionState, StreamUpdate,
};
use chrono::Utc;
use tracing::{debug, error, info, warn};

/// Side effects of one dispatched envelope. The transport is closed
/// under the session lock; events are delivered after it is released.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub(crate) events: Vec<SessionEvent>,
    pub(crate) close_transport: bool,
}

pub(crate) fn dispatch(
    session: &SessionInner,
    core: &mut SessionCore,
    envelope: InboundEnvelope,
    out: &mut Outcome,
) {
    let kind = envelope.event.clone();
    match kind {
        EventKind::AuthResponse => on_auth_response(session, core, envelope, out),
        EventKind::SubscribeResponse => {
            on_command_response(core, RequestKind::Subscribe, envelope, out)
        }
        EventKind::UnsubscribeResponse => {
            on_command_response(core, RequestKind::Unsubscribe, envelope, out)
        }
        EventKind::DataResponse => on_command_response(core, RequestKind::Data, envelope, out),
        EventKind::Stream => on_stream(core, envelope, out),
        EventKind::Unknown(name) => {
            core.stats.unknown_events += 1;
            debug!(event = %name, "Ignoring unknown event");
        }
    }
}

fn on_auth_response(
    session: &SessionInner,
    core: &mut SessionCore,
    envelope: InboundEnvelope,
    out: &mut Outcome,
) {
    if core.state != SessionState::AwaitingAuth {
        warn!(state = %core.state, "Unexpected auth_response, ignoring");
        return;
    }

    if let (Some(expected), Some(received)) = (&core.auth_request_id, &envelope.request_id) {
        if expected != received {
            debug!(%expected, %received, "auth_response request_id differs from auth request");
        }
    }

    if envelope.is_success() {
        info!("Stream session authenticated");
        core.state = SessionState::Authenticated;
        core.auth_request_id = None;
        out.events.push(SessionEvent::Authenticated);
        session.send_initial_subscriptions(core);
    } else {
        let reason = envelope.failure_reason();
        error!(%reason, "Authentication rejected by server");
        core.close_locally();
        out.close_transport = true;
        out.events.push(SessionEvent::AuthFailed {
            reason: reason.clone(),
        });
        out.events
            .push(SessionEvent::Disconnected(DisconnectReason::AuthenticationFailed(
                reason,
            )));
    }
}

fn on_command_response(
    core: &mut SessionCore,
    kind: RequestKind,
    envelope: InboundEnvelope,
    out: &mut Outcome,
) {
    if core.state != SessionState::Authenticated {
        debug!(%kind, state = %core.state, "Dropping command response outside authenticated state");
        return;
    }

    let matched = match envelope.request_id.as_deref() {
        Some(id) => match core.pending.get(id).map(|p| p.kind) {
            Some(pending_kind) if pending_kind == kind => {
                if let Some(pending) = core.pending.remove(id) {
                    let latency_ms = (Utc::now() - pending.sent_at).num_milliseconds();
                    debug!(%kind, request_id = id, target = %pending.target, latency_ms, "Command resolved");
                }
                true
            }
            Some(pending_kind) => {
                warn!(request_id = id, expected = %pending_kind, received = %kind, "Response kind does not match pending command");
                false
            }
            None => {
                warn!(%kind, request_id = id, "Response for unknown request id");
                false
            }
        },
        None => {
            warn!(%kind, "Response without request id");
            false
        }
    };

    if !matched {
        core.stats.unmatched_responses += 1;
    }

    let ok = envelope.is_success();
    if !ok {
        warn!(%kind, request_id = ?envelope.request_id, reason = %envelope.failure_reason(), "Command rejected by server");
    }

    let result = CommandResult {
        detail: envelope.detail().cloned(),
        request_id: envelope.request_id,
        ok,
        matched,
    };

    out.events.push(match kind {
        RequestKind::Subscribe => SessionEvent::SubscribeResult(result),
        RequestKind::Unsubscribe => SessionEvent::UnsubscribeResult(result),
        RequestKind::Data => SessionEvent::DataResponse(result),
    });
}

fn on_stream(core: &mut SessionCore, envelope: InboundEnvelope, out: &mut Outcome) {
    if core.state != SessionState::Authenticated {
        debug!(state = %core.state, "Dropping stream push outside authenticated state");
        return;
    }

    if envelope.is_error() {
        let reason = envelope.failure_reason();
        warn!(request_id = ?envelope.request_id, %reason, "Stream push reported an error");
        out.events.push(SessionEvent::StreamError {
            request_id: envelope.request_id,
            reason,
        });
        return;
    }

    core.stats.price_updates += 1;
    out.events.push(SessionEvent::PriceUpdate(StreamUpdate {
        request_id: envelope.request_id,
        body: envelope.body.unwrap_or(serde_json::Value::Null),
    }));
}
