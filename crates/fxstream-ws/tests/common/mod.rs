//! Shared helpers for session integration tests.

#![allow(dead_code)]

pub mod mock_server;

use fxstream_ws::{
    Credentials, ProtocolSession, SessionConfig, SessionEvent, StreamError, StreamResult,
    Transport, TransportListener,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Transport that records every call and lets the test drive callbacks.
#[derive(Default)]
pub struct RecordingTransport {
    opened: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    closes: Mutex<u32>,
    listeners: Mutex<Vec<Arc<dyn TransportListener>>>,
    fail_sends: Mutex<bool>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Listener from the most recent `open`.
    pub fn listener(&self) -> Arc<dyn TransportListener> {
        self.listeners
            .lock()
            .last()
            .cloned()
            .expect("transport was never opened")
    }

    /// Listener from the n-th `open` (0-based).
    pub fn listener_at(&self, index: usize) -> Arc<dyn TransportListener> {
        self.listeners.lock()[index].clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .map(|s| serde_json::from_str(s).expect("sent frame is JSON"))
            .collect()
    }

    pub fn close_count(&self) -> u32 {
        *self.closes.lock()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        *self.fail_sends.lock() = fail;
    }
}

impl Transport for RecordingTransport {
    fn open(&self, url: &str, listener: Arc<dyn TransportListener>) -> StreamResult<()> {
        self.opened.lock().push(url.to_string());
        self.listeners.lock().push(listener);
        Ok(())
    }

    fn send(&self, text: String) -> StreamResult<()> {
        if *self.fail_sends.lock() {
            return Err(StreamError::Transport("send failed".to_string()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) -> StreamResult<()> {
        *self.closes.lock() += 1;
        Ok(())
    }
}

/// Collects every event the session emits.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn handler(&self) -> impl Fn(SessionEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event| events.lock().push(event)
    }
}

// base64("fxstream-test-secret-key-0123456")
pub const TEST_SECRET_B64: &str = "ZnhzdHJlYW0tdGVzdC1zZWNyZXQta2V5LTAxMjM0NTY=";

pub fn test_credentials() -> Credentials {
    Credentials::new("test-api-key", TEST_SECRET_B64, "test-passphrase").expect("valid secret")
}

pub fn new_session(
    config: SessionConfig,
) -> (ProtocolSession, Arc<RecordingTransport>, EventLog) {
    let transport = RecordingTransport::new();
    let log = EventLog::default();
    let session = ProtocolSession::new(
        test_credentials(),
        config,
        transport.clone(),
        log.handler(),
    );
    (session, transport, log)
}

/// Open the session and complete the auth handshake.
pub fn authenticated_session(
    config: SessionConfig,
) -> (ProtocolSession, Arc<RecordingTransport>, EventLog) {
    let (session, transport, log) = new_session(config);
    session.open().expect("open");
    transport.listener().on_open();
    transport
        .listener()
        .on_message(r#"{"event":"auth_response","status":"success","body":"Authentication successful"}"#);
    (session, transport, log)
}
