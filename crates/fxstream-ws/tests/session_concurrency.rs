//! Caller commands racing on separate threads.
//!
//! The transport here keeps a single active connection slot like
//! `WsTransport`, and its `close` is slow, so an unserialized `open` would
//! land inside it.

mod common;

use common::{test_credentials, EventLog};
use fxstream_ws::{
    ProtocolSession, SessionConfig, SessionState, StreamResult, Transport, TransportListener,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct SingleSlotTransport {
    active: Mutex<Option<Arc<dyn TransportListener>>>,
    opens: Mutex<u32>,
}

impl SingleSlotTransport {
    fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    fn listener(&self) -> Arc<dyn TransportListener> {
        self.active.lock().clone().expect("transport is open")
    }
}

impl Transport for SingleSlotTransport {
    fn open(&self, _url: &str, listener: Arc<dyn TransportListener>) -> StreamResult<()> {
        *self.opens.lock() += 1;
        *self.active.lock() = Some(listener);
        Ok(())
    }

    fn send(&self, _text: String) -> StreamResult<()> {
        Ok(())
    }

    fn close(&self) -> StreamResult<()> {
        thread::sleep(Duration::from_millis(100));
        self.active.lock().take();
        Ok(())
    }
}

fn authenticated() -> (ProtocolSession, Arc<SingleSlotTransport>) {
    let transport = Arc::new(SingleSlotTransport::default());
    let log = EventLog::default();
    let session = ProtocolSession::new(
        test_credentials(),
        SessionConfig::new("ws://stream.test"),
        transport.clone(),
        log.handler(),
    );
    session.open().unwrap();
    transport.listener().on_open();
    transport
        .listener()
        .on_message(r#"{"event":"auth_response","status":"success"}"#);
    assert_eq!(session.state(), SessionState::Authenticated);
    (session, transport)
}

#[test]
fn test_open_during_close_leaves_a_live_connection() {
    let (session, transport) = authenticated();

    thread::scope(|scope| {
        let closer = session.clone();
        scope.spawn(move || closer.close().unwrap());

        let opener = session.clone();
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(20));
            opener.open().unwrap();
        });
    });

    // The open waited for the close to finish, so its connection survived.
    assert_eq!(session.state(), SessionState::Connecting);
    assert!(transport.is_active());
    assert_eq!(*transport.opens.lock(), 2);

    transport.listener().on_open();
    assert_eq!(session.state(), SessionState::AwaitingAuth);
}

#[test]
fn test_state_and_transport_agree_after_racing_commands() {
    for delay_ms in [0, 5, 50, 150] {
        let (session, transport) = authenticated();

        thread::scope(|scope| {
            let closer = session.clone();
            scope.spawn(move || closer.close().unwrap());

            let opener = session.clone();
            scope.spawn(move || {
                thread::sleep(Duration::from_millis(delay_ms));
                let _ = opener.open();
            });
        });

        match session.state() {
            SessionState::Connecting => assert!(transport.is_active()),
            SessionState::Closed => {
                assert!(!transport.is_active());
                session.open().unwrap();
                assert!(transport.is_active());
            }
            other => panic!("unexpected state {other} after delay {delay_ms}ms"),
        }
    }
}
