//! Client for an authenticated, subscription-based streaming price feed.
//!
//! Provides:
//! - HMAC-SHA256 session signing over `"<unix-seconds>GET<path>"`
//! - JSON codec for auth/subscribe/unsubscribe/data commands and inbound envelopes
//! - Protocol session state machine with request-id correlation
//! - Event dispatch keyed on the envelope `event`
//! - A tokio-tungstenite transport behind the [`Transport`] trait

pub mod connection;
mod dispatcher;
pub mod error;
pub mod message;
pub mod session;
pub mod signer;
pub mod transport;

pub use connection::{ConnectionConfig, WsTransport};
pub use error::{StreamError, StreamResult};
pub use message::{
    decode, encode, parse_price_updates, AuthRequest, DataRequest, DataRequestType, EventKind,
    InboundEnvelope, OutboundRequest, PriceUpdate, PriceUpdatesResult, QuantityLevels,
    SignatureField, SubscribeRequest, SubscriptionSpec, TokenPair, UnsubscribeRequest,
};
pub use session::{
    ChannelHandler, CommandResult, DisconnectReason, ProtocolSession, RequestKind, SessionConfig,
    SessionEvent, SessionHandler, SessionState, SessionStats, StreamUpdate,
};
pub use signer::{pre_hash, sign, unix_timestamp, Credentials, DEFAULT_SIGNING_PATH};
pub use transport::{endpoint_url, Transport, TransportListener};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
