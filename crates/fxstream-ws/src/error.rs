//! Stream client error types.

use crate::session::SessionState;
use thiserror::Error;

/// Longest slice of raw inbound text kept in a decode error.
const RAW_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Decode error: {reason} (raw: {raw})")]
    Decode { reason: String, raw: String },

    #[error("Not authenticated: session is {state}")]
    NotAuthenticated { state: SessionState },

    #[error("Request id already pending: {0}")]
    DuplicateRequestId(String),

    #[error("Session already open: {state}")]
    AlreadyOpen { state: SessionState },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StreamError {
    /// Build a decode error, keeping a bounded preview of the offending text.
    pub fn decode(reason: impl Into<String>, raw: &str) -> Self {
        let raw = match raw.char_indices().nth(RAW_PREVIEW_LIMIT) {
            Some((idx, _)) => format!("{}...", &raw[..idx]),
            None => raw.to_string(),
        };
        Self::Decode {
            reason: reason.into(),
            raw,
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
