//! Transport seam between the protocol session and the socket.
//!
//! A transport opens a duplex text-frame stream and reports lifecycle
//! events to the listener it was opened with. Implementations must not
//! call the listener synchronously from inside `open`, `send` or `close`,
//! and `send` must not block.

use crate::error::StreamResult;
use std::sync::Arc;

/// Lifecycle callbacks a transport delivers for one connection.
pub trait TransportListener: Send + Sync {
    /// The stream is open and writable.
    fn on_open(&self);

    /// A text frame arrived.
    fn on_message(&self, text: &str);

    /// The peer closed the stream, or it ended.
    fn on_close(&self, code: u16, reason: &str);

    /// The stream failed. No further callbacks follow.
    fn on_error(&self, error: &str);
}

/// Duplex text-frame stream.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Start connecting to `url`. Completion is reported via `on_open`.
    fn open(&self, url: &str, listener: Arc<dyn TransportListener>) -> StreamResult<()>;

    /// Queue one text frame.
    fn send(&self, text: String) -> StreamResult<()>;

    /// Close the current stream, if any.
    fn close(&self) -> StreamResult<()>;
}

/// Build a `ws://` or `wss://` URL from host and path.
pub fn endpoint_url(host: &str, path: &str, tls: bool) -> String {
    let scheme = if tls { "wss" } else { "ws" };
    let host = host.trim_end_matches('/');
    if path.is_empty() || path.starts_with('/') {
        format!("{scheme}://{host}{path}")
    } else {
        format!("{scheme}://{host}/{path}")
    }
}
