//! WebSocket transport backed by tokio-tungstenite.
//!
//! Each `open` spawns one I/O task on the current tokio runtime. The task
//! connects, reports `on_open`, then multiplexes the read half, the
//! outbound queue and a cancellation token until the stream ends. On
//! `close` the queued frames are written before the Close frame.

use crate::error::{StreamError, StreamResult};
use crate::transport::{Transport, TransportListener};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Give up connecting after this long.
    pub connect_timeout_ms: u64,
    /// Disable Nagle's algorithm on the socket.
    pub tcp_nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            tcp_nodelay: true,
        }
    }
}

/// Live connection handles.
struct ActiveConnection {
    outbound_tx: mpsc::UnboundedSender<String>,
    shutdown_token: CancellationToken,
}

/// tokio-tungstenite implementation of [`Transport`].
///
/// Must be opened from within a tokio runtime.
pub struct WsTransport {
    config: ConnectionConfig,
    active: Mutex<Option<ActiveConnection>>,
}

impl WsTransport {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
        }
    }

    /// Whether a connection task is running.
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|c| !c.shutdown_token.is_cancelled() && !c.outbound_tx.is_closed())
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, listener: Arc<dyn TransportListener>) -> StreamResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StreamError::Transport(format!("no tokio runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown_token = CancellationToken::new();

        let previous = self.active.lock().replace(ActiveConnection {
            outbound_tx,
            shutdown_token: shutdown_token.clone(),
        });
        if let Some(previous) = previous {
            debug!("Cancelling previous connection task");
            previous.shutdown_token.cancel();
        }

        runtime.spawn(run_connection(
            url.to_string(),
            self.config.clone(),
            listener,
            outbound_rx,
            shutdown_token,
        ));
        Ok(())
    }

    fn send(&self, text: String) -> StreamResult<()> {
        let active = self.active.lock();
        let connection = active
            .as_ref()
            .ok_or_else(|| StreamError::Transport("not connected".to_string()))?;
        connection
            .outbound_tx
            .send(text)
            .map_err(|_| StreamError::Transport("connection task has exited".to_string()))
    }

    fn close(&self) -> StreamResult<()> {
        if let Some(connection) = self.active.lock().take() {
            info!("WebSocket close requested");
            connection.shutdown_token.cancel();
        }
        Ok(())
    }
}

/// Why the message loop stopped.
enum LoopExit {
    Shutdown,
    Closed { code: u16, reason: String },
    Failed(String),
}

async fn run_connection(
    url: String,
    config: ConnectionConfig,
    listener: Arc<dyn TransportListener>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    shutdown_token: CancellationToken,
) {
    info!(url = %url, "Connecting to WebSocket");

    let connect = connect_async_tls_with_config(url.as_str(), None, config.tcp_nodelay, None);
    let connected = tokio::select! {
        () = shutdown_token.cancelled() => {
            info!("Shutdown requested while connecting");
            return;
        }
        result = tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), connect) => result,
    };

    let ws_stream = match connected {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            error!(error = %e, "WebSocket connection failed");
            listener.on_error(&e.to_string());
            return;
        }
        Err(_) => {
            error!(timeout_ms = config.connect_timeout_ms, "WebSocket connection timed out");
            listener.on_error("connect timed out");
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    info!("WebSocket connected");
    listener.on_open();

    let exit = loop {
        tokio::select! {
            biased;

            () = shutdown_token.cancelled() => {
                // Frames accepted by `send` before `close` still go out.
                let mut flushed = 0usize;
                while let Ok(text) = outbound_rx.try_recv() {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!(error = %e, "Failed to flush queued frame during shutdown");
                        break;
                    }
                    flushed += 1;
                }
                if flushed > 0 {
                    debug!(flushed, "Flushed queued frames before closing");
                }
                if let Err(e) = write.send(Message::Close(None)).await {
                    warn!(error = %e, "Failed to send Close frame during shutdown");
                }
                break LoopExit::Shutdown;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        listener.on_message(&text);
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => listener.on_message(&text),
                        Err(e) => warn!(error = %e, "Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break LoopExit::Failed(e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        break LoopExit::Closed { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break LoopExit::Failed(e.to_string());
                    }
                    None => {
                        break LoopExit::Closed {
                            code: 1006,
                            reason: "Stream ended".to_string(),
                        };
                    }
                }
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            break LoopExit::Failed(e.to_string());
                        }
                    }
                    // Sender dropped: transport replaced or closed.
                    None => break LoopExit::Shutdown,
                }
            }
        }
    };

    match exit {
        LoopExit::Shutdown => info!("WebSocket connection task stopped"),
        LoopExit::Closed { code, reason } => {
            warn!(code, %reason, "WebSocket closed by server");
            listener.on_close(code, &reason);
        }
        LoopExit::Failed(e) => {
            error!(error = %e, "WebSocket I/O error");
            listener.on_error(&e);
        }
    }
}
