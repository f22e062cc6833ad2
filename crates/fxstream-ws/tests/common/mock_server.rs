//! Mock price-stream server for transport tests.
//!
//! Speaks just enough of the protocol to drive a session:
//! - Answers `auth` with `auth_response` (success or a configured rejection)
//! - Answers `subscribe` with `subscribe_response` followed by one `stream` push
//! - Answers `data_request` with `data_response`
//! - Optionally closes the socket with a code right after auth

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Server behaviour.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Reject auth with this error text.
    pub reject_auth: Option<String>,
    /// Close with this code after a successful auth.
    pub close_after_auth: Option<u16>,
}

pub struct MockStreamServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<Vec<Value>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockStreamServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            behavior.clone(),
                            messages_clone.clone(),
                            connections_clone.clone(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/price.tickers", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Every JSON frame received, in order.
    pub async fn received(&self) -> Vec<Value> {
        self.messages.lock().await.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

fn response(event: &str, request: &Value, body: Value) -> Message {
    Message::Text(
        json!({
            "event": event,
            "status": "success",
            "request_id": request["request_id"],
            "body": body,
        })
        .to_string(),
    )
}

async fn handle_connection(
    stream: TcpStream,
    behavior: MockBehavior,
    messages: Arc<Mutex<Vec<Value>>>,
    connections: Arc<Mutex<u32>>,
) {
    *connections.lock().await += 1;

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        messages.lock().await.push(request.clone());

        match request["action"].as_str() {
            Some("auth") => {
                if let Some(reason) = &behavior.reject_auth {
                    let reply = json!({
                        "event": "auth_response",
                        "status": "error",
                        "request_id": request["request_id"],
                        "error": reason,
                    });
                    let _ = write.send(Message::Text(reply.to_string())).await;
                    continue;
                }

                let _ = write
                    .send(response("auth_response", &request, json!("Authentication successful")))
                    .await;

                if let Some(code) = behavior.close_after_auth {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "maintenance".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
            Some("subscribe") => {
                let _ = write
                    .send(response("subscribe_response", &request, json!("Subscribed")))
                    .await;
                let push = json!({
                    "event": "stream",
                    "status": "success",
                    "request_id": request["request_id"],
                    "body": [{
                        "t_create": 1_700_000_000_000_i64,
                        "quantity": request["quantity"]["levels"][0],
                        "quantity_token": request["quantity"]["token"],
                        "base_token": request["base_token"],
                        "quote_token": request["quote_token"],
                        "buy_price": 2001.5,
                        "sell_price": 2000.5,
                    }],
                });
                let _ = write.send(Message::Text(push.to_string())).await;
            }
            Some("data_request") => {
                let _ = write
                    .send(response("data_response", &request, json!({"max_levels": 10})))
                    .await;
            }
            _ => {}
        }
    }
}
