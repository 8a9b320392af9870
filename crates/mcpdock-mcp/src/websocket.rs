//! WebSocket transport for remote MCP servers.
//!
//! One JSON-RPC message per text frame, negotiated with the `mcp` subprotocol.

use crate::error::{McpError, McpResult};
use crate::protocol::{parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{request_id, PendingRequests, Transport, TransportKind, TransportOptions};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

/// WebSocket subprotocol for MCP.
pub const SUBPROTOCOL: &str = "mcp";

const CLOSE_GRACE: Duration = Duration::from_millis(200);

/// WebSocket transport.
pub struct WebSocketTransport {
    options: TransportOptions,
    connected: Arc<AtomicBool>,
    /// Frames queued for the writer task.
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: PendingRequests,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            connected: Arc::new(AtomicBool::new(false)),
            outgoing: Mutex::new(None),
            pending: PendingRequests::default(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn handshake_request(&self) -> McpResult<tungstenite::handshake::client::Request> {
        let mut request = self
            .options
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| McpError::connection_failed(format!("Invalid WebSocket URL: {e}")))?;

        let headers = request.headers_mut();
        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(SUBPROTOCOL),
        );
        if let Some(token) = self.options.auth_token.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| McpError::protocol_error(format!("Invalid auth token: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        Ok(request)
    }

    async fn send(&self, text: String) -> McpResult<()> {
        let outgoing = self.outgoing.lock().await;
        let sender = outgoing
            .as_ref()
            .ok_or_else(|| McpError::invariant("WebSocket transport used before start"))?;
        sender
            .send(Message::Text(text.into()))
            .map_err(|_| McpError::connection_failed("WebSocket connection closed"))
    }
}

fn map_connect_error(e: tungstenite::Error) -> McpError {
    match e {
        tungstenite::Error::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            McpError::AuthRequired
        }
        tungstenite::Error::Http(response) => McpError::connection_failed(format!(
            "WebSocket upgrade rejected with {}",
            response.status()
        )),
        other => McpError::connection_failed(format!("WebSocket connection failed: {other}")),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn start(&self) -> McpResult<()> {
        if self.is_connected() {
            return Err(McpError::invariant("WebSocket transport already started"));
        }

        let request = self.handshake_request()?;
        debug!(url = %self.options.url, "Opening WebSocket");
        let (stream, _response) = tokio::time::timeout(self.options.timeout, connect_async(request))
            .await
            .map_err(|_| McpError::Timeout)?
            .map_err(map_connect_error)?;

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "Failed to send WebSocket frame");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let pending = self.pending.clone();
        let connected = self.connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match parse_response(text.as_str()) {
                        Some(response) => {
                            let id = response.id;
                            if !pending.resolve(response) {
                                debug!(id, "Dropping response nobody is waiting for");
                            }
                        }
                        None => debug!("Ignoring server-initiated WebSocket message"),
                    },
                    Ok(Message::Close(_)) => {
                        debug!("Server closed WebSocket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            pending.clear();
        });

        *self.outgoing.lock().await = Some(tx);
        self.tasks.lock().await.extend([writer, reader]);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let id = request_id(&request)?;
        let text = serde_json::to_string(&request)?;
        debug!(id, method = %request.method, "Sending WebSocket request");

        let rx = self.pending.register(id);
        if let Err(e) = self.send(text).await {
            self.pending.cancel(id);
            return Err(e);
        }
        self.pending.wait(id, rx, self.options.timeout).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        debug!(method = %notification.method, "Sending WebSocket notification");
        self.send(serde_json::to_string(&notification)?).await
    }

    async fn close(&self) -> McpResult<()> {
        if let Some(sender) = self.outgoing.lock().await.take() {
            let _ = sender.send(Message::Close(None));
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for mut task in tasks {
            // Give the writer a moment to flush the close frame
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.pending.clear();
        self.connected.store(false, Ordering::SeqCst);
        debug!("Closed WebSocket transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}
