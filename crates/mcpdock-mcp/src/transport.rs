//! MCP transports and the transport selector.

use crate::error::{McpError, McpResult};
use crate::http::StreamableHttpTransport;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::sse::SseTransport;
use crate::websocket::WebSocketTransport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying connection.
    async fn start(&self) -> McpResult<()>;

    /// Send a request and wait for a response.
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()>;

    /// Close the transport.
    async fn close(&self) -> McpResult<()>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;

    fn kind(&self) -> TransportKind;
}

/// The closed set of transport kinds a server record may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Streamable HTTP: POST per message, JSON or SSE replies.
    #[serde(rename = "http-stream", alias = "StreamableHTTPClientTransport")]
    HttpStream,
    /// Legacy HTTP+SSE: a long-lived event stream plus a POST endpoint.
    #[serde(rename = "sse", alias = "SSEClientTransport")]
    Sse,
    #[serde(rename = "websocket", alias = "WebSocketClientTransport")]
    WebSocket,
    /// Local subprocess. Never usable for a remote server.
    #[serde(rename = "stdio", alias = "StdioClientTransport")]
    Stdio,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [
        TransportKind::HttpStream,
        TransportKind::Sse,
        TransportKind::WebSocket,
        TransportKind::Stdio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::HttpStream => "http-stream",
            TransportKind::Sse => "sse",
            TransportKind::WebSocket => "websocket",
            TransportKind::Stdio => "stdio",
        }
    }

    /// URL schemes accepted for this kind.
    pub fn url_schemes(&self) -> &'static [&'static str] {
        match self {
            TransportKind::HttpStream | TransportKind::Sse => &["http", "https"],
            TransportKind::WebSocket => &["ws", "wss"],
            TransportKind::Stdio => &[],
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http-stream" | "StreamableHTTPClientTransport" => Ok(TransportKind::HttpStream),
            "sse" | "SSEClientTransport" => Ok(TransportKind::Sse),
            "websocket" | "WebSocketClientTransport" => Ok(TransportKind::WebSocket),
            "stdio" | "StdioClientTransport" => Ok(TransportKind::Stdio),
            other => Err(McpError::UnknownTransport(other.to_string())),
        }
    }
}

/// What a transport is constructed from.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub url: Url,
    /// Sent as `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
    /// Per-request deadline.
    pub timeout: Duration,
}

impl TransportOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            auth_token: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Builds a transport without opening it.
pub type TransportConstructor = fn(TransportOptions) -> McpResult<Arc<dyn Transport>>;

fn http_stream(options: TransportOptions) -> McpResult<Arc<dyn Transport>> {
    Ok(Arc::new(StreamableHttpTransport::new(options)?))
}

fn sse(options: TransportOptions) -> McpResult<Arc<dyn Transport>> {
    Ok(Arc::new(SseTransport::new(options)?))
}

fn websocket(options: TransportOptions) -> McpResult<Arc<dyn Transport>> {
    Ok(Arc::new(WebSocketTransport::new(options)))
}

/// Map a transport kind to its constructor.
pub fn constructor_for(kind: TransportKind) -> McpResult<TransportConstructor> {
    match kind {
        TransportKind::HttpStream => Ok(http_stream),
        TransportKind::Sse => Ok(sse),
        TransportKind::WebSocket => Ok(websocket),
        TransportKind::Stdio => Err(McpError::UnsupportedTransport(kind.to_string())),
    }
}

/// Resolve a declared transport name to its constructor.
pub fn select_transport(name: &str) -> McpResult<TransportConstructor> {
    constructor_for(name.parse()?)
}

/// Requests waiting for a response on a multiplexed connection.
#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    inner: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
}

impl PendingRequests {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<JsonRpcResponse>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn register(&self, id: u64) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Hand a response to its waiter. Returns false if nobody was waiting.
    pub(crate) fn resolve(&self, response: JsonRpcResponse) -> bool {
        match self.lock().remove(&response.id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub(crate) fn cancel(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Drop every waiter; their receivers see the channel close.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<JsonRpcResponse>,
        timeout: Duration,
    ) -> McpResult<JsonRpcResponse> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::connection_failed(
                "Connection closed before a response arrived",
            )),
            Err(_) => {
                self.cancel(id);
                Err(McpError::Timeout)
            }
        }
    }
}

/// Take the request id, rejecting notifications sent through `request`.
pub(crate) fn request_id(request: &JsonRpcRequest) -> McpResult<u64> {
    request
        .id
        .ok_or_else(|| McpError::invariant(format!("{} sent as request without id", request.method)))
}
