//! Legacy HTTP+SSE transport for remote MCP servers.
//!
//! ```text
//! client                                  server
//!   │── GET <url> (text/event-stream) ──────▶│
//!   │◀── event: endpoint  data: /messages?… ─│
//!   │── POST <endpoint> (JSON-RPC) ─────────▶│  202 Accepted
//!   │◀── event: message   data: {response} ──│
//! ```

use crate::error::{McpError, McpResult};
use crate::protocol::{parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{request_id, PendingRequests, Transport, TransportKind, TransportOptions};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the server sent none.
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Feed it raw body chunks; it returns the events completed by each chunk.
/// Lines are decoded only once complete, so a UTF-8 sequence split across
/// chunks survives intact.
#[derive(Debug, Default)]
pub struct SseEventParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                // Comment / keep-alive
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

pub(crate) fn apply_auth(
    request: reqwest::RequestBuilder,
    auth_token: Option<&str>,
) -> reqwest::RequestBuilder {
    match auth_token {
        Some(token) => request.header("Authorization", format!("Bearer {token}")),
        None => request,
    }
}

pub(crate) fn map_send_error(e: reqwest::Error) -> McpError {
    if e.is_timeout() {
        McpError::Timeout
    } else if e.is_connect() {
        McpError::connection_failed(format!("Connection failed: {e}"))
    } else {
        McpError::protocol_error(format!("Request failed: {e}"))
    }
}

/// Legacy SSE transport for remote MCP servers.
pub struct SseTransport {
    options: TransportOptions,
    /// No overall timeout: the event stream stays open for the session.
    client: Client,
    connected: Arc<AtomicBool>,
    /// POST target announced by the `endpoint` event.
    endpoint: RwLock<Option<Url>>,
    pending: PendingRequests,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Create a new SSE transport.
    pub fn new(options: TransportOptions) -> McpResult<Self> {
        let client = Client::builder()
            .connect_timeout(options.timeout)
            .build()
            .map_err(|e| {
                McpError::connection_failed(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            options,
            client,
            connected: Arc::new(AtomicBool::new(false)),
            endpoint: RwLock::new(None),
            pending: PendingRequests::default(),
            reader: Mutex::new(None),
        })
    }

    /// Stop the reader spawned by a failed start.
    async fn abort_start(&self, error: McpError) -> McpError {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        self.pending.clear();
        error
    }

    async fn endpoint(&self) -> McpResult<Url> {
        self.endpoint
            .read()
            .await
            .clone()
            .ok_or_else(|| McpError::invariant("SSE transport used before start"))
    }

    async fn post(&self, body: String) -> McpResult<()> {
        let endpoint = self.endpoint().await?;
        let request = self
            .client
            .post(endpoint)
            .timeout(self.options.timeout)
            .header("Content-Type", "application/json")
            .body(body);

        let response = apply_auth(request, self.options.auth_token.as_deref())
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::protocol_error(format!(
                "Server returned {status}: {text}"
            )));
        }
        Ok(())
    }
}

/// Resolve the announced POST target against the stream URL.
///
/// Requests carry the server's bearer token, so the endpoint must stay on
/// the stream's origin.
fn resolve_endpoint(base: &Url, data: &str) -> McpResult<Url> {
    let endpoint = base
        .join(data.trim())
        .map_err(|e| McpError::protocol_error(format!("Invalid endpoint {data}: {e}")))?;
    if endpoint.origin() != base.origin() {
        return Err(McpError::protocol_error(format!(
            "Endpoint {endpoint} is not on the origin of {base}"
        )));
    }
    Ok(endpoint)
}

/// Read the event stream until it ends, routing responses to waiters.
async fn read_events(
    response: reqwest::Response,
    base: Url,
    endpoint_tx: oneshot::Sender<McpResult<Url>>,
    pending: PendingRequests,
    connected: Arc<AtomicBool>,
) {
    let mut stream = response.bytes_stream();
    let mut parser = SseEventParser::new();
    let mut endpoint_tx = Some(endpoint_tx);

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "SSE stream error");
                break;
            }
        };

        for event in parser.feed(&chunk) {
            match event.event.as_str() {
                "endpoint" => {
                    let resolved = resolve_endpoint(&base, &event.data);
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(resolved);
                    }
                }
                "message" => match parse_response(&event.data) {
                    Some(response) => {
                        let id = response.id;
                        if !pending.resolve(response) {
                            debug!(id, "Dropping response nobody is waiting for");
                        }
                    }
                    None => debug!("Ignoring server-initiated SSE message"),
                },
                other => debug!(event = %other, "Ignoring SSE event"),
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    pending.clear();
    if let Some(tx) = endpoint_tx.take() {
        let _ = tx.send(Err(McpError::connection_failed(
            "SSE stream ended before the endpoint event",
        )));
    }
    debug!("SSE stream closed");
}

#[async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> McpResult<()> {
        if self.is_connected() {
            return Err(McpError::invariant("SSE transport already started"));
        }

        let url = self.options.url.clone();
        debug!(url = %url, "Opening SSE stream");
        let request = self
            .client
            .get(url.clone())
            .header("Accept", "text/event-stream");
        let response = apply_auth(request, self.options.auth_token.as_deref())
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        if !status.is_success() {
            return Err(McpError::connection_failed(format!(
                "SSE stream returned {status}"
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let handle = tokio::spawn(read_events(
            response,
            url,
            endpoint_tx,
            self.pending.clone(),
            self.connected.clone(),
        ));
        *self.reader.lock().await = Some(handle);

        let endpoint = match tokio::time::timeout(self.options.timeout, endpoint_rx).await {
            Ok(Ok(Ok(endpoint))) => endpoint,
            Ok(Ok(Err(e))) => return Err(self.abort_start(e).await),
            Ok(Err(_)) => {
                let e = McpError::connection_failed("SSE reader stopped");
                return Err(self.abort_start(e).await);
            }
            Err(_) => return Err(self.abort_start(McpError::Timeout).await),
        };

        debug!(endpoint = %endpoint, "SSE endpoint received");
        *self.endpoint.write().await = Some(endpoint);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let id = request_id(&request)?;
        let body = serde_json::to_string(&request)?;
        debug!(id, method = %request.method, "Sending SSE request");

        let rx = self.pending.register(id);
        if let Err(e) = self.post(body).await {
            self.pending.cancel(id);
            return Err(e);
        }
        self.pending.wait(id, rx, self.options.timeout).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        debug!(method = %notification.method, "Sending SSE notification");
        self.post(serde_json::to_string(&notification)?).await
    }

    async fn close(&self) -> McpResult<()> {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        self.pending.clear();
        self.connected.store(false, Ordering::SeqCst);
        debug!("Closed SSE transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}
