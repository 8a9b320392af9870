//! Streamable HTTP transport for remote MCP servers.
//!
//! Each message is an HTTP POST; the server replies with either a JSON body
//! or a `text/event-stream` carrying the response.

use crate::error::{McpError, McpResult};
use crate::protocol::{parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::sse::{apply_auth, map_send_error, SseEventParser};
use crate::transport::{request_id, Transport, TransportKind, TransportOptions};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Header carrying the server-issued session id.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Streamable HTTP transport.
pub struct StreamableHttpTransport {
    options: TransportOptions,
    client: Client,
    connected: AtomicBool,
    /// Session ID issued by the server on initialize
    session_id: RwLock<Option<String>>,
}

impl StreamableHttpTransport {
    pub fn new(options: TransportOptions) -> McpResult<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| {
                McpError::connection_failed(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            options,
            client,
            connected: AtomicBool::new(false),
            session_id: RwLock::new(None),
        })
    }

    /// Session id issued by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Build request with common headers.
    async fn build_request(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(self.options.url.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);

        if let Some(session_id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_ID_HEADER, session_id);
        }

        apply_auth(req, self.options.auth_token.as_deref())
    }

    fn ensure_started(&self) -> McpResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(McpError::invariant("HTTP transport used before start"))
        }
    }

    /// Read the response for `id` from a JSON body or an event stream.
    async fn parse_response_body(
        &self,
        id: u64,
        response: reqwest::Response,
    ) -> McpResult<JsonRpcResponse> {
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.contains("text/event-stream") {
            let text = response
                .text()
                .await
                .map_err(|e| McpError::protocol_error(format!("Failed to read response: {e}")))?;

            return serde_json::from_str(&text)
                .map_err(|e| McpError::protocol_error(format!("Invalid JSON response: {e}")));
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseEventParser::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| McpError::protocol_error(format!("Stream error: {e}")))?;
            for event in parser.feed(&chunk) {
                match parse_response(&event.data) {
                    Some(response) if response.id == id => return Ok(response),
                    Some(response) => {
                        debug!(id = response.id, "Ignoring response for another request")
                    }
                    None => debug!("Ignoring server-initiated message"),
                }
            }
        }

        Err(McpError::protocol_error(
            "SSE stream ended without response",
        ))
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    /// Nothing to open ahead of time; the first POST is the initialize request.
    async fn start(&self) -> McpResult<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(McpError::invariant("HTTP transport already started"));
        }
        debug!(url = %self.options.url, "Streamable HTTP transport ready");
        Ok(())
    }

    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        self.ensure_started()?;
        let id = request_id(&request)?;
        let request_json = serde_json::to_string(&request)?;

        debug!(id, method = %request.method, "Sending HTTP request");

        let response = self
            .build_request(request_json)
            .await
            .send()
            .await
            .map_err(map_send_error)?;

        if let Some(session_id) = response.headers().get(SESSION_ID_HEADER) {
            if let Ok(session_id) = session_id.to_str() {
                *self.session_id.write().await = Some(session_id.to_string());
            }
        }

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

        self.parse_response_body(id, response).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        self.ensure_started()?;
        let notification_json = serde_json::to_string(&notification)?;

        debug!(method = %notification.method, "Sending HTTP notification");

        let response = self
            .build_request(notification_json)
            .await
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        if !status.is_success() {
            warn!(status = %status, "Notification returned non-success status");
        }

        Ok(())
    }

    /// Terminates the server session with DELETE when one was issued.
    async fn close(&self) -> McpResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(session_id) = self.session_id.write().await.take() {
            let request = self
                .client
                .delete(self.options.url.clone())
                .header(SESSION_ID_HEADER, &session_id);
            match apply_auth(request, self.options.auth_token.as_deref())
                .send()
                .await
            {
                // 405 means the server does not allow client-initiated termination
                Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {}
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "Session termination rejected");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to terminate session"),
            }
        }

        debug!("Closed HTTP transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::HttpStream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use url::Url;

    fn transport(url: &str) -> StreamableHttpTransport {
        let options = TransportOptions::new(Url::parse(url).unwrap())
            .with_auth_token(Some("test-token".to_string()))
            .with_timeout(Duration::from_secs(1));
        StreamableHttpTransport::new(options).unwrap()
    }

    #[tokio::test]
    async fn test_start_and_close() {
        let transport = transport("https://example.com/mcp");
        assert!(!transport.is_connected());

        transport.start().await.unwrap();
        assert!(transport.is_connected());
        assert!(matches!(
            transport.start().await,
            Err(McpError::Invariant(_))
        ));

        // No session id, so no DELETE is attempted
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_request_before_start_is_invariant() {
        let transport = transport("https://example.com/mcp");
        let err = transport
            .request(JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Invariant(_)));
    }

    #[tokio::test]
    async fn test_request_connection_refused() {
        let transport = transport("http://127.0.0.1:1/mcp");
        transport.start().await.unwrap();
        let err = transport
            .request(JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            McpError::ConnectionFailed(_) | McpError::ProtocolError(_) | McpError::Timeout
        ));
    }

    #[tokio::test]
    async fn test_session_id_initially_none() {
        let transport = transport("https://example.com/mcp");
        assert!(transport.session_id().await.is_none());
    }
}
