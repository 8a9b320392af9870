//! In-process MCP servers for integration tests.

#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use mcpdock_mcp::{AuthKind, ServerRecord, TransportKind};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Messages a test server received, in arrival order.
#[derive(Clone, Default)]
pub struct Received {
    messages: Arc<Mutex<Vec<Value>>>,
    authorization: Arc<Mutex<Vec<String>>>,
}

impl Received {
    pub fn push(&self, message: Value) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn push_authorization(&self, headers: &HeaderMap) {
        if let Some(value) = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
        {
            self.authorization.lock().unwrap().push(value.to_string());
        }
    }

    pub fn methods(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m["method"].as_str().map(str::to_string))
            .collect()
    }

    /// `clientInfo` sent with `initialize`.
    pub fn client_info(&self) -> Option<Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m["method"] == "initialize")
            .map(|m| m["params"]["clientInfo"].clone())
    }

    pub fn authorization(&self) -> Vec<String> {
        self.authorization.lock().unwrap().clone()
    }
}

/// Answer one JSON-RPC message the way a small weather server would.
///
/// Notifications get no reply. `failing` names a method that answers
/// with a JSON-RPC error.
pub fn reply(message: &Value, failing: Option<&str>) -> Option<Value> {
    let id = message.get("id")?.clone();
    let method = message["method"].as_str().unwrap_or_default();

    if failing == Some(method) {
        return Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("Method not found: {method}") }
        }));
    }

    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {
                "tools": { "listChanged": false },
                "prompts": {},
                "resources": { "subscribe": false }
            },
            "serverInfo": { "name": "weather-server", "version": "0.3.0" }
        }),
        "tools/list" => json!({
            "tools": [{
                "name": "forecast",
                "description": "Forecast for a city",
                "inputSchema": { "type": "object" }
            }]
        }),
        "prompts/list" => json!({
            "prompts": [{
                "name": "daily-summary",
                "arguments": [{ "name": "city", "required": true }]
            }]
        }),
        "resources/list" => json!({
            "resources": [{ "uri": "weather://stations", "name": "stations" }]
        }),
        "resources/templates/list" => json!({
            "resourceTemplates": [{ "uriTemplate": "weather://{city}/today", "name": "today" }]
        }),
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {other}") }
            }))
        }
    };

    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

/// Streamable HTTP responder for wiremock.
pub struct HttpResponder {
    pub received: Received,
    pub failing: Option<&'static str>,
}

impl HttpResponder {
    pub fn new(received: Received) -> Self {
        Self {
            received,
            failing: None,
        }
    }

    pub fn failing(mut self, method: &'static str) -> Self {
        self.failing = Some(method);
        self
    }
}

impl wiremock::Respond for HttpResponder {
    fn respond(&self, request: &wiremock::Request) -> wiremock::ResponseTemplate {
        let Ok(message) = request.body_json::<Value>() else {
            return wiremock::ResponseTemplate::new(400);
        };
        self.received.push(message.clone());
        let authorization = wiremock::http::HeaderName::from("authorization");
        if let Some(values) = request.headers.get(&authorization) {
            self.received
                .authorization
                .lock()
                .unwrap()
                .push(values.last().as_str().to_string());
        }

        match reply(&message, self.failing) {
            Some(response) => wiremock::ResponseTemplate::new(200)
                .insert_header("mcp-session-id", "session-1")
                .set_body_json(response),
            None => wiremock::ResponseTemplate::new(202),
        }
    }
}

#[derive(Clone)]
struct SseState {
    received: Received,
    outgoing: broadcast::Sender<String>,
}

async fn sse_stream(
    State(state): State<SseState>,
    headers: HeaderMap,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    state.received.push_authorization(&headers);
    let mut outgoing = state.outgoing.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("endpoint").data("/messages?sessionId=abc"));
        while let Ok(message) = outgoing.recv().await {
            yield Ok(Event::default().event("message").data(message));
        }
    };
    Sse::new(stream)
}

async fn sse_message(State(state): State<SseState>, Json(message): Json<Value>) -> StatusCode {
    state.received.push(message.clone());
    if let Some(response) = reply(&message, None) {
        let _ = state.outgoing.send(response.to_string());
    }
    StatusCode::ACCEPTED
}

/// Serve a legacy HTTP+SSE MCP server. The event stream is at `/sse`.
pub async fn spawn_sse_server(received: Received) -> SocketAddr {
    let (outgoing, _) = broadcast::channel(64);
    let state = SseState { received, outgoing };
    let app = Router::new()
        .route("/sse", get(sse_stream))
        .route("/messages", axum::routing::post(sse_message))
        .with_state(state);
    serve(app).await
}

async fn ws_upgrade(
    State(received): State<Received>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    received.push_authorization(&headers);
    ws.protocols(["mcp"])
        .on_upgrade(move |socket| ws_session(socket, received))
}

async fn ws_session(mut socket: WebSocket, received: Received) {
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(message) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        received.push(message.clone());
        if let Some(response) = reply(&message, None) {
            if socket
                .send(Message::Text(response.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

/// Serve a WebSocket MCP server at `/ws`, negotiating the `mcp` subprotocol.
pub async fn spawn_ws_server(received: Received) -> SocketAddr {
    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(received);
    serve(app).await
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn record(transport: TransportKind, url: impl Into<String>) -> ServerRecord {
    ServerRecord {
        id: 1,
        name: "weather".to_string(),
        version: "1.2.0".to_string(),
        transport,
        url: url.into(),
        auth_type: AuthKind::None,
        auth_token: None,
        oauth_authorization_server: None,
        oauth_client_id: None,
        oauth_client_secret: None,
        oauth_client_registered: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
