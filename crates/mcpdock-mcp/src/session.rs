//! MCP session client: handshake and the diagnostic describe call.

use crate::error::{McpError, McpResult};
use crate::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    McpPrompt, McpResource, McpResourceTemplate, McpTool, Page, PaginatedParams,
    ServerCapabilities, ServerInfo,
};
use crate::server::ServerRecord;
use crate::transport::{constructor_for, Transport, TransportKind, TransportOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything a server offers, as reported by [`McpSession::describe`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescription {
    pub prompts: Vec<McpPrompt>,
    pub resources: Vec<McpResource>,
    pub resource_templates: Vec<McpResourceTemplate>,
    pub tools: Vec<McpTool>,
    pub capabilities: ServerCapabilities,
}

/// An initialized connection to one MCP server.
pub struct McpSession {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    initialized: InitializeResult,
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("transport", &self.transport.kind())
            .field("server", &self.initialized.server_info.name)
            .finish()
    }
}

impl McpSession {
    /// Connect to the server a record describes, using the default timeout.
    pub async fn connect(record: &ServerRecord, credential: Option<String>) -> McpResult<Self> {
        Self::connect_with(record, credential, DEFAULT_TIMEOUT).await
    }

    /// Connect to the server a record describes.
    ///
    /// `credential` is a bearer token: the record's static token or an
    /// OAuth access token. The handshake announces the record's name and
    /// version as the client implementation. The transport is closed if it
    /// fails to start.
    pub async fn connect_with(
        record: &ServerRecord,
        credential: Option<String>,
        timeout: Duration,
    ) -> McpResult<Self> {
        let construct = constructor_for(record.transport)?;
        let options = TransportOptions::new(record.parsed_url()?)
            .with_auth_token(credential)
            .with_timeout(timeout);
        let transport = construct(options)?;

        info!(
            server = %record.url,
            transport = %record.transport,
            "Connecting to MCP server"
        );
        if let Err(e) = transport.start().await {
            if let Err(close_err) = transport.close().await {
                warn!(error = %close_err, "Failed to close transport after start error");
            }
            return Err(McpError::TransportStart(Box::new(e)));
        }

        let client = ClientInfo {
            name: record.name.clone(),
            version: record.version.clone(),
        };
        Self::open(transport, client).await
    }

    /// Run the handshake over an already started transport.
    ///
    /// The transport is closed if the handshake fails.
    pub async fn open(transport: Arc<dyn Transport>, client: ClientInfo) -> McpResult<Self> {
        let mut session = Self {
            transport,
            next_id: AtomicU64::new(1),
            initialized: InitializeResult::default(),
        };

        match session.handshake(client).await {
            Ok(initialized) => {
                debug!(
                    server = %initialized.server_info.name,
                    protocol_version = %initialized.protocol_version,
                    "MCP session initialized"
                );
                session.initialized = initialized;
                Ok(session)
            }
            Err(e) => {
                if let Err(close_err) = session.transport.close().await {
                    warn!(error = %close_err, "Failed to close transport after handshake error");
                }
                Err(McpError::Handshake(Box::new(e)))
            }
        }
    }

    async fn handshake(&self, client: ClientInfo) -> McpResult<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::new(client))?;
        let initialized: InitializeResult = self.call("initialize", Some(params)).await?;

        self.transport
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await?;
        Ok(initialized)
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> McpResult<T> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        let response = self.transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        let result = response
            .result
            .ok_or_else(|| McpError::protocol_error(format!("Missing {method} result")))?;
        serde_json::from_value(result)
            .map_err(|e| McpError::protocol_error(format!("Invalid {method} result: {e}")))
    }

    /// Collect every page of a list method.
    async fn list_all<P>(&self, method: &str) -> McpResult<Vec<P::Item>>
    where
        P: Page + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => Some(serde_json::to_value(PaginatedParams {
                    cursor: cursor.clone(),
                })?),
                None => None,
            };
            let page: P = self.call(method, params).await?;
            let (mut batch, next) = page.into_parts();
            items.append(&mut batch);

            match next.filter(|next| !next.is_empty()) {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(McpError::protocol_error(format!(
                        "{method} returned the same cursor twice"
                    )));
                }
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
    }

    pub async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        self.list_all::<ListToolsResult>("tools/list").await
    }

    pub async fn list_prompts(&self) -> McpResult<Vec<McpPrompt>> {
        self.list_all::<ListPromptsResult>("prompts/list").await
    }

    pub async fn list_resources(&self) -> McpResult<Vec<McpResource>> {
        self.list_all::<ListResourcesResult>("resources/list").await
    }

    pub async fn list_resource_templates(&self) -> McpResult<Vec<McpResourceTemplate>> {
        self.list_all::<ListResourceTemplatesResult>("resources/templates/list")
            .await
    }

    /// Capabilities the server announced during the handshake.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.initialized.capabilities
    }

    pub async fn server_capabilities(&self) -> McpResult<ServerCapabilities> {
        Ok(self.initialized.capabilities.clone())
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.initialized.server_info
    }

    pub fn protocol_version(&self) -> &str {
        &self.initialized.protocol_version
    }

    pub fn instructions(&self) -> Option<&str> {
        self.initialized.instructions.as_deref()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// List prompts, resources, resource templates and tools concurrently,
    /// together with the server capabilities.
    ///
    /// All-or-nothing: the first failure fails the whole call. The session
    /// stays usable either way.
    pub async fn describe(&self) -> McpResult<ServerDescription> {
        let (prompts, resources, resource_templates, tools, capabilities) = futures::try_join!(
            self.list_prompts(),
            self.list_resources(),
            self.list_resource_templates(),
            self.list_tools(),
            self.server_capabilities(),
        )
        .map_err(|e| McpError::Describe(Box::new(e)))?;

        debug!(
            server = %self.initialized.server_info.name,
            prompts = prompts.len(),
            resources = resources.len(),
            resource_templates = resource_templates.len(),
            tools = tools.len(),
            "Described MCP server"
        );

        Ok(ServerDescription {
            prompts,
            resources,
            resource_templates,
            tools,
            capabilities,
        })
    }

    pub async fn close(&self) -> McpResult<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::protocol::{JsonRpcError, JsonRpcResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&JsonRpcRequest) -> Result<Value, JsonRpcError> + Send + Sync>;

    struct ScriptedTransport {
        handler: Handler,
        requests: Mutex<Vec<JsonRpcRequest>>,
        notifications: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(
            handler: impl Fn(&JsonRpcRequest) -> Result<Value, JsonRpcError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                handler: Box::new(handler),
                requests: Mutex::new(Vec::new()),
                notifications: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            })
        }

        fn methods(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.method.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn start(&self) -> McpResult<()> {
            Ok(())
        }

        async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
            let id = request.id.unwrap();
            let outcome = (self.handler)(&request);
            self.requests.lock().unwrap().push(request);
            let (result, error) = match outcome {
                Ok(result) => (Some(result), None),
                Err(error) => (None, Some(error)),
            };
            Ok(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result,
                error,
            })
        }

        async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
            self.notifications
                .lock()
                .unwrap()
                .push(notification.method);
            Ok(())
        }

        async fn close(&self) -> McpResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }

        fn kind(&self) -> TransportKind {
            TransportKind::HttpStream
        }
    }

    fn initialize_result() -> Value {
        json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": { "listChanged": true }, "prompts": {} },
            "serverInfo": { "name": "weather", "version": "2.1.0" },
            "instructions": "Ask about the weather"
        })
    }

    fn server(request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        match request.method.as_str() {
            "initialize" => Ok(initialize_result()),
            "tools/list" => Ok(json!({ "tools": [{ "name": "forecast" }] })),
            "prompts/list" => Ok(json!({ "prompts": [{ "name": "daily" }] })),
            "resources/list" => Ok(json!({
                "resources": [{ "uri": "weather://today", "name": "today" }]
            })),
            "resources/templates/list" => Ok(json!({
                "resourceTemplates": [{ "uriTemplate": "weather://{city}", "name": "city" }]
            })),
            other => Err(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {other}"),
                data: None,
            }),
        }
    }

    fn client() -> ClientInfo {
        ClientInfo {
            name: "weather".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_performs_handshake() {
        let transport = ScriptedTransport::new(server);
        let session = McpSession::open(transport.clone(), client()).await.unwrap();

        assert_eq!(session.server_info().name, "weather");
        assert_eq!(session.protocol_version(), "2025-03-26");
        assert_eq!(session.instructions(), Some("Ask about the weather"));
        assert!(session.capabilities().tools.is_some());
        assert!(session.capabilities().resources.is_none());

        let requests = transport.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        let params = requests[0].params.clone().unwrap();
        assert_eq!(params["clientInfo"]["name"], "weather");
        assert_eq!(params["clientInfo"]["version"], "1.0.0");
        assert_eq!(
            transport.notifications.lock().unwrap().as_slice(),
            ["notifications/initialized"]
        );
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_transport() {
        let transport = ScriptedTransport::new(|_| {
            Err(JsonRpcError {
                code: -32603,
                message: "boom".to_string(),
                data: None,
            })
        });

        let err = McpSession::open(transport.clone(), client())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Handshake(_)));
        assert_eq!(err.class(), ErrorClass::Connectivity);
        assert!(transport.closed.load(Ordering::SeqCst));
        assert!(transport.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_initialize_result() {
        let transport = ScriptedTransport::new(|_| Ok(json!({ "unexpected": true })));
        let err = McpSession::open(transport, client()).await.unwrap_err();
        match err {
            McpError::Handshake(inner) => assert!(matches!(*inner, McpError::ProtocolError(_))),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_describe_collects_everything() {
        let transport = ScriptedTransport::new(server);
        let session = McpSession::open(transport.clone(), client()).await.unwrap();

        let description = session.describe().await.unwrap();
        assert_eq!(description.tools[0].name, "forecast");
        assert_eq!(description.prompts[0].name, "daily");
        assert_eq!(description.resources[0].uri, "weather://today");
        assert_eq!(description.resource_templates[0].uri_template, "weather://{city}");
        assert_eq!(&description.capabilities, session.capabilities());

        let mut methods = transport.methods();
        methods.sort();
        assert_eq!(
            methods,
            [
                "initialize",
                "prompts/list",
                "resources/list",
                "resources/templates/list",
                "tools/list"
            ]
        );

        let json = serde_json::to_value(&description).unwrap();
        assert!(json.get("resourceTemplates").is_some());
    }

    #[tokio::test]
    async fn test_describe_fails_when_one_listing_fails() {
        let transport = ScriptedTransport::new(|request| match request.method.as_str() {
            "resources/templates/list" => Err(JsonRpcError {
                code: -32601,
                message: "Method not found".to_string(),
                data: None,
            }),
            _ => server(request),
        });
        let session = McpSession::open(transport.clone(), client()).await.unwrap();

        let err = session.describe().await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Diagnostic);
        match err {
            McpError::Describe(inner) => {
                assert!(matches!(*inner, McpError::Rpc { code: -32601, .. }))
            }
            other => panic!("unexpected error: {other}"),
        }

        // Session survives a failed describe
        assert!(!transport.closed.load(Ordering::SeqCst));
        assert_eq!(session.list_tools().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listing_follows_cursors() {
        let transport = ScriptedTransport::new(|request| match request.method.as_str() {
            "tools/list" => {
                let cursor = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("cursor"))
                    .and_then(Value::as_str);
                match cursor {
                    None => Ok(json!({ "tools": [{ "name": "a" }], "nextCursor": "page-2" })),
                    Some("page-2") => {
                        Ok(json!({ "tools": [{ "name": "b" }], "nextCursor": "page-3" }))
                    }
                    Some(_) => Ok(json!({ "tools": [{ "name": "c" }] })),
                }
            }
            _ => server(request),
        });
        let session = McpSession::open(transport, client()).await.unwrap();

        let names: Vec<String> = session
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_listing_rejects_repeated_cursor() {
        let transport = ScriptedTransport::new(|request| match request.method.as_str() {
            "prompts/list" => Ok(json!({ "prompts": [], "nextCursor": "again" })),
            _ => server(request),
        });
        let session = McpSession::open(transport, client()).await.unwrap();

        assert!(matches!(
            session.list_prompts().await,
            Err(McpError::ProtocolError(_))
        ));
    }

    #[tokio::test]
    async fn test_request_ids_increase() {
        let transport = ScriptedTransport::new(server);
        let session = McpSession::open(transport.clone(), client()).await.unwrap();
        session.list_tools().await.unwrap();
        session.list_prompts().await.unwrap();

        let ids: Vec<u64> = transport
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.id)
            .collect();
        assert_eq!(ids, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_connect_rejects_stdio_record() {
        let record = ServerRecord {
            id: 1,
            name: "local".to_string(),
            version: "1.0.0".to_string(),
            transport: TransportKind::Stdio,
            url: "https://x".to_string(),
            auth_type: Default::default(),
            auth_token: None,
            oauth_authorization_server: None,
            oauth_client_id: None,
            oauth_client_secret: None,
            oauth_client_registered: false,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let err = McpSession::connect(&record, None).await.unwrap_err();
        assert!(matches!(err, McpError::UnsupportedTransport(_)));
        assert_eq!(err.class(), ErrorClass::Configuration);
    }
}
