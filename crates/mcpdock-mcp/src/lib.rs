//! Model Context Protocol (MCP) client sessions for mcpdock.
//!
//! Connects to remote MCP servers described by stored [`ServerRecord`]s,
//! performs the handshake and reports what a server offers.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Connector │──▶│ OAuth / token  │──▶│  McpSession  │──▶│ MCP server  │
//! │ (record)  │   │  credential    │   │ (transport)  │◀──│  (remote)   │
//! └───────────┘   └────────────────┘   └──────────────┘   └─────────────┘
//! ```
//!
//! # Supported Transports
//!
//! - **http-stream**: Streamable HTTP, one POST per request
//! - **sse**: Legacy HTTP+SSE, responses on a long-lived event stream
//! - **websocket**: JSON-RPC over a WebSocket with the `mcp` subprotocol
//!
//! `stdio` is recognized but rejected: only remote servers are supported.
//!
//! # Example
//!
//! ```no_run
//! use mcpdock_mcp::{ConnectOutcome, Connector, StoredServerRegistry};
//! use mcpdock_auth::{LogRedirect, StorageCredentialStore};
//! use mcpdock_storage::JsonStorage;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), mcpdock_mcp::McpError> {
//! let storage = JsonStorage::private("/tmp/mcpdock");
//! let connector = Connector::new(
//!     Arc::new(StoredServerRegistry::new(storage.clone())),
//!     Arc::new(StorageCredentialStore::new(storage)),
//!     Arc::new(LogRedirect),
//! );
//!
//! match connector.open(1).await? {
//!     ConnectOutcome::Connected(session) => {
//!         let description = session.describe().await?;
//!         println!("{} tools", description.tools.len());
//!         session.close().await?;
//!     }
//!     ConnectOutcome::AuthorizationPending(request) => {
//!         println!("Authorize at {}", request.authorization_url);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod connector;
mod error;
mod http;
pub mod protocol;
mod registry;
mod server;
mod session;
pub mod sse;
mod transport;
mod websocket;

pub use connector::{ConnectOutcome, Connector};
pub use error::{ErrorClass, McpError, McpResult};
pub use http::StreamableHttpTransport;
pub use protocol::{
    McpPrompt, McpResource, McpResourceTemplate, McpTool, ServerCapabilities, ServerInfo,
};
pub use registry::{ServerRegistry, StoredServerRegistry};
pub use server::{AuthKind, NewServer, ServerRecord, ServerUpdate};
pub use session::{McpSession, ServerDescription, DEFAULT_TIMEOUT};
pub use sse::SseTransport;
pub use transport::{
    constructor_for, select_transport, Transport, TransportConstructor, TransportKind,
    TransportOptions,
};
pub use websocket::WebSocketTransport;
