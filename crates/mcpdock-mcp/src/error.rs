//! MCP error types.

use mcpdock_auth::AuthError;
use mcpdock_storage::StorageError;
use thiserror::Error;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The server record has to be fixed; retrying cannot help.
    Configuration,
    /// The remote could not be reached or spoke the protocol wrongly.
    /// Retryable by reconnecting after a backoff.
    Connectivity,
    /// A diagnostic call failed on an otherwise open session.
    Diagnostic,
    /// Authorization is missing or failed; restart authorization.
    Authorization,
    /// A programming error.
    Invariant,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Connectivity => "connectivity",
            ErrorClass::Diagnostic => "diagnostic",
            ErrorClass::Authorization => "authorization",
            ErrorClass::Invariant => "invariant",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport kind is known but cannot be used for remote servers.
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// Transport kind is not one of the known kinds.
    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    /// A server record failed validation.
    #[error("Invalid {field}: {message}")]
    InvalidServer {
        field: &'static str,
        message: String,
    },

    /// Server record not found in the registry.
    #[error("Server not found: {0}")]
    ServerNotFound(u64),

    /// The underlying connection could not be opened.
    #[error("Failed to start transport: {0}")]
    TransportStart(#[source] Box<McpError>),

    /// The remote did not complete the MCP handshake.
    #[error("MCP handshake failed: {0}")]
    Handshake(#[source] Box<McpError>),

    /// A describe call failed. The session stays open.
    #[error("Describe failed: {0}")]
    Describe(#[source] Box<McpError>),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The remote answered with a JSON-RPC error.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// The server rejected the request as unauthorized.
    #[error("Authentication required")]
    AuthRequired,

    /// OAuth flow error.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Registry or credential storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A state that should be unreachable.
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl McpError {
    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a protocol error.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError(message.into())
    }

    pub fn invalid_server(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidServer {
            field,
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            McpError::UnsupportedTransport(_)
            | McpError::UnknownTransport(_)
            | McpError::InvalidServer { .. }
            | McpError::ServerNotFound(_)
            | McpError::Storage(_) => ErrorClass::Configuration,
            McpError::TransportStart(inner) | McpError::Handshake(inner) => match inner.class() {
                ErrorClass::Authorization => ErrorClass::Authorization,
                ErrorClass::Invariant => ErrorClass::Invariant,
                _ => ErrorClass::Connectivity,
            },
            McpError::ConnectionFailed(_)
            | McpError::ProtocolError(_)
            | McpError::Rpc { .. }
            | McpError::Timeout
            | McpError::Json(_) => ErrorClass::Connectivity,
            McpError::Describe(_) => ErrorClass::Diagnostic,
            McpError::AuthRequired | McpError::Auth(_) => ErrorClass::Authorization,
            McpError::Invariant(_) => ErrorClass::Invariant,
        }
    }

    /// Whether reconnecting later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Connectivity
    }

    /// Whether the remote asked for credentials, directly or while starting
    /// the transport or handshake.
    pub fn is_auth_required(&self) -> bool {
        match self {
            McpError::AuthRequired => true,
            McpError::TransportStart(inner) | McpError::Handshake(inner) => inner.is_auth_required(),
            _ => false,
        }
    }

    /// The record field this error refers to, for form-style reporting.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            McpError::InvalidServer { field, .. } => Some(*field),
            McpError::UnsupportedTransport(_) | McpError::UnknownTransport(_) => Some("transport"),
            _ => None,
        }
    }
}
