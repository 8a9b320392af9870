//! Error types for the OAuth flow.

use mcpdock_storage::StorageError;
use thiserror::Error;

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// States of one authorization attempt for a server URL.
///
/// `Start → ResourceMetadataDiscovered → AuthServerMetadataDiscovered →
/// ClientRegistered → AuthorizationRedirected → CodeExchanged → Authorized`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Start,
    ResourceMetadataDiscovered,
    AuthServerMetadataDiscovered,
    ClientRegistered,
    AuthorizationRedirected,
    CodeExchanged,
    Authorized,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Start => "start",
            AuthState::ResourceMetadataDiscovered => "resource_metadata_discovered",
            AuthState::AuthServerMetadataDiscovered => "auth_server_metadata_discovered",
            AuthState::ClientRegistered => "client_registered",
            AuthState::AuthorizationRedirected => "authorization_redirected",
            AuthState::CodeExchanged => "code_exchanged",
            AuthState::Authorized => "authorized",
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during the OAuth flow.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Protected-resource metadata is missing or lists no authorization server.
    #[error("No authorization server found for {0}")]
    NoAuthorizationServer(String),

    /// Authorization-server metadata could not be fetched or is unusable.
    #[error("OAuth metadata discovery failed: {0}")]
    MetadataDiscoveryFailed(String),

    /// Dynamic client registration was rejected or is unsupported.
    #[error("Client registration failed: {0}")]
    RegistrationFailed(String),

    /// The redirect side effect could not send the user agent on.
    #[error("Authorization redirect failed: {0}")]
    RedirectFailed(String),

    /// Authorization code could not be exchanged for tokens.
    ///
    /// The flow has to restart from the authorization redirect.
    #[error("Code exchange failed: {0}")]
    CodeExchangeFailed(String),

    /// Refresh-token grant failed.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// A URL in configuration or metadata did not parse.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Credential storage failed.
    #[error("Credential storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// The last state reached before this error aborted the attempt.
    pub fn state(&self) -> AuthState {
        match self {
            AuthError::NoAuthorizationServer(_) | AuthError::InvalidUrl(_) => AuthState::Start,
            AuthError::MetadataDiscoveryFailed(_) => AuthState::ResourceMetadataDiscovered,
            AuthError::RegistrationFailed(_) | AuthError::RefreshFailed(_) => {
                AuthState::AuthServerMetadataDiscovered
            }
            AuthError::RedirectFailed(_) => AuthState::ClientRegistered,
            AuthError::CodeExchangeFailed(_) => AuthState::AuthorizationRedirected,
            AuthError::Storage(_) => AuthState::Start,
        }
    }

    /// Whether restarting from the authorization redirect may succeed.
    pub fn restart_from_redirect(&self) -> bool {
        matches!(
            self,
            AuthError::CodeExchangeFailed(_) | AuthError::RefreshFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                AuthError::NoAuthorizationServer("https://mcp.example.com".to_string()),
                "No authorization server found for https://mcp.example.com",
            ),
            (
                AuthError::MetadataDiscoveryFailed("404".to_string()),
                "OAuth metadata discovery failed: 404",
            ),
            (
                AuthError::RegistrationFailed("no endpoint".to_string()),
                "Client registration failed: no endpoint",
            ),
            (
                AuthError::CodeExchangeFailed("invalid_grant".to_string()),
                "Code exchange failed: invalid_grant",
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_error_state() {
        assert_eq!(
            AuthError::NoAuthorizationServer(String::new()).state(),
            AuthState::Start
        );
        assert_eq!(
            AuthError::MetadataDiscoveryFailed(String::new()).state(),
            AuthState::ResourceMetadataDiscovered
        );
        assert_eq!(
            AuthError::RegistrationFailed(String::new()).state(),
            AuthState::AuthServerMetadataDiscovered
        );
        assert_eq!(
            AuthError::CodeExchangeFailed(String::new()).state(),
            AuthState::AuthorizationRedirected
        );
    }

    #[test]
    fn test_restart_from_redirect() {
        assert!(AuthError::CodeExchangeFailed(String::new()).restart_from_redirect());
        assert!(!AuthError::NoAuthorizationServer(String::new()).restart_from_redirect());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AuthState::ClientRegistered.to_string(), "client_registered");
        assert_eq!(AuthState::Authorized.as_str(), "authorized");
    }
}
