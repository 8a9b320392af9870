//! OAuth support for remote MCP servers.
//!
//! Implements the authorization side of connecting to an MCP server that
//! requires it: protected-resource and authorization-server metadata
//! discovery, dynamic client registration, the PKCE authorization-code
//! grant and refresh-token grant.
//!
//! The flow is split at the browser redirect:
//!
//! ```text
//! begin_authorization(provider)            complete_authorization(provider, code)
//!   discover resource metadata               load client + verifier from store
//!   discover auth server metadata            exchange code at token endpoint
//!   register client (once)                   save token set
//!   save verifier, redirect user agent ──▶   (later request / process)
//! ```
//!
//! Everything the second half needs is written through a
//! [`CredentialStore`] keyed by server URL, so the callback can be served
//! by a different invocation than the one that started the flow.
//!
//! Two attempts racing on the same server URL are not serialized: the
//! later `save_code_verifier` wins and the earlier callback fails its code
//! exchange.

mod discovery;
mod driver;
mod error;
mod metadata;
pub mod pkce;
mod provider;
mod store;

pub use discovery::{
    authorization_server_metadata_urls, build_authorization_url, protected_resource_metadata_urls,
    AuthorizationParams,
};
pub use driver::{AuthOutcome, AuthorizationRequest, Discovery, OAuthDriver};
pub use error::{AuthError, AuthResult, AuthState};
pub use metadata::{
    AuthorizationServerMetadata, ClientInformation, ClientMetadata, OAuthTokens,
    ProtectedResourceMetadata, TokenSet,
};
pub use provider::{AuthorizationRedirect, LogRedirect, OAuthClientProvider, DEFAULT_CLIENT_NAME};
pub use store::{CredentialStore, PendingAuthorization, StorageCredentialStore};

/// Default port for the local OAuth callback listener.
pub const OAUTH_CALLBACK_PORT: u16 = 19876;

/// Path of the OAuth callback endpoint.
pub const OAUTH_CALLBACK_PATH: &str = "/oauth/callback";

/// Default redirect URI registered with authorization servers.
pub fn default_redirect_url() -> String {
    format!("http://127.0.0.1:{OAUTH_CALLBACK_PORT}{OAUTH_CALLBACK_PATH}")
}

/// Get the current time in seconds since Unix epoch.
pub fn current_time_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
