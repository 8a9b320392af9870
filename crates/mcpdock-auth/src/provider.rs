//! OAuth client provider: identity and credential access for one server URL.

use crate::error::{AuthError, AuthResult};
use crate::metadata::{ClientInformation, ClientMetadata, TokenSet};
use crate::store::{CredentialStore, PendingAuthorization};
use crate::current_time_secs;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Default client name sent in dynamic registration.
pub const DEFAULT_CLIENT_NAME: &str = "mcpdock";

/// Sends the user agent to the authorization endpoint.
///
/// Returning from `redirect` does not mean the user has authorized; the
/// flow resumes when the authorization server calls back with a code.
#[async_trait]
pub trait AuthorizationRedirect: Send + Sync {
    async fn redirect(&self, server_url: &str, authorization_url: &Url) -> AuthResult<()>;
}

/// Redirect that only logs the authorization URL.
///
/// For headless callers that hand the URL to the user some other way.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRedirect;

#[async_trait]
impl AuthorizationRedirect for LogRedirect {
    async fn redirect(&self, server_url: &str, authorization_url: &Url) -> AuthResult<()> {
        info!(
            server = %server_url,
            url = %authorization_url,
            "Authorization required"
        );
        Ok(())
    }
}

/// Supplies the OAuth driver with everything it persists or reads for one server.
pub struct OAuthClientProvider {
    server_url: String,
    redirect_url: String,
    client_name: String,
    scope: Option<String>,
    /// Client configured on the server record; skips dynamic registration.
    static_client: Option<ClientInformation>,
    store: Arc<dyn CredentialStore>,
    redirect: Arc<dyn AuthorizationRedirect>,
}

impl OAuthClientProvider {
    pub fn new(
        server_url: impl Into<String>,
        redirect_url: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        redirect: Arc<dyn AuthorizationRedirect>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            redirect_url: redirect_url.into(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            scope: None,
            static_client: None,
            store,
            redirect,
        }
    }

    /// Use a pre-registered client instead of dynamic registration.
    pub fn with_static_client(mut self, client: ClientInformation) -> Self {
        self.static_client = Some(client);
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Metadata for dynamic registration as a public client.
    pub fn client_metadata(&self) -> ClientMetadata {
        ClientMetadata {
            redirect_uris: vec![self.redirect_url.clone()],
            token_endpoint_auth_method: "none".to_string(),
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            client_name: self.client_name.clone(),
            scope: self.scope.clone(),
        }
    }

    /// The client registration to use, if any.
    ///
    /// A statically configured client wins over a stored one. A stored
    /// client whose secret has expired counts as unregistered.
    pub async fn client_information(&self) -> AuthResult<Option<ClientInformation>> {
        if let Some(client) = &self.static_client {
            return Ok(Some(client.clone()));
        }

        let Some(info) = self.store.client_information(&self.server_url).await? else {
            return Ok(None);
        };

        if info.is_secret_expired(current_time_secs()) {
            warn!(server = %self.server_url, "Client secret expired");
            return Ok(None);
        }

        Ok(Some(info))
    }

    pub async fn save_client_information(&self, info: &ClientInformation) -> AuthResult<()> {
        self.store
            .save_client_information(&self.server_url, info)
            .await?;
        info!(
            server = %self.server_url,
            client_id = %info.client_id,
            "Saved dynamically registered client"
        );
        Ok(())
    }

    pub async fn tokens(&self) -> AuthResult<Option<TokenSet>> {
        self.store.tokens(&self.server_url).await
    }

    pub async fn save_tokens(&self, tokens: &TokenSet) -> AuthResult<()> {
        self.store.save_tokens(&self.server_url, tokens).await?;
        info!(server = %self.server_url, "Saved OAuth tokens");
        Ok(())
    }

    /// Persist the verifier and state of a new attempt.
    pub async fn save_code_verifier(&self, code_verifier: &str, state: &str) -> AuthResult<()> {
        self.store
            .save_pending(&PendingAuthorization {
                server_url: self.server_url.clone(),
                code_verifier: code_verifier.to_string(),
                state: state.to_string(),
                created_at: current_time_secs(),
            })
            .await
    }

    /// The verifier saved for the in-flight attempt.
    ///
    /// When `state` is given it must match the state the attempt was started with.
    pub async fn code_verifier(&self, state: Option<&str>) -> AuthResult<String> {
        let pending = self.store.pending(&self.server_url).await?.ok_or_else(|| {
            AuthError::CodeExchangeFailed(format!(
                "No authorization in progress for {}",
                self.server_url
            ))
        })?;

        if let Some(state) = state {
            if state != pending.state {
                return Err(AuthError::CodeExchangeFailed(
                    "OAuth state does not match the pending authorization".to_string(),
                ));
            }
        }

        Ok(pending.code_verifier)
    }

    pub async fn clear_code_verifier(&self) -> AuthResult<()> {
        self.store.clear_pending(&self.server_url).await
    }

    /// Drop every stored credential for this server.
    pub async fn forget(&self) -> AuthResult<()> {
        self.store.forget(&self.server_url).await?;
        info!(server = %self.server_url, "Removed stored OAuth credentials");
        Ok(())
    }

    /// Send the user agent to the authorization endpoint.
    pub async fn redirect_to_authorization(&self, authorization_url: &Url) -> AuthResult<()> {
        self.redirect
            .redirect(&self.server_url, authorization_url)
            .await
    }
}
