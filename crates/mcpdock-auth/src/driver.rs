//! The OAuth authorization driver.

use crate::current_time_secs;
use crate::discovery::{
    build_authorization_url, discover_authorization_server, discover_protected_resource,
    register_client, request_tokens, AuthorizationParams, TokenGrant,
};
use crate::error::{AuthError, AuthResult};
use crate::metadata::{
    AuthorizationServerMetadata, ClientInformation, ProtectedResourceMetadata, TokenSet,
};
use crate::pkce;
use crate::provider::OAuthClientProvider;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Metadata found for one server URL.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub resource: ProtectedResourceMetadata,
    pub authorization_server: AuthorizationServerMetadata,
}

impl Discovery {
    /// Resource indicator sent with authorization and token requests.
    fn resource_indicator<'a>(&'a self, server_url: &'a str) -> &'a str {
        if self.resource.resource.is_empty() {
            server_url
        } else {
            &self.resource.resource
        }
    }
}

/// An authorization attempt suspended at the redirect.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_url: Url,
    /// Issuer of the authorization server the user was sent to.
    pub authorization_server: String,
    pub client: ClientInformation,
    /// Whether the client was registered during this attempt.
    pub registered: bool,
    pub state: String,
}

/// Result of [`OAuthDriver::authorize`].
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// Stored or refreshed tokens are usable now.
    Authorized(TokenSet),
    /// The user agent was redirected; resume with [`OAuthDriver::complete_authorization`].
    Redirected(AuthorizationRequest),
}

/// Drives discovery, registration and the PKCE authorization-code grant.
///
/// The driver holds no per-attempt state. Everything that has to survive
/// the redirect goes through the [`OAuthClientProvider`].
#[derive(Debug, Clone, Default)]
pub struct OAuthDriver {
    http: reqwest::Client,
}

impl OAuthDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose requests each time out after `timeout`.
    ///
    /// Falls back to a client without a request timeout, with a warning,
    /// if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Self {
        let http = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(http) => http,
            Err(e) => {
                warn!(
                    error = %e,
                    timeout_ms = timeout.as_millis() as u64,
                    "Failed to create OAuth HTTP client; requests will not time out"
                );
                reqwest::Client::new()
            }
        };
        Self { http }
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Discover resource and authorization-server metadata.
    pub async fn discover(&self, provider: &OAuthClientProvider) -> AuthResult<Discovery> {
        let server_url = Url::parse(provider.server_url())?;

        let resource = discover_protected_resource(&self.http, &server_url).await?;
        let issuer = resource
            .authorization_servers
            .first()
            .ok_or_else(|| AuthError::NoAuthorizationServer(server_url.to_string()))?;
        let issuer = Url::parse(issuer).map_err(|e| {
            AuthError::NoAuthorizationServer(format!("{server_url} (invalid issuer {issuer}: {e})"))
        })?;
        debug!(server = %server_url, issuer = %issuer, "Discovered protected resource metadata");

        let authorization_server = discover_authorization_server(&self.http, &issuer).await?;
        debug!(
            server = %server_url,
            token_endpoint = %authorization_server.token_endpoint,
            "Discovered authorization server metadata"
        );

        Ok(Discovery {
            resource,
            authorization_server,
        })
    }

    /// Obtain a usable credential, redirecting only when necessary.
    ///
    /// Valid stored tokens are returned without any network request. An
    /// expired token with a refresh token is refreshed first; if that fails
    /// the flow restarts at the redirect.
    pub async fn authorize(&self, provider: &OAuthClientProvider) -> AuthResult<AuthOutcome> {
        let stored = provider.tokens().await?;
        if let Some(tokens) = &stored {
            if !tokens.is_expired(current_time_secs()) {
                debug!(server = %provider.server_url(), "Using stored OAuth tokens");
                return Ok(AuthOutcome::Authorized(tokens.clone()));
            }
        }

        let discovery = self.discover(provider).await?;

        if let Some(tokens) = stored {
            if let Some(refresh_token) = tokens.refresh_token.as_deref() {
                match provider.client_information().await? {
                    Some(client) => {
                        match self
                            .refresh_with(provider, &discovery, &client, &tokens, refresh_token)
                            .await
                        {
                            Ok(refreshed) => return Ok(AuthOutcome::Authorized(refreshed)),
                            Err(e) => warn!(
                                server = %provider.server_url(),
                                error = %e,
                                "Token refresh failed, restarting authorization"
                            ),
                        }
                    }
                    None => debug!(
                        server = %provider.server_url(),
                        "No client registration to refresh with"
                    ),
                }
            }
        }

        let request = self.redirect_with(provider, &discovery).await?;
        Ok(AuthOutcome::Redirected(request))
    }

    /// Start a new authorization attempt regardless of stored tokens.
    pub async fn begin_authorization(
        &self,
        provider: &OAuthClientProvider,
    ) -> AuthResult<AuthorizationRequest> {
        let discovery = self.discover(provider).await?;
        self.redirect_with(provider, &discovery).await
    }

    /// Resume a suspended attempt with the code from the callback.
    ///
    /// Tokens are saved only when the exchange succeeds. On failure the
    /// attempt has to restart with [`Self::begin_authorization`].
    pub async fn complete_authorization(
        &self,
        provider: &OAuthClientProvider,
        code: &str,
        state: Option<&str>,
    ) -> AuthResult<TokenSet> {
        let code_verifier = provider.code_verifier(state).await?;
        let client = provider.client_information().await?.ok_or_else(|| {
            AuthError::CodeExchangeFailed(format!(
                "No client registration for {}",
                provider.server_url()
            ))
        })?;
        let discovery = self.discover(provider).await?;

        let response = request_tokens(
            &self.http,
            &discovery.authorization_server.token_endpoint,
            &client,
            TokenGrant::AuthorizationCode {
                code,
                code_verifier: &code_verifier,
                redirect_uri: provider.redirect_url(),
            },
            Some(discovery.resource_indicator(provider.server_url())),
        )
        .await
        .map_err(AuthError::CodeExchangeFailed)?;

        let tokens = TokenSet::from_response(response, current_time_secs());
        provider.save_tokens(&tokens).await?;
        provider.clear_code_verifier().await?;

        info!(server = %provider.server_url(), "Authorization complete");
        Ok(tokens)
    }

    /// Exchange the stored refresh token for new tokens.
    pub async fn refresh(&self, provider: &OAuthClientProvider) -> AuthResult<TokenSet> {
        let tokens = provider.tokens().await?.ok_or_else(|| {
            AuthError::RefreshFailed(format!("No tokens stored for {}", provider.server_url()))
        })?;
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::RefreshFailed("No refresh token".to_string()))?;
        let client = provider.client_information().await?.ok_or_else(|| {
            AuthError::RefreshFailed(format!(
                "No client registration for {}",
                provider.server_url()
            ))
        })?;

        let discovery = self.discover(provider).await?;
        self.refresh_with(provider, &discovery, &client, &tokens, refresh_token)
            .await
    }

    async fn refresh_with(
        &self,
        provider: &OAuthClientProvider,
        discovery: &Discovery,
        client: &ClientInformation,
        previous: &TokenSet,
        refresh_token: &str,
    ) -> AuthResult<TokenSet> {
        debug!(server = %provider.server_url(), "Refreshing OAuth tokens");
        let response = request_tokens(
            &self.http,
            &discovery.authorization_server.token_endpoint,
            client,
            TokenGrant::RefreshToken { refresh_token },
            Some(discovery.resource_indicator(provider.server_url())),
        )
        .await
        .map_err(AuthError::RefreshFailed)?;

        let mut tokens = TokenSet::from_response(response, current_time_secs());
        // Servers that do not rotate refresh tokens omit them from the response
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = previous.refresh_token.clone();
        }
        provider.save_tokens(&tokens).await?;
        Ok(tokens)
    }

    /// Return an existing client or register a new one.
    async fn ensure_client(
        &self,
        provider: &OAuthClientProvider,
        discovery: &Discovery,
    ) -> AuthResult<(ClientInformation, bool)> {
        if let Some(client) = provider.client_information().await? {
            debug!(
                server = %provider.server_url(),
                client_id = %client.client_id,
                "Reusing client registration"
            );
            return Ok((client, false));
        }

        let client = register_client(
            &self.http,
            &discovery.authorization_server,
            &provider.client_metadata(),
        )
        .await?;
        provider.save_client_information(&client).await?;
        Ok((client, true))
    }

    async fn redirect_with(
        &self,
        provider: &OAuthClientProvider,
        discovery: &Discovery,
    ) -> AuthResult<AuthorizationRequest> {
        let (client, registered) = self.ensure_client(provider, discovery).await?;

        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::code_challenge(&code_verifier);
        let state = pkce::generate_state();
        provider.save_code_verifier(&code_verifier, &state).await?;

        let authorization_url = build_authorization_url(
            &discovery.authorization_server.authorization_endpoint,
            &AuthorizationParams {
                client_id: &client.client_id,
                redirect_uri: provider.redirect_url(),
                code_challenge: &code_challenge,
                state: &state,
                scope: provider.scope(),
                resource: Some(discovery.resource_indicator(provider.server_url())),
            },
        )
        .map_err(|e| AuthError::RedirectFailed(e.to_string()))?;

        provider.redirect_to_authorization(&authorization_url).await?;
        info!(server = %provider.server_url(), "Redirected to authorization endpoint");

        Ok(AuthorizationRequest {
            authorization_url,
            authorization_server: discovery.authorization_server.issuer.clone(),
            client,
            registered,
            state,
        })
    }
}
