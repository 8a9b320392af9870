//! Connector: resolves credentials for a server record and opens a session.

use crate::error::{McpError, McpResult};
use crate::registry::ServerRegistry;
use crate::server::{AuthKind, ServerRecord, ServerUpdate};
use crate::session::{McpSession, DEFAULT_TIMEOUT};
use mcpdock_auth::{
    default_redirect_url, AuthError, AuthOutcome, AuthorizationRedirect, AuthorizationRequest,
    ClientInformation, CredentialStore, OAuthClientProvider, OAuthDriver, TokenSet,
    DEFAULT_CLIENT_NAME,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of [`Connector::open`].
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected(McpSession),
    /// The user agent was sent to authorize; connect again once the
    /// callback has completed the attempt.
    AuthorizationPending(AuthorizationRequest),
}

/// Connects to registered servers, running the OAuth flow when a record needs it.
pub struct Connector {
    registry: Arc<dyn ServerRegistry>,
    credentials: Arc<dyn CredentialStore>,
    redirect: Arc<dyn AuthorizationRedirect>,
    driver: OAuthDriver,
    redirect_url: String,
    client_name: String,
    scope: Option<String>,
    timeout: Duration,
}

impl Connector {
    pub fn new(
        registry: Arc<dyn ServerRegistry>,
        credentials: Arc<dyn CredentialStore>,
        redirect: Arc<dyn AuthorizationRedirect>,
    ) -> Self {
        Self {
            registry,
            credentials,
            redirect,
            driver: OAuthDriver::with_timeout(DEFAULT_TIMEOUT),
            redirect_url: default_redirect_url(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            scope: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = redirect_url.into();
        self
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Deadline for each network request, MCP and OAuth alike.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.driver = OAuthDriver::with_timeout(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<dyn ServerRegistry> {
        &self.registry
    }

    fn provider(&self, record: &ServerRecord) -> OAuthClientProvider {
        let provider = OAuthClientProvider::new(
            record.url.clone(),
            self.redirect_url.clone(),
            self.credentials.clone(),
            self.redirect.clone(),
        )
        .with_client_name(self.client_name.clone())
        .with_scope(self.scope.clone());

        match record.static_client() {
            Some((client_id, secret)) => provider.with_static_client(ClientInformation::new(
                client_id.to_string(),
                secret.map(str::to_string),
            )),
            None => provider,
        }
    }

    async fn oauth_record(&self, id: u64) -> McpResult<ServerRecord> {
        let record = self.registry.get(id).await?;
        if record.auth_type != AuthKind::OAuth {
            return Err(McpError::invalid_server(
                "auth_type",
                format!("Server {id} does not use oauth authentication"),
            ));
        }
        Ok(record)
    }

    /// Open a session to a registered server.
    ///
    /// For `oauth` records this uses stored tokens when they are valid,
    /// refreshes them when possible and otherwise starts an authorization
    /// attempt, returning [`ConnectOutcome::AuthorizationPending`].
    pub async fn open(&self, id: u64) -> McpResult<ConnectOutcome> {
        let record = self.registry.get(id).await?;

        let credential = match record.auth_type {
            AuthKind::None => None,
            AuthKind::Token => record.token().map(str::to_string),
            AuthKind::OAuth => {
                let provider = self.provider(&record);
                match self.driver.authorize(&provider).await? {
                    AuthOutcome::Authorized(tokens) => Some(tokens.access_token),
                    AuthOutcome::Redirected(request) => {
                        self.write_back(&record, &request).await?;
                        return Ok(ConnectOutcome::AuthorizationPending(request));
                    }
                }
            }
        };

        match McpSession::connect_with(&record, credential, self.timeout).await {
            Ok(session) => Ok(ConnectOutcome::Connected(session)),
            Err(e) if e.is_auth_required() && record.auth_type == AuthKind::OAuth => {
                warn!(
                    server = %record.url,
                    "Server rejected the stored access token, restarting authorization"
                );
                let request = self.begin_for(&record).await?;
                Ok(ConnectOutcome::AuthorizationPending(request))
            }
            Err(e) => Err(e),
        }
    }

    /// Start a new authorization attempt for an `oauth` record, even if
    /// tokens are already stored.
    pub async fn begin_authorization(&self, id: u64) -> McpResult<AuthorizationRequest> {
        let record = self.oauth_record(id).await?;
        self.begin_for(&record).await
    }

    async fn begin_for(&self, record: &ServerRecord) -> McpResult<AuthorizationRequest> {
        let provider = self.provider(record);
        let request = self.driver.begin_authorization(&provider).await?;
        self.write_back(record, &request).await?;
        Ok(request)
    }

    /// Finish the pending attempt for a server with the callback's code.
    pub async fn complete_authorization(
        &self,
        id: u64,
        code: &str,
        state: Option<&str>,
    ) -> McpResult<TokenSet> {
        let record = self.oauth_record(id).await?;
        let provider = self.provider(&record);
        Ok(self
            .driver
            .complete_authorization(&provider, code, state)
            .await?)
    }

    /// Finish whichever pending attempt issued `state`.
    pub async fn complete_by_state(
        &self,
        state: &str,
        code: &str,
    ) -> McpResult<(ServerRecord, TokenSet)> {
        let server_url = self
            .credentials
            .server_for_state(state)
            .await?
            .ok_or_else(|| {
                AuthError::CodeExchangeFailed("Unknown or expired authorization state".to_string())
            })?;

        let record = self
            .registry
            .list()
            .await?
            .into_iter()
            .find(|r| r.auth_type == AuthKind::OAuth && r.url == server_url)
            .ok_or_else(|| {
                AuthError::CodeExchangeFailed(format!("No oauth server configured for {server_url}"))
            })?;

        let tokens = self
            .complete_authorization(record.id, code, Some(state))
            .await?;
        Ok((record, tokens))
    }

    /// Forget stored tokens, pending attempts and the dynamic registration
    /// for a server.
    ///
    /// Client fields written back from that registration are cleared from
    /// the record; a client the user configured is kept.
    pub async fn logout(&self, id: u64) -> McpResult<()> {
        let record = self.registry.get(id).await?;
        self.credentials.forget(&record.url).await?;

        if record.oauth_client_registered {
            let update = ServerUpdate {
                oauth_client_id: Some(String::new()),
                oauth_client_secret: Some(String::new()),
                oauth_client_registered: Some(false),
                ..Default::default()
            };
            self.registry.update(id, update).await?;
        }

        info!(id, server = %record.url, "Forgot OAuth credentials");
        Ok(())
    }

    /// Record the authorization server and client used for an attempt.
    async fn write_back(
        &self,
        record: &ServerRecord,
        request: &AuthorizationRequest,
    ) -> McpResult<()> {
        let mut update = ServerUpdate::default();

        if record.oauth_authorization_server.as_deref()
            != Some(request.authorization_server.as_str())
        {
            update.oauth_authorization_server = Some(request.authorization_server.clone());
        }
        if request.registered {
            if record.oauth_client_id.as_deref() != Some(request.client.client_id.as_str()) {
                update.oauth_client_id = Some(request.client.client_id.clone());
            }
            if record.oauth_client_secret != request.client.client_secret {
                // An empty string clears a secret left by an earlier registration
                update.oauth_client_secret =
                    Some(request.client.client_secret.clone().unwrap_or_default());
            }
            if !record.oauth_client_registered {
                update.oauth_client_registered = Some(true);
            }
        }

        if update.is_empty() {
            return Ok(());
        }

        debug!(id = record.id, "Saving OAuth details on server record");
        self.registry.update(record.id, update).await?;
        Ok(())
    }
}
