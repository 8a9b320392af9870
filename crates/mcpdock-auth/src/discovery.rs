//! Metadata discovery, client registration and token endpoint requests.

use crate::error::{AuthError, AuthResult};
use crate::metadata::{
    AuthorizationServerMetadata, ClientInformation, ClientMetadata, OAuthTokens,
    ProtectedResourceMetadata,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

const PROTECTED_RESOURCE: &str = "/.well-known/oauth-protected-resource";
const AUTHORIZATION_SERVER: &str = "/.well-known/oauth-authorization-server";
const OPENID_CONFIGURATION: &str = "/.well-known/openid-configuration";

fn well_known(base: &Url, prefix: &str, path: &str) -> Url {
    let mut url = base.clone();
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn significant_path(url: &Url) -> &str {
    url.path().trim_end_matches('/')
}

/// Candidate protected-resource metadata URLs for an MCP server (RFC 9728).
///
/// The path-aware location comes first, then the origin root.
pub fn protected_resource_metadata_urls(server_url: &Url) -> Vec<Url> {
    let path = significant_path(server_url);
    let mut urls = Vec::with_capacity(2);
    if !path.is_empty() {
        urls.push(well_known(server_url, PROTECTED_RESOURCE, path));
    }
    urls.push(well_known(server_url, PROTECTED_RESOURCE, ""));
    urls
}

/// Candidate authorization-server metadata URLs for an issuer.
///
/// RFC 8414 locations come before OpenID Connect discovery.
pub fn authorization_server_metadata_urls(issuer: &Url) -> Vec<Url> {
    let path = significant_path(issuer);
    if path.is_empty() {
        return vec![
            well_known(issuer, AUTHORIZATION_SERVER, ""),
            well_known(issuer, OPENID_CONFIGURATION, ""),
        ];
    }

    let mut oidc_appended = issuer.clone();
    oidc_appended.set_path(&format!("{path}{OPENID_CONFIGURATION}"));
    oidc_appended.set_query(None);
    oidc_appended.set_fragment(None);

    vec![
        well_known(issuer, AUTHORIZATION_SERVER, path),
        well_known(issuer, OPENID_CONFIGURATION, path),
        oidc_appended,
    ]
}

/// Fetch the first metadata document found among `urls`.
///
/// 404 and 410 mean "not here"; any other failure stops the search.
async fn fetch_first<T: DeserializeOwned>(
    http: &reqwest::Client,
    urls: &[Url],
) -> Result<Option<T>, String> {
    for url in urls {
        debug!(url = %url, "Fetching OAuth metadata");
        let response = http
            .get(url.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| format!("Request to {url} failed: {e}"))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            continue;
        }
        if !status.is_success() {
            return Err(format!("{url} returned HTTP {status}"));
        }

        let document = response
            .json::<T>()
            .await
            .map_err(|e| format!("Invalid metadata at {url}: {e}"))?;
        return Ok(Some(document));
    }

    Ok(None)
}

/// Discover protected-resource metadata for an MCP server.
///
/// Fails with [`AuthError::NoAuthorizationServer`] when no document exists or
/// it names no authorization server.
pub(crate) async fn discover_protected_resource(
    http: &reqwest::Client,
    server_url: &Url,
) -> AuthResult<ProtectedResourceMetadata> {
    let urls = protected_resource_metadata_urls(server_url);
    let metadata: Option<ProtectedResourceMetadata> = fetch_first(http, &urls)
        .await
        .map_err(|e| AuthError::NoAuthorizationServer(format!("{server_url} ({e})")))?;

    match metadata {
        Some(metadata) if !metadata.authorization_servers.is_empty() => Ok(metadata),
        _ => Err(AuthError::NoAuthorizationServer(server_url.to_string())),
    }
}

/// Discover authorization-server metadata for an issuer.
pub(crate) async fn discover_authorization_server(
    http: &reqwest::Client,
    issuer: &Url,
) -> AuthResult<AuthorizationServerMetadata> {
    let urls = authorization_server_metadata_urls(issuer);
    let metadata: AuthorizationServerMetadata = fetch_first(http, &urls)
        .await
        .map_err(AuthError::MetadataDiscoveryFailed)?
        .ok_or_else(|| {
            AuthError::MetadataDiscoveryFailed(format!("No metadata published by {issuer}"))
        })?;

    metadata
        .check_supports_code_flow()
        .map_err(AuthError::MetadataDiscoveryFailed)?;

    Ok(metadata)
}

/// Register a public client with the authorization server (RFC 7591).
pub(crate) async fn register_client(
    http: &reqwest::Client,
    metadata: &AuthorizationServerMetadata,
    client_metadata: &ClientMetadata,
) -> AuthResult<ClientInformation> {
    let endpoint = metadata.registration_endpoint.as_deref().ok_or_else(|| {
        AuthError::RegistrationFailed(format!(
            "{} does not support dynamic client registration",
            metadata.issuer
        ))
    })?;

    debug!(endpoint = %endpoint, "Registering OAuth client");
    let response = http
        .post(endpoint)
        .json(client_metadata)
        .send()
        .await
        .map_err(|e| AuthError::RegistrationFailed(format!("Request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(AuthError::RegistrationFailed(format!("HTTP {status}: {text}")));
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::RegistrationFailed(format!("Invalid registration response: {e}")))
}

/// Query parameters of an authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationParams<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub code_challenge: &'a str,
    pub state: &'a str,
    pub scope: Option<&'a str>,
    /// RFC 8707 resource indicator.
    pub resource: Option<&'a str>,
}

/// Build the authorization URL the user agent is sent to.
pub fn build_authorization_url(
    authorization_endpoint: &str,
    params: &AuthorizationParams<'_>,
) -> AuthResult<Url> {
    let mut url = Url::parse(authorization_endpoint)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", params.client_id)
            .append_pair("redirect_uri", params.redirect_uri)
            .append_pair("state", params.state)
            .append_pair("code_challenge", params.code_challenge)
            .append_pair("code_challenge_method", "S256");
        if let Some(scope) = params.scope {
            query.append_pair("scope", scope);
        }
        if let Some(resource) = params.resource {
            query.append_pair("resource", resource);
        }
    }
    Ok(url)
}

/// Grant presented at the token endpoint.
pub(crate) enum TokenGrant<'a> {
    AuthorizationCode {
        code: &'a str,
        code_verifier: &'a str,
        redirect_uri: &'a str,
    },
    RefreshToken {
        refresh_token: &'a str,
    },
}

/// POST a grant to the token endpoint.
///
/// Errors are returned as text so the caller can attribute them to its step.
pub(crate) async fn request_tokens(
    http: &reqwest::Client,
    token_endpoint: &str,
    client: &ClientInformation,
    grant: TokenGrant<'_>,
    resource: Option<&str>,
) -> Result<OAuthTokens, String> {
    let mut params: Vec<(&str, &str)> = match grant {
        TokenGrant::AuthorizationCode {
            code,
            code_verifier,
            redirect_uri,
        } => vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ],
        TokenGrant::RefreshToken { refresh_token } => vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ],
    };
    params.push(("client_id", client.client_id.as_str()));
    if let Some(secret) = client.client_secret.as_deref() {
        params.push(("client_secret", secret));
    }
    if let Some(resource) = resource {
        params.push(("resource", resource));
    }

    let response = http
        .post(token_endpoint)
        .header("Accept", "application/json")
        .form(&params)
        .send()
        .await
        .map_err(|e| format!("Token request failed: {e}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(format!("HTTP {status}: {text}"));
    }

    response
        .json()
        .await
        .map_err(|e| format!("Invalid token response: {e}"))
}
