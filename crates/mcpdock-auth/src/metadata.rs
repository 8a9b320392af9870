//! OAuth wire and storage types.

use serde::{Deserialize, Serialize};

/// Seconds before expiry at which a token is already treated as expired.
pub const EXPIRY_SKEW_SECS: u64 = 60;

/// OAuth 2.0 protected-resource metadata (RFC 9728).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,
}

/// OAuth 2.0 authorization-server metadata (RFC 8414).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
}

impl AuthorizationServerMetadata {
    /// Check that the server can run an authorization-code grant with S256 PKCE.
    pub fn check_supports_code_flow(&self) -> Result<(), String> {
        if !self.response_types_supported.is_empty()
            && !self.response_types_supported.iter().any(|t| t == "code")
        {
            return Err(format!(
                "{} does not support response type 'code'",
                self.issuer
            ));
        }

        if let Some(methods) = &self.code_challenge_methods_supported {
            if !methods.iter().any(|m| m == "S256") {
                return Err(format!(
                    "{} does not support S256 code challenges",
                    self.issuer
                ));
            }
        }

        Ok(())
    }
}

/// Client metadata sent in a dynamic registration request (RFC 7591).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub client_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Client identity issued by dynamic registration or configured up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInformation {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<u64>,
    /// Unix timestamp; 0 or absent means the secret does not expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<u64>,
}

impl ClientInformation {
    /// A client configured without registration metadata.
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            client_id_issued_at: None,
            client_secret_expires_at: None,
        }
    }

    /// Whether the client secret has expired at `now`.
    pub fn is_secret_expired(&self, now: u64) -> bool {
        match self.client_secret_expires_at {
            Some(0) | None => false,
            Some(expires_at) => expires_at < now,
        }
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Tokens as persisted, with an absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp when the access token expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenSet {
    /// Convert a token response received at `now`.
    pub fn from_response(tokens: OAuthTokens, now: u64) -> Self {
        Self {
            access_token: tokens.access_token,
            token_type: tokens.token_type,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_in.map(|secs| now.saturating_add(secs)),
            scope: tokens.scope,
        }
    }

    /// Whether the access token is expired (or within the skew window) at `now`.
    ///
    /// Tokens without an expiry never expire.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now.saturating_add(EXPIRY_SKEW_SECS))
    }

    /// Seconds until expiry, if known.
    pub fn expires_in(&self, now: u64) -> Option<u64> {
        self.expires_at.map(|exp| exp.saturating_sub(now))
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_metadata(json: serde_json::Value) -> AuthorizationServerMetadata {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_resource_metadata_without_servers() {
        let metadata: ProtectedResourceMetadata =
            serde_json::from_str(r#"{"resource": "https://mcp.example.com"}"#).unwrap();
        assert!(metadata.authorization_servers.is_empty());
    }

    #[test]
    fn test_auth_server_metadata_supports_code_flow() {
        let metadata = as_metadata(serde_json::json!({
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token",
            "response_types_supported": ["code"],
            "code_challenge_methods_supported": ["S256"]
        }));
        assert!(metadata.check_supports_code_flow().is_ok());
        assert!(metadata.registration_endpoint.is_none());
    }

    #[test]
    fn test_auth_server_metadata_rejects_plain_pkce_only() {
        let metadata = as_metadata(serde_json::json!({
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token",
            "response_types_supported": ["code"],
            "code_challenge_methods_supported": ["plain"]
        }));
        let err = metadata.check_supports_code_flow().unwrap_err();
        assert!(err.contains("S256"));
    }

    #[test]
    fn test_auth_server_metadata_rejects_token_only() {
        let metadata = as_metadata(serde_json::json!({
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token",
            "response_types_supported": ["token"]
        }));
        assert!(metadata.check_supports_code_flow().is_err());
    }

    #[test]
    fn test_client_metadata_serialization() {
        let metadata = ClientMetadata {
            redirect_uris: vec!["http://127.0.0.1:19876/oauth/callback".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types: vec!["code".to_string()],
            client_name: "mcpdock".to_string(),
            scope: None,
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["token_endpoint_auth_method"], "none");
        assert!(json.get("scope").is_none());
    }

    #[test]
    fn test_client_information_secret_expiry() {
        let mut info = ClientInformation::new("client123", Some("secret".to_string()));
        assert!(!info.is_secret_expired(1_000));

        info.client_secret_expires_at = Some(0);
        assert!(!info.is_secret_expired(1_000));

        info.client_secret_expires_at = Some(500);
        assert!(info.is_secret_expired(1_000));
    }

    #[test]
    fn test_client_information_minimal_serialization() {
        let info = ClientInformation::new("client123", None);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("client_secret"));
        assert!(!json.contains("client_id_issued_at"));
    }

    #[test]
    fn test_token_response_defaults_token_type() {
        let tokens: OAuthTokens = serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.refresh_token.is_none());
    }

    #[test]
    fn test_token_set_expiry() {
        let tokens = OAuthTokens {
            access_token: "access123".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("refresh456".to_string()),
            expires_in: Some(3600),
            scope: None,
        };
        let set = TokenSet::from_response(tokens, 10_000);
        assert_eq!(set.expires_at, Some(13_600));
        assert!(!set.is_expired(10_000));
        // Inside the skew window
        assert!(set.is_expired(13_600 - 30));
        assert!(set.is_expired(20_000));
        assert_eq!(set.expires_in(13_000), Some(600));
        assert_eq!(set.bearer(), "Bearer access123");
    }

    #[test]
    fn test_token_set_huge_expires_in_saturates() {
        let tokens: OAuthTokens = serde_json::from_str(
            r#"{"access_token":"a","expires_in":18446744073709551615}"#,
        )
        .unwrap();
        let set = TokenSet::from_response(tokens, 1_700_000_000);
        assert_eq!(set.expires_at, Some(u64::MAX));
        assert!(!set.is_expired(1_700_000_000));
    }

    #[test]
    fn test_token_set_without_expiry_never_expires() {
        let set = TokenSet {
            access_token: "access123".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_at: None,
            scope: None,
        };
        assert!(!set.is_expired(u64::MAX - EXPIRY_SKEW_SECS));
    }
}
