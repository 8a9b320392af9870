//! Server records: identity and connection configuration of remote MCP servers.

use crate::error::{McpError, McpResult};
use crate::transport::TransportKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

/// How a server authenticates clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    None,
    /// Static bearer token.
    Token,
    OAuth,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::None => "none",
            AuthKind::Token => "token",
            AuthKind::OAuth => "oauth",
        }
    }
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthKind {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AuthKind::None),
            "token" => Ok(AuthKind::Token),
            "oauth" => Ok(AuthKind::OAuth),
            other => Err(McpError::invalid_server(
                "auth_type",
                format!("Unknown auth type: {other}"),
            )),
        }
    }
}

/// A configured remote MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: u64,
    pub name: String,
    /// Semantic version the server declares.
    pub version: String,
    pub transport: TransportKind,
    pub url: String,
    #[serde(default)]
    pub auth_type: AuthKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_authorization_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_client_secret: Option<String>,
    /// The OAuth client fields were copied from a dynamic registration
    /// rather than configured by the user.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub oauth_client_registered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ServerRecord {
    /// Parsed URL. Valid records always have one.
    pub fn parsed_url(&self) -> McpResult<Url> {
        Url::parse(&self.url).map_err(|e| McpError::invalid_server("url", format!("Invalid URL: {e}")))
    }

    /// Static token for `token` auth.
    pub fn token(&self) -> Option<&str> {
        match self.auth_type {
            AuthKind::Token => non_empty(&self.auth_token),
            _ => None,
        }
    }

    /// Drop credentials that do not belong to the record's auth kind.
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.version = self.version.trim().to_string();
        self.url = self.url.trim().to_string();

        if self.auth_type != AuthKind::Token {
            self.auth_token = None;
        }
        if self.auth_type != AuthKind::OAuth {
            self.oauth_authorization_server = None;
            self.oauth_client_id = None;
            self.oauth_client_secret = None;
        }
        for field in [
            &mut self.auth_token,
            &mut self.oauth_authorization_server,
            &mut self.oauth_client_id,
            &mut self.oauth_client_secret,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        if self.oauth_client_id.is_none() {
            self.oauth_client_registered = false;
        }
    }

    /// Client id and secret the user configured for a pre-registered client.
    ///
    /// Fields written back from a dynamic registration do not count; that
    /// registration lives in the credential store.
    pub fn static_client(&self) -> Option<(&str, Option<&str>)> {
        if self.auth_type != AuthKind::OAuth || self.oauth_client_registered {
            return None;
        }
        let client_id = non_empty(&self.oauth_client_id)?;
        Some((client_id, non_empty(&self.oauth_client_secret)))
    }

    /// Check the record, reporting the first offending field.
    pub fn validate(&self) -> McpResult<()> {
        if self.name.trim().is_empty() {
            return Err(McpError::invalid_server("name", "Server name is required"));
        }
        if self.version.trim().is_empty() {
            return Err(McpError::invalid_server("version", "Version is required"));
        }
        if self.transport == TransportKind::Stdio {
            return Err(McpError::invalid_server(
                "transport",
                "The stdio transport is not supported for remote servers",
            ));
        }

        let url = self.parsed_url()?;
        let schemes = self.transport.url_schemes();
        if !schemes.contains(&url.scheme()) {
            return Err(McpError::invalid_server(
                "url",
                format!(
                    "URL scheme must be {} for the {} transport",
                    schemes.join(" or "),
                    self.transport
                ),
            ));
        }

        match self.auth_type {
            AuthKind::Token => {
                if non_empty(&self.auth_token).is_none() {
                    return Err(McpError::invalid_server(
                        "auth_token",
                        "Token is required for token authentication",
                    ));
                }
            }
            AuthKind::None | AuthKind::OAuth => {
                if self.auth_token.is_some() {
                    return Err(McpError::invalid_server(
                        "auth_token",
                        format!("A token is only allowed with token authentication, not {}", self.auth_type),
                    ));
                }
            }
        }

        if self.auth_type != AuthKind::OAuth
            && (self.oauth_authorization_server.is_some()
                || self.oauth_client_id.is_some()
                || self.oauth_client_secret.is_some())
        {
            return Err(McpError::invalid_server(
                "auth_type",
                "OAuth settings are only allowed with oauth authentication",
            ));
        }

        if let Some(server) = non_empty(&self.oauth_authorization_server) {
            Url::parse(server).map_err(|e| {
                McpError::invalid_server(
                    "oauth_authorization_server",
                    format!("Invalid URL: {e}"),
                )
            })?;
        }

        if self.oauth_client_secret.is_some() && self.oauth_client_id.is_none() {
            return Err(McpError::invalid_server(
                "oauth_client_id",
                "A client secret requires a client id",
            ));
        }

        Ok(())
    }
}

/// Input for creating a server record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewServer {
    pub name: String,
    pub version: String,
    pub transport: TransportKind,
    pub url: String,
    #[serde(default)]
    pub auth_type: AuthKind,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub oauth_authorization_server: Option<String>,
    #[serde(default)]
    pub oauth_client_id: Option<String>,
    #[serde(default)]
    pub oauth_client_secret: Option<String>,
}

impl NewServer {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        transport: TransportKind,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            transport,
            url: url.into(),
            auth_type: AuthKind::None,
            auth_token: None,
            oauth_authorization_server: None,
            oauth_client_id: None,
            oauth_client_secret: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_type = AuthKind::Token;
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_oauth(mut self) -> Self {
        self.auth_type = AuthKind::OAuth;
        self
    }

    /// Build a normalized, validated record.
    pub fn into_record(self, id: u64, now: DateTime<Utc>) -> McpResult<ServerRecord> {
        let mut record = ServerRecord {
            id,
            name: self.name,
            version: self.version,
            transport: self.transport,
            url: self.url,
            auth_type: self.auth_type,
            auth_token: self.auth_token,
            oauth_authorization_server: self.oauth_authorization_server,
            oauth_client_id: self.oauth_client_id,
            oauth_client_secret: self.oauth_client_secret,
            oauth_client_registered: false,
            created_at: now,
            updated_at: now,
        };
        record.normalize();
        record.validate()?;
        Ok(record)
    }
}

/// A partial edit of a server record. `None` leaves a field unchanged;
/// an empty string clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUpdate {
    pub name: Option<String>,
    pub version: Option<String>,
    pub transport: Option<TransportKind>,
    pub url: Option<String>,
    pub auth_type: Option<AuthKind>,
    pub auth_token: Option<String>,
    pub oauth_authorization_server: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    /// Defaults to `false` whenever `oauth_client_id` is set.
    pub oauth_client_registered: Option<bool>,
}

impl ServerUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to a copy of `record`, then normalize and re-validate it.
    pub fn apply(self, record: &ServerRecord, now: DateTime<Utc>) -> McpResult<ServerRecord> {
        let mut updated = record.clone();
        if let Some(name) = self.name {
            updated.name = name;
        }
        if let Some(version) = self.version {
            updated.version = version;
        }
        if let Some(transport) = self.transport {
            updated.transport = transport;
        }
        if let Some(url) = self.url {
            updated.url = url;
        }
        if let Some(auth_type) = self.auth_type {
            updated.auth_type = auth_type;
        }
        if self.auth_token.is_some() {
            updated.auth_token = self.auth_token;
        }
        if self.oauth_authorization_server.is_some() {
            updated.oauth_authorization_server = self.oauth_authorization_server;
        }
        if self.oauth_client_id.is_some() {
            updated.oauth_client_id = self.oauth_client_id;
            updated.oauth_client_registered = false;
        }
        if let Some(registered) = self.oauth_client_registered {
            updated.oauth_client_registered = registered;
        }
        if self.oauth_client_secret.is_some() {
            updated.oauth_client_secret = self.oauth_client_secret;
        }

        updated.normalize();
        updated.validate()?;
        updated.updated_at = now;
        Ok(updated)
    }
}
