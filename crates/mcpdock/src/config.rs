//! Configuration management for mcpdock.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/mcpdock/config.json`
//! 2. Environment variable: `MCPDOCK_CONFIG_CONTENT`
//! 3. Project config: `mcpdock.json` or `mcpdock.jsonc` in the working directory
//!
//! Supports JSONC (JSON with comments).

use mcpdock_auth::{default_redirect_url, DEFAULT_CLIENT_NAME, OAUTH_CALLBACK_PORT};
use mcpdock_util::LogLevel;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding inline configuration.
pub const CONFIG_CONTENT_ENV: &str = "MCPDOCK_CONFIG_CONTENT";

const GLOBAL_FILES: [&str; 3] = ["config.json", "mcpdock.json", "mcpdock.jsonc"];
const PROJECT_FILES: [&str; 2] = ["mcpdock.jsonc", "mcpdock.json"];

/// Default per-request network deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// A value parsed but is not usable.
    #[error("invalid config value {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Root directory for server records and OAuth credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// OAuth redirect URI registered with authorization servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,

    /// Address the OAuth callback listener binds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_address: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Client name sent in dynamic client registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// OAuth scope requested during authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Loading order (later sources override earlier):
    /// 1. Global config from `~/.config/mcpdock/`
    /// 2. `MCPDOCK_CONFIG_CONTENT` environment variable
    /// 3. Project config from `project_dir`
    pub async fn load(project_dir: Option<&Path>) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let env_content = std::env::var(CONFIG_CONTENT_ENV).ok();
        Self::load_from(
            mcpdock_util::path::config_dir().as_deref(),
            env_content.as_deref(),
            project_dir,
        )
        .await
    }

    async fn load_from(
        global_dir: Option<&Path>,
        env_content: Option<&str>,
        project_dir: Option<&Path>,
    ) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        // 1. Global config
        if let Some(dir) = global_dir {
            if let Some(path) = first_existing(dir, &GLOBAL_FILES) {
                config = config.merge(Self::load_file(&path).await?);
                sources.push(path);
            }
        }

        // 2. Environment variable
        if let Some(content) = env_content {
            config = config.merge(Self::parse_jsonc(content, "<env>")?);
        }

        // 3. Project config
        if let Some(dir) = project_dir {
            if let Some(path) = first_existing(dir, &PROJECT_FILES) {
                config = config.merge(Self::load_file(&path).await?);
                sources.push(path);
            }
        }

        config.validate()?;
        Ok((config, sources))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    fn parse_jsonc(content: &str, source: &str) -> Result<Self, ConfigError> {
        let stripped = strip_comments(content);
        serde_json::from_str(&stripped).map_err(|e| ConfigError::InvalidJson {
            path: source.to_string(),
            message: e.to_string(),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(redirect_url) = &self.redirect_url {
            url::Url::parse(redirect_url).map_err(|e| ConfigError::InvalidValue {
                key: "redirectUrl",
                message: e.to_string(),
            })?;
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "timeoutSecs",
                message: "must be greater than zero".to_string(),
            });
        }
        if let Some(level) = &self.log_level {
            if LogLevel::parse(level).is_none() {
                return Err(ConfigError::InvalidValue {
                    key: "logLevel",
                    message: format!("unknown level {level}"),
                });
            }
        }
        Ok(())
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(self, other: Self) -> Self {
        Self {
            schema: other.schema.or(self.schema),
            data_dir: other.data_dir.or(self.data_dir),
            redirect_url: other.redirect_url.or(self.redirect_url),
            callback_address: other.callback_address.or(self.callback_address),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
            client_name: other.client_name.or(self.client_name),
            scope: other.scope.or(self.scope),
            log_level: other.log_level.or(self.log_level),
            log_file: other.log_file.or(self.log_file),
        }
    }

    /// Storage root, defaulting to the platform data directory.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(mcpdock_util::path::data_dir)
    }

    pub fn redirect_url(&self) -> String {
        self.redirect_url.clone().unwrap_or_else(default_redirect_url)
    }

    /// Listener address, defaulting to loopback on the redirect URL's port.
    pub fn callback_address(&self) -> SocketAddr {
        if let Some(address) = self.callback_address {
            return address;
        }
        let port = url::Url::parse(&self.redirect_url())
            .ok()
            .and_then(|url| url.port_or_known_default())
            .unwrap_or(OAUTH_CALLBACK_PORT);
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn client_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(DEFAULT_CLIENT_NAME)
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
            .as_deref()
            .and_then(LogLevel::parse)
            .unwrap_or(LogLevel::Warn)
    }
}

fn first_existing(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    names
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Strip `//` and `/* */` comments outside of strings.
fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }

        if c == '\\' && in_string {
            result.push(c);
            escape_next = true;
            continue;
        }

        if c == '"' {
            in_string = !in_string;
            result.push(c);
            continue;
        }

        if in_string {
            result.push(c);
            continue;
        }

        if c == '/' {
            match chars.peek() {
                Some('/') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == '\n' {
                            result.push('\n');
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    let mut prev = ' ';
                    for c in chars.by_ref() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        // Keep line numbers stable for error messages
                        if c == '\n' {
                            result.push('\n');
                        }
                        prev = c;
                    }
                    continue;
                }
                _ => {}
            }
        }

        result.push(c);
    }

    result
}
