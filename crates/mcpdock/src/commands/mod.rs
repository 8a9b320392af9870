//! Command handlers for the mcpdock CLI.

pub mod auth;
pub mod callback;
pub mod describe;
pub mod logging;
pub mod server;

pub use auth::*;
pub use callback::*;
pub use describe::*;
pub use logging::*;
pub use server::*;

use crate::config::Config;
use anyhow::Context as _;
use mcpdock_auth::{AuthorizationRedirect, StorageCredentialStore};
use mcpdock_mcp::{Connector, ServerRegistry, StoredServerRegistry};
use mcpdock_storage::JsonStorage;
use std::sync::Arc;

/// Resolved configuration plus the storage it points at.
pub struct Context {
    pub config: Config,
    storage: JsonStorage,
}

impl Context {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let data_dir = config
            .data_dir()
            .context("Could not determine a data directory; set dataDir in the config")?;
        tracing::debug!(path = %data_dir.display(), "Using data directory");

        Ok(Self {
            config,
            storage: JsonStorage::private(data_dir),
        })
    }

    pub fn registry(&self) -> Arc<dyn ServerRegistry> {
        Arc::new(StoredServerRegistry::new(self.storage.clone()))
    }

    pub fn connector(&self, redirect: Arc<dyn AuthorizationRedirect>) -> Connector {
        Connector::new(
            self.registry(),
            Arc::new(StorageCredentialStore::new(self.storage.clone())),
            redirect,
        )
        .with_redirect_url(self.config.redirect_url())
        .with_client_name(self.config.client_name())
        .with_scope(self.config.scope.clone())
        .with_timeout(self.config.timeout())
    }
}
