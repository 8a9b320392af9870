//! Durable per-server-URL credential storage.

use crate::error::AuthResult;
use crate::metadata::{ClientInformation, TokenSet};
use async_trait::async_trait;
use mcpdock_storage::{digest_segment, Storage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const OAUTH_PREFIX: &str = "oauth";
const PENDING_PREFIX: &str = "oauth-pending";

/// An authorization attempt suspended at the browser redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub server_url: String,
    pub code_verifier: String,
    pub state: String,
    /// Unix timestamp when the redirect was issued.
    pub created_at: u64,
}

/// Credential persistence for the OAuth flow.
///
/// Every record is keyed by MCP server URL; two servers never share
/// credentials. Each save replaces the whole value.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn client_information(&self, server_url: &str) -> AuthResult<Option<ClientInformation>>;

    async fn save_client_information(
        &self,
        server_url: &str,
        info: &ClientInformation,
    ) -> AuthResult<()>;

    async fn tokens(&self, server_url: &str) -> AuthResult<Option<TokenSet>>;

    async fn save_tokens(&self, server_url: &str, tokens: &TokenSet) -> AuthResult<()>;

    /// The in-flight attempt for a server, with its PKCE verifier.
    async fn pending(&self, server_url: &str) -> AuthResult<Option<PendingAuthorization>>;

    /// Persist an in-flight attempt, replacing any earlier one for the same server.
    async fn save_pending(&self, pending: &PendingAuthorization) -> AuthResult<()>;

    /// Resolve the server URL an OAuth `state` value was issued for.
    async fn server_for_state(&self, state: &str) -> AuthResult<Option<String>>;

    async fn clear_pending(&self, server_url: &str) -> AuthResult<()>;

    /// Remove tokens, client registration and any pending attempt.
    async fn forget(&self, server_url: &str) -> AuthResult<()>;
}

/// A value tagged with the server URL it belongs to.
///
/// Keys are digests of the URL, so the URL is kept alongside and checked on read.
#[derive(Serialize, Deserialize)]
struct Scoped<T> {
    server_url: String,
    value: T,
}

#[derive(Serialize, Deserialize)]
struct StateIndex {
    server_url: String,
}

/// [`CredentialStore`] on top of any [`Storage`] backend.
///
/// Layout:
/// - `oauth/<digest>/client`
/// - `oauth/<digest>/tokens`
/// - `oauth/<digest>/verifier`
/// - `oauth-pending/<state>`
pub struct StorageCredentialStore<S> {
    storage: S,
}

impl<S: Storage> StorageCredentialStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    async fn read_scoped<T>(&self, server_url: &str, item: &str) -> AuthResult<Option<T>>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        let digest = digest_segment(server_url);
        let scoped: Option<Scoped<T>> = self.storage.read(&[OAUTH_PREFIX, &digest, item]).await?;
        match scoped {
            Some(s) if s.server_url == server_url => Ok(Some(s.value)),
            Some(s) => {
                warn!(
                    expected = %server_url,
                    found = %s.server_url,
                    item,
                    "Stored credential belongs to another server; ignoring"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn write_scoped<T>(&self, server_url: &str, item: &str, value: &T) -> AuthResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let digest = digest_segment(server_url);
        let scoped = Scoped {
            server_url: server_url.to_string(),
            value,
        };
        self.storage
            .write(&[OAUTH_PREFIX, &digest, item], &scoped)
            .await?;
        debug!(server = %server_url, item, "Saved credential");
        Ok(())
    }

    async fn remove_scoped(&self, server_url: &str, item: &str) -> AuthResult<()> {
        let digest = digest_segment(server_url);
        self.storage.remove(&[OAUTH_PREFIX, &digest, item]).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: Storage + 'static> CredentialStore for StorageCredentialStore<S> {
    async fn client_information(&self, server_url: &str) -> AuthResult<Option<ClientInformation>> {
        self.read_scoped(server_url, "client").await
    }

    async fn save_client_information(
        &self,
        server_url: &str,
        info: &ClientInformation,
    ) -> AuthResult<()> {
        self.write_scoped(server_url, "client", info).await
    }

    async fn tokens(&self, server_url: &str) -> AuthResult<Option<TokenSet>> {
        self.read_scoped(server_url, "tokens").await
    }

    async fn save_tokens(&self, server_url: &str, tokens: &TokenSet) -> AuthResult<()> {
        self.write_scoped(server_url, "tokens", tokens).await
    }

    async fn pending(&self, server_url: &str) -> AuthResult<Option<PendingAuthorization>> {
        self.read_scoped(server_url, "verifier").await
    }

    async fn save_pending(&self, pending: &PendingAuthorization) -> AuthResult<()> {
        // Drop the index entry of a superseded attempt
        if let Some(previous) = self.pending(&pending.server_url).await? {
            if previous.state != pending.state {
                self.storage.remove(&[PENDING_PREFIX, &previous.state]).await?;
            }
        }

        self.write_scoped(&pending.server_url, "verifier", pending)
            .await?;
        self.storage
            .write(
                &[PENDING_PREFIX, &pending.state],
                &StateIndex {
                    server_url: pending.server_url.clone(),
                },
            )
            .await?;
        Ok(())
    }

    async fn server_for_state(&self, state: &str) -> AuthResult<Option<String>> {
        // State values are base64url, but they arrive from a query string
        if state.is_empty()
            || state.contains('/')
            || state.contains('\\')
            || state.starts_with('.')
        {
            return Ok(None);
        }
        let index: Option<StateIndex> = self.storage.read(&[PENDING_PREFIX, state]).await?;
        Ok(index.map(|i| i.server_url))
    }

    async fn clear_pending(&self, server_url: &str) -> AuthResult<()> {
        if let Some(pending) = self.pending(server_url).await? {
            self.storage.remove(&[PENDING_PREFIX, &pending.state]).await?;
        }
        self.remove_scoped(server_url, "verifier").await
    }

    async fn forget(&self, server_url: &str) -> AuthResult<()> {
        self.clear_pending(server_url).await?;
        self.remove_scoped(server_url, "tokens").await?;
        self.remove_scoped(server_url, "client").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpdock_storage::{JsonStorage, MemoryStorage};
    use tempfile::tempdir;

    const SERVER: &str = "https://mcp.example.com/mcp";
    const OTHER: &str = "https://other.example.com/mcp";

    fn tokens(access: &str) -> TokenSet {
        TokenSet {
            access_token: access.to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(2_000_000_000),
            scope: None,
        }
    }

    fn pending(state: &str) -> PendingAuthorization {
        PendingAuthorization {
            server_url: SERVER.to_string(),
            code_verifier: "verifier".to_string(),
            state: state.to_string(),
            created_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_keyed_by_server_url() {
        let store = StorageCredentialStore::new(MemoryStorage::new());
        store.save_tokens(SERVER, &tokens("a")).await.unwrap();

        assert_eq!(store.tokens(SERVER).await.unwrap(), Some(tokens("a")));
        assert_eq!(store.tokens(OTHER).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_client_information_roundtrip() {
        let store = StorageCredentialStore::new(MemoryStorage::new());
        let info = ClientInformation::new("client123", None);
        store.save_client_information(SERVER, &info).await.unwrap();

        assert_eq!(store.client_information(SERVER).await.unwrap(), Some(info));
        assert_eq!(store.client_information(OTHER).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pending_indexed_by_state() {
        let store = StorageCredentialStore::new(MemoryStorage::new());
        store.save_pending(&pending("state1")).await.unwrap();

        assert_eq!(
            store.server_for_state("state1").await.unwrap().as_deref(),
            Some(SERVER)
        );
        assert_eq!(store.pending(SERVER).await.unwrap(), Some(pending("state1")));

        // A newer attempt supersedes the earlier one
        store.save_pending(&pending("state2")).await.unwrap();
        assert_eq!(store.server_for_state("state1").await.unwrap(), None);
        assert_eq!(
            store.pending(SERVER).await.unwrap().map(|p| p.state),
            Some("state2".to_string())
        );

        store.clear_pending(SERVER).await.unwrap();
        assert_eq!(store.pending(SERVER).await.unwrap(), None);
        assert_eq!(store.server_for_state("state2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_for_state_rejects_path_like_values() {
        let store = StorageCredentialStore::new(MemoryStorage::new());
        assert_eq!(store.server_for_state("").await.unwrap(), None);
        assert_eq!(store.server_for_state("../x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_forget() {
        let storage = MemoryStorage::new();
        let store = StorageCredentialStore::new(storage.clone());
        store.save_tokens(SERVER, &tokens("a")).await.unwrap();
        store
            .save_client_information(SERVER, &ClientInformation::new("c", None))
            .await
            .unwrap();
        store.save_pending(&pending("state1")).await.unwrap();

        store.forget(SERVER).await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_survives_new_process() {
        let dir = tempdir().unwrap();
        let first = StorageCredentialStore::new(JsonStorage::private(dir.path()));
        first.save_pending(&pending("state1")).await.unwrap();

        let second = StorageCredentialStore::new(JsonStorage::private(dir.path()));
        assert_eq!(
            second.pending(SERVER).await.unwrap().map(|p| p.code_verifier),
            Some("verifier".to_string())
        );
        assert_eq!(
            second.server_for_state("state1").await.unwrap().as_deref(),
            Some(SERVER)
        );
    }
}
