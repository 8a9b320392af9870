//! Server registry: CRUD over server records.

use crate::error::{McpError, McpResult};
use crate::server::{NewServer, ServerRecord, ServerUpdate};
use async_trait::async_trait;
use chrono::Utc;
use mcpdock_storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SERVERS: &str = "servers";

/// Looks up and persists server records by id.
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    /// Validate and store a new record. Ids are assigned by the registry.
    async fn create(&self, server: NewServer) -> McpResult<ServerRecord>;

    /// All records, ordered by id.
    async fn list(&self) -> McpResult<Vec<ServerRecord>>;

    async fn get(&self, id: u64) -> McpResult<ServerRecord>;

    /// Apply a partial edit and store the re-validated result.
    async fn update(&self, id: u64, update: ServerUpdate) -> McpResult<ServerRecord>;

    async fn delete(&self, id: u64) -> McpResult<()>;
}

/// Registry backed by a [`Storage`], one entry per record under `servers/<id>`.
pub struct StoredServerRegistry<S> {
    storage: S,
    // Serializes id assignment within this process.
    create_lock: Mutex<()>,
}

impl<S: Storage> StoredServerRegistry<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            create_lock: Mutex::new(()),
        }
    }

    async fn ids(&self) -> McpResult<Vec<u64>> {
        let keys = self.storage.list(&[SERVERS]).await?;
        let mut ids: Vec<u64> = keys
            .iter()
            .filter_map(|key| key.last()?.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn write(&self, record: &ServerRecord) -> McpResult<()> {
        let id = record.id.to_string();
        self.storage.write(&[SERVERS, &id], record).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: Storage> ServerRegistry for StoredServerRegistry<S> {
    async fn create(&self, server: NewServer) -> McpResult<ServerRecord> {
        let _guard = self.create_lock.lock().await;

        let id = self.ids().await?.last().map_or(1, |last| last + 1);
        let record = server.into_record(id, Utc::now())?;
        self.write(&record).await?;

        info!(id, name = %record.name, transport = %record.transport, "Server created");
        Ok(record)
    }

    async fn list(&self) -> McpResult<Vec<ServerRecord>> {
        let mut records = Vec::new();
        for id in self.ids().await? {
            let key = id.to_string();
            if let Some(record) = self.storage.read::<ServerRecord>(&[SERVERS, &key]).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn get(&self, id: u64) -> McpResult<ServerRecord> {
        let key = id.to_string();
        self.storage
            .read(&[SERVERS, &key])
            .await?
            .ok_or(McpError::ServerNotFound(id))
    }

    async fn update(&self, id: u64, update: ServerUpdate) -> McpResult<ServerRecord> {
        let current = self.get(id).await?;
        if update.is_empty() {
            return Ok(current);
        }

        let record = update.apply(&current, Utc::now())?;
        self.write(&record).await?;

        debug!(id, "Server updated");
        Ok(record)
    }

    async fn delete(&self, id: u64) -> McpResult<()> {
        let key = id.to_string();
        if !self.storage.exists(&[SERVERS, &key]).await? {
            return Err(McpError::ServerNotFound(id));
        }
        self.storage.remove(&[SERVERS, &key]).await?;

        info!(id, "Server deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::server::AuthKind;
    use crate::transport::TransportKind;
    use mcpdock_storage::{JsonStorage, MemoryStorage};

    fn weather() -> NewServer {
        NewServer::new(
            "weather",
            "1.0.0",
            TransportKind::Sse,
            "https://mcp.example.com/sse",
        )
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let registry = StoredServerRegistry::new(MemoryStorage::new());

        let first = registry.create(weather()).await.unwrap();
        let second = registry.create(weather()).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        registry.delete(1).await.unwrap();
        let third = registry.create(weather()).await.unwrap();
        assert_eq!(third.id, 3);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid() {
        let storage = MemoryStorage::new();
        let registry = StoredServerRegistry::new(storage.clone());

        let err = registry
            .create(NewServer::new("", "1.0.0", TransportKind::Sse, "https://x"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_list_sorted_numerically() {
        let registry = StoredServerRegistry::new(MemoryStorage::new());
        for _ in 0..11 {
            registry.create(weather()).await.unwrap();
        }

        let ids: Vec<u64> = registry.list().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let registry = StoredServerRegistry::new(MemoryStorage::new());
        assert!(matches!(
            registry.get(7).await,
            Err(McpError::ServerNotFound(7))
        ));
        assert!(matches!(
            registry.delete(7).await,
            Err(McpError::ServerNotFound(7))
        ));
    }

    #[tokio::test]
    async fn test_update_persists() {
        let registry = StoredServerRegistry::new(MemoryStorage::new());
        let created = registry.create(weather()).await.unwrap();

        let updated = registry
            .update(
                created.id,
                ServerUpdate {
                    auth_type: Some(AuthKind::Token),
                    auth_token: Some("secret".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.token(), Some("secret"));
        assert!(updated.updated_at >= created.updated_at);

        let stored = registry.get(created.id).await.unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_record() {
        let registry = StoredServerRegistry::new(MemoryStorage::new());
        let created = registry.create(weather()).await.unwrap();

        let result = registry
            .update(
                created.id,
                ServerUpdate {
                    auth_type: Some(AuthKind::Token),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(result.unwrap_err().field(), Some("auth_token"));
        assert_eq!(registry.get(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_json_storage_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoredServerRegistry::new(JsonStorage::new(dir.path()));
        let created = registry.create(weather()).await.unwrap();

        let reopened = StoredServerRegistry::new(JsonStorage::new(dir.path()));
        assert_eq!(reopened.get(created.id).await.unwrap(), created);
        assert!(dir.path().join("servers").join("1.json").exists());
    }
}
