//! JSON file-based storage implementation.
//!
//! Each key is stored as a separate JSON file:
//! `["oauth", "<digest>", "tokens"]` -> `oauth/<digest>/tokens.json`

use crate::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

const EXTENSION: &str = ".json";

/// JSON file-based storage.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    base_path: PathBuf,
    /// Restrict written files to the owner (0600 on Unix).
    private: bool,
}

impl JsonStorage {
    /// Create a new JSON storage at the given base path.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            private: false,
        }
    }

    /// Create a JSON storage whose files are readable only by the owner.
    ///
    /// Used for anything holding tokens or client secrets.
    pub fn private(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            private: true,
        }
    }

    /// Get the file path for a key.
    fn key_to_path(&self, key: &[&str]) -> StorageResult<PathBuf> {
        let Some((last, parents)) = key.split_last() else {
            return Err(StorageError::invalid_key("Key cannot be empty"));
        };

        // No path traversal
        for component in key {
            if component.is_empty()
                || component.contains('/')
                || component.contains('\\')
                || *component == "."
                || *component == ".."
            {
                return Err(StorageError::invalid_key(format!(
                    "Invalid key component: {}",
                    component
                )));
            }
        }

        let mut path = self.base_path.clone();
        for component in parents {
            path.push(component);
        }
        // Appended rather than `set_extension` so dotted components keep their full name.
        path.push(format!("{last}{EXTENSION}"));

        Ok(path)
    }

    /// Get the directory path for a prefix.
    fn prefix_to_dir(&self, prefix: &[&str]) -> PathBuf {
        let mut path = self.base_path.clone();
        for component in prefix {
            path.push(component);
        }
        path
    }

    #[cfg(unix)]
    async fn restrict(&self, path: &std::path::Path) -> StorageResult<()> {
        use std::os::unix::fs::PermissionsExt;
        if self.private {
            fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn restrict(&self, _path: &std::path::Path) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        let path = self.key_to_path(key)?;
        debug!(path = %path.display(), "Reading from storage");

        match fs::read_to_string(&path).await {
            Ok(content) => {
                let value: T = serde_json::from_str(&content)?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        debug!(path = %path.display(), "Writing to storage");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(value)?;

        // Write to a temp file, then rename, so readers never see a partial value
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);
        fs::write(&temp_path, &content).await?;
        self.restrict(&temp_path).await?;
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    async fn remove(&self, key: &[&str]) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        debug!(path = %path.display(), "Removing from storage");

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
        let dir = self.prefix_to_dir(prefix);
        debug!(path = %dir.display(), "Listing storage");

        let mut results = Vec::new();

        match fs::read_dir(&dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let file_name = entry.file_name();
                    let Some(name) = file_name.to_str() else {
                        continue;
                    };

                    if let Some(stem) = name.strip_suffix(EXTENSION) {
                        let mut key: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
                        key.push(stem.to_string());
                        results.push(key);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }

        results.sort();
        Ok(results)
    }

    async fn exists(&self, key: &[&str]) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct Record {
        name: String,
        value: i32,
    }

    fn record() -> Record {
        Record {
            name: "weather".to_string(),
            value: 42,
        }
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let dir = tempdir().unwrap();
        let storage = JsonStorage::new(dir.path());

        storage.write(&["servers", "1"], &record()).await.unwrap();

        let read: Option<Record> = storage.read(&["servers", "1"]).await.unwrap();
        assert_eq!(read, Some(record()));
        assert!(dir.path().join("servers").join("1.json").exists());
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let dir = tempdir().unwrap();
        let storage = JsonStorage::new(dir.path());

        let read: Option<Record> = storage.read(&["nonexistent"]).await.unwrap();
        assert_eq!(read, None);
    }

    #[tokio::test]
    async fn test_dotted_component_keeps_full_name() {
        let dir = tempdir().unwrap();
        let storage = JsonStorage::new(dir.path());

        storage
            .write(&["hosts", "mcp.example.com"], &record())
            .await
            .unwrap();
        storage
            .write(&["hosts", "mcp.example.org"], &record())
            .await
            .unwrap();

        let items = storage.list(&["hosts"]).await.unwrap();
        assert_eq!(
            items,
            vec![
                vec!["hosts".to_string(), "mcp.example.com".to_string()],
                vec!["hosts".to_string(), "mcp.example.org".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempdir().unwrap();
        let storage = JsonStorage::new(dir.path());

        storage.write(&["servers", "1"], &record()).await.unwrap();
        assert!(storage.exists(&["servers", "1"]).await.unwrap());

        storage.remove(&["servers", "1"]).await.unwrap();
        assert!(!storage.exists(&["servers", "1"]).await.unwrap());

        // Removing again is not an error
        storage.remove(&["servers", "1"]).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let dir = tempdir().unwrap();
        let storage = JsonStorage::new(dir.path());

        let items = storage.list(&["nothing", "here"]).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let dir = tempdir().unwrap();
        let storage = JsonStorage::new(dir.path());

        assert!(storage.write(&[], &record()).await.is_err());
        assert!(storage
            .write(&["..", "etc", "passwd"], &record())
            .await
            .is_err());
        assert!(storage.write(&["path/traversal"], &record()).await.is_err());
    }

    #[tokio::test]
    async fn test_second_instance_sees_writes() {
        let dir = tempdir().unwrap();
        let first = JsonStorage::private(dir.path());
        first.write(&["oauth", "verifier"], &"abc").await.unwrap();

        // A fresh instance over the same directory, as a later process would open it
        let second = JsonStorage::private(dir.path());
        let read: Option<String> = second.read(&["oauth", "verifier"]).await.unwrap();
        assert_eq!(read.as_deref(), Some("abc"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_storage_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let storage = JsonStorage::private(dir.path());
        storage.write(&["secret"], &record()).await.unwrap();

        let meta = std::fs::metadata(dir.path().join("secret.json")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
