//! Storage layer for mcpdock.
//!
//! This crate provides a key-value storage abstraction with two backends:
//! - JSON file storage (durable, survives an OAuth redirect round trip
//!   served by another process)
//! - In-memory storage (for testing)

pub mod error;
pub mod json;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use json::JsonStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// A trait for key-value storage backends.
///
/// Keys are represented as path segments, e.g. `["servers", "12"]`.
/// Values are serialized/deserialized as JSON and each write replaces the
/// whole value.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value from storage.
    ///
    /// Returns `None` if the key doesn't exist.
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>>;

    /// Write a value to storage.
    ///
    /// Creates parent directories if necessary.
    async fn write<T: Serialize + Send + Sync>(&self, key: &[&str], value: &T)
        -> StorageResult<()>;

    /// Remove a value from storage.
    async fn remove(&self, key: &[&str]) -> StorageResult<()>;

    /// List all keys directly under a prefix.
    ///
    /// Returns the full key paths for each item.
    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>>;

    /// Check if a key exists.
    async fn exists(&self, key: &[&str]) -> StorageResult<bool>;
}

/// Derive a storage-safe key segment from arbitrary text such as a URL.
///
/// URLs contain `/`, `:` and `.`, none of which may appear in a key
/// component, so they are reduced to a hex SHA-256 digest.
pub fn digest_segment(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
