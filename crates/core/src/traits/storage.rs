//! Object storage gateway traits.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Listing entry returned by [`ObjectStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key.
    pub key: String,
    /// Stored size in bytes.
    pub size_bytes: u64,
    /// Last write time.
    pub last_modified: DateTime<Utc>,
}

/// Key-prefixed durable object store.
///
/// All failures surface as [`crate::Error::Storage`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any previous value.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Read an object. Returns `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// List every object whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
