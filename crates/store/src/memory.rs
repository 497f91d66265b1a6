//! In-memory object store implementation using DashMap.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use telvault_core::{
    traits::{ObjectInfo, ObjectStore},
    Result,
};

/// Stored object with metadata.
#[derive(Debug, Clone)]
struct StoredObject {
    /// The actual data.
    data: Bytes,
    /// Last write timestamp.
    last_modified: DateTime<Utc>,
}

/// In-memory object store using DashMap for concurrent access.
///
/// Used by tests and by deployments that do not need captures to outlive
/// the process.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    /// Thread-safe concurrent hashmap keyed by object key.
    objects: DashMap<String, StoredObject>,
}

impl InMemoryObjectStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }

    /// Write an object with an explicit modification time (backfills, tests).
    pub fn put_at(&self, key: &str, data: Bytes, last_modified: DateTime<Utc>) {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified,
            },
        );
    }

    /// Get the number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Get total stored bytes.
    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|r| r.value().data.len() as u64).sum()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        tracing::trace!(key = key, size = data.len(), "Storing object in memory");
        self.put_at(key, data, Utc::now());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.get(key).map(|r| r.data.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects: Vec<ObjectInfo> = self
            .objects
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| ObjectInfo {
                key: r.key().clone(),
                size_bytes: r.value().data.len() as u64,
                last_modified: r.value().last_modified,
            })
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
