//! Local filesystem implementation of ObjectStore.
//!
//! Keys map to paths below a root directory. Writes go to a temporary sibling
//! and are renamed into place, so readers never observe a partial object.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use telvault_core::{
    traits::{ObjectInfo, ObjectStore},
    Error, Result, StorageOp,
};

const TMP_SUFFIX: &str = ".tmp";

/// Filesystem storage for single-node deployments.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, op: StorageOp, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(Error::storage(op, key, "key is not a relative path"));
        }
        Ok(self.root.join(relative))
    }

    /// Deepest directory that can hold keys starting with `prefix`.
    fn list_root(&self, prefix: &str) -> Result<PathBuf> {
        match prefix.rfind('/') {
            Some(end) if end > 0 => self.path(StorageOp::List, &prefix[..end]),
            _ => Ok(self.root.clone()),
        }
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path(StorageOp::Put, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(StorageOp::Put, key, e))?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| Error::storage(StorageOp::Put, key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::storage(StorageOp::Put, key, e))?;

        tracing::trace!(key = key, size = data.len(), "Stored object on disk");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path(StorageOp::Get, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(StorageOp::Get, key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut pending = vec![self.list_root(prefix)?];

        // Objects may appear or vanish while the walk runs.
        // Anything that vanished between read_dir and stat is skipped.
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage(StorageOp::List, prefix, e)),
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) if e.kind() == ErrorKind::NotFound => break,
                    Err(e) => return Err(Error::storage(StorageOp::List, prefix, e)),
                };
                let path = entry.path();
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(Error::storage(StorageOp::List, prefix, e)),
                };

                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = self.key_of(&path) else {
                    continue;
                };
                if key.ends_with(TMP_SUFFIX) || !key.starts_with(prefix) {
                    continue;
                }
                let last_modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                objects.push(ObjectInfo {
                    key,
                    size_bytes: meta.len(),
                    last_modified,
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(StorageOp::Delete, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(StorageOp::Delete, key, e)),
        }
    }

    fn backend(&self) -> &'static str {
        "filesystem"
    }
}
