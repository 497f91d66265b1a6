//! Object storage for Telvault.
//!
//! This crate provides the storage backends (memory, filesystem, S3), the
//! record codec and the session registry shared by the capture, replay and
//! retention engines.

pub mod codec;
pub mod fs;
pub mod memory;
pub mod registry;
pub mod s3;

use std::sync::Arc;

use telvault_core::{config::StorageBackend, config::StorageConfig, traits::ObjectStore, Result};

pub use codec::{PreparedRecord, Record};
pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;
pub use registry::{SessionEntry, SessionRegistry};
pub use s3::S3ObjectStore;

/// Build the object store selected by configuration.
pub async fn build_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StorageBackend::Memory => Arc::new(InMemoryObjectStore::new()),
        StorageBackend::Filesystem => Arc::new(FsObjectStore::new(&config.root_dir)),
        StorageBackend::S3 => {
            let bucket = config.s3_bucket.as_deref().ok_or_else(|| {
                telvault_core::Error::invalid_request("storage.s3_bucket is required for s3")
            })?;
            Arc::new(
                S3ObjectStore::new(bucket, &config.s3_prefix, config.s3_endpoint.as_deref()).await,
            )
        }
    };
    tracing::info!(backend = store.backend(), "Object store ready");
    Ok(store)
}
