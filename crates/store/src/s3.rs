//! S3 implementation of ObjectStore.

use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, Client};
use bytes::Bytes;
use chrono::{DateTime, Utc};

use telvault_core::{
    traits::{ObjectInfo, ObjectStore},
    Error, Result, StorageOp,
};

/// S3 (or S3-compatible) storage for captured telemetry.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store from the ambient AWS configuration.
    ///
    /// `endpoint` targets S3-compatible services such as MinIO and switches to
    /// path-style addressing.
    pub async fn new(bucket: &str, prefix: &str, endpoint: Option<&str>) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        Self::new_with_client(client, bucket, prefix)
    }

    /// Create with custom client (for testing/custom config).
    pub fn new_with_client(client: Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    fn strip_prefix<'a>(&self, full_key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            full_key
        } else {
            full_key
                .strip_prefix(self.prefix.as_str())
                .and_then(|k| k.strip_prefix('/'))
                .unwrap_or(full_key)
        }
    }
}

fn is_not_found(msg: &str) -> bool {
    msg.contains("NoSuchKey") || msg.contains("NotFound") || msg.contains("404")
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Error::storage(StorageOp::Put, key, format!("S3 upload error: {}", e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| {
                        Error::storage(StorageOp::Get, key, format!("S3 body read error: {}", e))
                    })?
                    .into_bytes();
                Ok(Some(data))
            }
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing || is_not_found(&e.to_string()) {
                    Ok(None)
                } else {
                    Err(Error::storage(
                        StorageOp::Get,
                        key,
                        format!("S3 download error: {}", e),
                    ))
                }
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(self.full_key(prefix))
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    Error::storage(StorageOp::List, prefix, format!("S3 list error: {}", e))
                })?;

            for object in output.contents() {
                let Some(full_key) = object.key() else {
                    continue;
                };
                let last_modified = object
                    .last_modified()
                    .and_then(|d| DateTime::<Utc>::from_timestamp(d.secs(), d.subsec_nanos()))
                    .unwrap_or_else(Utc::now);
                objects.push(ObjectInfo {
                    key: self.strip_prefix(full_key).to_string(),
                    size_bytes: object.size().unwrap_or(0).max(0) as u64,
                    last_modified,
                });
            }

            match (output.is_truncated(), output.next_continuation_token()) {
                (Some(true), Some(token)) => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| {
                Error::storage(StorageOp::Delete, key, format!("S3 delete error: {}", e))
            })?;

        Ok(())
    }

    fn backend(&self) -> &'static str {
        "s3"
    }
}
