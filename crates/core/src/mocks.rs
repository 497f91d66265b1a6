//! Mock implementations of core traits for testing.
//!
//! These are shared by the unit and integration tests of every engine crate.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    traits::{ObjectInfo, ObjectStore, ReplaySink},
    types::SignalType,
    Error, Result, StorageOp,
};

// =============================================================================
// Mock Replay Sinks
// =============================================================================

/// A record delivered to a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedRecord {
    pub signal: SignalType,
    pub payload: Bytes,
    pub target_timestamp: DateTime<Utc>,
}

/// Sink that keeps every forwarded record in memory.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<ForwardedRecord>>,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every `forward` call to emulate a slow receiver.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    /// Snapshot of delivered records, in delivery order.
    pub fn records(&self) -> Vec<ForwardedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReplaySink for RecordingSink {
    async fn forward(
        &self,
        signal: SignalType,
        payload: Bytes,
        target_timestamp: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.records.lock().unwrap().push(ForwardedRecord {
            signal,
            payload,
            target_timestamp,
        });
        Ok(())
    }
}

/// Sink that accepts a fixed number of records and then fails every call.
pub struct FailingSink {
    accept: usize,
    calls: AtomicUsize,
}

impl FailingSink {
    pub fn after(accept: usize) -> Self {
        Self {
            accept,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `forward` calls seen, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplaySink for FailingSink {
    async fn forward(
        &self,
        _signal: SignalType,
        _payload: Bytes,
        _target_timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.accept {
            Ok(())
        } else {
            Err(Error::internal("sink unavailable"))
        }
    }
}

// =============================================================================
// Fault-injecting Object Store
// =============================================================================

/// Wraps a store and fails or slows down selected operations.
pub struct FlakyObjectStore {
    inner: Arc<dyn ObjectStore>,
    fail_keys: Mutex<Vec<(StorageOp, String)>>,
    failing_puts: AtomicUsize,
    slow_puts: Mutex<Vec<(String, Duration)>>,
}

impl FlakyObjectStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            fail_keys: Mutex::new(Vec::new()),
            failing_puts: AtomicUsize::new(0),
            slow_puts: Mutex::new(Vec::new()),
        }
    }

    /// Fail every `op` on keys containing `pattern`.
    pub fn fail_on(&self, op: StorageOp, pattern: impl Into<String>) {
        self.fail_keys.lock().unwrap().push((op, pattern.into()));
    }

    /// Fail the next `count` puts regardless of key.
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Hold every put on keys containing `pattern` for `delay` after the
    /// inner write completed.
    pub fn delay_puts(&self, pattern: impl Into<String>, delay: Duration) {
        self.slow_puts.lock().unwrap().push((pattern.into(), delay));
    }

    /// Remove every configured fault.
    pub fn heal(&self) {
        self.fail_keys.lock().unwrap().clear();
        self.failing_puts.store(0, Ordering::SeqCst);
        self.slow_puts.lock().unwrap().clear();
    }

    fn put_delay(&self, key: &str) -> Option<Duration> {
        self.slow_puts
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| key.contains(pattern.as_str()))
            .map(|(_, delay)| *delay)
    }

    fn check(&self, op: StorageOp, key: &str) -> Result<()> {
        let injected = self
            .fail_keys
            .lock()
            .unwrap()
            .iter()
            .any(|(o, pattern)| *o == op && key.contains(pattern.as_str()));
        if injected {
            return Err(Error::storage(op, key, "injected fault"));
        }
        if op == StorageOp::Put {
            let consumed = self
                .failing_puts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if consumed {
                return Err(Error::storage(op, key, "injected fault"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.check(StorageOp::Put, key)?;
        self.inner.put(key, data).await?;
        if let Some(delay) = self.put_delay(key) {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check(StorageOp::Get, key)?;
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        self.check(StorageOp::List, prefix)?;
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(StorageOp::Delete, key)?;
        self.inner.delete(key).await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}
