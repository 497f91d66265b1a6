//! Capture service: session lifecycle and per-record ingestion.

use bytes::Bytes;
use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use telvault_core::{
    config::ContinuousCaptureConfig, keys, CaptureConfig, CaptureRef, CaptureSession, Error,
    ObjectInfo, Result, SessionStatus, SignalType,
};
use telvault_observability::{track_capture, CapturePath};
use telvault_store::{PreparedRecord, SessionEntry, SessionRegistry};

/// Session id reported by errors of the continuous capture path.
pub const CONTINUOUS_SESSION_ID: &str = "continuous";

/// Records OTLP payloads into capture sessions and the continuous region.
pub struct CaptureService {
    registry: Arc<SessionRegistry>,
    continuous: RwLock<ContinuousCaptureConfig>,
}

impl CaptureService {
    /// Create a new capture service over a session registry.
    pub fn new(registry: Arc<SessionRegistry>, continuous: ContinuousCaptureConfig) -> Self {
        Self {
            registry,
            continuous: RwLock::new(continuous),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Replace the continuous capture flags (config reload).
    pub async fn set_continuous_config(&self, config: ContinuousCaptureConfig) {
        *self.continuous.write().await = config;
    }

    /// Open a new capture session.
    pub async fn start_capture(&self, config: CaptureConfig) -> Result<CaptureSession> {
        keys::validate_session_id(&config.session_id)?;
        let _lifecycle = self.registry.lifecycle_lock(&config.session_id).await;

        if let Some(existing) = self.registry.get(&config.session_id).await? {
            let session_id = config.session_id.clone();
            return Err(if existing.is_active() {
                Error::SessionAlreadyActive { session_id }
            } else {
                Error::SessionAlreadyExists { session_id }
            });
        }

        let session = CaptureSession::from_config(&config, Utc::now());
        self.registry.insert(session.clone()).await?;

        tracing::info!(
            session_id = %session.session_id,
            traces = session.capture_traces,
            metrics = session.capture_metrics,
            logs = session.capture_logs,
            compression = session.compression_enabled,
            "Capture session started"
        );
        Ok(session)
    }

    /// Persist one OTLP payload as the next record of a session signal.
    pub async fn capture_otlp_data(
        &self,
        session_id: &str,
        raw: Bytes,
        signal: SignalType,
    ) -> Result<CaptureRef> {
        let entry = self.active_entry(session_id).await?;

        let compressed = {
            let session = entry.state().read().await;
            if !session.is_active() {
                return Err(Error::session_not_found(session_id));
            }
            if !session.captures(signal) {
                return Err(Error::SignalDisabled {
                    session_id: session_id.to_string(),
                    signal_type: signal,
                });
            }
            session.compression_enabled
        };

        let prepared = PreparedRecord::new(&raw, compressed)?;

        let mut next_sequence = entry.lane(signal).await;
        // Stop takes every lane before flipping the status, so this check is final.
        if !entry.state().read().await.is_active() {
            return Err(Error::session_not_found(session_id));
        }

        let sequence = *next_sequence;
        let storage_key = keys::record_key(session_id, signal, sequence, compressed);
        // Frames carry millisecond timestamps.
        let captured_at = Utc::now().trunc_subsecs(3);
        let frame = prepared.frame(captured_at);
        let size_bytes = frame.len() as u64;

        if let Err(e) = self.registry.store().put(&storage_key, frame).await {
            tracing::warn!(
                session_id = session_id,
                signal = %signal,
                sequence = sequence,
                error = %e,
                "Record write failed; sequence left unallocated"
            );
            return Err(e);
        }

        *next_sequence += 1;
        entry
            .state()
            .write()
            .await
            .set_captured(signal, *next_sequence);
        drop(next_sequence);

        track_capture(CapturePath::Session, signal, size_bytes);
        tracing::debug!(
            session_id = session_id,
            signal = %signal,
            sequence = sequence,
            raw_bytes = prepared.raw_len(),
            stored_bytes = size_bytes,
            "Captured record"
        );

        Ok(CaptureRef {
            session_id: session_id.to_string(),
            signal_type: signal,
            sequence,
            storage_key,
            size_bytes,
            compressed,
            captured_at,
        })
    }

    /// Close a session once in-flight captures have landed.
    pub async fn stop_capture(&self, session_id: &str) -> Result<CaptureSession> {
        let session = self
            .finish(session_id, SessionStatus::Completed, None)
            .await?;
        tracing::info!(
            session_id = session_id,
            traces = session.captured_traces,
            metrics = session.captured_metrics,
            logs = session.captured_logs,
            "Capture session completed"
        );
        Ok(session)
    }

    /// Close a session as failed, recording why.
    pub async fn abort_capture(&self, session_id: &str, reason: &str) -> Result<CaptureSession> {
        let session = self
            .finish(session_id, SessionStatus::Failed, Some(reason.to_string()))
            .await?;
        tracing::warn!(session_id = session_id, reason = reason, "Capture session aborted");
        Ok(session)
    }

    /// Current metadata of a session.
    pub async fn get_capture_status(&self, session_id: &str) -> Result<CaptureSession> {
        self.registry
            .get(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    /// All known sessions, oldest first.
    pub async fn list_capture_sessions(&self) -> Vec<CaptureSession> {
        let mut sessions = self.registry.list().await;
        sessions.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    /// Write a payload to the always-on `continuous/` region.
    pub async fn capture_continuous(&self, raw: Bytes, signal: SignalType) -> Result<ObjectInfo> {
        let config = self.continuous.read().await.clone();
        if !config.captures(signal) {
            return Err(Error::SignalDisabled {
                session_id: CONTINUOUS_SESSION_ID.to_string(),
                signal_type: signal,
            });
        }

        let prepared = PreparedRecord::new(&raw, config.compression_enabled)?;
        let captured_at = Utc::now().trunc_subsecs(3);
        let key = keys::continuous_key(
            captured_at,
            signal,
            &Uuid::new_v4().to_string(),
            prepared.compressed(),
        );
        let frame = prepared.frame(captured_at);
        let size_bytes = frame.len() as u64;

        self.registry.store().put(&key, frame).await?;
        track_capture(CapturePath::Continuous, signal, size_bytes);
        tracing::trace!(key = %key, stored_bytes = size_bytes, "Captured continuous record");

        Ok(ObjectInfo {
            key,
            size_bytes,
            last_modified: captured_at,
        })
    }

    async fn active_entry(&self, session_id: &str) -> Result<Arc<SessionEntry>> {
        self.registry
            .entry(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    async fn finish(
        &self,
        session_id: &str,
        status: SessionStatus,
        error: Option<String>,
    ) -> Result<CaptureSession> {
        let _lifecycle = self.registry.lifecycle_lock(session_id).await;
        let entry = self.active_entry(session_id).await?;

        // Lock order: signal lanes first, then state, same as capture.
        let lanes = entry.all_lanes().await;
        let mut session = entry.state().write().await;
        if !session.is_active() {
            return Err(Error::session_not_found(session_id));
        }

        let mut finished = session.clone();
        for signal in SignalType::ALL {
            finished.set_captured(signal, *lanes[signal.index()]);
        }
        finished.status = status;
        finished.end_time = Some(Utc::now());
        finished.error = error;

        self.registry.persist(&finished).await?;
        *session = finished.clone();
        Ok(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telvault_core::{ObjectStore, StorageOp};
    use telvault_store::{codec, InMemoryObjectStore};

    fn service() -> (CaptureService, Arc<InMemoryObjectStore>) {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        (
            CaptureService::new(registry, ContinuousCaptureConfig::default()),
            store,
        )
    }

    fn traces_only(id: &str) -> CaptureConfig {
        CaptureConfig::new(id).with_signal(SignalType::Traces)
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (service, _) = service();
        service.start_capture(traces_only("s1")).await.unwrap();

        let err = service.start_capture(traces_only("s1")).await.unwrap_err();
        assert!(matches!(err, Error::SessionAlreadyActive { ref session_id } if session_id == "s1"));
    }

    #[tokio::test]
    async fn test_restart_of_finished_session_is_rejected() {
        let (service, _) = service();
        service.start_capture(traces_only("s1")).await.unwrap();
        service.stop_capture("s1").await.unwrap();

        let err = service.start_capture(traces_only("s1")).await.unwrap_err();
        assert!(matches!(err, Error::SessionAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_capture_writes_sequenced_records() {
        let (service, store) = service();
        service.start_capture(traces_only("s1")).await.unwrap();

        let first = service
            .capture_otlp_data("s1", Bytes::from_static(b"span-a"), SignalType::Traces)
            .await
            .unwrap();
        let second = service
            .capture_otlp_data("s1", Bytes::from_static(b"span-b"), SignalType::Traces)
            .await
            .unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.storage_key, "sessions/s1/traces/1.bin.gz");
        assert!(second.compressed);

        let stored = store.get(&second.storage_key).await.unwrap().unwrap();
        assert_eq!(stored.len() as u64, second.size_bytes);
        let record = codec::decode(&stored).unwrap();
        assert_eq!(record.payload, Bytes::from_static(b"span-b"));
        assert_eq!(record.captured_at, second.captured_at);
    }

    #[tokio::test]
    async fn test_capture_rejections() {
        let (service, _) = service();
        let err = service
            .capture_otlp_data("missing", Bytes::new(), SignalType::Traces)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));

        service.start_capture(traces_only("s1")).await.unwrap();
        let err = service
            .capture_otlp_data("s1", Bytes::new(), SignalType::Logs)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SignalDisabled {
                signal_type: SignalType::Logs,
                ..
            }
        ));

        service.stop_capture("s1").await.unwrap();
        let err = service
            .capture_otlp_data("s1", Bytes::new(), SignalType::Traces)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_stop_persists_final_metadata() {
        let (service, store) = service();
        service
            .start_capture(traces_only("s1").with_signal(SignalType::Metrics))
            .await
            .unwrap();
        for _ in 0..3 {
            service
                .capture_otlp_data("s1", Bytes::from_static(b"m"), SignalType::Metrics)
                .await
                .unwrap();
        }

        let stopped = service.stop_capture("s1").await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Completed);
        assert_eq!(stopped.captured_metrics, 3);
        assert_eq!(stopped.captured_traces, 0);
        assert!(stopped.end_time.is_some());

        let reloaded = SessionRegistry::load(store).await.unwrap();
        assert_eq!(reloaded.get("s1").await.unwrap(), Some(stopped));

        let err = service.stop_capture("s1").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_abort_records_reason() {
        let (service, _) = service();
        service.start_capture(traces_only("s1")).await.unwrap();

        let aborted = service.abort_capture("s1", "collector crashed").await.unwrap();
        assert_eq!(aborted.status, SessionStatus::Failed);
        assert_eq!(aborted.error.as_deref(), Some("collector crashed"));
        assert_eq!(
            service.get_capture_status("s1").await.unwrap().status,
            SessionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_failed_put_leaves_no_gap() {
        let inner = Arc::new(InMemoryObjectStore::new());
        let flaky = Arc::new(telvault_core::mocks::FlakyObjectStore::new(inner.clone()));
        let registry = Arc::new(SessionRegistry::new(flaky.clone()));
        let service = CaptureService::new(registry, ContinuousCaptureConfig::default());
        service.start_capture(traces_only("s1")).await.unwrap();

        service
            .capture_otlp_data("s1", Bytes::from_static(b"a"), SignalType::Traces)
            .await
            .unwrap();
        flaky.fail_next_puts(1);
        let err = service
            .capture_otlp_data("s1", Bytes::from_static(b"b"), SignalType::Traces)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { op: StorageOp::Put, .. }));

        let retried = service
            .capture_otlp_data("s1", Bytes::from_static(b"b"), SignalType::Traces)
            .await
            .unwrap();
        assert_eq!(retried.sequence, 1);

        let stopped = service.stop_capture("s1").await.unwrap();
        assert_eq!(stopped.captured_traces, 2);
        let keys: Vec<String> = inner
            .list("sessions/s1/traces/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(
            keys,
            vec!["sessions/s1/traces/0.bin.gz", "sessions/s1/traces/1.bin.gz"]
        );
    }

    #[tokio::test]
    async fn test_list_sessions_ordered_by_start() {
        let (service, _) = service();
        service.start_capture(traces_only("b")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        service.start_capture(traces_only("a")).await.unwrap();
        service.stop_capture("b").await.unwrap();

        let ids: Vec<String> = service
            .list_capture_sessions()
            .await
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_continuous_capture_is_gated() {
        let (service, store) = service();
        let err = service
            .capture_continuous(Bytes::from_static(b"x"), SignalType::Logs)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SignalDisabled { ref session_id, .. } if session_id == CONTINUOUS_SESSION_ID));

        service
            .set_continuous_config(ContinuousCaptureConfig {
                enabled: true,
                ..ContinuousCaptureConfig::default()
            })
            .await;
        let written = service
            .capture_continuous(Bytes::from_static(b"x"), SignalType::Logs)
            .await
            .unwrap();
        assert!(written.key.starts_with("continuous/"));
        assert!(written.key.contains("/logs/"));
        assert!(written.key.ends_with(".bin.gz"));
        assert_eq!(store.len(), 1);
    }
}
