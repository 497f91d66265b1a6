//! Retention manager: usage accounting, cleanup and archival.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use telvault_core::{
    keys::{self, SessionObject},
    CaptureSession, CleanupResult, Error, ObjectInfo, PathUsage, Result, SessionRetention,
    StorageUsageMetrics,
};
use telvault_observability::track_retention_sweep;
use telvault_store::SessionRegistry;

/// Applies the retention policy to the object store.
pub struct RetentionManager {
    registry: Arc<SessionRegistry>,
}

impl RetentionManager {
    /// Create a new retention manager.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Object counts and bytes of the continuous and session regions.
    pub async fn get_storage_usage(&self) -> Result<StorageUsageMetrics> {
        let store = self.registry.store();
        let continuous_path = usage(&store.list(keys::CONTINUOUS_PREFIX).await?);
        let sessions_path = usage(&store.list(keys::SESSIONS_PREFIX).await?);

        Ok(StorageUsageMetrics {
            total_size_bytes: continuous_path.total_size_bytes + sessions_path.total_size_bytes,
            continuous_path,
            sessions_path,
        })
    }

    /// Apply the session policy to one session: delete it once past its
    /// retention bound, or archive it once past `archive_after_days`.
    ///
    /// Active sessions and disabled cleanup are no-ops.
    pub async fn manage_session_data(
        &self,
        session_id: &str,
        policy: &SessionRetention,
    ) -> Result<CleanupResult> {
        let started = Instant::now();
        let mut result = CleanupResult::default();
        if !policy.cleanup_enabled {
            result.duration = started.elapsed();
            return Ok(result);
        }

        let session = self
            .registry
            .get(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))?;
        if session.is_active() {
            result.duration = started.elapsed();
            return Ok(result);
        }

        let now = Utc::now();
        let age = now - session.age_reference();
        let retention_days = policy.effective_retention_days(session.retention_days);

        if age >= ChronoDuration::days(i64::from(retention_days)) {
            self.delete_session(&session, &mut result).await;
        } else if let Some(archive_after) = policy.archive_after_days {
            if session.archived_at.is_none()
                && age >= ChronoDuration::days(i64::from(archive_after))
            {
                self.archive_session(session_id, &mut result).await;
            }
        }

        result.duration = started.elapsed();
        Ok(result)
    }

    /// Apply the session policy to every known session.
    pub async fn sweep_sessions(&self, policy: &SessionRetention) -> CleanupResult {
        let started = Instant::now();
        let mut result = CleanupResult::default();

        for session in self.registry.list().await {
            if session.is_active() {
                continue;
            }
            match self.manage_session_data(&session.session_id, policy).await {
                Ok(outcome) => result.merge(outcome),
                Err(e) => result.record_error(keys::session_prefix(&session.session_id), e),
            }
        }

        result.duration = started.elapsed();
        track_retention_sweep("sessions", &result);
        log_sweep("sessions", &result);
        result
    }

    /// Delete `continuous/` objects older than `older_than_days`.
    ///
    /// An object is aged by the date in its key; keys without one fall back
    /// to the store's modification time.
    pub async fn cleanup_continuous_data(&self, older_than_days: u32) -> CleanupResult {
        let started = Instant::now();
        let mut result = CleanupResult::default();
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(older_than_days));

        let store = self.registry.store();
        match store.list(keys::CONTINUOUS_PREFIX).await {
            Ok(objects) => {
                for object in objects {
                    if !continuous_expired(&object, cutoff) {
                        continue;
                    }
                    match store.delete(&object.key).await {
                        Ok(()) => {
                            result.record_removed(object.size_bytes);
                            push_path(&mut result, parent_prefix(&object.key));
                        }
                        Err(e) => result.record_error(&object.key, e),
                    }
                }
            }
            Err(e) => result.record_error(keys::CONTINUOUS_PREFIX, e),
        }

        result.duration = started.elapsed();
        track_retention_sweep("continuous", &result);
        log_sweep("continuous", &result);
        result
    }

    /// Move the data objects of sessions older than `older_than_days` to the
    /// archive tier. Active sessions are never touched and `metadata.json`
    /// stays in place.
    pub async fn archive_old_sessions(&self, older_than_days: u32) -> CleanupResult {
        let started = Instant::now();
        let mut result = CleanupResult::default();
        let bound = ChronoDuration::days(i64::from(older_than_days));
        let now = Utc::now();

        let objects = match self.registry.store().list(keys::SESSIONS_PREFIX).await {
            Ok(objects) => objects,
            Err(e) => {
                result.record_error(keys::SESSIONS_PREFIX, e);
                result.duration = started.elapsed();
                return result;
            }
        };

        let mut groups: BTreeMap<String, Vec<ObjectInfo>> = BTreeMap::new();
        for object in objects {
            let Some((session_id, _)) = keys::parse_session_key(&object.key) else {
                continue;
            };
            groups.entry(session_id.to_string()).or_default().push(object);
        }

        for (session_id, objects) in groups {
            let session = match self.registry.get(&session_id).await {
                Ok(session) => session,
                Err(e) => {
                    result.record_error(keys::metadata_key(&session_id), e);
                    continue;
                }
            };
            let reference = match &session {
                Some(session) if session.is_active() => continue,
                Some(session) => session.age_reference(),
                None => match objects.iter().map(|o| o.last_modified).max() {
                    Some(latest) => latest,
                    None => continue,
                },
            };
            if now - reference < bound {
                continue;
            }

            let data: Vec<ObjectInfo> = objects
                .into_iter()
                .filter(|o| !is_metadata(&o.key))
                .collect();
            if data.is_empty() {
                continue;
            }

            let clean = self.move_to_archive(&data, &mut result).await;
            push_path(&mut result, keys::session_prefix(&session_id));
            if clean && session.is_some() {
                self.stamp_archived(&session_id, &mut result).await;
            }
        }

        result.duration = started.elapsed();
        track_retention_sweep("archive", &result);
        log_sweep("archive", &result);
        result
    }

    async fn delete_session(&self, session: &CaptureSession, result: &mut CleanupResult) {
        let store = self.registry.store();
        let session_id = session.session_id.as_str();

        let mut objects = Vec::new();
        for prefix in [
            keys::session_prefix(session_id),
            keys::archived_session_prefix(session_id),
        ] {
            match store.list(&prefix).await {
                Ok(listed) => objects.extend(listed),
                Err(e) => {
                    result.record_error(prefix, e);
                    return;
                }
            }
        }

        // Metadata goes last so a partial failure is retried by the next sweep.
        let metadata_key = keys::metadata_key(session_id);
        let (metadata, data): (Vec<ObjectInfo>, Vec<ObjectInfo>) =
            objects.into_iter().partition(|o| o.key == metadata_key);

        let errors_before = result.errors.len();
        for object in data.iter().chain(metadata.iter()) {
            if object.key == metadata_key && result.errors.len() > errors_before {
                break;
            }
            match store.delete(&object.key).await {
                Ok(()) => result.record_removed(object.size_bytes),
                Err(e) => result.record_error(&object.key, e),
            }
        }

        push_path(result, keys::session_prefix(session_id));
        if result.errors.len() == errors_before {
            self.registry.forget(session_id);
            tracing::info!(session_id = session_id, "Session expired and deleted");
        }
    }

    async fn archive_session(&self, session_id: &str, result: &mut CleanupResult) {
        let objects = match self
            .registry
            .store()
            .list(&keys::session_prefix(session_id))
            .await
        {
            Ok(objects) => objects,
            Err(e) => {
                result.record_error(keys::session_prefix(session_id), e);
                return;
            }
        };
        let data: Vec<ObjectInfo> = objects
            .into_iter()
            .filter(|o| !is_metadata(&o.key))
            .collect();

        let clean = self.move_to_archive(&data, result).await;
        push_path(result, keys::session_prefix(session_id));
        if clean {
            self.stamp_archived(session_id, result).await;
            tracing::info!(session_id = session_id, objects = data.len(), "Session archived");
        }
    }

    /// Copy each object to `archive/` and delete the live copy. Returns
    /// whether every object moved.
    async fn move_to_archive(&self, objects: &[ObjectInfo], result: &mut CleanupResult) -> bool {
        let store = self.registry.store();
        let mut clean = true;

        for object in objects {
            let moved = async {
                let Some(data) = store.get(&object.key).await? else {
                    return Ok(false);
                };
                store.put(&keys::archive_key(&object.key), data).await?;
                store.delete(&object.key).await?;
                Ok::<bool, Error>(true)
            }
            .await;

            match moved {
                Ok(true) => result.record_removed(object.size_bytes),
                Ok(false) => {}
                Err(e) => {
                    clean = false;
                    result.record_error(&object.key, e);
                }
            }
        }
        clean
    }

    async fn stamp_archived(&self, session_id: &str, result: &mut CleanupResult) {
        let archived_at = Utc::now();
        if let Err(e) = self
            .registry
            .update(session_id, |session| session.archived_at = Some(archived_at))
            .await
        {
            result.record_error(keys::metadata_key(session_id), e);
        }
    }
}

fn usage(objects: &[ObjectInfo]) -> PathUsage {
    PathUsage {
        total_objects: objects.len() as u64,
        total_size_bytes: objects.iter().map(|o| o.size_bytes).sum(),
    }
}

/// Whether a continuous object is past the cutoff. A key date counts as
/// expired only once the whole day lies before the cutoff.
fn continuous_expired(object: &ObjectInfo, cutoff: DateTime<Utc>) -> bool {
    match keys::continuous_date(&object.key) {
        Some(date) => match date.succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(end_of_day) => end_of_day.and_utc() <= cutoff,
            None => false,
        },
        None => object.last_modified <= cutoff,
    }
}

fn is_metadata(key: &str) -> bool {
    matches!(
        keys::parse_session_key(key),
        Some((_, SessionObject::Metadata))
    )
}

fn parent_prefix(key: &str) -> String {
    match key.rfind('/') {
        Some(i) => key[..=i].to_string(),
        None => key.to_string(),
    }
}

fn push_path(result: &mut CleanupResult, path: String) {
    if !result.processed_paths.contains(&path) {
        result.processed_paths.push(path);
    }
}

fn log_sweep(job: &'static str, result: &CleanupResult) {
    if result.is_clean() {
        tracing::info!(
            job = job,
            deleted_objects = result.deleted_objects,
            freed_bytes = result.freed_space_bytes,
            duration_ms = result.duration.as_millis() as u64,
            "Retention sweep finished"
        );
    } else {
        tracing::warn!(
            job = job,
            deleted_objects = result.deleted_objects,
            freed_bytes = result.freed_space_bytes,
            errors = result.errors.len(),
            "Retention sweep finished with errors"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use telvault_core::mocks::FlakyObjectStore;
    use telvault_core::{CaptureConfig, ObjectStore, SessionStatus, SignalType, StorageOp};
    use telvault_store::InMemoryObjectStore;

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::days(days)
    }

    /// Persist a finished session with `records` trace records.
    async fn finished_session(
        registry: &SessionRegistry,
        id: &str,
        ended: DateTime<Utc>,
        records: u64,
    ) {
        let mut session = CaptureSession::from_config(
            &CaptureConfig::new(id).with_signal(SignalType::Traces),
            ended - ChronoDuration::hours(1),
        );
        for seq in 0..records {
            registry
                .store()
                .put(
                    &keys::record_key(id, SignalType::Traces, seq, true),
                    Bytes::from_static(b"record"),
                )
                .await
                .unwrap();
        }
        session.captured_traces = records;
        session.status = SessionStatus::Completed;
        session.end_time = Some(ended);
        registry.insert(session).await.unwrap();
    }

    fn policy() -> SessionRetention {
        SessionRetention {
            default_retention_days: 30,
            max_retention_days: 90,
            archive_after_days: Some(7),
            cleanup_enabled: true,
            sweep_interval_minutes: 60,
        }
    }

    #[tokio::test]
    async fn test_storage_usage() {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        finished_session(&registry, "s1", Utc::now(), 2).await;
        store
            .put("continuous/2024-01-01/logs/000000000-a.bin", Bytes::from_static(b"1234"))
            .await
            .unwrap();

        let usage = RetentionManager::new(registry).get_storage_usage().await.unwrap();
        assert_eq!(usage.continuous_path.total_objects, 1);
        assert_eq!(usage.continuous_path.total_size_bytes, 4);
        assert_eq!(usage.sessions_path.total_objects, 3);
        assert_eq!(
            usage.total_size_bytes,
            usage.continuous_path.total_size_bytes + usage.sessions_path.total_size_bytes
        );
    }

    #[tokio::test]
    async fn test_continuous_cleanup_is_idempotent() {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        let old = days_ago(10);
        let fresh = Utc::now();
        for (at, id) in [(old, "a"), (old, "b"), (fresh, "c")] {
            let key = keys::continuous_key(at, SignalType::Metrics, id, false);
            store.put(&key, Bytes::from_static(b"xyz")).await.unwrap();
        }
        // No date segment: aged by modification time.
        store.put_at("continuous/legacy.bin", Bytes::from_static(b"zz"), days_ago(30));

        let manager = RetentionManager::new(registry);
        let first = manager.cleanup_continuous_data(7).await;
        assert_eq!(first.deleted_objects, 3);
        assert_eq!(first.freed_space_bytes, 8);
        assert!(first.is_clean());
        assert_eq!(store.len(), 1);

        let second = manager.cleanup_continuous_data(7).await;
        assert_eq!(second.deleted_objects, 0);
        assert_eq!(second.freed_space_bytes, 0);
    }

    #[tokio::test]
    async fn test_continuous_cleanup_collects_errors() {
        let inner = Arc::new(InMemoryObjectStore::new());
        let flaky = Arc::new(FlakyObjectStore::new(inner.clone()));
        let registry = Arc::new(SessionRegistry::new(flaky.clone()));
        let old = days_ago(10);
        for id in ["keep-going", "stuck"] {
            let key = keys::continuous_key(old, SignalType::Logs, id, true);
            inner.put(&key, Bytes::from_static(b"x")).await.unwrap();
        }
        flaky.fail_on(StorageOp::Delete, "stuck");

        let result = RetentionManager::new(registry).cleanup_continuous_data(1).await;
        assert_eq!(result.deleted_objects, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].key.contains("stuck"));
    }

    #[tokio::test]
    async fn test_archive_skips_active_sessions() {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));

        let mut active = CaptureSession::from_config(
            &CaptureConfig::new("live").with_signal(SignalType::Traces),
            days_ago(100),
        );
        active.captured_traces = 1;
        registry.insert(active).await.unwrap();
        store
            .put(&keys::record_key("live", SignalType::Traces, 0, true), Bytes::from_static(b"r"))
            .await
            .unwrap();
        finished_session(&registry, "old", days_ago(20), 2).await;
        finished_session(&registry, "new", days_ago(1), 1).await;

        let manager = RetentionManager::new(registry.clone());
        let result = manager.archive_old_sessions(14).await;
        assert!(result.is_clean());
        assert_eq!(result.deleted_objects, 2);
        assert_eq!(result.processed_paths, vec!["sessions/old/"]);

        assert!(store.get("sessions/live/traces/0.bin.gz").await.unwrap().is_some());
        assert!(store.get("sessions/old/metadata.json").await.unwrap().is_some());
        assert!(store
            .get("archive/sessions/old/traces/1.bin.gz")
            .await
            .unwrap()
            .is_some());
        assert!(registry.get("old").await.unwrap().unwrap().archived_at.is_some());

        let again = manager.archive_old_sessions(14).await;
        assert_eq!(again.deleted_objects, 0);
    }

    #[tokio::test]
    async fn test_archive_ages_orphans_by_modification_time() {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        store.put_at(
            "sessions/orphan/logs/0.bin",
            Bytes::from_static(b"o"),
            days_ago(30),
        );
        store
            .put("sessions/recent-orphan/logs/0.bin", Bytes::from_static(b"o"))
            .await
            .unwrap();

        let result = RetentionManager::new(registry).archive_old_sessions(14).await;
        assert_eq!(result.deleted_objects, 1);
        assert!(store.get("archive/sessions/orphan/logs/0.bin").await.unwrap().is_some());
        assert!(store.get("sessions/recent-orphan/logs/0.bin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_manage_session_deletes_expired() {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        finished_session(&registry, "s1", days_ago(40), 2).await;
        store
            .put("archive/sessions/s1/traces/9.bin.gz", Bytes::from_static(b"a"))
            .await
            .unwrap();

        let manager = RetentionManager::new(registry.clone());
        let result = manager.manage_session_data("s1", &policy()).await.unwrap();
        assert!(result.is_clean());
        assert_eq!(result.deleted_objects, 4);
        assert!(store.is_empty());
        assert!(registry.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manage_session_archives_before_deletion() {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        finished_session(&registry, "s1", days_ago(10), 2).await;

        let manager = RetentionManager::new(registry.clone());
        let result = manager.manage_session_data("s1", &policy()).await.unwrap();
        assert_eq!(result.deleted_objects, 2);
        assert!(store.list("sessions/s1/traces/").await.unwrap().is_empty());
        assert_eq!(store.list("archive/sessions/s1/").await.unwrap().len(), 2);
        assert!(registry.get("s1").await.unwrap().unwrap().archived_at.is_some());

        // Already archived: nothing left to do until the retention bound.
        let again = manager.manage_session_data("s1", &policy()).await.unwrap();
        assert_eq!(again.deleted_objects, 0);
    }

    #[tokio::test]
    async fn test_manage_session_respects_override_and_switches() {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        finished_session(&registry, "s1", days_ago(3), 1).await;
        registry
            .update("s1", |s| s.retention_days = Some(2))
            .await
            .unwrap();

        let manager = RetentionManager::new(registry.clone());
        let disabled = SessionRetention {
            cleanup_enabled: false,
            ..policy()
        };
        let result = manager.manage_session_data("s1", &disabled).await.unwrap();
        assert_eq!(result.deleted_objects, 0);

        let result = manager.manage_session_data("s1", &policy()).await.unwrap();
        assert_eq!(result.deleted_objects, 2);
        assert!(registry.get("s1").await.unwrap().is_none());

        let err = manager.manage_session_data("s1", &policy()).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_manage_session_never_touches_active() {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        let active = CaptureSession::from_config(&CaptureConfig::new("live"), days_ago(365));
        registry.insert(active).await.unwrap();

        let result = RetentionManager::new(registry.clone())
            .manage_session_data("live", &policy())
            .await
            .unwrap();
        assert_eq!(result.deleted_objects, 0);
        assert_eq!(store.len(), 1);
    }
}
