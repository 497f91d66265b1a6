//! Session registry: an in-process cache over `sessions/<id>/metadata.json`.
//!
//! The metadata object in the store is the source of truth. The registry adds
//! the locks that keep per-signal sequence numbers dense:
//! - Lifecycle lane: serializes start/stop/abort per session ID.
//! - Signal lanes: one per signal, guarding the next sequence number.

use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard, RwLock};

use telvault_core::{
    keys::{self, SessionObject},
    traits::ObjectStore,
    CaptureSession, Error, Result, SessionStatus, SignalType,
};

/// Cached state of one session.
#[derive(Debug)]
pub struct SessionEntry {
    state: RwLock<CaptureSession>,
    /// Next sequence number per signal, indexed by [`SignalType::index`].
    lanes: [Mutex<u64>; 3],
}

impl SessionEntry {
    fn new(session: CaptureSession) -> Self {
        let lanes = SignalType::ALL.map(|signal| Mutex::new(session.captured(signal)));
        Self {
            state: RwLock::new(session),
            lanes,
        }
    }

    /// Current metadata.
    pub async fn snapshot(&self) -> CaptureSession {
        self.state.read().await.clone()
    }

    pub fn state(&self) -> &RwLock<CaptureSession> {
        &self.state
    }

    /// Acquire the sequence lane of a signal. The guarded value is the next
    /// sequence number to assign.
    pub async fn lane(&self, signal: SignalType) -> MutexGuard<'_, u64> {
        self.lanes[signal.index()].lock().await
    }

    /// Acquire every signal lane, in a fixed order.
    pub async fn all_lanes(&self) -> Vec<MutexGuard<'_, u64>> {
        let mut guards = Vec::with_capacity(self.lanes.len());
        for signal in SignalType::ALL {
            guards.push(self.lane(signal).await);
        }
        guards
    }
}

/// Registry of capture sessions backed by the object store.
pub struct SessionRegistry {
    store: Arc<dyn ObjectStore>,
    sessions: DashMap<String, Arc<SessionEntry>>,
    lifecycle_lanes: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
            lifecycle_lanes: DashMap::new(),
        }
    }

    /// Rebuild the registry from the metadata persisted in the store.
    ///
    /// Unreadable metadata is skipped. Counters of sessions that were still
    /// active are reconciled against the record objects actually written.
    pub async fn load(store: Arc<dyn ObjectStore>) -> Result<Self> {
        let registry = Self::new(store);
        let objects = registry.store.list(keys::SESSIONS_PREFIX).await?;

        let mut next_sequences: HashMap<String, [u64; 3]> = HashMap::new();
        let mut metadata_ids = Vec::new();
        for object in &objects {
            match keys::parse_session_key(&object.key) {
                Some((id, SessionObject::Metadata)) => metadata_ids.push(id.to_string()),
                Some((id, SessionObject::Record { signal, sequence })) => {
                    let next = next_sequences.entry(id.to_string()).or_default();
                    next[signal.index()] = next[signal.index()].max(sequence + 1);
                }
                _ => {}
            }
        }

        for id in metadata_ids {
            let mut session = match registry.read_metadata(&id).await {
                Ok(Some(session)) => session,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Skipping unreadable session metadata");
                    continue;
                }
            };
            if session.is_active() {
                if let Some(next) = next_sequences.get(&id) {
                    reconcile(&mut session, next);
                }
            }
            registry
                .sessions
                .insert(id, Arc::new(SessionEntry::new(session)));
        }

        tracing::info!(
            backend = registry.store.backend(),
            sessions = registry.sessions.len(),
            "Loaded session registry"
        );
        Ok(registry)
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Serialize lifecycle transitions (start/stop/abort) of one session.
    pub async fn lifecycle_lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lane = self
            .lifecycle_lanes
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lane.lock_owned().await
    }

    /// Register a new session and persist its metadata.
    ///
    /// The entry is cached before the metadata write and its state stays
    /// write-locked until that write succeeds, so concurrent lookups wait on
    /// it instead of building a second entry from the store. A live entry is
    /// never replaced. If the write fails the entry is marked failed and
    /// evicted.
    pub async fn insert(&self, session: CaptureSession) -> Result<Arc<SessionEntry>> {
        let session_id = session.session_id.clone();
        let entry = Arc::new(SessionEntry::new(session.clone()));
        let mut state = entry.state.write().await;

        let existing = match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(occupied) => Some(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
                None
            }
        };
        if let Some(existing) = existing {
            drop(state);
            return Err(if existing.snapshot().await.is_active() {
                Error::SessionAlreadyActive { session_id }
            } else {
                Error::SessionAlreadyExists { session_id }
            });
        }

        if let Err(e) = self.persist(&session).await {
            state.status = SessionStatus::Failed;
            state.error = Some(e.to_string());
            self.sessions
                .remove_if(&session_id, |_, cached| Arc::ptr_eq(cached, &entry));
            return Err(e);
        }
        drop(state);
        Ok(entry)
    }

    /// Look up a session, falling back to its metadata in the store.
    pub async fn entry(&self, session_id: &str) -> Result<Option<Arc<SessionEntry>>> {
        if let Some(entry) = self.sessions.get(session_id) {
            return Ok(Some(entry.clone()));
        }

        let Some(mut session) = self.read_metadata(session_id).await? else {
            return Ok(None);
        };
        if session.is_active() {
            let next = self.next_sequences(session_id).await?;
            reconcile(&mut session, &next);
        }
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionEntry::new(session)))
            .clone();
        Ok(Some(entry))
    }

    /// Snapshot of a session's metadata.
    pub async fn get(&self, session_id: &str) -> Result<Option<CaptureSession>> {
        match self.entry(session_id).await? {
            Some(entry) => Ok(Some(entry.snapshot().await)),
            None => Ok(None),
        }
    }

    /// Whether a session is cached, without consulting the store.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Whether a session exists and is still recording.
    pub async fn is_active(&self, session_id: &str) -> Result<bool> {
        Ok(self
            .get(session_id)
            .await?
            .map(|s| s.is_active())
            .unwrap_or(false))
    }

    /// Snapshot of every cached session.
    pub async fn list(&self) -> Vec<CaptureSession> {
        let entries: Vec<Arc<SessionEntry>> =
            self.sessions.iter().map(|r| r.value().clone()).collect();
        let mut sessions = Vec::with_capacity(entries.len());
        for entry in entries {
            sessions.push(entry.snapshot().await);
        }
        sessions
    }

    /// Write a session's metadata object.
    pub async fn persist(&self, session: &CaptureSession) -> Result<()> {
        let json = serde_json::to_vec_pretty(session)?;
        self.store
            .put(&keys::metadata_key(&session.session_id), Bytes::from(json))
            .await
    }

    /// Apply a change to a session and persist it before it becomes visible.
    pub async fn update<F>(&self, session_id: &str, change: F) -> Result<Option<CaptureSession>>
    where
        F: FnOnce(&mut CaptureSession),
    {
        let Some(entry) = self.entry(session_id).await? else {
            return Ok(None);
        };
        let mut state = entry.state().write().await;
        let mut updated = state.clone();
        change(&mut updated);
        self.persist(&updated).await?;
        *state = updated.clone();
        Ok(Some(updated))
    }

    /// Drop a session from the cache after its objects were deleted.
    pub fn forget(&self, session_id: &str) {
        self.sessions.remove(session_id);
        self.lifecycle_lanes.remove(session_id);
    }

    async fn read_metadata(&self, session_id: &str) -> Result<Option<CaptureSession>> {
        match self.store.get(&keys::metadata_key(session_id)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn next_sequences(&self, session_id: &str) -> Result<[u64; 3]> {
        let mut next = [0u64; 3];
        for object in self.store.list(&keys::session_prefix(session_id)).await? {
            if let Some((_, SessionObject::Record { signal, sequence })) =
                keys::parse_session_key(&object.key)
            {
                next[signal.index()] = next[signal.index()].max(sequence + 1);
            }
        }
        Ok(next)
    }
}

fn reconcile(session: &mut CaptureSession, next: &[u64; 3]) {
    for signal in SignalType::ALL {
        let written = next[signal.index()];
        if written > session.captured(signal) {
            session.set_captured(signal, written);
        }
    }
}
