//! Replay engine: launches and tracks replays of completed sessions.
//!
//! Each replay is an independent tokio task. Its progress lives in a
//! `watch` channel, so callers either poll [`ReplayEngine::get_replay_status`]
//! or [`ReplayEngine::subscribe`] to pushed updates.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use telvault_core::{
    CaptureSession, Error, ReplayParams, ReplaySink, ReplayState, ReplayStatus, Result,
    SessionStatus, SignalType, TimestampAdjustment,
};
use telvault_observability::{track_replay_finished, track_replay_record};
use telvault_store::{Record, SessionRegistry};

use crate::stream::{payload_stream, RecordSource};
use crate::timing;

/// The most recent replay of a session.
struct ReplayHandle {
    status: Arc<watch::Sender<ReplayStatus>>,
    task: AbortHandle,
}

impl ReplayHandle {
    fn cancel(&self) {
        self.task.abort();
        let cancelled = self.status.send_if_modified(|status| {
            if status.status.is_terminal() {
                return false;
            }
            status.finish(ReplayState::Cancelled, None);
            true
        });
        if cancelled {
            track_replay_finished(ReplayState::Cancelled);
        }
    }
}

/// Replays completed capture sessions into a sink.
pub struct ReplayEngine {
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn ReplaySink>,
    replays: DashMap<String, ReplayHandle>,
}

impl ReplayEngine {
    /// Create a new replay engine.
    pub fn new(registry: Arc<SessionRegistry>, sink: Arc<dyn ReplaySink>) -> Self {
        Self {
            registry,
            sink,
            replays: DashMap::new(),
        }
    }

    /// Completed sessions, oldest first.
    pub async fn list_available_replays(&self) -> Vec<CaptureSession> {
        self.prune_finished();
        let mut sessions: Vec<CaptureSession> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        sessions
    }

    /// Launch a replay in the background and return its pending status.
    ///
    /// A replay already running for the session is cancelled.
    pub async fn start_replay(&self, params: ReplayParams) -> Result<ReplayStatus> {
        timing::validate_speed(params.speed_multiplier)?;
        let session = self.completed_session(&params.session_id).await?;
        self.prune_finished();

        let signals: Vec<(SignalType, u64)> = params
            .signals()
            .into_iter()
            .map(|signal| (signal, session.captured(signal)))
            .collect();
        let total_records: u64 = signals.iter().map(|(_, count)| count).sum();

        let pending = ReplayStatus::pending(&params, total_records);
        let status = Arc::new(watch::Sender::new(pending.clone()));

        let drive = DriveLoop {
            source: Arc::new(RecordSource::new(self.registry.store().clone(), &session)),
            sink: self.sink.clone(),
            status: status.clone(),
            session_id: session.session_id.clone(),
            capture_start: session.start_time,
            signals,
            speed_multiplier: params.speed_multiplier,
            adjustment: params.timestamp_adjustment,
        };
        let task = tokio::spawn(drive.run()).abort_handle();

        let previous = self
            .replays
            .insert(params.session_id.clone(), ReplayHandle { status, task });
        if let Some(previous) = previous {
            tracing::info!(session_id = %params.session_id, "Superseding running replay");
            previous.cancel();
        }

        tracing::info!(
            session_id = %params.session_id,
            total_records = total_records,
            speed = params.speed_multiplier,
            adjustment = ?params.timestamp_adjustment,
            "Replay started"
        );
        Ok(pending)
    }

    /// Status of the most recent replay of a session.
    ///
    /// Once the session has been deleted, its final status is returned one
    /// last time and the replay is forgotten.
    pub fn get_replay_status(&self, session_id: &str) -> Result<ReplayStatus> {
        let status = self
            .replays
            .get(session_id)
            .map(|handle| handle.status.borrow().clone())
            .ok_or_else(|| Error::session_not_found(session_id))?;
        if status.status.is_terminal() && !self.registry.contains(session_id) {
            self.replays
                .remove_if(session_id, |_, handle| handle.status.borrow().status.is_terminal());
        }
        Ok(status)
    }

    /// Receive every status change of the most recent replay of a session.
    pub fn subscribe(&self, session_id: &str) -> Result<watch::Receiver<ReplayStatus>> {
        self.replays
            .get(session_id)
            .map(|handle| handle.status.subscribe())
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    /// Stop the replay of a session. A finished replay keeps its final state.
    pub fn cancel_replay(&self, session_id: &str) -> Result<ReplayStatus> {
        let handle = self
            .replays
            .get(session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        handle.cancel();
        tracing::info!(session_id = session_id, "Replay cancelled");
        let status = handle.status.borrow().clone();
        Ok(status)
    }

    /// Stored payloads of one signal, in sequence order. Re-reads storage on
    /// every call.
    pub async fn replay_data_stream(
        &self,
        session_id: &str,
        signal: SignalType,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let session = self
            .registry
            .get(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))?;
        let source = Arc::new(RecordSource::new(self.registry.store().clone(), &session));
        Ok(payload_stream(source, signal, session.captured(signal)))
    }

    /// Drop finished replays whose session is no longer registered.
    fn prune_finished(&self) {
        self.replays.retain(|session_id, handle| {
            !handle.status.borrow().status.is_terminal() || self.registry.contains(session_id)
        });
    }

    async fn completed_session(&self, session_id: &str) -> Result<CaptureSession> {
        let session = self
            .registry
            .get(session_id)
            .await?
            .ok_or_else(|| Error::session_not_found(session_id))?;
        if session.status != SessionStatus::Completed {
            return Err(Error::SessionNotCompleted {
                session_id: session_id.to_string(),
            });
        }
        Ok(session)
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        for handle in self.replays.iter() {
            handle.cancel();
        }
    }
}

/// Per-signal read position of a drive loop.
struct Cursor {
    signal: SignalType,
    next_sequence: u64,
    count: u64,
    head: Option<Record>,
}

impl Cursor {
    async fn advance(&mut self, source: &RecordSource) -> Result<()> {
        self.head = if self.next_sequence < self.count {
            let record = source.read(self.signal, self.next_sequence).await?;
            self.next_sequence += 1;
            Some(record)
        } else {
            None
        };
        Ok(())
    }
}

struct DriveLoop {
    source: Arc<RecordSource>,
    sink: Arc<dyn ReplaySink>,
    status: Arc<watch::Sender<ReplayStatus>>,
    session_id: String,
    capture_start: DateTime<Utc>,
    signals: Vec<(SignalType, u64)>,
    speed_multiplier: f64,
    adjustment: TimestampAdjustment,
}

impl DriveLoop {
    async fn run(self) {
        self.update(|status| status.status = ReplayState::Running);

        let (state, error) = match self.forward_all().await {
            Ok(()) => (ReplayState::Completed, None),
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Replay failed");
                (ReplayState::Failed, Some(e.to_string()))
            }
        };

        if self.update(|status| status.finish(state, error)) {
            track_replay_finished(state);
            let processed = self.status.borrow().processed_records;
            tracing::info!(
                session_id = %self.session_id,
                state = ?state,
                processed_records = processed,
                "Replay finished"
            );
        }
    }

    /// Merge the enabled signals by capture time and forward every record.
    ///
    /// Ties go to the signal listed first (traces, metrics, logs).
    async fn forward_all(&self) -> Result<()> {
        let replay_start = Utc::now();

        let mut cursors = Vec::with_capacity(self.signals.len());
        for &(signal, count) in &self.signals {
            let mut cursor = Cursor {
                signal,
                next_sequence: 0,
                count,
                head: None,
            };
            cursor.advance(&self.source).await?;
            cursors.push(cursor);
        }

        let mut previous: Option<DateTime<Utc>> = None;
        loop {
            let next = cursors
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.head.as_ref().map(|r| (r.captured_at, i)))
                .min();
            let Some((_, index)) = next else {
                return Ok(());
            };
            let cursor = &mut cursors[index];
            let Some(record) = cursor.head.take() else {
                return Ok(());
            };

            let delay = timing::pacing_delay(previous, record.captured_at, self.speed_multiplier);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            previous = Some(record.captured_at);

            let target = timing::target_timestamp(
                record.captured_at,
                self.adjustment,
                self.capture_start,
                replay_start,
            );
            self.sink
                .forward(cursor.signal, record.payload, target)
                .await
                .map_err(|e| {
                    Error::replay(
                        &self.session_id,
                        format!("forwarding {} record failed: {}", cursor.signal, e),
                    )
                })?;

            self.update(|status| status.processed_records += 1);
            track_replay_record(cursor.signal);

            cursor.advance(&self.source).await?;
        }
    }

    /// Apply a change unless the replay already reached a final state.
    fn update(&self, change: impl FnOnce(&mut ReplayStatus)) -> bool {
        self.status.send_if_modified(|status| {
            if status.status.is_terminal() {
                return false;
            }
            change(status);
            true
        })
    }
}
