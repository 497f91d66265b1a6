use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SignalType;

// =============================================================================
// Replay Types
// =============================================================================

/// How delivered timestamps relate to the captured ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampAdjustment {
    /// Shift every record by `replay start - capture start`.
    #[default]
    Current,
    /// Deliver the captured wall-clock timestamps unmodified.
    Original,
}

/// Request to replay a completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayParams {
    pub session_id: String,
    #[serde(default)]
    pub timestamp_adjustment: TimestampAdjustment,
    /// Divides the captured inter-record gaps; `1.0` reproduces original pacing.
    #[serde(default = "default_speed")]
    pub speed_multiplier: f64,
    #[serde(default)]
    pub replay_traces: bool,
    #[serde(default)]
    pub replay_metrics: bool,
    #[serde(default)]
    pub replay_logs: bool,
}

fn default_speed() -> f64 {
    1.0
}

impl ReplayParams {
    /// Replay nothing at original speed; enable signals with [`Self::with_signal`].
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp_adjustment: TimestampAdjustment::Current,
            speed_multiplier: 1.0,
            replay_traces: false,
            replay_metrics: false,
            replay_logs: false,
        }
    }

    pub fn with_signal(mut self, signal: SignalType) -> Self {
        match signal {
            SignalType::Traces => self.replay_traces = true,
            SignalType::Metrics => self.replay_metrics = true,
            SignalType::Logs => self.replay_logs = true,
        }
        self
    }

    pub fn with_speed(mut self, speed_multiplier: f64) -> Self {
        self.speed_multiplier = speed_multiplier;
        self
    }

    pub fn with_timestamps(mut self, adjustment: TimestampAdjustment) -> Self {
        self.timestamp_adjustment = adjustment;
        self
    }

    /// Whether the given signal is part of this replay.
    pub fn replays(&self, signal: SignalType) -> bool {
        match signal {
            SignalType::Traces => self.replay_traces,
            SignalType::Metrics => self.replay_metrics,
            SignalType::Logs => self.replay_logs,
        }
    }

    /// Signals enabled for this replay, in tie-break order.
    pub fn signals(&self) -> Vec<SignalType> {
        SignalType::ALL
            .into_iter()
            .filter(|s| self.replays(*s))
            .collect()
    }
}

/// Replay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ReplayState {
    /// Whether the drive loop has finished for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReplayState::Completed | ReplayState::Failed | ReplayState::Cancelled
        )
    }
}

/// Progress of the most recent replay of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStatus {
    pub session_id: String,
    pub status: ReplayState,
    pub total_records: u64,
    pub processed_records: u64,
    pub speed_multiplier: f64,
    pub timestamp_adjustment: TimestampAdjustment,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ReplayStatus {
    /// Fresh pending status for a replay launch.
    pub fn pending(params: &ReplayParams, total_records: u64) -> Self {
        Self {
            session_id: params.session_id.clone(),
            status: ReplayState::Pending,
            total_records,
            processed_records: 0,
            speed_multiplier: params.speed_multiplier,
            timestamp_adjustment: params.timestamp_adjustment,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Move to a terminal state, keeping the progress counters.
    pub fn finish(&mut self, state: ReplayState, error: Option<String>) {
        self.status = state;
        self.finished_at = Some(Utc::now());
        self.error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_signals() {
        let params = ReplayParams::new("s1")
            .with_signal(SignalType::Logs)
            .with_signal(SignalType::Traces);
        assert_eq!(params.signals(), vec![SignalType::Traces, SignalType::Logs]);
    }

    #[test]
    fn test_params_defaults_from_json() {
        let params: ReplayParams =
            serde_json::from_str(r#"{"sessionId":"s1","replayTraces":true}"#).unwrap();
        assert_eq!(params.speed_multiplier, 1.0);
        assert_eq!(params.timestamp_adjustment, TimestampAdjustment::Current);
    }

    #[test]
    fn test_finish_keeps_progress() {
        let params = ReplayParams::new("s1").with_signal(SignalType::Traces);
        let mut status = ReplayStatus::pending(&params, 5);
        status.processed_records = 3;
        status.finish(ReplayState::Failed, Some("sink down".into()));

        assert!(status.status.is_terminal());
        assert_eq!(status.processed_records, 3);
        assert!(status.finished_at.is_some());
    }
}
