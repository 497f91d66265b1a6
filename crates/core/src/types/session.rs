use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SignalType;

// =============================================================================
// Capture Session Types
// =============================================================================

/// Request to open a capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Unique session ID.
    pub session_id: String,

    /// Free-form description shown to operators.
    #[serde(default)]
    pub description: String,

    /// Feature flags active while the session was recorded.
    #[serde(default)]
    pub enabled_flags: Vec<String>,

    #[serde(default)]
    pub capture_traces: bool,

    #[serde(default)]
    pub capture_metrics: bool,

    #[serde(default)]
    pub capture_logs: bool,

    /// Gzip each record before storing it.
    #[serde(default = "default_true")]
    pub compression_enabled: bool,

    /// Per-session retention override, capped by the policy maximum.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl CaptureConfig {
    /// Create a config with every signal disabled.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            description: String::new(),
            enabled_flags: Vec::new(),
            capture_traces: false,
            capture_metrics: false,
            capture_logs: false,
            compression_enabled: true,
            retention_days: None,
        }
    }

    /// Enable capture of a signal.
    pub fn with_signal(mut self, signal: SignalType) -> Self {
        match signal {
            SignalType::Traces => self.capture_traces = true,
            SignalType::Metrics => self.capture_metrics = true,
            SignalType::Logs => self.capture_logs = true,
        }
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Toggle record compression.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression_enabled = enabled;
        self
    }

    /// Override the retention period for this session.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }
}

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting records.
    Active,
    /// Stopped normally; eligible for replay.
    Completed,
    /// Aborted.
    Failed,
}

/// A bounded, uniquely identified recording window.
///
/// Persisted as `sessions/<sessionId>/metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub session_id: String,
    pub description: String,
    pub enabled_flags: Vec<String>,
    pub capture_traces: bool,
    pub capture_metrics: bool,
    pub capture_logs: bool,
    pub compression_enabled: bool,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub captured_traces: u64,
    pub captured_metrics: u64,
    pub captured_logs: u64,
    #[serde(default)]
    pub retention_days: Option<u32>,
    /// Set once the data objects were moved to the archive tier.
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    /// Reason recorded when the session was aborted.
    #[serde(default)]
    pub error: Option<String>,
}

impl CaptureSession {
    /// Open a new active session from its config.
    pub fn from_config(config: &CaptureConfig, start_time: DateTime<Utc>) -> Self {
        Self {
            session_id: config.session_id.clone(),
            description: config.description.clone(),
            enabled_flags: config.enabled_flags.clone(),
            capture_traces: config.capture_traces,
            capture_metrics: config.capture_metrics,
            capture_logs: config.capture_logs,
            compression_enabled: config.compression_enabled,
            status: SessionStatus::Active,
            start_time,
            end_time: None,
            captured_traces: 0,
            captured_metrics: 0,
            captured_logs: 0,
            retention_days: config.retention_days,
            archived_at: None,
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Whether the session records the given signal.
    pub fn captures(&self, signal: SignalType) -> bool {
        match signal {
            SignalType::Traces => self.capture_traces,
            SignalType::Metrics => self.capture_metrics,
            SignalType::Logs => self.capture_logs,
        }
    }

    /// Number of records captured for a signal.
    pub fn captured(&self, signal: SignalType) -> u64 {
        match signal {
            SignalType::Traces => self.captured_traces,
            SignalType::Metrics => self.captured_metrics,
            SignalType::Logs => self.captured_logs,
        }
    }

    /// Overwrite the record count for a signal.
    pub fn set_captured(&mut self, signal: SignalType, count: u64) {
        match signal {
            SignalType::Traces => self.captured_traces = count,
            SignalType::Metrics => self.captured_metrics = count,
            SignalType::Logs => self.captured_logs = count,
        }
    }

    /// Total records across all signals.
    pub fn total_captured(&self) -> u64 {
        self.captured_traces + self.captured_metrics + self.captured_logs
    }

    /// Timestamp retention ages the session from.
    pub fn age_reference(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.start_time)
    }
}

/// Reference to a single persisted record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRef {
    pub session_id: String,
    pub signal_type: SignalType,
    pub sequence: u64,
    pub storage_key: String,
    pub size_bytes: u64,
    pub compressed: bool,
    pub captured_at: DateTime<Utc>,
}
