use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

// =============================================================================
// Retention Policy
// =============================================================================

/// Two-tier retention policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RetentionPolicy {
    #[serde(default)]
    pub continuous: ContinuousRetention,
    #[serde(default)]
    pub sessions: SessionRetention,
}

/// Retention for the always-on `continuous/` region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousRetention {
    pub retention_days: u32,
    /// `@hourly`, `@daily`, `@every 30m` or a five-field cron expression.
    pub cleanup_schedule: String,
    pub enabled: bool,
}

impl Default for ContinuousRetention {
    fn default() -> Self {
        Self {
            retention_days: 7,
            cleanup_schedule: "0 2 * * *".into(),
            enabled: true,
        }
    }
}

/// Retention for explicitly captured sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRetention {
    pub default_retention_days: u32,
    pub max_retention_days: u32,
    /// Move data to the archive tier once a session is this old.
    #[serde(default)]
    pub archive_after_days: Option<u32>,
    pub cleanup_enabled: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_minutes: u64,
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for SessionRetention {
    fn default() -> Self {
        Self {
            default_retention_days: 30,
            max_retention_days: 90,
            archive_after_days: Some(14),
            cleanup_enabled: true,
            sweep_interval_minutes: default_sweep_interval(),
        }
    }
}

impl SessionRetention {
    /// Longest accepted sweep interval (366 days).
    pub const MAX_SWEEP_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

    /// Time between two session sweeps.
    pub fn sweep_period(&self) -> Result<Duration> {
        match self.sweep_interval_minutes {
            0 => Err(Error::invalid_request(
                "retention.sessions.sweep_interval_minutes must be positive",
            )),
            m if m > Self::MAX_SWEEP_INTERVAL_MINUTES => Err(Error::invalid_request(format!(
                "retention.sessions.sweep_interval_minutes must be at most {}",
                Self::MAX_SWEEP_INTERVAL_MINUTES
            ))),
            m => Ok(Duration::from_secs(m * 60)),
        }
    }

    /// Days a session survives before deletion.
    ///
    /// The per-session override replaces the default; the maximum caps both.
    pub fn effective_retention_days(&self, session_override: Option<u32>) -> u32 {
        session_override
            .unwrap_or(self.default_retention_days)
            .min(self.max_retention_days)
    }
}

// =============================================================================
// Usage & Cleanup Reporting
// =============================================================================

/// Object count and bytes under one key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathUsage {
    pub total_objects: u64,
    pub total_size_bytes: u64,
}

/// Storage consumed by both capture regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsageMetrics {
    pub total_size_bytes: u64,
    pub continuous_path: PathUsage,
    pub sessions_path: PathUsage,
}

/// A single object a sweep failed to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupError {
    pub key: String,
    pub message: String,
}

/// Outcome of a retention sweep. Always fully populated, even on partial failure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub deleted_objects: u64,
    pub freed_space_bytes: u64,
    pub processed_paths: Vec<String>,
    pub errors: Vec<CleanupError>,
    pub duration: Duration,
}

impl CleanupResult {
    /// Record one object removed from the live regions.
    pub fn record_removed(&mut self, size_bytes: u64) {
        self.deleted_objects += 1;
        self.freed_space_bytes += size_bytes;
    }

    /// Record a per-object failure.
    pub fn record_error(&mut self, key: impl Into<String>, message: impl ToString) {
        self.errors.push(CleanupError {
            key: key.into(),
            message: message.to_string(),
        });
    }

    /// Fold another sweep's result into this one.
    pub fn merge(&mut self, other: CleanupResult) {
        self.deleted_objects += other.deleted_objects;
        self.freed_space_bytes += other.freed_space_bytes;
        self.processed_paths.extend(other.processed_paths);
        self.errors.extend(other.errors);
        self.duration += other.duration;
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
