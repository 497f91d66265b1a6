//! Application configuration.
//!
//! Engine crates never read files or the environment; they receive the values
//! below explicitly. Only the binary calls [`AppConfig::load`], and it does so at
//! exactly two points: startup and an operator-requested reload.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{RetentionPolicy, SignalType};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub capture: CaptureDefaults,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Filesystem,
    S3,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory of the filesystem backend.
    pub root_dir: String,
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub s3_prefix: String,
    pub s3_endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            root_dir: "./data".into(),
            s3_bucket: None,
            s3_prefix: String::new(),
            s3_endpoint: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CaptureDefaults {
    #[serde(default)]
    pub continuous: ContinuousCaptureConfig,
}

/// Signal flags for the always-on capture path.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ContinuousCaptureConfig {
    pub enabled: bool,
    pub capture_traces: bool,
    pub capture_metrics: bool,
    pub capture_logs: bool,
    pub compression_enabled: bool,
}

impl Default for ContinuousCaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capture_traces: true,
            capture_metrics: true,
            capture_logs: true,
            compression_enabled: true,
        }
    }
}

impl ContinuousCaptureConfig {
    /// Whether continuous capture accepts the given signal.
    pub fn captures(&self, signal: SignalType) -> bool {
        self.enabled
            && match signal {
                SignalType::Traces => self.capture_traces,
                SignalType::Metrics => self.capture_metrics,
                SignalType::Logs => self.capture_logs,
            }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReplayConfig {
    /// Base URL of the OTLP/HTTP receiver replays are forwarded to.
    pub sink_endpoint: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            sink_endpoint: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub json_logs: bool,
    /// Address of the Prometheus scrape listener, e.g. `0.0.0.0:9464`.
    #[serde(default)]
    pub metrics_listen: Option<String>,
}

impl AppConfig {
    /// Load `config/default`, `config/<TELVAULT_ENV>`, `config/local` and `APP__*` overrides.
    pub fn load() -> Result<Self> {
        let env = std::env::var("TELVAULT_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__STORAGE__BACKEND=s3 to storage.backend
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.backend == StorageBackend::S3 && self.storage.s3_bucket.is_none() {
            return Err(Error::invalid_request(
                "storage.s3_bucket is required for the s3 backend",
            ));
        }
        let sessions = &self.retention.sessions;
        if sessions.max_retention_days == 0 {
            return Err(Error::invalid_request(
                "retention.sessions.max_retention_days must be positive",
            ));
        }
        sessions.sweep_period()?;
        if self.retention.continuous.cleanup_schedule.trim().is_empty() {
            return Err(Error::invalid_request(
                "retention.continuous.cleanup_schedule must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(!config.capture.continuous.enabled);
    }

    #[test]
    fn test_s3_requires_bucket() {
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::S3;
        assert!(config.validate().is_err());

        config.storage.s3_bucket = Some("telemetry".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sweep_interval_is_bounded() {
        let mut config = AppConfig::default();
        config.retention.sessions.sweep_interval_minutes = u64::MAX;
        assert!(matches!(config.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_continuous_flags_require_enabled() {
        let mut continuous = ContinuousCaptureConfig::default();
        assert!(!continuous.captures(SignalType::Traces));

        continuous.enabled = true;
        continuous.capture_logs = false;
        assert!(continuous.captures(SignalType::Traces));
        assert!(!continuous.captures(SignalType::Logs));
    }
}
