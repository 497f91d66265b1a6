//! Metrics implementation using Prometheus.
//!
//! Engines report through the `track_*` helpers; without an installed
//! recorder the calls are no-ops.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

use telvault_core::{CleanupResult, Error, ReplayState, Result, SignalType};

/// Where a captured record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePath {
    Session,
    Continuous,
}

impl CapturePath {
    fn as_str(&self) -> &'static str {
        match self {
            CapturePath::Session => "session",
            CapturePath::Continuous => "continuous",
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "telvault_capture_records_total",
        "Records written by the capture service"
    );
    metrics::describe_counter!(
        "telvault_capture_bytes_total",
        metrics::Unit::Bytes,
        "Stored bytes written by the capture service"
    );
    metrics::describe_counter!(
        "telvault_replay_records_total",
        "Records forwarded to the replay sink"
    );
    metrics::describe_counter!("telvault_replays_total", "Replays that reached a final state");
    metrics::describe_counter!(
        "telvault_retention_deleted_objects_total",
        "Objects removed or archived by retention sweeps"
    );
    metrics::describe_counter!(
        "telvault_retention_freed_bytes_total",
        metrics::Unit::Bytes,
        "Bytes released from the live tiers by retention sweeps"
    );
    metrics::describe_counter!(
        "telvault_retention_errors_total",
        "Objects a retention sweep failed to process"
    );
    metrics::describe_histogram!(
        "telvault_retention_sweep_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of one retention sweep"
    );
}

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Install the recorder together with a scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn setup_metrics_listener(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::internal(format!("Failed to start Prometheus listener: {}", e)))?;
    describe_metrics();

    tracing::info!(%addr, "Prometheus metrics listener started");
    Ok(())
}

/// Helper to track one captured record.
pub fn track_capture(path: CapturePath, signal: SignalType, stored_bytes: u64) {
    metrics::counter!(
        "telvault_capture_records_total",
        "path" => path.as_str(),
        "signal" => signal.as_str()
    )
    .increment(1);
    metrics::counter!(
        "telvault_capture_bytes_total",
        "path" => path.as_str(),
        "signal" => signal.as_str()
    )
    .increment(stored_bytes);
}

/// Helper to track one forwarded replay record.
pub fn track_replay_record(signal: SignalType) {
    metrics::counter!("telvault_replay_records_total", "signal" => signal.as_str()).increment(1);
}

/// Helper to track a replay reaching a final state.
pub fn track_replay_finished(state: ReplayState) {
    let state = match state {
        ReplayState::Pending => "pending",
        ReplayState::Running => "running",
        ReplayState::Completed => "completed",
        ReplayState::Failed => "failed",
        ReplayState::Cancelled => "cancelled",
    };
    metrics::counter!("telvault_replays_total", "state" => state).increment(1);
}

/// Helper to track a finished retention sweep.
pub fn track_retention_sweep(job: &'static str, result: &CleanupResult) {
    metrics::counter!("telvault_retention_deleted_objects_total", "job" => job)
        .increment(result.deleted_objects);
    metrics::counter!("telvault_retention_freed_bytes_total", "job" => job)
        .increment(result.freed_space_bytes);
    metrics::counter!("telvault_retention_errors_total", "job" => job)
        .increment(result.errors.len() as u64);
    metrics::histogram!("telvault_retention_sweep_duration_seconds", "job" => job)
        .record(result.duration.as_secs_f64());
}
