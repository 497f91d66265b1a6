//! Observability for Telvault.
//!
//! This crate provides:
//! - Structured logging with optional OpenTelemetry export
//! - Prometheus metrics and the `track_*` helpers the engines report through

pub mod metrics;
pub mod tracing_layer;

pub use metrics::{
    setup_metrics_listener, setup_metrics_recorder, track_capture, track_replay_finished,
    track_replay_record, track_retention_sweep, CapturePath,
};
pub use tracing_layer::{configure_tracing, shutdown_tracing};
