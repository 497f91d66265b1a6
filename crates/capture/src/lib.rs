//! Capture engine for Telvault.
//!
//! Records opaque OTLP payloads into bounded capture sessions
//! (`sessions/<id>/<signal>/<seq>.bin[.gz]`) and into the always-on
//! `continuous/` region.

pub mod service;

pub use service::{CaptureService, CONTINUOUS_SESSION_ID};
