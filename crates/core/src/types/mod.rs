//! Core type definitions for Telvault.
//!
//! Broken down into submodules by engine: the capture session model, replay
//! progress, and retention accounting.

pub mod replay;
pub mod retention;
pub mod session;
pub mod signal;

pub use replay::*;
pub use retention::*;
pub use session::*;
pub use signal::*;
