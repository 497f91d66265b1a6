//! Replay engine for Telvault.
//!
//! Replays completed capture sessions into a [`ReplaySink`], rebasing
//! timestamps and pacing records by their captured offsets.
//!
//! [`ReplaySink`]: telvault_core::ReplaySink

pub mod engine;
pub mod sink;
pub mod stream;
pub mod timing;

pub use engine::ReplayEngine;
pub use sink::{ChannelReplaySink, HttpReplaySink, ReplayedRecord};
