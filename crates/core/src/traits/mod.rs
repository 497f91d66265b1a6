//! Core traits for Telvault.
//!
//! Traits are organized by the collaborator they describe:
//! - `storage`: the object storage gateway (ObjectStore)
//! - `sink`: the live ingestion endpoint replays are forwarded to (ReplaySink)

pub mod sink;
pub mod storage;

pub use sink::*;
pub use storage::*;
