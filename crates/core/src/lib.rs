//! Core types, traits, and error definitions for Telvault.
//!
//! This crate provides the foundational building blocks shared by the capture,
//! replay and retention engines: the session data model, the object storage and
//! replay sink seams, the storage key layout and the configuration model.

pub mod config;
pub mod error;
pub mod keys;
pub mod mocks;
pub mod traits;
pub mod types;

pub use error::{Error, Result, StorageOp};
pub use traits::*;
pub use types::*;
