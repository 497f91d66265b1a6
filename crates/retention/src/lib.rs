//! Retention engine for Telvault.
//!
//! Reclaims storage under the two-tier policy: age-based deletion of the
//! `continuous/` region, and per-session archival and deletion of
//! `sessions/`. Sweeps are partial-success batches reported as
//! [`CleanupResult`](telvault_core::CleanupResult).

pub mod manager;
pub mod schedule;
pub mod scheduler;

pub use manager::RetentionManager;
pub use schedule::Schedule;
pub use scheduler::RetentionScheduler;
