//! Recurring retention jobs.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use telvault_core::{Result, RetentionPolicy};

use crate::manager::RetentionManager;
use crate::schedule::Schedule;

/// Background tasks running the continuous and session sweeps.
///
/// Dropping the scheduler stops its jobs.
pub struct RetentionScheduler {
    manager: Arc<RetentionManager>,
    jobs: Vec<JoinHandle<()>>,
}

impl RetentionScheduler {
    /// Validate the policy and spawn its jobs. Must be called from within a
    /// Tokio runtime; returns without waiting for any sweep.
    pub fn start(manager: Arc<RetentionManager>, policy: &RetentionPolicy) -> Result<Self> {
        let mut scheduler = Self {
            manager,
            jobs: Vec::new(),
        };
        scheduler.reschedule(policy)?;
        Ok(scheduler)
    }

    /// Replace the running jobs with ones for `policy`. On error the current
    /// jobs keep running.
    pub fn reschedule(&mut self, policy: &RetentionPolicy) -> Result<()> {
        let schedule = Schedule::parse(&policy.continuous.cleanup_schedule)?;
        let period = policy.sessions.sweep_period()?;

        self.stop();

        if policy.continuous.enabled {
            let manager = self.manager.clone();
            let retention_days = policy.continuous.retention_days;
            tracing::info!(schedule = %schedule, retention_days, "Scheduling continuous cleanup");
            self.jobs.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(schedule.delay_from(Utc::now())).await;
                    tracing::info!("Starting continuous data cleanup...");
                    manager.cleanup_continuous_data(retention_days).await;
                }
            }));
        }

        if policy.sessions.cleanup_enabled {
            let manager = self.manager.clone();
            let sessions = policy.sessions.clone();
            tracing::info!(
                interval_minutes = sessions.sweep_interval_minutes,
                "Scheduling session retention sweep"
            );
            self.jobs.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    tracing::info!("Starting session retention sweep...");
                    manager.sweep_sessions(&sessions).await;
                }
            }));
        }

        Ok(())
    }

    /// Number of running jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.iter().filter(|job| !job.is_finished()).count()
    }

    fn stop(&mut self) {
        for job in self.jobs.drain(..) {
            job.abort();
        }
    }
}

impl Drop for RetentionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl RetentionManager {
    /// Register the recurring sweeps of `policy`.
    pub fn schedule_retention_jobs(
        self: &Arc<Self>,
        policy: &RetentionPolicy,
    ) -> Result<RetentionScheduler> {
        RetentionScheduler::start(self.clone(), policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use telvault_core::Error;
    use telvault_core::{keys, ContinuousRetention, ObjectStore, SessionRetention, SignalType};
    use telvault_store::{InMemoryObjectStore, SessionRegistry};

    fn policy(schedule: &str) -> RetentionPolicy {
        RetentionPolicy {
            continuous: ContinuousRetention {
                retention_days: 1,
                cleanup_schedule: schedule.into(),
                enabled: true,
            },
            sessions: SessionRetention::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_job_runs_on_schedule() {
        let store = Arc::new(InMemoryObjectStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone()));
        let key = keys::continuous_key(
            Utc::now() - ChronoDuration::days(5),
            SignalType::Traces,
            "old",
            true,
        );
        store.put(&key, Bytes::from_static(b"x")).await.unwrap();

        let manager = Arc::new(RetentionManager::new(registry));
        let scheduler = manager.schedule_retention_jobs(&policy("@every 1m")).unwrap();
        assert_eq!(scheduler.job_count(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_rejected() {
        let registry = Arc::new(SessionRegistry::new(Arc::new(InMemoryObjectStore::new())));
        let manager = Arc::new(RetentionManager::new(registry));

        let err = manager
            .schedule_retention_jobs(&policy("every tuesday"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_reschedule_keeps_jobs_on_error_and_skips_disabled_halves() {
        let registry = Arc::new(SessionRegistry::new(Arc::new(InMemoryObjectStore::new())));
        let manager = Arc::new(RetentionManager::new(registry));
        let mut scheduler = manager.schedule_retention_jobs(&policy("@hourly")).unwrap();
        assert_eq!(scheduler.job_count(), 2);

        assert!(scheduler.reschedule(&policy("61 * * * *")).is_err());
        assert_eq!(scheduler.job_count(), 2);

        let mut only_sessions = policy("@daily");
        only_sessions.continuous.enabled = false;
        scheduler.reschedule(&only_sessions).unwrap();
        assert_eq!(scheduler.job_count(), 1);

        only_sessions.sessions.cleanup_enabled = false;
        scheduler.reschedule(&only_sessions).unwrap();
        assert_eq!(scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn test_reschedule_rejects_unbounded_sweep_interval() {
        let registry = Arc::new(SessionRegistry::new(Arc::new(InMemoryObjectStore::new())));
        let manager = Arc::new(RetentionManager::new(registry));
        let mut scheduler = manager.schedule_retention_jobs(&policy("@hourly")).unwrap();

        let mut unbounded = policy("@hourly");
        unbounded.sessions.sweep_interval_minutes = u64::MAX;
        let err = scheduler.reschedule(&unbounded).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(scheduler.job_count(), 2);

        unbounded.sessions.sweep_interval_minutes = SessionRetention::MAX_SWEEP_INTERVAL_MINUTES;
        scheduler.reschedule(&unbounded).unwrap();
        assert_eq!(scheduler.job_count(), 2);
    }
}
