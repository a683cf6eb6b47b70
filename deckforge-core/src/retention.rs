//! Retention - Bounded Lifetime for Finished Tasks
//!
//! Terminal tasks and their artifacts are kept for `max_age` after
//! completion. Tasks still pending or processing are never evicted.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::Orchestrator;

pub const DEFAULT_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: ChronoDuration,
}

impl RetentionPolicy {
    pub fn hours(hours: i64) -> Self {
        Self { max_age: ChronoDuration::hours(hours) }
    }

    /// Whether a task that finished at `completed_at` has outlived the policy.
    pub fn is_expired(&self, completed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - completed_at > self.max_age
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::hours(DEFAULT_RETENTION_HOURS)
    }
}

/// Sweep expired tasks every `interval` until `cancel` fires.
pub async fn run(
    orchestrator: Arc<Orchestrator>,
    policy: RetentionPolicy,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Retention sweeper stopped");
                break;
            }
            _ = ticker.tick() => {
                let evicted = orchestrator.evict_expired(&policy, Utc::now());
                if !evicted.is_empty() {
                    tracing::info!(count = evicted.len(), "Evicted expired generation tasks");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let policy = RetentionPolicy::hours(1);
        let done = Utc::now();
        assert!(!policy.is_expired(done, done + ChronoDuration::minutes(59)));
        assert!(!policy.is_expired(done, done + ChronoDuration::hours(1)));
        assert!(policy.is_expired(done, done + ChronoDuration::minutes(61)));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Arc::new(Orchestrator::new(dir.path()).unwrap());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            orchestrator,
            RetentionPolicy::default(),
            Duration::from_millis(10),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
