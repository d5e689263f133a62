use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use promobot_config::QueueConfig;
use promobot_core_types::{new_id, ScheduledTaskRow, TaskKind, TaskState};
use promobot_storage::SqliteStore;
use tracing::debug;

mod pool;

pub use pool::{PoolRunReport, WorkerPool};

/// What a handler tells the pool about one task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Terminal success; the task row is removed.
    Done,
    /// The stage wants another attempt after backoff. Carries the reason
    /// for the dead-set entry if attempts run out.
    Retry(String),
}

/// Stage handlers are synchronous: each runs to completion (success or
/// error) inside one worker slot, so suspension points stay at task
/// boundaries.
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;
    fn run(
        &self,
        store: &SqliteStore,
        task: &ScheduledTaskRow,
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.default_max_attempts.max(1),
            backoff_initial_secs: config.backoff_initial_seconds.max(1),
            backoff_max_secs: config.backoff_max_seconds.max(1),
        }
    }

    /// Exponential backoff, capped. `attempt` is the attempt that just
    /// failed, starting at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let raw = self
            .backoff_initial_secs
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_secs);
        Duration::seconds(raw as i64)
    }
}

/// Durable delayed task queue over the sqlite store. Stateless apart from
/// its policy; all durability lives in the scheduled_tasks table.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    policy: RetryPolicy,
    lease_timeout: Duration,
}

impl TaskQueue {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            policy: RetryPolicy::from_config(config),
            lease_timeout: Duration::seconds(config.lease_timeout_seconds.max(1) as i64),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Enqueues a stage task for a campaign. Returns `false` when a pending
    /// task of the same kind already exists for the campaign, which keeps
    /// redelivered handlers from fanning out duplicate stages.
    pub fn enqueue(
        &self,
        store: &SqliteStore,
        kind: TaskKind,
        campaign_id: &str,
        execute_at: DateTime<Utc>,
        max_attempts: u32,
        payload_json: Option<String>,
    ) -> Result<bool> {
        let task = ScheduledTaskRow {
            task_id: new_id(),
            kind,
            campaign_id: campaign_id.to_string(),
            execute_at,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            payload_json,
            state: TaskState::Pending,
            last_error: None,
            leased_at: None,
        };
        let inserted = store.insert_task(&task)?;
        if !inserted {
            debug!(
                campaign_id = campaign_id,
                kind = kind.as_str(),
                "enqueue skipped: pending task already exists"
            );
        }
        Ok(inserted)
    }

    /// Reclaims crashed leases, then claims up to `limit` due tasks of the
    /// given kind.
    pub fn claim(
        &self,
        store: &SqliteStore,
        kind: TaskKind,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ScheduledTaskRow>> {
        store
            .reclaim_expired_leases(now, self.lease_timeout)
            .context("failed reclaiming expired leases before claim")?;
        store.claim_due_tasks(kind, now, limit)
    }

    pub fn complete(&self, store: &SqliteStore, task: &ScheduledTaskRow) -> Result<()> {
        store.complete_task(&task.task_id)
    }

    /// Routes a failed execution: backoff-reschedule while attempts remain,
    /// otherwise park the task in the dead set.
    pub fn fail(
        &self,
        store: &SqliteStore,
        task: &ScheduledTaskRow,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome> {
        if task.attempt < task.max_attempts {
            let delay = self.policy.backoff(task.attempt);
            store.reschedule_task(&task.task_id, now + delay, task.attempt + 1, error)?;
            Ok(FailOutcome::Rescheduled { delay })
        } else {
            store.mark_task_dead(&task.task_id, error)?;
            Ok(FailOutcome::Dead)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Rescheduled { delay: Duration },
    Dead,
}

#[cfg(test)]
mod tests {
    use super::*;
    use promobot_config::QueueConfig;
    use std::path::Path;

    fn open_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("queue-test.db");
        let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        let mut store = SqliteStore::open(&db).expect("open");
        store.run_migrations(&migrations).expect("migrate");
        (store, dir)
    }

    fn queue() -> TaskQueue {
        TaskQueue::from_config(&QueueConfig::default())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_initial_secs: 60,
            backoff_max_secs: 300,
        };
        assert_eq!(policy.backoff(1), Duration::seconds(60));
        assert_eq!(policy.backoff(2), Duration::seconds(120));
        assert_eq!(policy.backoff(3), Duration::seconds(240));
        assert_eq!(policy.backoff(4), Duration::seconds(300));
        assert_eq!(policy.backoff(40), Duration::seconds(300));
    }

    #[test]
    fn enqueue_is_idempotent_per_campaign_and_kind() {
        let (store, _dir) = open_store();
        let queue = queue();
        let now = Utc::now();

        assert!(queue
            .enqueue(&store, TaskKind::CollectEngagements, "c1", now, 3, None)
            .expect("enqueue"));
        assert!(!queue
            .enqueue(&store, TaskKind::CollectEngagements, "c1", now, 3, None)
            .expect("enqueue dup"));
        assert!(queue
            .enqueue(&store, TaskKind::ExpireCampaign, "c1", now, 3, None)
            .expect("other kind"));
    }

    #[test]
    fn fail_reschedules_then_dies() {
        let (store, _dir) = open_store();
        let queue = queue();
        let now = Utc::now();
        queue
            .enqueue(&store, TaskKind::CollectEngagements, "c1", now, 2, None)
            .expect("enqueue");

        let claimed = queue
            .claim(&store, TaskKind::CollectEngagements, now, 10)
            .expect("claim");
        assert_eq!(claimed.len(), 1);
        let outcome = queue
            .fail(&store, &claimed[0], "platform 503", now)
            .expect("fail");
        assert!(matches!(outcome, FailOutcome::Rescheduled { .. }));

        // not yet due: backoff pushed it into the future
        assert!(queue
            .claim(&store, TaskKind::CollectEngagements, now, 10)
            .expect("claim")
            .is_empty());

        let later = now + Duration::hours(1);
        let claimed = queue
            .claim(&store, TaskKind::CollectEngagements, later, 10)
            .expect("claim after backoff");
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempt, 2);

        let outcome = queue
            .fail(&store, &claimed[0], "platform 503 again", later)
            .expect("final fail");
        assert_eq!(outcome, FailOutcome::Dead);
        assert_eq!(store.list_dead_tasks().expect("dead").len(), 1);
    }
}
