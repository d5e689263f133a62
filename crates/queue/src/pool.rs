use crate::{FailOutcome, TaskHandler, TaskOutcome, TaskQueue};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use promobot_core_types::{ScheduledTaskRow, TaskKind};
use promobot_storage::SqliteStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Bounded worker pool over the durable task queue. Handlers are registered
/// once at startup; each `run_once` claims due tasks and executes them on
/// blocking threads, at most `workers_per_kind` at a time per task kind.
pub struct WorkerPool {
    sqlite_path: PathBuf,
    queue: TaskQueue,
    handlers: BTreeMap<TaskKind, Arc<dyn TaskHandler>>,
    claim_batch_size: u32,
    workers_per_kind: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PoolRunReport {
    pub claimed: u64,
    pub completed: u64,
    pub rescheduled: u64,
    pub dead: u64,
    pub completed_by_kind: BTreeMap<&'static str, u64>,
    pub failed_by_kind: BTreeMap<&'static str, u64>,
}

fn bump(counter: &mut BTreeMap<&'static str, u64>, kind: TaskKind) {
    *counter.entry(kind.as_str()).or_insert(0) += 1;
}

fn format_error_chain(error: &anyhow::Error) -> String {
    let mut chain = String::new();
    for (idx, cause) in error.chain().enumerate() {
        if idx > 0 {
            chain.push_str(" | ");
        }
        chain.push_str(&cause.to_string());
    }
    chain
}

impl WorkerPool {
    pub fn new(
        sqlite_path: impl Into<PathBuf>,
        queue: TaskQueue,
        claim_batch_size: u32,
        workers_per_kind: u32,
    ) -> Self {
        Self {
            sqlite_path: sqlite_path.into(),
            queue,
            handlers: BTreeMap::new(),
            claim_batch_size: claim_batch_size.max(1),
            workers_per_kind: workers_per_kind.max(1) as usize,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            warn!(kind = kind.as_str(), "task handler replaced an existing registration");
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// One scheduling pass: claim due tasks for every registered kind and
    /// run them to completion. Handler failures are routed through the
    /// queue's retry path and never propagate out of the pool.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<PoolRunReport> {
        let mut report = PoolRunReport::default();

        for (kind, handler) in &self.handlers {
            let claim_store = SqliteStore::open(&self.sqlite_path)
                .context("failed to open sqlite store for task claim")?;
            let limit = self
                .claim_batch_size
                .min(self.workers_per_kind as u32);
            let tasks = self.queue.claim(&claim_store, *kind, now, limit)?;
            report.claimed += tasks.len() as u64;

            let mut workers: JoinSet<(ScheduledTaskRow, Result<TaskOutcome>)> = JoinSet::new();
            for task in tasks {
                let handler = Arc::clone(handler);
                let sqlite_path = self.sqlite_path.clone();
                workers.spawn_blocking(move || {
                    let outcome = run_task(&sqlite_path, handler.as_ref(), &task, now);
                    (task, outcome)
                });
            }

            while let Some(joined) = workers.join_next().await {
                let (task, outcome) = match joined {
                    Ok(value) => value,
                    Err(join_error) => {
                        // a panicking handler loses its lease and is
                        // redelivered after the lease timeout
                        error!(error = %join_error, "task worker panicked");
                        continue;
                    }
                };
                self.settle(&claim_store, &task, outcome, now, &mut report)?;
            }
        }

        Ok(report)
    }

    fn settle(
        &self,
        store: &SqliteStore,
        task: &ScheduledTaskRow,
        outcome: Result<TaskOutcome>,
        now: DateTime<Utc>,
        report: &mut PoolRunReport,
    ) -> Result<()> {
        match outcome {
            Ok(TaskOutcome::Done) => {
                self.queue.complete(store, task)?;
                report.completed += 1;
                bump(&mut report.completed_by_kind, task.kind);
            }
            Ok(TaskOutcome::Retry(reason)) => {
                bump(&mut report.failed_by_kind, task.kind);
                match self.queue.fail(store, task, &reason, now)? {
                    FailOutcome::Rescheduled { delay } => {
                        report.rescheduled += 1;
                        warn!(
                            task_id = %task.task_id,
                            campaign_id = %task.campaign_id,
                            kind = task.kind.as_str(),
                            attempt = task.attempt,
                            retry_in_secs = delay.num_seconds(),
                            reason = %reason,
                            "task rescheduled"
                        );
                    }
                    FailOutcome::Dead => {
                        report.dead += 1;
                        error!(
                            task_id = %task.task_id,
                            campaign_id = %task.campaign_id,
                            kind = task.kind.as_str(),
                            reason = %reason,
                            "task moved to dead set"
                        );
                    }
                }
            }
            Err(err) => {
                let detail = format_error_chain(&err);
                bump(&mut report.failed_by_kind, task.kind);
                match self.queue.fail(store, task, &detail, now)? {
                    FailOutcome::Rescheduled { .. } => report.rescheduled += 1,
                    FailOutcome::Dead => report.dead += 1,
                }
                error!(
                    task_id = %task.task_id,
                    campaign_id = %task.campaign_id,
                    kind = task.kind.as_str(),
                    error = %detail,
                    "task handler failed"
                );
            }
        }
        Ok(())
    }
}

fn run_task(
    sqlite_path: &Path,
    handler: &dyn TaskHandler,
    task: &ScheduledTaskRow,
    now: DateTime<Utc>,
) -> Result<TaskOutcome> {
    let store = SqliteStore::open(sqlite_path).with_context(|| {
        format!(
            "failed to open sqlite db for {} task",
            task.kind.as_str()
        )
    })?;
    handler.run(&store, task, now)
}
