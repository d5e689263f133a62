use super::{parse_opt_rfc3339, parse_rfc3339, SqliteStore};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use promobot_core_types::{ScheduledTaskRow, TaskKind, TaskState};
use rusqlite::{params, OptionalExtension, Row};

const TASK_COLUMNS: &str = "task_id, kind, campaign_id, execute_at, attempt, max_attempts,
    payload_json, state, last_error, leased_at";

struct RawTaskRow {
    task_id: String,
    kind: String,
    campaign_id: String,
    execute_at: String,
    attempt: i64,
    max_attempts: i64,
    payload_json: Option<String>,
    state: String,
    last_error: Option<String>,
    leased_at: Option<String>,
}

fn raw_task_from_row(row: &Row<'_>) -> rusqlite::Result<RawTaskRow> {
    Ok(RawTaskRow {
        task_id: row.get(0)?,
        kind: row.get(1)?,
        campaign_id: row.get(2)?,
        execute_at: row.get(3)?,
        attempt: row.get(4)?,
        max_attempts: row.get(5)?,
        payload_json: row.get(6)?,
        state: row.get(7)?,
        last_error: row.get(8)?,
        leased_at: row.get(9)?,
    })
}

fn task_from_raw(raw: RawTaskRow) -> Result<ScheduledTaskRow> {
    let kind = TaskKind::parse(&raw.kind)
        .ok_or_else(|| anyhow!("unknown task kind {:?} for task {}", raw.kind, raw.task_id))?;
    let state = TaskState::parse(&raw.state)
        .ok_or_else(|| anyhow!("unknown task state {:?} for task {}", raw.state, raw.task_id))?;
    Ok(ScheduledTaskRow {
        execute_at: parse_rfc3339(&raw.execute_at, "scheduled_tasks.execute_at")?,
        leased_at: parse_opt_rfc3339(raw.leased_at, "scheduled_tasks.leased_at")?,
        attempt: u32::try_from(raw.attempt.max(1)).unwrap_or(1),
        max_attempts: u32::try_from(raw.max_attempts.max(1)).unwrap_or(1),
        task_id: raw.task_id,
        kind,
        campaign_id: raw.campaign_id,
        payload_json: raw.payload_json,
        state,
        last_error: raw.last_error,
    })
}

impl SqliteStore {
    /// Persists a pending task. The partial unique index on
    /// (campaign_id, kind) over pending rows makes re-enqueue idempotent:
    /// the insert is ignored and `false` comes back when a pending task of
    /// this kind already exists for the campaign.
    pub fn insert_task(&self, task: &ScheduledTaskRow) -> Result<bool> {
        let written = self
            .execute_with_retry(|conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO scheduled_tasks(
                        task_id, kind, campaign_id, execute_at, attempt,
                        max_attempts, payload_json, state, last_error, leased_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        &task.task_id,
                        task.kind.as_str(),
                        &task.campaign_id,
                        task.execute_at.to_rfc3339(),
                        i64::from(task.attempt),
                        i64::from(task.max_attempts),
                        &task.payload_json,
                        task.state.as_str(),
                        &task.last_error,
                        task.leased_at.map(|ts| ts.to_rfc3339()),
                    ],
                )
            })
            .with_context(|| {
                format!(
                    "failed to insert {} task for campaign {}",
                    task.kind.as_str(),
                    task.campaign_id
                )
            })?;
        Ok(written > 0)
    }

    /// Returns in-flight rows to pending once their lease has expired, so a
    /// crash mid-handler leaves the task re-claimable.
    pub fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> Result<usize> {
        let cutoff = (now - lease_timeout).to_rfc3339();
        let reclaimed = self
            .execute_with_retry(|conn| {
                conn.execute(
                    "UPDATE scheduled_tasks
                     SET state = 'pending', leased_at = NULL
                     WHERE state = 'in_flight' AND leased_at IS NOT NULL AND leased_at <= ?1",
                    params![cutoff],
                )
            })
            .context("failed reclaiming expired task leases")?;
        Ok(reclaimed)
    }

    /// Claims up to `limit` due pending tasks of one kind, flipping each to
    /// in-flight with a lease stamp. The flip is guarded on state so two
    /// pollers cannot claim the same row.
    pub fn claim_due_tasks(
        &self,
        kind: TaskKind,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ScheduledTaskRow>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks
             WHERE state = 'pending' AND kind = ?1 AND execute_at <= ?2
             ORDER BY execute_at ASC
             LIMIT ?3"
        );
        let mut stmt = self
            .conn
            .prepare(&query)
            .context("failed to prepare due tasks query")?;
        let mut rows = stmt
            .query(params![kind.as_str(), now.to_rfc3339(), limit.max(1) as i64])
            .context("failed querying due tasks")?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().context("failed iterating due task rows")? {
            candidates.push(task_from_raw(raw_task_from_row(row)?)?);
        }
        drop(rows);
        drop(stmt);

        let mut claimed = Vec::new();
        for mut task in candidates {
            let flipped = self
                .execute_with_retry(|conn| {
                    conn.execute(
                        "UPDATE scheduled_tasks
                         SET state = 'in_flight', leased_at = ?1
                         WHERE task_id = ?2 AND state = 'pending'",
                        params![now.to_rfc3339(), &task.task_id],
                    )
                })
                .with_context(|| format!("failed claiming task {}", task.task_id))?;
            if flipped > 0 {
                task.state = TaskState::InFlight;
                task.leased_at = Some(now);
                claimed.push(task);
            }
        }
        Ok(claimed)
    }

    /// Terminal success: the row is removed.
    pub fn complete_task(&self, task_id: &str) -> Result<()> {
        self.execute_with_retry(|conn| {
            conn.execute(
                "DELETE FROM scheduled_tasks WHERE task_id = ?1",
                params![task_id],
            )
        })
        .with_context(|| format!("failed completing task {}", task_id))?;
        Ok(())
    }

    /// Failure path: reschedule as pending at `next_execute_at` with the
    /// attempt counter bumped.
    pub fn reschedule_task(
        &self,
        task_id: &str,
        next_execute_at: DateTime<Utc>,
        next_attempt: u32,
        error: &str,
    ) -> Result<()> {
        let changed = self
            .execute_with_retry(|conn| {
                conn.execute(
                    "UPDATE scheduled_tasks
                     SET state = 'pending', execute_at = ?1, attempt = ?2,
                         last_error = ?3, leased_at = NULL
                     WHERE task_id = ?4 AND state = 'in_flight'",
                    params![
                        next_execute_at.to_rfc3339(),
                        i64::from(next_attempt),
                        error,
                        task_id
                    ],
                )
            })
            .with_context(|| format!("failed rescheduling task {}", task_id))?;
        if changed == 0 {
            return Err(anyhow!("task {} not in flight, cannot reschedule", task_id));
        }
        Ok(())
    }

    /// Attempts exhausted: park the task for operator inspection.
    pub fn mark_task_dead(&self, task_id: &str, error: &str) -> Result<()> {
        self.execute_with_retry(|conn| {
            conn.execute(
                "UPDATE scheduled_tasks
                 SET state = 'dead', last_error = ?1, leased_at = NULL
                 WHERE task_id = ?2",
                params![error, task_id],
            )
        })
        .with_context(|| format!("failed marking task {} dead", task_id))?;
        Ok(())
    }

    pub fn pending_task_exists(&self, campaign_id: &str, kind: TaskKind) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT task_id FROM scheduled_tasks
                 WHERE campaign_id = ?1 AND kind = ?2 AND state = 'pending'
                 LIMIT 1",
                params![campaign_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("failed checking for pending task")?;
        Ok(found.is_some())
    }

    pub fn task_by_id(&self, task_id: &str) -> Result<Option<ScheduledTaskRow>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE task_id = ?1");
        let raw = self
            .conn
            .query_row(&query, params![task_id], raw_task_from_row)
            .optional()
            .with_context(|| format!("failed querying task {}", task_id))?;
        raw.map(task_from_raw).transpose()
    }

    pub fn list_dead_tasks(&self) -> Result<Vec<ScheduledTaskRow>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE state = 'dead' ORDER BY execute_at ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&query)
            .context("failed to prepare dead tasks query")?;
        let mut rows = stmt.query([]).context("failed querying dead tasks")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context("failed iterating dead task rows")? {
            out.push(task_from_raw(raw_task_from_row(row)?)?);
        }
        Ok(out)
    }
}
