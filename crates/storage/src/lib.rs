use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;

pub use promobot_core_types::{
    CampaignRow, CampaignStatus, EngagementKind, EngagementRow, LifecycleLogRow, PaymentStatus,
    RewardCurrency, ScheduledTaskRow, TaskKind, TaskState, UserRow,
};

mod campaigns;
mod contention;
mod engagements;
mod lifecycle_log;
mod migrations;
mod tasks;
mod users;

#[cfg(test)]
pub(crate) mod test_support;

pub use contention::{sqlite_contention_snapshot, SqliteContentionSnapshot};

pub struct SqliteStore {
    conn: Connection,
}

/// Per-campaign engagement counts used by the collection sufficiency policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementStats {
    pub total: u64,
    pub valid: u64,
    pub suspicious: u64,
    pub bots: u64,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create sqlite parent dir: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite db: {}", path.display()))?;
        conn.busy_timeout(StdDuration::from_secs(5))
            .context("failed to set sqlite busy_timeout")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to set sqlite journal mode WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set sqlite synchronous NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable sqlite foreign keys")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )
        .context("failed to create schema_migrations table")?;

        Ok(Self { conn })
    }

    pub fn record_heartbeat(&self, component: &str, status: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO system_heartbeat(component, ts, status) VALUES (?1, datetime('now'), ?2)",
                rusqlite::params![component, status],
            )
            .context("failed to record heartbeat")?;
        Ok(())
    }
}

pub(crate) fn parse_rfc3339(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid {} rfc3339 value: {}", column, raw))
}

pub(crate) fn parse_opt_rfc3339(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_rfc3339(&value, column)).transpose()
}

pub(crate) fn u64_to_sql_i64(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} value {} exceeds sqlite integer range", column, value))
}

pub(crate) fn parse_non_negative_i64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{} has negative value {}", column, value))
}
