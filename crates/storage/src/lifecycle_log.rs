use super::{parse_rfc3339, SqliteStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use promobot_core_types::LifecycleLogRow;
use rusqlite::params;

impl SqliteStore {
    /// Appends one audit entry for a campaign stage. Entries are never
    /// updated or deleted; this trail is the only surface for diagnosing
    /// stuck campaigns.
    pub fn record_lifecycle_event(
        &self,
        campaign_id: &str,
        stage: &str,
        severity: &str,
        message: &str,
        metadata_json: Option<&str>,
    ) -> Result<()> {
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO lifecycle_log(log_id, campaign_id, ts, stage, severity, message, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    promobot_core_types::new_id(),
                    campaign_id,
                    Utc::now().to_rfc3339(),
                    stage,
                    severity,
                    message,
                    metadata_json,
                ],
            )
        })
        .context("failed to insert lifecycle log entry")?;
        Ok(())
    }

    pub fn list_lifecycle_events(&self, campaign_id: &str) -> Result<Vec<LifecycleLogRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT log_id, campaign_id, ts, stage, severity, message, metadata_json
                 FROM lifecycle_log WHERE campaign_id = ?1 ORDER BY ts ASC, log_id ASC",
            )
            .context("failed to prepare lifecycle log query")?;
        let mut rows = stmt
            .query(params![campaign_id])
            .context("failed querying lifecycle log")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context("failed iterating lifecycle log rows")? {
            let ts_raw: String = row.get(2).context("failed reading lifecycle_log.ts")?;
            let ts: DateTime<Utc> = parse_rfc3339(&ts_raw, "lifecycle_log.ts")?;
            out.push(LifecycleLogRow {
                log_id: row.get(0).context("failed reading lifecycle_log.log_id")?,
                campaign_id: row
                    .get(1)
                    .context("failed reading lifecycle_log.campaign_id")?,
                ts,
                stage: row.get(3).context("failed reading lifecycle_log.stage")?,
                severity: row.get(4).context("failed reading lifecycle_log.severity")?,
                message: row.get(5).context("failed reading lifecycle_log.message")?,
                metadata_json: row
                    .get(6)
                    .context("failed reading lifecycle_log.metadata_json")?,
            });
        }
        Ok(out)
    }

    pub fn lifecycle_event_count(&self, campaign_id: &str, stage: &str) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM lifecycle_log WHERE campaign_id = ?1 AND stage = ?2",
                params![campaign_id, stage],
                |row| row.get(0),
            )
            .context("failed counting lifecycle log entries")?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_migrated_store;

    #[test]
    fn entries_append_in_order_with_metadata() {
        let (store, _dir) = open_migrated_store();
        store
            .record_lifecycle_event("c1", "close", "info", "campaign closed", None)
            .expect("record");
        store
            .record_lifecycle_event(
                "c1",
                "collect",
                "warn",
                "platform unreachable",
                Some(r#"{"attempt":2}"#),
            )
            .expect("record");
        store
            .record_lifecycle_event("c2", "close", "info", "campaign closed", None)
            .expect("record");

        let events = store.list_lifecycle_events("c1").expect("list");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stage, "close");
        assert_eq!(events[1].severity, "warn");
        assert_eq!(events[1].metadata_json.as_deref(), Some(r#"{"attempt":2}"#));
        assert_eq!(store.lifecycle_event_count("c1", "collect").expect("count"), 1);
        assert_eq!(store.lifecycle_event_count("c1", "reward").expect("count"), 0);
    }
}
