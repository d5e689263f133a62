use super::{parse_opt_rfc3339, parse_rfc3339, SqliteStore};
use anyhow::{anyhow, Context, Result};
use promobot_core_types::{EngagementKind, EngagementRow, PaymentStatus};
use rusqlite::{params, Row};

use crate::EngagementStats;

const ENGAGEMENT_COLUMNS: &str = "engagement_id, campaign_id, user_id, kind, observed_ts,
    recorded_ts, is_valid_timing, is_bot_engagement, payment_status, content, platform_ref";

struct RawEngagementRow {
    engagement_id: String,
    campaign_id: String,
    user_id: String,
    kind: String,
    observed_ts: Option<String>,
    recorded_ts: String,
    is_valid_timing: i64,
    is_bot_engagement: i64,
    payment_status: String,
    content: Option<String>,
    platform_ref: String,
}

fn raw_engagement_from_row(row: &Row<'_>) -> rusqlite::Result<RawEngagementRow> {
    Ok(RawEngagementRow {
        engagement_id: row.get(0)?,
        campaign_id: row.get(1)?,
        user_id: row.get(2)?,
        kind: row.get(3)?,
        observed_ts: row.get(4)?,
        recorded_ts: row.get(5)?,
        is_valid_timing: row.get(6)?,
        is_bot_engagement: row.get(7)?,
        payment_status: row.get(8)?,
        content: row.get(9)?,
        platform_ref: row.get(10)?,
    })
}

fn engagement_from_raw(raw: RawEngagementRow) -> Result<EngagementRow> {
    let kind = EngagementKind::parse(&raw.kind).ok_or_else(|| {
        anyhow!("unknown engagement kind {:?} for {}", raw.kind, raw.engagement_id)
    })?;
    let payment_status = PaymentStatus::parse(&raw.payment_status).ok_or_else(|| {
        anyhow!(
            "unknown payment status {:?} for {}",
            raw.payment_status,
            raw.engagement_id
        )
    })?;
    Ok(EngagementRow {
        observed_ts: parse_opt_rfc3339(raw.observed_ts, "engagements.observed_ts")?,
        recorded_ts: parse_rfc3339(&raw.recorded_ts, "engagements.recorded_ts")?,
        engagement_id: raw.engagement_id,
        campaign_id: raw.campaign_id,
        user_id: raw.user_id,
        kind,
        is_valid_timing: raw.is_valid_timing != 0,
        is_bot_engagement: raw.is_bot_engagement != 0,
        payment_status,
        content: raw.content,
        platform_ref: raw.platform_ref,
    })
}

impl SqliteStore {
    /// Inserts an engagement, ignoring duplicates of the same
    /// (campaign, user, kind, platform_ref). Returns whether a row was
    /// written, so callers can count fresh rows versus redeliveries.
    pub fn insert_engagement(&self, row: &EngagementRow) -> Result<bool> {
        let written = self
            .execute_with_retry(|conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO engagements(
                        engagement_id, campaign_id, user_id, kind, observed_ts,
                        recorded_ts, is_valid_timing, is_bot_engagement,
                        payment_status, content, platform_ref
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        &row.engagement_id,
                        &row.campaign_id,
                        &row.user_id,
                        row.kind.as_str(),
                        row.observed_ts.map(|ts| ts.to_rfc3339()),
                        row.recorded_ts.to_rfc3339(),
                        row.is_valid_timing as i64,
                        row.is_bot_engagement as i64,
                        row.payment_status.as_str(),
                        &row.content,
                        &row.platform_ref,
                    ],
                )
            })
            .with_context(|| format!("failed to insert engagement for campaign {}", row.campaign_id))?;
        Ok(written > 0)
    }

    pub fn engagement_count_by_kind(&self, campaign_id: &str, kind: EngagementKind) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM engagements WHERE campaign_id = ?1 AND kind = ?2",
                params![campaign_id, kind.as_str()],
                |row| row.get(0),
            )
            .context("failed to count engagements by kind")?;
        Ok(count.max(0) as u64)
    }

    pub fn engagement_stats(&self, campaign_id: &str) -> Result<EngagementStats> {
        let (total, valid, bots): (i64, i64, i64) = self
            .conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN is_valid_timing = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_bot_engagement = 1 THEN 1 ELSE 0 END), 0)
                 FROM engagements WHERE campaign_id = ?1",
                params![campaign_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("failed to compute engagement stats")?;
        let total = total.max(0) as u64;
        let valid = valid.max(0) as u64;
        Ok(EngagementStats {
            total,
            valid,
            suspicious: total.saturating_sub(valid),
            bots: bots.max(0) as u64,
        })
    }

    /// Unpaid, valid-timing, non-bot engagements: the distributor's input.
    pub fn list_payable_engagements(&self, campaign_id: &str) -> Result<Vec<EngagementRow>> {
        let query = format!(
            "SELECT {ENGAGEMENT_COLUMNS} FROM engagements
             WHERE campaign_id = ?1
               AND payment_status = 'unpaid'
               AND is_valid_timing = 1
               AND is_bot_engagement = 0
             ORDER BY user_id ASC, recorded_ts ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&query)
            .context("failed to prepare payable engagements query")?;
        let mut rows = stmt
            .query(params![campaign_id])
            .context("failed querying payable engagements")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context("failed iterating payable engagements")? {
            out.push(engagement_from_raw(raw_engagement_from_row(row)?)?);
        }
        Ok(out)
    }

    /// Flips a batch of engagement rows to paid. Rows already paid are left
    /// untouched, so a retried payout cannot double-mark.
    pub fn mark_engagements_paid(&self, engagement_ids: &[String]) -> Result<usize> {
        let mut changed = 0usize;
        for engagement_id in engagement_ids {
            changed += self
                .execute_with_retry(|conn| {
                    conn.execute(
                        "UPDATE engagements SET payment_status = 'paid'
                         WHERE engagement_id = ?1 AND payment_status = 'unpaid'",
                        params![engagement_id],
                    )
                })
                .with_context(|| format!("failed marking engagement {} paid", engagement_id))?;
        }
        Ok(changed)
    }

    pub fn paid_total_for_campaign(&self, campaign_id: &str) -> Result<u64> {
        // Cross-check amount for audits: rates are resolved per kind here so
        // the sum reflects what the distributor owed at payout time.
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(
                    CASE e.kind
                        WHEN 'like' THEN c.rate_like
                        WHEN 'repost' THEN c.rate_repost
                        WHEN 'quote' THEN c.rate_quote
                        WHEN 'reply' THEN c.rate_reply
                        ELSE 0
                    END), 0)
                 FROM engagements e
                 JOIN campaigns c ON c.campaign_id = e.campaign_id
                 WHERE e.campaign_id = ?1 AND e.payment_status = 'paid'",
                params![campaign_id],
                |row| row.get(0),
            )
            .context("failed to sum paid engagement amounts")?;
        Ok(total.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_migrated_store, sample_campaign, sample_engagement};
    use promobot_core_types::new_id;

    #[test]
    fn duplicate_engagement_is_ignored() {
        let (store, _dir) = open_migrated_store();
        store.insert_campaign(&sample_campaign("c1")).expect("campaign");

        let first = sample_engagement("c1", "u1", EngagementKind::Like);
        assert!(store.insert_engagement(&first).expect("insert"));

        // same (campaign, user, kind, platform_ref), fresh id
        let mut dup = first.clone();
        dup.engagement_id = new_id();
        assert!(!store.insert_engagement(&dup).expect("insert dup"));

        assert_eq!(
            store
                .engagement_count_by_kind("c1", EngagementKind::Like)
                .expect("count"),
            1
        );
    }

    #[test]
    fn stats_split_valid_suspicious_and_bots() {
        let (store, _dir) = open_migrated_store();
        store.insert_campaign(&sample_campaign("c1")).expect("campaign");

        let valid = sample_engagement("c1", "u1", EngagementKind::Like);
        store.insert_engagement(&valid).expect("insert");

        let mut late = sample_engagement("c1", "u2", EngagementKind::Repost);
        late.is_valid_timing = false;
        late.payment_status = PaymentStatus::Suspended;
        store.insert_engagement(&late).expect("insert");

        let mut bot = sample_engagement("c1", "u3", EngagementKind::Quote);
        bot.is_bot_engagement = true;
        store.insert_engagement(&bot).expect("insert");

        let stats = store.engagement_stats("c1").expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.valid, 2);
        assert_eq!(stats.suspicious, 1);
        assert_eq!(stats.bots, 1);
    }

    #[test]
    fn payable_excludes_bots_invalid_and_paid() {
        let (store, _dir) = open_migrated_store();
        store.insert_campaign(&sample_campaign("c1")).expect("campaign");

        let payable = sample_engagement("c1", "u1", EngagementKind::Like);
        store.insert_engagement(&payable).expect("insert");

        let mut bot = sample_engagement("c1", "u2", EngagementKind::Like);
        bot.is_bot_engagement = true;
        store.insert_engagement(&bot).expect("insert");

        let mut late = sample_engagement("c1", "u3", EngagementKind::Like);
        late.is_valid_timing = false;
        late.payment_status = PaymentStatus::Suspended;
        store.insert_engagement(&late).expect("insert");

        let rows = store.list_payable_engagements("c1").expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, "u1");

        store
            .mark_engagements_paid(&[rows[0].engagement_id.clone()])
            .expect("mark paid");
        assert!(store.list_payable_engagements("c1").expect("list").is_empty());
    }

    #[test]
    fn mark_paid_is_idempotent() {
        let (store, _dir) = open_migrated_store();
        store.insert_campaign(&sample_campaign("c1")).expect("campaign");
        let row = sample_engagement("c1", "u1", EngagementKind::Repost);
        store.insert_engagement(&row).expect("insert");

        let ids = vec![row.engagement_id.clone()];
        assert_eq!(store.mark_engagements_paid(&ids).expect("first"), 1);
        assert_eq!(store.mark_engagements_paid(&ids).expect("second"), 0);
        assert_eq!(store.paid_total_for_campaign("c1").expect("total"), 2);
    }
}
