use super::{parse_non_negative_i64, parse_rfc3339, u64_to_sql_i64, SqliteStore};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use promobot_core_types::{CampaignRow, CampaignStatus, RewardCurrency};
use rusqlite::{params, OptionalExtension, Row};

struct RawCampaign {
    campaign_id: String,
    owner_user_id: String,
    reward_currency: String,
    token_id: Option<String>,
    rate_like: i64,
    rate_repost: i64,
    rate_quote: i64,
    rate_reply: i64,
    budget: i64,
    claimed_amount: i64,
    status: String,
    announce_post_id: Option<String>,
    close_time: String,
    expiry_time: String,
    ledger_ref: String,
}

fn raw_campaign_from_row(row: &Row<'_>) -> rusqlite::Result<RawCampaign> {
    Ok(RawCampaign {
        campaign_id: row.get(0)?,
        owner_user_id: row.get(1)?,
        reward_currency: row.get(2)?,
        token_id: row.get(3)?,
        rate_like: row.get(4)?,
        rate_repost: row.get(5)?,
        rate_quote: row.get(6)?,
        rate_reply: row.get(7)?,
        budget: row.get(8)?,
        claimed_amount: row.get(9)?,
        status: row.get(10)?,
        announce_post_id: row.get(11)?,
        close_time: row.get(12)?,
        expiry_time: row.get(13)?,
        ledger_ref: row.get(14)?,
    })
}

fn campaign_from_raw(raw: RawCampaign) -> Result<CampaignRow> {
    let reward_currency = RewardCurrency::parse(&raw.reward_currency).ok_or_else(|| {
        anyhow!(
            "unknown reward_currency {:?} for campaign {}",
            raw.reward_currency,
            raw.campaign_id
        )
    })?;
    let status = CampaignStatus::parse(&raw.status).ok_or_else(|| {
        anyhow!(
            "unknown campaign status {:?} for campaign {}",
            raw.status,
            raw.campaign_id
        )
    })?;
    Ok(CampaignRow {
        rate_like: parse_non_negative_i64(raw.rate_like, "campaigns.rate_like")?,
        rate_repost: parse_non_negative_i64(raw.rate_repost, "campaigns.rate_repost")?,
        rate_quote: parse_non_negative_i64(raw.rate_quote, "campaigns.rate_quote")?,
        rate_reply: parse_non_negative_i64(raw.rate_reply, "campaigns.rate_reply")?,
        budget: parse_non_negative_i64(raw.budget, "campaigns.budget")?,
        claimed_amount: parse_non_negative_i64(raw.claimed_amount, "campaigns.claimed_amount")?,
        close_time: parse_rfc3339(&raw.close_time, "campaigns.close_time")?,
        expiry_time: parse_rfc3339(&raw.expiry_time, "campaigns.expiry_time")?,
        campaign_id: raw.campaign_id,
        owner_user_id: raw.owner_user_id,
        reward_currency,
        token_id: raw.token_id,
        status,
        announce_post_id: raw.announce_post_id,
        ledger_ref: raw.ledger_ref,
    })
}

const CAMPAIGN_COLUMNS: &str = "campaign_id, owner_user_id, reward_currency, token_id,
    rate_like, rate_repost, rate_quote, rate_reply, budget, claimed_amount,
    status, announce_post_id, close_time, expiry_time, ledger_ref";

impl SqliteStore {
    pub fn insert_campaign(&self, campaign: &CampaignRow) -> Result<()> {
        let rate_like = u64_to_sql_i64(campaign.rate_like, "campaigns.rate_like")?;
        let rate_repost = u64_to_sql_i64(campaign.rate_repost, "campaigns.rate_repost")?;
        let rate_quote = u64_to_sql_i64(campaign.rate_quote, "campaigns.rate_quote")?;
        let rate_reply = u64_to_sql_i64(campaign.rate_reply, "campaigns.rate_reply")?;
        let budget = u64_to_sql_i64(campaign.budget, "campaigns.budget")?;
        let claimed = u64_to_sql_i64(campaign.claimed_amount, "campaigns.claimed_amount")?;
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO campaigns(
                    campaign_id, owner_user_id, reward_currency, token_id,
                    rate_like, rate_repost, rate_quote, rate_reply,
                    budget, claimed_amount, status, announce_post_id,
                    close_time, expiry_time, ledger_ref
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    &campaign.campaign_id,
                    &campaign.owner_user_id,
                    campaign.reward_currency.as_str(),
                    &campaign.token_id,
                    rate_like,
                    rate_repost,
                    rate_quote,
                    rate_reply,
                    budget,
                    claimed,
                    campaign.status.as_str(),
                    &campaign.announce_post_id,
                    campaign.close_time.to_rfc3339(),
                    campaign.expiry_time.to_rfc3339(),
                    &campaign.ledger_ref,
                ],
            )
        })
        .with_context(|| format!("failed to insert campaign {}", campaign.campaign_id))?;
        Ok(())
    }

    pub fn campaign_by_id(&self, campaign_id: &str) -> Result<Option<CampaignRow>> {
        let query =
            format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE campaign_id = ?1 LIMIT 1");
        let raw = self
            .conn
            .query_row(&query, params![campaign_id], raw_campaign_from_row)
            .optional()
            .with_context(|| format!("failed querying campaign {}", campaign_id))?;
        raw.map(campaign_from_raw).transpose()
    }

    /// Campaigns whose close trigger is due: still running with a close time
    /// at or before `now`.
    pub fn list_campaigns_due_for_close(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT campaign_id FROM campaigns
                 WHERE status = ?1 AND close_time <= ?2
                 ORDER BY close_time ASC",
            )
            .context("failed to prepare due-for-close query")?;
        let mut rows = stmt
            .query(params![CampaignStatus::Running.as_str(), now.to_rfc3339()])
            .context("failed querying campaigns due for close")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context("failed iterating due-for-close rows")? {
            out.push(row.get(0).context("failed reading campaign_id")?);
        }
        Ok(out)
    }

    /// Writes a status change, refusing backward moves. Terminal states are
    /// never left automatically; `InternalError` is reachable from any
    /// non-terminal state.
    pub fn update_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<bool> {
        let current_raw: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM campaigns WHERE campaign_id = ?1",
                params![campaign_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed reading status for campaign {}", campaign_id))?;
        let Some(current_raw) = current_raw else {
            return Err(anyhow!("campaign not found: {}", campaign_id));
        };
        let current = CampaignStatus::parse(&current_raw)
            .ok_or_else(|| anyhow!("unknown campaign status {:?} for campaign {}", current_raw, campaign_id))?;

        if current == status {
            return Ok(false);
        }
        if current.is_terminal() {
            return Err(anyhow!(
                "refusing status change for campaign {}: {} is terminal",
                campaign_id,
                current.as_str()
            ));
        }
        if status != CampaignStatus::InternalError
            && status.sequence_index() <= current.sequence_index()
        {
            return Err(anyhow!(
                "refusing backward status change for campaign {}: {} -> {}",
                campaign_id,
                current.as_str(),
                status.as_str()
            ));
        }

        let changed = self
            .execute_with_retry(|conn| {
                conn.execute(
                    "UPDATE campaigns SET status = ?1 WHERE campaign_id = ?2 AND status = ?3",
                    params![status.as_str(), campaign_id, current.as_str()],
                )
            })
            .with_context(|| format!("failed updating status for campaign {}", campaign_id))?;
        Ok(changed > 0)
    }

    /// Adds the amount actually transferred to the campaign's claimed
    /// counter. Fails rather than letting the counter pass the budget.
    pub fn add_claimed_amount(&self, campaign_id: &str, amount: u64) -> Result<()> {
        let amount = u64_to_sql_i64(amount, "claimed_amount delta")?;
        let changed = self
            .execute_with_retry(|conn| {
                conn.execute(
                    "UPDATE campaigns
                     SET claimed_amount = claimed_amount + ?1
                     WHERE campaign_id = ?2 AND claimed_amount + ?1 <= budget",
                    params![amount, campaign_id],
                )
            })
            .with_context(|| format!("failed adding claimed amount for campaign {}", campaign_id))?;
        if changed == 0 {
            return Err(anyhow!(
                "claimed amount update for campaign {} would exceed budget",
                campaign_id
            ));
        }
        Ok(())
    }

}
