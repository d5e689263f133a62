use crate::{load_campaign, mark_internal_error, owner_credentials, record_duplicate_delivery};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use promobot_core_types::{CampaignStatus, ScheduledTaskRow, TaskKind};
use promobot_ledger::LedgerClient;
use promobot_platform::SocialPlatform;
use promobot_queue::{TaskHandler, TaskOutcome};
use promobot_rewards::DistributionRuntime;
use promobot_storage::SqliteStore;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Final settlement: one last payout pass for stragglers, the ledger
/// expiry call (which returns the unspent reserve to the owner), a closing
/// summary post, and the move to the terminal state.
pub struct ExpireHandler {
    distributor: DistributionRuntime,
    platform: Arc<dyn SocialPlatform>,
    ledger: Arc<dyn LedgerClient>,
}

impl ExpireHandler {
    pub fn new(
        distributor: DistributionRuntime,
        platform: Arc<dyn SocialPlatform>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        Self {
            distributor,
            platform,
            ledger,
        }
    }
}

impl TaskHandler for ExpireHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ExpireCampaign
    }

    fn run(
        &self,
        store: &SqliteStore,
        task: &ScheduledTaskRow,
        _now: DateTime<Utc>,
    ) -> Result<TaskOutcome> {
        let Some(campaign) = load_campaign(store, &task.campaign_id)? else {
            warn!(campaign_id = %task.campaign_id, "expire task for unknown campaign");
            return Ok(TaskOutcome::Done);
        };

        match campaign.status {
            CampaignStatus::RewardDistributionInProgress => {}
            CampaignStatus::InternalError => return Ok(TaskOutcome::Done),
            _ => {
                record_duplicate_delivery(store, &campaign, "expire")?;
                return Ok(TaskOutcome::Done);
            }
        }

        // Straggler pass. Rows that failed during the reward stage are
        // still unpaid and eligible here; a failure at this point is logged
        // and settlement continues.
        match self.distributor.distribute(store, &campaign) {
            Ok(report) if !report.success => {
                warn!(
                    campaign_id = %campaign.campaign_id,
                    users_failed = report.users_failed,
                    "straggler payout pass ended with failures"
                );
            }
            Ok(_) => {}
            Err(error) => {
                warn!(campaign_id = %campaign.campaign_id, error = %format!("{error:#}"), "straggler payout pass errored");
            }
        }

        let receipt = match self
            .ledger
            .expire_campaign(&campaign.ledger_ref, &campaign.owner_user_id)
        {
            Ok(receipt) => receipt,
            Err(error) if error.is_retryable() => {
                return Ok(TaskOutcome::Retry(format!("ledger expire failed: {error}")));
            }
            Err(error) => {
                mark_internal_error(
                    store,
                    &campaign.campaign_id,
                    "expire",
                    "ledger expire call rejected",
                    Some(&error.to_string()),
                )?;
                return Ok(TaskOutcome::Done);
            }
        };

        store
            .update_campaign_status(&campaign.campaign_id, CampaignStatus::RewardsDistributed)
            .context("failed moving campaign to rewards_distributed")?;
        let paid_total = store.paid_total_for_campaign(&campaign.campaign_id)?;
        store.record_lifecycle_event(
            &campaign.campaign_id,
            "expire",
            "info",
            "campaign expired and settled",
            Some(&json!({ "tx_ref": receipt.tx_ref, "paid_total": paid_total }).to_string()),
        )?;
        info!(campaign_id = %campaign.campaign_id, paid_total, "campaign settled");

        match owner_credentials(store, &campaign)? {
            Some(credentials) => {
                let text = format!(
                    "That's a wrap: this campaign is settled, with {paid_total} paid out in rewards. Thanks for taking part!"
                );
                if let Err(error) = self.platform.publish(
                    &credentials,
                    &text,
                    campaign.announce_post_id.as_deref(),
                ) {
                    warn!(campaign_id = %campaign.campaign_id, %error, "closing summary post failed");
                }
            }
            None => {
                warn!(
                    campaign_id = %campaign.campaign_id,
                    "owner credentials missing, skipping closing summary post"
                );
            }
        }

        Ok(TaskOutcome::Done)
    }
}
