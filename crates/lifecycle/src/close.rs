use crate::{load_campaign, mark_internal_error, owner_credentials, record_duplicate_delivery};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use promobot_config::CollectionConfig;
use promobot_core_types::{CampaignStatus, ScheduledTaskRow, TaskKind};
use promobot_ledger::LedgerClient;
use promobot_platform::SocialPlatform;
use promobot_queue::{TaskHandler, TaskOutcome, TaskQueue};
use promobot_storage::SqliteStore;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Closes a campaign: stops on-ledger accrual, flips the status to
/// awaiting-data, schedules the first collection pass, and announces the
/// close. The ledger call is not safely idempotent, so this stage never
/// asks for a retry; anything that goes wrong parks the campaign in
/// `InternalError` for an operator.
pub struct CloseHandler {
    queue: TaskQueue,
    platform: Arc<dyn SocialPlatform>,
    ledger: Arc<dyn LedgerClient>,
    collection: CollectionConfig,
}

impl CloseHandler {
    pub fn new(
        queue: TaskQueue,
        platform: Arc<dyn SocialPlatform>,
        ledger: Arc<dyn LedgerClient>,
        collection: CollectionConfig,
    ) -> Self {
        Self {
            queue,
            platform,
            ledger,
            collection,
        }
    }
}

impl TaskHandler for CloseHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::CloseCampaign
    }

    fn run(
        &self,
        store: &SqliteStore,
        task: &ScheduledTaskRow,
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome> {
        let Some(campaign) = load_campaign(store, &task.campaign_id)? else {
            warn!(campaign_id = %task.campaign_id, "close task for unknown campaign");
            return Ok(TaskOutcome::Done);
        };

        match campaign.status {
            CampaignStatus::Running => {}
            CampaignStatus::ClosingStarted => {
                // A redelivered close after a crash: the ledger call may or
                // may not have landed, and repeating it is not safe.
                mark_internal_error(
                    store,
                    &campaign.campaign_id,
                    "close",
                    "close was interrupted mid-flight, needs operator review",
                    None,
                )?;
                return Ok(TaskOutcome::Done);
            }
            CampaignStatus::InternalError => return Ok(TaskOutcome::Done),
            _ => {
                record_duplicate_delivery(store, &campaign, "close")?;
                return Ok(TaskOutcome::Done);
            }
        }

        let Some(credentials) = owner_credentials(store, &campaign)? else {
            mark_internal_error(
                store,
                &campaign.campaign_id,
                "close",
                "owner has no platform credentials on file",
                None,
            )?;
            return Ok(TaskOutcome::Done);
        };

        store
            .update_campaign_status(&campaign.campaign_id, CampaignStatus::ClosingStarted)
            .context("failed marking close as started")?;

        let receipt = match self.ledger.close_campaign(&campaign.ledger_ref) {
            Ok(receipt) => receipt,
            Err(error) => {
                mark_internal_error(
                    store,
                    &campaign.campaign_id,
                    "close",
                    "ledger close call failed",
                    Some(&error.to_string()),
                )?;
                return Ok(TaskOutcome::Done);
            }
        };

        store
            .update_campaign_status(&campaign.campaign_id, CampaignStatus::AwaitingEngagementData)
            .context("failed marking campaign as awaiting data")?;
        store.record_lifecycle_event(
            &campaign.campaign_id,
            "close",
            "info",
            "campaign closed on the ledger",
            Some(&json!({ "tx_ref": receipt.tx_ref }).to_string()),
        )?;

        let first_collect_at =
            now + Duration::seconds(self.collection.close_collect_delay_seconds as i64);
        self.queue.enqueue(
            store,
            TaskKind::CollectEngagements,
            &campaign.campaign_id,
            first_collect_at,
            self.collection.max_attempts,
            Some(crate::collect_payload(1)),
        )?;
        info!(
            campaign_id = %campaign.campaign_id,
            collect_at = %first_collect_at,
            "campaign closed, first collection pass scheduled"
        );

        // The close is already committed on the ledger, so a failed
        // announcement only costs visibility, not correctness.
        let text = "This campaign is now closed. Engagements are being tallied and rewards go out shortly.";
        if let Err(error) =
            self.platform
                .publish(&credentials, text, campaign.announce_post_id.as_deref())
        {
            warn!(campaign_id = %campaign.campaign_id, %error, "close announcement failed");
            store.record_lifecycle_event(
                &campaign.campaign_id,
                "close",
                "warn",
                "close announcement post failed",
                Some(&json!({ "error": error.to_string() }).to_string()),
            )?;
        }

        Ok(TaskOutcome::Done)
    }
}
