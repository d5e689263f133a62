use crate::{load_campaign, owner_credentials, record_duplicate_delivery};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use promobot_config::RewardsConfig;
use promobot_core_types::{CampaignStatus, ScheduledTaskRow, TaskKind};
use promobot_platform::SocialPlatform;
use promobot_queue::{TaskHandler, TaskOutcome, TaskQueue};
use promobot_rewards::DistributionRuntime;
use promobot_storage::SqliteStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the payout pass and schedules expiry. Expiry is scheduled no
/// matter how the payout went; stragglers get one more chance there and
/// the campaign must still settle.
pub struct RewardHandler {
    queue: TaskQueue,
    distributor: DistributionRuntime,
    platform: Arc<dyn SocialPlatform>,
    rewards: RewardsConfig,
}

impl RewardHandler {
    pub fn new(
        queue: TaskQueue,
        distributor: DistributionRuntime,
        platform: Arc<dyn SocialPlatform>,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            queue,
            distributor,
            platform,
            rewards,
        }
    }
}

impl TaskHandler for RewardHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::DistributeRewards
    }

    fn run(
        &self,
        store: &SqliteStore,
        task: &ScheduledTaskRow,
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome> {
        let Some(campaign) = load_campaign(store, &task.campaign_id)? else {
            warn!(campaign_id = %task.campaign_id, "reward task for unknown campaign");
            return Ok(TaskOutcome::Done);
        };

        match campaign.status {
            CampaignStatus::RewardDistributionInProgress => {}
            CampaignStatus::InternalError => return Ok(TaskOutcome::Done),
            _ => {
                record_duplicate_delivery(store, &campaign, "reward")?;
                return Ok(TaskOutcome::Done);
            }
        }

        let report = self.distributor.distribute(store, &campaign)?;
        if !report.success {
            warn!(
                campaign_id = %campaign.campaign_id,
                users_failed = report.users_failed,
                reserve_error = report.reserve_error.as_deref(),
                "payout pass ended with failures, expiry will take another run"
            );
        }

        // The audience hears about the outcome either way; a failed post is
        // a visibility problem, not a payout problem.
        match owner_credentials(store, &campaign)? {
            Some(credentials) => {
                let text = if report.users_rewarded > 0 {
                    format!(
                        "Rewards are out! {} participants received {} in total.",
                        report.users_rewarded, report.total_distributed
                    )
                } else {
                    "This campaign wrapped up with no qualifying engagements this round.".to_string()
                };
                if let Err(error) = self.platform.publish(
                    &credentials,
                    &text,
                    campaign.announce_post_id.as_deref(),
                ) {
                    warn!(campaign_id = %campaign.campaign_id, %error, "reward announcement failed");
                }
            }
            None => {
                warn!(
                    campaign_id = %campaign.campaign_id,
                    "owner credentials missing, skipping reward announcement"
                );
            }
        }

        let expire_at = now + Duration::seconds(self.rewards.expire_delay_seconds as i64);
        self.queue.enqueue(
            store,
            TaskKind::ExpireCampaign,
            &campaign.campaign_id,
            expire_at,
            self.queue.policy().max_attempts,
            None,
        )?;
        info!(
            campaign_id = %campaign.campaign_id,
            users_rewarded = report.users_rewarded,
            total_distributed = report.total_distributed,
            expire_at = %expire_at,
            "reward pass finished, expiry scheduled"
        );
        Ok(TaskOutcome::Done)
    }
}
