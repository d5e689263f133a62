use crate::{
    collect_pass, collect_payload, load_campaign, mark_internal_error, owner_credentials,
    record_duplicate_delivery,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use promobot_collector::{sufficiency, CollectorService};
use promobot_core_types::{CampaignStatus, ScheduledTaskRow, TaskKind};
use promobot_queue::{TaskHandler, TaskOutcome, TaskQueue};
use promobot_storage::SqliteStore;
use serde_json::json;
use tracing::{info, warn};

/// Runs collection passes until the engagement data is judged sufficient,
/// then hands the campaign to reward distribution. Platform outages are
/// retried through the queue; once the fetch attempts for a pass are spent
/// the stage moves on with whatever data it has rather than stalling the
/// campaign forever.
pub struct CollectHandler {
    queue: TaskQueue,
    collector: CollectorService,
}

impl CollectHandler {
    pub fn new(queue: TaskQueue, collector: CollectorService) -> Self {
        Self { queue, collector }
    }

    fn advance_to_reward(
        &self,
        store: &SqliteStore,
        campaign_id: &str,
        reason: &str,
        total: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        store
            .update_campaign_status(campaign_id, CampaignStatus::RewardDistributionInProgress)
            .context("failed advancing campaign to reward distribution")?;
        store.record_lifecycle_event(
            campaign_id,
            "collect",
            "info",
            "engagement data sufficient, moving to reward distribution",
            Some(&json!({ "reason": reason, "total_engagements": total }).to_string()),
        )?;
        self.queue.enqueue(
            store,
            TaskKind::DistributeRewards,
            campaign_id,
            now,
            self.queue.policy().max_attempts,
            None,
        )?;
        Ok(())
    }
}

impl TaskHandler for CollectHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::CollectEngagements
    }

    fn run(
        &self,
        store: &SqliteStore,
        task: &ScheduledTaskRow,
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome> {
        let Some(campaign) = load_campaign(store, &task.campaign_id)? else {
            warn!(campaign_id = %task.campaign_id, "collect task for unknown campaign");
            return Ok(TaskOutcome::Done);
        };

        match campaign.status {
            CampaignStatus::AwaitingEngagementData => {}
            CampaignStatus::InternalError => return Ok(TaskOutcome::Done),
            _ => {
                record_duplicate_delivery(store, &campaign, "collect")?;
                return Ok(TaskOutcome::Done);
            }
        }

        let Some(credentials) = owner_credentials(store, &campaign)? else {
            mark_internal_error(
                store,
                &campaign.campaign_id,
                "collect",
                "owner has no platform credentials on file",
                None,
            )?;
            return Ok(TaskOutcome::Done);
        };

        let pass = collect_pass(task);
        match self
            .collector
            .run_collection(store, &campaign, &credentials, now)
        {
            Ok(report) => {
                info!(
                    campaign_id = %campaign.campaign_id,
                    pass,
                    inserted = report.inserted,
                    duplicates = report.duplicates,
                    "collection pass completed"
                );
            }
            Err(error) if task.attempt >= task.max_attempts => {
                // The campaign keeps moving even when the platform never
                // came back: paying the engagements we did record beats
                // stalling everyone indefinitely.
                warn!(
                    campaign_id = %campaign.campaign_id,
                    attempt = task.attempt,
                    error = %error,
                    "collection attempts spent, proceeding with partial data"
                );
                store.record_lifecycle_event(
                    &campaign.campaign_id,
                    "collect",
                    "warn",
                    "collection attempts exhausted, proceeding with partial data",
                    Some(&json!({ "error": error.to_string(), "pass": pass }).to_string()),
                )?;
                let total = store.engagement_stats(&campaign.campaign_id)?.total;
                self.advance_to_reward(
                    store,
                    &campaign.campaign_id,
                    "fetch_attempts_exhausted",
                    total,
                    now,
                )?;
                return Ok(TaskOutcome::Done);
            }
            Err(error) => {
                return Ok(TaskOutcome::Retry(format!("collection pass failed: {error:#}")));
            }
        }

        let stats = store.engagement_stats(&campaign.campaign_id)?;
        let elapsed = now - campaign.close_time;
        match sufficiency::evaluate(stats.total, pass, elapsed, self.collector.config()) {
            Some(reason) => {
                self.advance_to_reward(
                    store,
                    &campaign.campaign_id,
                    reason.as_str(),
                    stats.total,
                    now,
                )?;
            }
            None => {
                let next_at = now
                    + Duration::seconds(self.collector.config().retry_interval_seconds as i64);
                self.queue.enqueue(
                    store,
                    TaskKind::CollectEngagements,
                    &campaign.campaign_id,
                    next_at,
                    self.collector.config().max_attempts,
                    Some(collect_payload(pass + 1)),
                )?;
                store.record_lifecycle_event(
                    &campaign.campaign_id,
                    "collect",
                    "info",
                    "collection continuing, data not yet sufficient",
                    Some(
                        &json!({
                            "pass": pass,
                            "total_engagements": stats.total,
                            "next_pass_at": next_at.to_rfc3339(),
                        })
                        .to_string(),
                    ),
                )?;
            }
        }

        Ok(TaskOutcome::Done)
    }
}
