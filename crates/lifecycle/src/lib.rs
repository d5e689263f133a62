//! Campaign lifecycle stage handlers. One handler per queue task kind;
//! each drives a campaign one state forward and enqueues the next stage,
//! logging every transition, skip, and error to the lifecycle log.

use anyhow::{Context, Result};
use promobot_core_types::{CampaignRow, CampaignStatus, ScheduledTaskRow};
use promobot_platform::PlatformCredentials;
use promobot_storage::SqliteStore;
use serde_json::json;
use tracing::warn;

mod close;
mod collect;
mod expire;
mod reward;

pub use close::CloseHandler;
pub use collect::CollectHandler;
pub use expire::ExpireHandler;
pub use reward::RewardHandler;

fn load_campaign(store: &SqliteStore, campaign_id: &str) -> Result<Option<CampaignRow>> {
    store
        .campaign_by_id(campaign_id)
        .with_context(|| format!("failed loading campaign {campaign_id}"))
}

/// The campaign owner's platform credentials, if they are on file.
fn owner_credentials(
    store: &SqliteStore,
    campaign: &CampaignRow,
) -> Result<Option<PlatformCredentials>> {
    let owner = store
        .user_by_id(&campaign.owner_user_id)
        .with_context(|| format!("failed loading owner {}", campaign.owner_user_id))?;
    Ok(owner.and_then(|user| {
        match (user.platform_token, user.platform_token_secret) {
            (Some(token), Some(secret)) => Some(PlatformCredentials::new(token, secret)),
            _ => None,
        }
    }))
}

/// Parks the campaign in `InternalError` with an error entry in the
/// lifecycle log. Used for failures that must not be retried blindly.
fn mark_internal_error(
    store: &SqliteStore,
    campaign_id: &str,
    stage: &str,
    message: &str,
    detail: Option<&str>,
) -> Result<()> {
    warn!(campaign_id, stage, message, detail, "campaign moved to internal_error");
    store
        .update_campaign_status(campaign_id, CampaignStatus::InternalError)
        .with_context(|| format!("failed flagging campaign {campaign_id} as internal_error"))?;
    let metadata = detail.map(|d| json!({ "detail": d }).to_string());
    store
        .record_lifecycle_event(campaign_id, stage, "error", message, metadata.as_deref())
        .context("failed recording internal_error event")?;
    Ok(())
}

/// Records the idempotent skip every stage performs when it finds the
/// campaign already past its own target state.
fn record_duplicate_delivery(
    store: &SqliteStore,
    campaign: &CampaignRow,
    stage: &str,
) -> Result<()> {
    store.record_lifecycle_event(
        &campaign.campaign_id,
        stage,
        "info",
        "duplicate delivery, stage already completed",
        Some(&json!({ "status": campaign.status.as_str() }).to_string()),
    )
}

/// Collection pass counter carried through the chain of collect tasks.
/// Missing or malformed payloads count as the first pass.
fn collect_pass(task: &ScheduledTaskRow) -> u32 {
    task.payload_json
        .as_deref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .and_then(|value| value.get("pass").and_then(|pass| pass.as_u64()))
        .map(|pass| pass.clamp(1, u32::MAX as u64) as u32)
        .unwrap_or(1)
}

fn collect_payload(pass: u32) -> String {
    json!({ "pass": pass }).to_string()
}
