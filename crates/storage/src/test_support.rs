use super::SqliteStore;
use chrono::{Duration, Utc};
use promobot_core_types::{
    new_id, CampaignRow, CampaignStatus, EngagementKind, EngagementRow, PaymentStatus,
    RewardCurrency, UserRow,
};
use std::path::Path;
use tempfile::TempDir;

pub(crate) fn open_migrated_store() -> (SqliteStore, TempDir) {
    let dir = tempfile::tempdir().expect("create tempdir");
    let db_path = dir.path().join("promobot-test.db");
    let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let mut store = SqliteStore::open(&db_path).expect("open store");
    store.run_migrations(&migrations).expect("run migrations");
    (store, dir)
}

pub(crate) fn sample_campaign(campaign_id: &str) -> CampaignRow {
    let now = Utc::now();
    CampaignRow {
        campaign_id: campaign_id.to_string(),
        owner_user_id: "owner-1".to_string(),
        reward_currency: RewardCurrency::Native,
        token_id: None,
        rate_like: 1,
        rate_repost: 2,
        rate_quote: 5,
        rate_reply: 3,
        budget: 1_000,
        claimed_amount: 0,
        status: CampaignStatus::Running,
        announce_post_id: Some("post-1".to_string()),
        close_time: now - Duration::minutes(1),
        expiry_time: now + Duration::days(1),
        ledger_ref: "ledger-ref-1".to_string(),
    }
}

pub(crate) fn sample_engagement(
    campaign_id: &str,
    user_id: &str,
    kind: EngagementKind,
) -> EngagementRow {
    EngagementRow {
        engagement_id: new_id(),
        campaign_id: campaign_id.to_string(),
        user_id: user_id.to_string(),
        kind,
        observed_ts: None,
        recorded_ts: Utc::now(),
        is_valid_timing: true,
        is_bot_engagement: false,
        payment_status: PaymentStatus::Unpaid,
        content: None,
        platform_ref: format!("{}:{}", kind.as_str(), user_id),
    }
}

pub(crate) fn sample_user(user_id: &str) -> UserRow {
    UserRow {
        user_id: user_id.to_string(),
        platform_handle: format!("@{user_id}"),
        wallet_address: Some(format!("wallet-{user_id}")),
        lifetime_reward: 0,
        platform_token: Some("token".to_string()),
        platform_token_secret: Some("secret".to_string()),
    }
}
