use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use promobot_config::CollectionConfig;
use promobot_core_types::{
    new_id, CampaignRow, EngagementKind, EngagementRow, PaymentStatus, RawEngagement,
};
use serde_json::json;
use promobot_platform::{PlatformCredentials, SocialPlatform};
use promobot_storage::SqliteStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub mod scoring;
pub mod sufficiency;
pub mod timing;

/// Outcome of one collection pass over a campaign's announcement post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub fetched: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub invalid_timing: u64,
    pub bots: u64,
}

/// Pulls engagements off the platform, validates them, and persists them.
/// Safe to run repeatedly for the same campaign; rows already recorded are
/// skipped by the storage layer's uniqueness constraint.
pub struct CollectorService {
    platform: Arc<dyn SocialPlatform>,
    config: CollectionConfig,
}

impl CollectorService {
    pub fn new(platform: Arc<dyn SocialPlatform>, config: CollectionConfig) -> Self {
        Self { platform, config }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn run_collection(
        &self,
        store: &SqliteStore,
        campaign: &CampaignRow,
        credentials: &PlatformCredentials,
        now: DateTime<Utc>,
    ) -> Result<CollectionReport> {
        let post_id = match &campaign.announce_post_id {
            Some(post_id) => post_id.as_str(),
            None => bail!(
                "campaign {} has no announcement post to collect from",
                campaign.campaign_id
            ),
        };

        let mut raw: Vec<RawEngagement> = Vec::new();
        raw.extend(
            self.platform
                .fetch_likes(credentials, post_id)
                .context("fetch likes")?,
        );
        raw.extend(
            self.platform
                .fetch_reposts(credentials, post_id)
                .context("fetch reposts")?,
        );

        // Quotes and replies carry their own timestamps and never change
        // once recorded, so a pass that already captured some does not go
        // back to the platform for that kind.
        let quotes_recorded = store
            .engagement_count_by_kind(&campaign.campaign_id, EngagementKind::Quote)
            .context("count recorded quotes")?;
        let replies_recorded = store
            .engagement_count_by_kind(&campaign.campaign_id, EngagementKind::Reply)
            .context("count recorded replies")?;
        if quotes_recorded + replies_recorded > 0 {
            debug!(
                campaign_id = %campaign.campaign_id,
                quotes = quotes_recorded,
                replies = replies_recorded,
                "quotes and replies already recorded, not re-fetching"
            );
            store
                .record_lifecycle_event(
                    &campaign.campaign_id,
                    "collect",
                    "info",
                    "collection_skipped",
                    Some(
                        &json!({
                            "kinds": ["quote", "reply"],
                            "quotes_recorded": quotes_recorded,
                            "replies_recorded": replies_recorded,
                        })
                        .to_string(),
                    ),
                )
                .context("record collection_skipped event")?;
        } else {
            raw.extend(
                self.platform
                    .fetch_quotes_and_replies(credentials, post_id, DateTime::UNIX_EPOCH)
                    .context("fetch quotes and replies")?,
            );
        }

        let grace = Duration::seconds(self.config.grace_window_seconds as i64);
        let mut score_cache: BTreeMap<String, f64> = BTreeMap::new();
        let mut report = CollectionReport {
            fetched: raw.len() as u64,
            ..CollectionReport::default()
        };

        for engagement in raw {
            let valid_timing = timing::timing_is_valid(
                engagement.kind,
                engagement.observed_ts,
                now,
                campaign.close_time,
                grace,
            );
            // Every row gets scored, late ones included; the bot flag has
            // to be trustworthy in the stats even when timing already rules
            // the row out of payment. Profile fetches are cached per pass.
            let score = self.score_for(credentials, &engagement.user_id, now, &mut score_cache);
            let is_bot = score >= self.config.bot_score_threshold;
            let payment_status = if valid_timing && !is_bot {
                PaymentStatus::Unpaid
            } else {
                PaymentStatus::Suspended
            };

            let row = EngagementRow {
                engagement_id: new_id(),
                campaign_id: campaign.campaign_id.clone(),
                user_id: engagement.user_id,
                kind: engagement.kind,
                observed_ts: engagement.observed_ts,
                recorded_ts: now,
                is_valid_timing: valid_timing,
                is_bot_engagement: is_bot,
                payment_status,
                content: engagement.content,
                platform_ref: engagement.platform_ref,
            };
            let inserted = store
                .insert_engagement(&row)
                .context("persist engagement")?;
            if inserted {
                report.inserted += 1;
                if !valid_timing {
                    report.invalid_timing += 1;
                }
                if is_bot {
                    report.bots += 1;
                }
            } else {
                report.duplicates += 1;
            }
        }

        debug!(
            campaign_id = %campaign.campaign_id,
            fetched = report.fetched,
            inserted = report.inserted,
            duplicates = report.duplicates,
            invalid_timing = report.invalid_timing,
            bots = report.bots,
            "collection pass finished"
        );
        Ok(report)
    }

    fn score_for(
        &self,
        credentials: &PlatformCredentials,
        user_id: &str,
        now: DateTime<Utc>,
        cache: &mut BTreeMap<String, f64>,
    ) -> f64 {
        if let Some(score) = cache.get(user_id) {
            return *score;
        }
        let score = match self.platform.fetch_user_profile(credentials, user_id) {
            Ok(Some(profile)) => scoring::bot_score(&profile, now),
            Ok(None) => {
                debug!(user_id, "no profile on the platform, treating as unverifiable");
                scoring::UNVERIFIABLE_SCORE
            }
            Err(error) => {
                // A failed profile lookup does not sink the whole pass; the
                // row lands as suspected-bot and a rerun can revisit nothing
                // because the insert is idempotent.
                warn!(user_id, %error, "profile fetch failed, treating as unverifiable");
                scoring::UNVERIFIABLE_SCORE
            }
        };
        cache.insert(user_id.to_string(), score);
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promobot_core_types::{CampaignStatus, EngagementKind, RewardCurrency, UserProfile};
    use promobot_platform::PaperSocialPlatform;
    use promobot_storage::SqliteStore;
    use std::path::Path;
    use tempfile::TempDir;

    fn open_store() -> (SqliteStore, TempDir) {
        let dir = tempfile::tempdir().expect("create tempdir");
        let db_path = dir.path().join("collector-test.db");
        let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        let mut store = SqliteStore::open(&db_path).expect("open store");
        store.run_migrations(&migrations).expect("run migrations");
        (store, dir)
    }

    fn campaign(store: &SqliteStore, close_time: DateTime<Utc>) -> CampaignRow {
        let row = CampaignRow {
            campaign_id: "camp-1".to_string(),
            owner_user_id: "owner-1".to_string(),
            reward_currency: RewardCurrency::Native,
            token_id: None,
            rate_like: 1,
            rate_repost: 2,
            rate_quote: 5,
            rate_reply: 3,
            budget: 1_000,
            claimed_amount: 0,
            status: CampaignStatus::AwaitingEngagementData,
            announce_post_id: Some("post-1".to_string()),
            close_time,
            expiry_time: close_time + Duration::days(1),
            ledger_ref: "ledger-1".to_string(),
        };
        store.insert_campaign(&row).expect("insert campaign");
        row
    }

    fn like(user: &str) -> RawEngagement {
        RawEngagement {
            user_id: user.to_string(),
            kind: EngagementKind::Like,
            observed_ts: None,
            content: None,
            platform_ref: format!("like:{user}"),
        }
    }

    fn repost(user: &str) -> RawEngagement {
        RawEngagement {
            user_id: user.to_string(),
            kind: EngagementKind::Repost,
            observed_ts: None,
            content: None,
            platform_ref: format!("repost:{user}"),
        }
    }

    fn honest_profile(user: &str) -> UserProfile {
        UserProfile {
            user_id: user.to_string(),
            handle: format!("@{user}"),
            created_at: Some(Utc::now() - Duration::days(700)),
            followers: 200,
            following: 150,
            posts_count: 800,
            has_default_avatar: false,
        }
    }

    fn creds() -> PlatformCredentials {
        PlatformCredentials::new("token", "secret")
    }

    #[test]
    fn likes_in_grace_are_valid_and_late_reposts_are_suspended() {
        let (store, _dir) = open_store();
        let platform = Arc::new(PaperSocialPlatform::new());
        let close_time = Utc::now() - Duration::minutes(10);
        let campaign = campaign(&store, close_time);
        for user in ["u1", "u2", "u3"] {
            platform.seed_engagement("post-1", like(user));
            platform.seed_profile(honest_profile(user));
        }
        let collector = CollectorService::new(platform.clone(), CollectionConfig::default());

        // First pass runs inside the grace window.
        let report = collector
            .run_collection(&store, &campaign, &creds(), close_time + Duration::minutes(15))
            .expect("first pass");
        assert_eq!(report.inserted, 3);
        assert_eq!(report.invalid_timing, 0);

        // Two reposts only show up well after the grace window has closed.
        for user in ["u4", "u5"] {
            platform.seed_engagement("post-1", repost(user));
            platform.seed_profile(honest_profile(user));
        }
        let report = collector
            .run_collection(&store, &campaign, &creds(), close_time + Duration::hours(2))
            .expect("second pass");
        assert_eq!(report.duplicates, 3);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.invalid_timing, 2);

        let stats = store.engagement_stats("camp-1").expect("stats");
        assert_eq!(stats.total, 5);
        assert_eq!(stats.valid, 3);
        assert_eq!(stats.suspicious, 2);
        assert_eq!(store.list_payable_engagements("camp-1").expect("payable").len(), 3);
    }

    #[test]
    fn recorded_quotes_are_not_refetched() {
        let (store, _dir) = open_store();
        let platform = Arc::new(PaperSocialPlatform::new());
        let close_time = Utc::now() - Duration::minutes(1);
        let campaign = campaign(&store, close_time);
        platform.seed_engagement(
            "post-1",
            RawEngagement {
                user_id: "u1".to_string(),
                kind: EngagementKind::Quote,
                observed_ts: Some(close_time - Duration::minutes(30)),
                content: Some("great campaign".to_string()),
                platform_ref: "quote:u1".to_string(),
            },
        );
        platform.seed_profile(honest_profile("u1"));
        let collector = CollectorService::new(platform, CollectionConfig::default());

        let now = close_time + Duration::minutes(5);
        let first = collector
            .run_collection(&store, &campaign, &creds(), now)
            .expect("first");
        assert_eq!(first.fetched, 1);
        assert_eq!(first.inserted, 1);

        // The quote is already on record, so the second pass leaves that
        // kind alone and logs the skip.
        let second = collector
            .run_collection(&store, &campaign, &creds(), now + Duration::minutes(5))
            .expect("second");
        assert_eq!(second.fetched, 0);
        assert_eq!(
            store
                .lifecycle_event_count("camp-1", "collect")
                .expect("event count"),
            1
        );
    }

    #[test]
    fn late_rows_from_bot_accounts_still_count_as_bots() {
        let (store, _dir) = open_store();
        let platform = Arc::new(PaperSocialPlatform::new());
        let close_time = Utc::now() - Duration::hours(2);
        let campaign = campaign(&store, close_time);
        platform.seed_engagement("post-1", repost("farm"));
        platform.seed_profile(UserProfile {
            user_id: "farm".to_string(),
            handle: "@farm".to_string(),
            created_at: Some(Utc::now() - Duration::days(2)),
            followers: 1,
            following: 5_000,
            posts_count: 900,
            has_default_avatar: true,
        });
        let collector = CollectorService::new(platform, CollectionConfig::default());

        // Well past the grace window, so the repost cannot be paid, but the
        // account behind it is still flagged.
        let report = collector
            .run_collection(&store, &campaign, &creds(), Utc::now())
            .expect("pass");
        assert_eq!(report.invalid_timing, 1);
        assert_eq!(report.bots, 1);
        let stats = store.engagement_stats("camp-1").expect("stats");
        assert_eq!(stats.bots, 1);
        assert!(store.list_payable_engagements("camp-1").expect("payable").is_empty());
    }

    #[test]
    fn reruns_do_not_duplicate_rows() {
        let (store, _dir) = open_store();
        let platform = Arc::new(PaperSocialPlatform::new());
        let close_time = Utc::now() - Duration::minutes(1);
        let campaign = campaign(&store, close_time);
        platform.seed_engagement("post-1", like("u1"));
        platform.seed_profile(honest_profile("u1"));
        let collector = CollectorService::new(platform, CollectionConfig::default());

        let now = close_time + Duration::minutes(5);
        let first = collector
            .run_collection(&store, &campaign, &creds(), now)
            .expect("first");
        let second = collector
            .run_collection(&store, &campaign, &creds(), now)
            .expect("second");
        assert_eq!(first.inserted, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
    }

    #[test]
    fn bot_accounts_are_flagged_and_unpayable() {
        let (store, _dir) = open_store();
        let platform = Arc::new(PaperSocialPlatform::new());
        let close_time = Utc::now() - Duration::minutes(1);
        let campaign = campaign(&store, close_time);
        platform.seed_engagement("post-1", like("farm"));
        platform.seed_profile(UserProfile {
            user_id: "farm".to_string(),
            handle: "@farm".to_string(),
            created_at: Some(Utc::now() - Duration::days(2)),
            followers: 1,
            following: 5_000,
            posts_count: 900,
            has_default_avatar: true,
        });
        let collector = CollectorService::new(platform, CollectionConfig::default());

        let report = collector
            .run_collection(&store, &campaign, &creds(), close_time + Duration::minutes(5))
            .expect("pass");
        assert_eq!(report.bots, 1);
        assert!(store.list_payable_engagements("camp-1").expect("payable").is_empty());
    }

    #[test]
    fn missing_profile_counts_as_bot() {
        let (store, _dir) = open_store();
        let platform = Arc::new(PaperSocialPlatform::new());
        let close_time = Utc::now() - Duration::minutes(1);
        let campaign = campaign(&store, close_time);
        platform.seed_engagement("post-1", like("ghost"));
        let collector = CollectorService::new(platform, CollectionConfig::default());

        let report = collector
            .run_collection(&store, &campaign, &creds(), close_time + Duration::minutes(5))
            .expect("pass");
        assert_eq!(report.bots, 1);
    }

    #[test]
    fn fetch_failure_surfaces_as_error() {
        let (store, _dir) = open_store();
        let platform = Arc::new(PaperSocialPlatform::new());
        platform.set_fail_fetches(true);
        let campaign = campaign(&store, Utc::now() - Duration::minutes(1));
        let collector = CollectorService::new(platform, CollectionConfig::default());

        let result = collector.run_collection(&store, &campaign, &creds(), Utc::now());
        assert!(result.is_err());
    }
}
