use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Campaign lifecycle status. Transitions only move forward through this
/// sequence, except into `InternalError`, which is terminal until an
/// operator intervenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    Running,
    ClosingStarted,
    AwaitingEngagementData,
    RewardDistributionInProgress,
    RewardsDistributed,
    InternalError,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::ClosingStarted => "closing_started",
            Self::AwaitingEngagementData => "awaiting_engagement_data",
            Self::RewardDistributionInProgress => "reward_distribution_in_progress",
            Self::RewardsDistributed => "rewards_distributed",
            Self::InternalError => "internal_error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Some(Self::Running),
            "closing_started" => Some(Self::ClosingStarted),
            "awaiting_engagement_data" => Some(Self::AwaitingEngagementData),
            "reward_distribution_in_progress" => Some(Self::RewardDistributionInProgress),
            "rewards_distributed" => Some(Self::RewardsDistributed),
            "internal_error" => Some(Self::InternalError),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::RewardsDistributed | Self::InternalError)
    }

    /// Position in the forward sequence. `InternalError` is reachable from
    /// every non-terminal state and therefore sits past the end.
    pub fn sequence_index(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::ClosingStarted => 1,
            Self::AwaitingEngagementData => 2,
            Self::RewardDistributionInProgress => 3,
            Self::RewardsDistributed => 4,
            Self::InternalError => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EngagementKind {
    Like,
    Repost,
    Quote,
    Reply,
}

impl EngagementKind {
    pub const ALL: [EngagementKind; 4] = [Self::Like, Self::Repost, Self::Quote, Self::Reply];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Repost => "repost",
            Self::Quote => "quote",
            Self::Reply => "reply",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "like" => Some(Self::Like),
            "repost" => Some(Self::Repost),
            "quote" => Some(Self::Quote),
            "reply" => Some(Self::Reply),
            _ => None,
        }
    }

    /// Likes and reposts carry no reliable per-event timestamp on the
    /// platform side; timing validity falls back to the collection clock.
    pub fn has_observed_timestamp(self) -> bool {
        matches!(self, Self::Quote | Self::Reply)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Suspended,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unpaid" => Some(Self::Unpaid),
            "paid" => Some(Self::Paid),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardCurrency {
    Native,
    Token,
}

impl RewardCurrency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Token => "token",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "native" => Some(Self::Native),
            "token" => Some(Self::Token),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    CloseCampaign,
    CollectEngagements,
    DistributeRewards,
    ExpireCampaign,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        Self::CloseCampaign,
        Self::CollectEngagements,
        Self::DistributeRewards,
        Self::ExpireCampaign,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CloseCampaign => "close",
            Self::CollectEngagements => "collect",
            Self::DistributeRewards => "reward",
            Self::ExpireCampaign => "expire",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "close" => Some(Self::CloseCampaign),
            "collect" => Some(Self::CollectEngagements),
            "reward" => Some(Self::DistributeRewards),
            "expire" => Some(Self::ExpireCampaign),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    InFlight,
    Dead,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRow {
    pub campaign_id: String,
    pub owner_user_id: String,
    pub reward_currency: RewardCurrency,
    pub token_id: Option<String>,
    pub rate_like: u64,
    pub rate_repost: u64,
    pub rate_quote: u64,
    pub rate_reply: u64,
    pub budget: u64,
    pub claimed_amount: u64,
    pub status: CampaignStatus,
    pub announce_post_id: Option<String>,
    pub close_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub ledger_ref: String,
}

impl CampaignRow {
    pub fn reward_rate(&self, kind: EngagementKind) -> u64 {
        match kind {
            EngagementKind::Like => self.rate_like,
            EngagementKind::Repost => self.rate_repost,
            EngagementKind::Quote => self.rate_quote,
            EngagementKind::Reply => self.rate_reply,
        }
    }

    pub fn remaining_budget(&self) -> u64 {
        self.budget.saturating_sub(self.claimed_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementRow {
    pub engagement_id: String,
    pub campaign_id: String,
    pub user_id: String,
    pub kind: EngagementKind,
    pub observed_ts: Option<DateTime<Utc>>,
    pub recorded_ts: DateTime<Utc>,
    pub is_valid_timing: bool,
    pub is_bot_engagement: bool,
    pub payment_status: PaymentStatus,
    pub content: Option<String>,
    pub platform_ref: String,
}

impl EngagementRow {
    pub fn is_payable(&self) -> bool {
        self.is_valid_timing
            && !self.is_bot_engagement
            && self.payment_status == PaymentStatus::Unpaid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTaskRow {
    pub task_id: String,
    pub kind: TaskKind,
    pub campaign_id: String,
    pub execute_at: DateTime<Utc>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub payload_json: Option<String>,
    pub state: TaskState,
    pub last_error: Option<String>,
    pub leased_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleLogRow {
    pub log_id: String,
    pub campaign_id: String,
    pub ts: DateTime<Utc>,
    pub stage: String,
    pub severity: String,
    pub message: String,
    pub metadata_json: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: String,
    pub platform_handle: String,
    pub wallet_address: Option<String>,
    pub lifetime_reward: u64,
    pub platform_token: Option<String>,
    pub platform_token_secret: Option<String>,
}

/// A raw engagement event as returned by the social platform, before any
/// validation or persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEngagement {
    pub user_id: String,
    pub kind: EngagementKind,
    pub observed_ts: Option<DateTime<Utc>>,
    pub content: Option<String>,
    pub platform_ref: String,
}

/// Platform-side profile of an engaging account, input to bot scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub handle: String,
    pub created_at: Option<DateTime<Utc>>,
    pub followers: u64,
    pub following: u64,
    pub posts_count: u64,
    pub has_default_avatar: bool,
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            CampaignStatus::Running,
            CampaignStatus::ClosingStarted,
            CampaignStatus::AwaitingEngagementData,
            CampaignStatus::RewardDistributionInProgress,
            CampaignStatus::RewardsDistributed,
            CampaignStatus::InternalError,
        ] {
            assert_eq!(CampaignStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CampaignStatus::parse("archived"), None);
    }

    #[test]
    fn status_sequence_is_strictly_increasing() {
        let order = [
            CampaignStatus::Running,
            CampaignStatus::ClosingStarted,
            CampaignStatus::AwaitingEngagementData,
            CampaignStatus::RewardDistributionInProgress,
            CampaignStatus::RewardsDistributed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].sequence_index() < pair[1].sequence_index());
        }
        assert!(
            CampaignStatus::InternalError.sequence_index()
                > CampaignStatus::RewardDistributionInProgress.sequence_index()
        );
    }

    #[test]
    fn kind_and_state_parsers_accept_mixed_case() {
        assert_eq!(
            EngagementKind::parse(" Repost "),
            Some(EngagementKind::Repost)
        );
        assert_eq!(
            TaskKind::parse("COLLECT"),
            Some(TaskKind::CollectEngagements)
        );
        assert_eq!(TaskState::parse("in_flight"), Some(TaskState::InFlight));
        assert_eq!(PaymentStatus::parse("PAID"), Some(PaymentStatus::Paid));
    }

    #[test]
    fn only_quotes_and_replies_carry_platform_timestamps() {
        assert!(!EngagementKind::Like.has_observed_timestamp());
        assert!(!EngagementKind::Repost.has_observed_timestamp());
        assert!(EngagementKind::Quote.has_observed_timestamp());
        assert!(EngagementKind::Reply.has_observed_timestamp());
    }

    #[test]
    fn reward_rate_maps_kind_to_campaign_rate() {
        let campaign = CampaignRow {
            campaign_id: "c1".to_string(),
            owner_user_id: "owner".to_string(),
            reward_currency: RewardCurrency::Native,
            token_id: None,
            rate_like: 1,
            rate_repost: 2,
            rate_quote: 5,
            rate_reply: 3,
            budget: 100,
            claimed_amount: 40,
            status: CampaignStatus::Running,
            announce_post_id: None,
            close_time: Utc::now(),
            expiry_time: Utc::now(),
            ledger_ref: "ref".to_string(),
        };
        assert_eq!(campaign.reward_rate(EngagementKind::Like), 1);
        assert_eq!(campaign.reward_rate(EngagementKind::Quote), 5);
        assert_eq!(campaign.remaining_budget(), 60);
    }

    #[test]
    fn payable_requires_valid_timing_human_and_unpaid() {
        let mut row = EngagementRow {
            engagement_id: new_id(),
            campaign_id: "c1".to_string(),
            user_id: "u1".to_string(),
            kind: EngagementKind::Like,
            observed_ts: None,
            recorded_ts: Utc::now(),
            is_valid_timing: true,
            is_bot_engagement: false,
            payment_status: PaymentStatus::Unpaid,
            content: None,
            platform_ref: "like:u1".to_string(),
        };
        assert!(row.is_payable());
        row.is_bot_engagement = true;
        assert!(!row.is_payable());
        row.is_bot_engagement = false;
        row.payment_status = PaymentStatus::Paid;
        assert!(!row.is_payable());
    }
}
