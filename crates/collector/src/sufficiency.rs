use chrono::Duration;
use promobot_config::CollectionConfig;

/// Why a campaign's engagement data was declared complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SufficiencyReason {
    /// Enough passes ran and enough engagements arrived.
    VolumeReached,
    /// The campaign is simply quiet; a couple of passes confirmed it.
    LowEngagement,
    /// Collection has been running longer than the configured ceiling.
    TimeBudgetSpent,
    /// Every allowed pass has run.
    AttemptsExhausted,
}

impl SufficiencyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VolumeReached => "volume_reached",
            Self::LowEngagement => "low_engagement",
            Self::TimeBudgetSpent => "time_budget_spent",
            Self::AttemptsExhausted => "attempts_exhausted",
        }
    }
}

/// Decides whether collection can stop. Returns `Some(reason)` when the data
/// is sufficient to move on to reward distribution, `None` when another pass
/// should be scheduled.
pub fn evaluate(
    total_engagements: u64,
    attempts_completed: u32,
    elapsed_since_close: Duration,
    config: &CollectionConfig,
) -> Option<SufficiencyReason> {
    if attempts_completed >= config.max_attempts {
        return Some(SufficiencyReason::AttemptsExhausted);
    }
    if elapsed_since_close >= Duration::seconds(config.max_elapsed_seconds as i64) {
        return Some(SufficiencyReason::TimeBudgetSpent);
    }
    if attempts_completed >= config.min_attempts && total_engagements >= config.min_engagements {
        return Some(SufficiencyReason::VolumeReached);
    }
    if total_engagements <= config.low_engagement_threshold
        && attempts_completed >= config.low_engagement_min_attempts
    {
        return Some(SufficiencyReason::LowEngagement);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CollectionConfig {
        CollectionConfig::default()
    }

    #[test]
    fn busy_campaign_needs_minimum_attempts() {
        let cfg = config();
        assert_eq!(evaluate(50, 1, Duration::minutes(10), &cfg), None);
        assert_eq!(evaluate(50, 2, Duration::minutes(40), &cfg), None);
        assert_eq!(
            evaluate(50, 3, Duration::minutes(70), &cfg),
            Some(SufficiencyReason::VolumeReached)
        );
    }

    #[test]
    fn quiet_campaign_settles_early() {
        let cfg = config();
        assert_eq!(evaluate(2, 1, Duration::minutes(10), &cfg), None);
        assert_eq!(
            evaluate(2, 2, Duration::minutes(40), &cfg),
            Some(SufficiencyReason::LowEngagement)
        );
    }

    #[test]
    fn middling_campaign_runs_out_the_clock() {
        let cfg = config();
        // Above the low threshold but under the volume minimum.
        assert_eq!(evaluate(7, 3, Duration::minutes(90), &cfg), None);
        assert_eq!(
            evaluate(7, 4, Duration::hours(2), &cfg),
            Some(SufficiencyReason::TimeBudgetSpent)
        );
    }

    #[test]
    fn attempt_ceiling_always_terminates() {
        let cfg = config();
        assert_eq!(
            evaluate(7, cfg.max_attempts, Duration::minutes(5), &cfg),
            Some(SufficiencyReason::AttemptsExhausted)
        );
    }
}
