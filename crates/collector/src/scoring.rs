use chrono::{DateTime, Utc};
use promobot_core_types::UserProfile;

/// Score assigned when we cannot load a profile at all. High enough to fall
/// above any sane threshold.
pub const UNVERIFIABLE_SCORE: f64 = 1.0;

/// Heuristic bot likelihood in `[0, 1]`. Weighs account age, the
/// follower/following shape, the avatar, and posting cadence. None of these
/// alone condemns an account; the weighted blend has to cross the configured
/// threshold.
pub fn bot_score(profile: &UserProfile, now: DateTime<Utc>) -> f64 {
    let age_days = profile
        .created_at
        .map(|created| (now - created).num_days().max(0));

    let age_component = match age_days {
        // Unknown creation date reads almost as bad as a brand-new account.
        None => 0.8,
        Some(days) if days < 7 => 1.0,
        Some(days) if days < 30 => 0.6,
        Some(days) if days < 180 => 0.3,
        Some(_) => 0.0,
    };

    let ratio_component = if profile.following >= 100 {
        let ratio = profile.followers as f64 / profile.following as f64;
        if ratio < 0.02 {
            1.0
        } else if ratio < 0.1 {
            0.6
        } else if ratio < 0.5 {
            0.2
        } else {
            0.0
        }
    } else if profile.followers == 0 && profile.following == 0 {
        0.5
    } else {
        0.0
    };

    let avatar_component = if profile.has_default_avatar { 0.9 } else { 0.0 };

    let cadence_component = match age_days {
        Some(days) => {
            let posts_per_day = profile.posts_count as f64 / (days.max(1) as f64);
            if posts_per_day > 100.0 {
                1.0
            } else if posts_per_day > 40.0 {
                0.6
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    let score: f64 = 0.35 * age_component
        + 0.25 * ratio_component
        + 0.2 * avatar_component
        + 0.2 * cadence_component;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn profile(user_id: &str) -> UserProfile {
        UserProfile {
            user_id: user_id.to_string(),
            handle: format!("@{user_id}"),
            created_at: Some(Utc::now() - Duration::days(900)),
            followers: 500,
            following: 300,
            posts_count: 1_200,
            has_default_avatar: false,
        }
    }

    #[test]
    fn established_account_scores_low() {
        let score = bot_score(&profile("veteran"), Utc::now());
        assert!(score < 0.2, "score was {score}");
    }

    #[test]
    fn fresh_mass_follower_with_default_avatar_scores_high() {
        let mut p = profile("farm");
        p.created_at = Some(Utc::now() - Duration::days(2));
        p.followers = 3;
        p.following = 2_000;
        p.has_default_avatar = true;
        p.posts_count = 400;
        let score = bot_score(&p, Utc::now());
        assert!(score > 0.7, "score was {score}");
    }

    #[test]
    fn missing_creation_date_raises_the_score_but_is_not_decisive() {
        let mut p = profile("opaque");
        p.created_at = None;
        let score = bot_score(&p, Utc::now());
        assert!(score >= 0.25 && score < 0.7, "score was {score}");
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let mut p = profile("extreme");
        p.created_at = Some(Utc::now());
        p.followers = 0;
        p.following = 100_000;
        p.has_default_avatar = true;
        p.posts_count = 1_000_000;
        let score = bot_score(&p, Utc::now());
        assert!((0.0..=1.0).contains(&score));
    }
}
