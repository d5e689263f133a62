use crate::{PlatformCredentials, PlatformError, PlatformResult, SocialPlatform};
use chrono::{DateTime, Utc};
use promobot_core_types::{EngagementKind, RawEngagement, UserProfile};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// In-memory platform used in paper mode and tests: posts are assigned
/// sequential ids, engagements and profiles are seeded by the caller.
#[derive(Default)]
pub struct PaperSocialPlatform {
    post_counter: AtomicU64,
    published: Mutex<Vec<PublishedPost>>,
    engagements: Mutex<HashMap<String, Vec<RawEngagement>>>,
    profiles: Mutex<HashMap<String, UserProfile>>,
    fail_fetches: AtomicBool,
    fail_publish: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub post_id: String,
    pub text: String,
    pub in_reply_to: Option<String>,
}

impl PaperSocialPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_engagement(&self, post_id: &str, engagement: RawEngagement) {
        self.engagements
            .lock()
            .expect("engagements lock")
            .entry(post_id.to_string())
            .or_default()
            .push(engagement);
    }

    pub fn seed_profile(&self, profile: UserProfile) {
        self.profiles
            .lock()
            .expect("profiles lock")
            .insert(profile.user_id.clone(), profile);
    }

    /// When set, every fetch fails with a retryable error; models a
    /// platform outage.
    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published_posts(&self) -> Vec<PublishedPost> {
        self.published.lock().expect("published lock").clone()
    }

    fn fetch_kind(&self, post_id: &str, wanted: &[EngagementKind]) -> PlatformResult<Vec<RawEngagement>> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(PlatformError::retryable(
                "outage",
                "paper platform configured to fail fetches",
            ));
        }
        let engagements = self.engagements.lock().expect("engagements lock");
        Ok(engagements
            .get(post_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| wanted.contains(&item.kind))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl SocialPlatform for PaperSocialPlatform {
    fn publish(
        &self,
        _credentials: &PlatformCredentials,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> PlatformResult<String> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(PlatformError::retryable(
                "outage",
                "paper platform configured to fail publish",
            ));
        }
        let post_id = format!("paper-post-{}", self.post_counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.published.lock().expect("published lock").push(PublishedPost {
            post_id: post_id.clone(),
            text: text.to_string(),
            in_reply_to: in_reply_to.map(str::to_string),
        });
        Ok(post_id)
    }

    fn fetch_likes(
        &self,
        _credentials: &PlatformCredentials,
        post_id: &str,
    ) -> PlatformResult<Vec<RawEngagement>> {
        self.fetch_kind(post_id, &[EngagementKind::Like])
    }

    fn fetch_reposts(
        &self,
        _credentials: &PlatformCredentials,
        post_id: &str,
    ) -> PlatformResult<Vec<RawEngagement>> {
        self.fetch_kind(post_id, &[EngagementKind::Repost])
    }

    fn fetch_quotes_and_replies(
        &self,
        _credentials: &PlatformCredentials,
        post_id: &str,
        since: DateTime<Utc>,
    ) -> PlatformResult<Vec<RawEngagement>> {
        let mut items = self.fetch_kind(post_id, &[EngagementKind::Quote, EngagementKind::Reply])?;
        items.retain(|item| item.observed_ts.map(|ts| ts >= since).unwrap_or(true));
        Ok(items)
    }

    fn fetch_user_profile(
        &self,
        _credentials: &PlatformCredentials,
        user_id: &str,
    ) -> PlatformResult<Option<UserProfile>> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(PlatformError::retryable(
                "outage",
                "paper platform configured to fail fetches",
            ));
        }
        Ok(self
            .profiles
            .lock()
            .expect("profiles lock")
            .get(user_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> PlatformCredentials {
        PlatformCredentials::new("token", "secret")
    }

    fn raw(user: &str, kind: EngagementKind) -> RawEngagement {
        RawEngagement {
            user_id: user.to_string(),
            kind,
            observed_ts: None,
            content: None,
            platform_ref: format!("{}:{}", kind.as_str(), user),
        }
    }

    #[test]
    fn publish_assigns_sequential_ids_and_records_posts() {
        let platform = PaperSocialPlatform::new();
        let first = platform.publish(&creds(), "hello", None).expect("publish");
        let second = platform
            .publish(&creds(), "reply", Some(&first))
            .expect("publish");
        assert_ne!(first, second);
        let posts = platform.published_posts();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].in_reply_to.as_deref(), Some(first.as_str()));
    }

    #[test]
    fn fetches_are_scoped_by_post_and_kind() {
        let platform = PaperSocialPlatform::new();
        platform.seed_engagement("p1", raw("u1", EngagementKind::Like));
        platform.seed_engagement("p1", raw("u2", EngagementKind::Repost));
        platform.seed_engagement("p2", raw("u3", EngagementKind::Like));

        let likes = platform.fetch_likes(&creds(), "p1").expect("likes");
        assert_eq!(likes.len(), 1);
        assert_eq!(likes[0].user_id, "u1");
        let reposts = platform.fetch_reposts(&creds(), "p1").expect("reposts");
        assert_eq!(reposts.len(), 1);
        assert_eq!(reposts[0].user_id, "u2");
    }

    #[test]
    fn outage_mode_fails_with_retryable_error() {
        let platform = PaperSocialPlatform::new();
        platform.set_fail_fetches(true);
        let error = platform.fetch_likes(&creds(), "p1").expect_err("must fail");
        assert!(error.is_retryable());
    }

    #[test]
    fn conversation_fetch_filters_by_since() {
        let platform = PaperSocialPlatform::new();
        let mut old = raw("u1", EngagementKind::Quote);
        old.observed_ts = Some(Utc::now() - chrono::Duration::hours(2));
        let mut recent = raw("u2", EngagementKind::Reply);
        recent.observed_ts = Some(Utc::now());
        platform.seed_engagement("p1", old);
        platform.seed_engagement("p1", recent);

        let since = Utc::now() - chrono::Duration::hours(1);
        let items = platform
            .fetch_quotes_and_replies(&creds(), "p1", since)
            .expect("fetch");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].user_id, "u2");
    }
}
