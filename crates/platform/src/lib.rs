use chrono::{DateTime, Utc};
use promobot_core_types::{RawEngagement, UserProfile};
use std::fmt;

mod auth;
mod http;
mod paper;

pub use auth::compute_hmac_signature_hex;
pub use http::{validate_endpoint_url, HttpSocialPlatform};
pub use paper::PaperSocialPlatform;

/// Per-owner OAuth-style credentials, supplied by the caller on every
/// request; the client itself is credential-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCredentials {
    pub access_token: String,
    pub access_secret: String,
}

impl PlatformCredentials {
    pub fn new(access_token: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            access_secret: access_secret.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    Retryable,
    Terminal,
}

#[derive(Debug, Clone)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub code: String,
    pub detail: String,
}

impl PlatformError {
    pub fn retryable(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: PlatformErrorKind::Retryable,
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn terminal(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: PlatformErrorKind::Terminal,
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == PlatformErrorKind::Retryable
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform error [{}]: {}", self.code, self.detail)
    }
}

impl std::error::Error for PlatformError {}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Read-only plus publish surface of the social platform. Fetch calls never
/// write to storage; persistence is the collector's job.
pub trait SocialPlatform: Send + Sync {
    /// Publishes a post, optionally as a reply, returning the new post id.
    fn publish(
        &self,
        credentials: &PlatformCredentials,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> PlatformResult<String>;

    fn fetch_likes(
        &self,
        credentials: &PlatformCredentials,
        post_id: &str,
    ) -> PlatformResult<Vec<RawEngagement>>;

    fn fetch_reposts(
        &self,
        credentials: &PlatformCredentials,
        post_id: &str,
    ) -> PlatformResult<Vec<RawEngagement>>;

    fn fetch_quotes_and_replies(
        &self,
        credentials: &PlatformCredentials,
        post_id: &str,
        since: DateTime<Utc>,
    ) -> PlatformResult<Vec<RawEngagement>>;

    fn fetch_user_profile(
        &self,
        credentials: &PlatformCredentials,
        user_id: &str,
    ) -> PlatformResult<Option<UserProfile>>;
}
