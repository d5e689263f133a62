use crate::auth::compute_hmac_signature_hex;
use crate::{PlatformCredentials, PlatformError, PlatformResult};
use chrono::{DateTime, Utc};
use promobot_core_types::{EngagementKind, RawEngagement, UserProfile};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration as StdDuration;
use tracing::debug;

pub fn validate_endpoint_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|error| format!("invalid URL: {error}"))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(format!("unsupported scheme {}", parsed.scheme()));
    }
    if parsed.host_str().is_none() {
        return Err("host missing".to_string());
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err("URL credentials are not allowed".to_string());
    }
    Ok(())
}

fn classify_request_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_body() || error.is_decode() {
        "decode"
    } else {
        "request"
    }
}

/// HTTP client for the platform gateway. All requests carry the owner's
/// bearer token; mutating requests are additionally HMAC-signed when a
/// signing secret is configured.
pub struct HttpSocialPlatform {
    client: Client,
    base_url: String,
    hmac_key_id: Option<String>,
    hmac_secret: Option<Vec<u8>>,
}

impl HttpSocialPlatform {
    pub fn new(
        base_url: &str,
        request_timeout_ms: u64,
        hmac_key_id: &str,
        hmac_secret: &str,
    ) -> Result<Self, String> {
        validate_endpoint_url(base_url)?;
        let client = Client::builder()
            .timeout(StdDuration::from_millis(request_timeout_ms.max(1_000)))
            .build()
            .map_err(|error| format!("failed to build http client: {error}"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            hmac_key_id: non_empty(hmac_key_id),
            hmac_secret: non_empty(hmac_secret).map(String::into_bytes),
        })
    }

    fn signed(&self, builder: RequestBuilder, body: &[u8]) -> PlatformResult<RequestBuilder> {
        let (Some(key_id), Some(secret)) = (&self.hmac_key_id, &self.hmac_secret) else {
            return Ok(builder);
        };
        let signature = compute_hmac_signature_hex(secret, body)
            .map_err(|error| PlatformError::terminal("hmac", error.to_string()))?;
        Ok(builder
            .header("X-Auth-Key-Id", key_id)
            .header("X-Auth-Signature", signature)
            .header("X-Auth-Timestamp", Utc::now().timestamp().to_string()))
    }

    fn check_status(response: Response, action: &str) -> PlatformResult<Value> {
        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().map_err(|error| {
                PlatformError::retryable(
                    "decode",
                    format!("failed decoding {action} response: {error}"),
                )
            });
        }
        let detail = response
            .text()
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let code = format!("http_{}", status.as_u16());
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(PlatformError::retryable(code, format!("{action}: {detail}")))
        } else {
            Err(PlatformError::terminal(code, format!("{action}: {detail}")))
        }
    }

    fn get_json(
        &self,
        credentials: &PlatformCredentials,
        path: &str,
        action: &str,
    ) -> PlatformResult<Value> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&credentials.access_token)
            .send()
            .map_err(|error| {
                PlatformError::retryable(
                    classify_request_error(&error),
                    format!("{action}: {error}"),
                )
            })?;
        let value = Self::check_status(response, action)?;
        debug!(path, action, "platform request succeeded");
        Ok(value)
    }

    fn engagements_from_array(
        value: &Value,
        field: &str,
        kind: EngagementKind,
    ) -> Vec<RawEngagement> {
        let Some(items) = value.get(field).and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let user_id = item.get("user_id").and_then(Value::as_str)?;
                let platform_ref = item
                    .get("ref")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}:{}", kind.as_str(), user_id));
                let observed_ts = item
                    .get("created_at")
                    .and_then(Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                let content = item
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(RawEngagement {
                    user_id: user_id.to_string(),
                    kind,
                    observed_ts,
                    content,
                    platform_ref,
                })
            })
            .collect()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl crate::SocialPlatform for HttpSocialPlatform {
    fn publish(
        &self,
        credentials: &PlatformCredentials,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> PlatformResult<String> {
        let body = json!({
            "text": text,
            "in_reply_to": in_reply_to,
        });
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|error| PlatformError::terminal("encode", error.to_string()))?;
        let builder = self
            .client
            .post(format!("{}/v1/posts", self.base_url))
            .bearer_auth(&credentials.access_token)
            .header("Content-Type", "application/json")
            .body(body_bytes.clone());
        let response = self
            .signed(builder, &body_bytes)?
            .send()
            .map_err(|error| {
                PlatformError::retryable(classify_request_error(&error), format!("publish: {error}"))
            })?;
        let value = Self::check_status(response, "publish")?;
        let post_id = value
            .get("post_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::terminal("decode", "publish response missing post_id".to_string())
            })?;
        debug!(post_id = %post_id, reply = in_reply_to.is_some(), "post published");
        Ok(post_id)
    }

    fn fetch_likes(
        &self,
        credentials: &PlatformCredentials,
        post_id: &str,
    ) -> PlatformResult<Vec<RawEngagement>> {
        let value = self.get_json(
            credentials,
            &format!("/v1/posts/{post_id}/likes"),
            "fetch likes",
        )?;
        Ok(Self::engagements_from_array(
            &value,
            "likes",
            EngagementKind::Like,
        ))
    }

    fn fetch_reposts(
        &self,
        credentials: &PlatformCredentials,
        post_id: &str,
    ) -> PlatformResult<Vec<RawEngagement>> {
        let value = self.get_json(
            credentials,
            &format!("/v1/posts/{post_id}/reposts"),
            "fetch reposts",
        )?;
        Ok(Self::engagements_from_array(
            &value,
            "reposts",
            EngagementKind::Repost,
        ))
    }

    fn fetch_quotes_and_replies(
        &self,
        credentials: &PlatformCredentials,
        post_id: &str,
        since: DateTime<Utc>,
    ) -> PlatformResult<Vec<RawEngagement>> {
        let value = self.get_json(
            credentials,
            &format!(
                "/v1/posts/{post_id}/conversation?since={}",
                since.to_rfc3339()
            ),
            "fetch conversation",
        )?;
        let mut out = Self::engagements_from_array(&value, "quotes", EngagementKind::Quote);
        out.extend(Self::engagements_from_array(
            &value,
            "replies",
            EngagementKind::Reply,
        ));
        Ok(out)
    }

    fn fetch_user_profile(
        &self,
        credentials: &PlatformCredentials,
        user_id: &str,
    ) -> PlatformResult<Option<UserProfile>> {
        let value = match self.get_json(credentials, &format!("/v1/users/{user_id}"), "fetch profile")
        {
            Ok(value) => value,
            Err(error) if error.code == "http_404" => return Ok(None),
            Err(error) => return Err(error),
        };
        let handle = value
            .get("handle")
            .and_then(Value::as_str)
            .unwrap_or(user_id)
            .to_string();
        let created_at = value
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Ok(Some(UserProfile {
            user_id: user_id.to_string(),
            handle,
            created_at,
            followers: value.get("followers").and_then(Value::as_u64).unwrap_or(0),
            following: value.get("following").and_then(Value::as_u64).unwrap_or(0),
            posts_count: value
                .get("posts_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            has_default_avatar: value
                .get("default_avatar")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }))
    }
}
