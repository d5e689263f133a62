use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::AppConfig;

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    cfg.validate().map_err(|reason| anyhow!(reason))?;
    Ok(cfg)
}

/// Loads config from `PROMOBOT_CONFIG` (falling back to `default_path`),
/// then applies individual `PROMOBOT_*` env overrides on top.
pub fn load_from_env_or_default(default_path: &Path) -> Result<(AppConfig, PathBuf)> {
    let configured = env::var("PROMOBOT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_path.to_path_buf());
    let mut config = load_from_path(&configured)?;

    if let Ok(level) = env::var("PROMOBOT_LOG_LEVEL") {
        config.system.log_level = level;
    }
    if let Some(json) = env::var("PROMOBOT_LOG_JSON")
        .ok()
        .and_then(|value| parse_bool(&value))
    {
        config.system.log_json = json;
    }
    if let Ok(path) = env::var("PROMOBOT_SQLITE_PATH") {
        config.sqlite.path = path;
    }
    if let Some(poll) = env::var("PROMOBOT_POLL_INTERVAL_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
    {
        config.system.poll_interval_seconds = poll;
    }
    if let Ok(mode) = env::var("PROMOBOT_PLATFORM_MODE") {
        config.platform.mode = mode;
    }
    if let Ok(url) = env::var("PROMOBOT_PLATFORM_BASE_URL") {
        config.platform.base_url = url;
    }
    if let Ok(secret) = env::var("PROMOBOT_PLATFORM_HMAC_SECRET") {
        config.platform.hmac_secret = secret;
    }
    if let Ok(mode) = env::var("PROMOBOT_LEDGER_MODE") {
        config.ledger.mode = mode;
    }
    if let Ok(url) = env::var("PROMOBOT_LEDGER_BASE_URL") {
        config.ledger.base_url = url;
    }
    if let Ok(secret) = env::var("PROMOBOT_LEDGER_HMAC_SECRET") {
        config.ledger.hmac_secret = secret;
    }
    if let Some(threshold) = env::var("PROMOBOT_BOT_SCORE_THRESHOLD")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
    {
        config.collection.bot_score_threshold = threshold;
    }
    if let Some(attempts) = env::var("PROMOBOT_COLLECTION_MAX_ATTEMPTS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        config.collection.max_attempts = attempts;
    }

    config.validate().map_err(|reason| anyhow!(reason))?;
    Ok((config, configured))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
