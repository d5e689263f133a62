use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub sqlite: SqliteConfig,
    pub queue: QueueConfig,
    pub collection: CollectionConfig,
    pub rewards: RewardsConfig,
    pub platform: PlatformConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub env: String,
    pub log_level: String,
    pub log_json: bool,
    pub heartbeat_seconds: u64,
    pub poll_interval_seconds: u64,
    pub migrations_dir: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            heartbeat_seconds: 30,
            poll_interval_seconds: 10,
            migrations_dir: "migrations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "data/promobot.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub claim_batch_size: u32,
    pub workers_per_kind: u32,
    pub lease_timeout_seconds: u64,
    pub default_max_attempts: u32,
    pub backoff_initial_seconds: u64,
    pub backoff_max_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            claim_batch_size: 16,
            workers_per_kind: 4,
            lease_timeout_seconds: 600,
            default_max_attempts: 3,
            backoff_initial_seconds: 60,
            backoff_max_seconds: 1_800,
        }
    }
}

/// Collection timing and data-sufficiency policy. The thresholds are product
/// policy, not invariants, so every one of them is configurable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Delay between campaign close and the first collection pass, to admit
    /// late engagers.
    pub close_collect_delay_seconds: u64,
    /// Interval between collection passes while data is still insufficient.
    pub retry_interval_seconds: u64,
    /// Grace window after close within which likes/reposts (which carry no
    /// platform timestamp) still count as valid timing.
    pub grace_window_seconds: u64,
    pub max_attempts: u32,
    pub min_attempts: u32,
    pub min_engagements: u64,
    pub low_engagement_threshold: u64,
    pub low_engagement_min_attempts: u32,
    pub max_elapsed_seconds: u64,
    pub bot_score_threshold: f64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            close_collect_delay_seconds: 300,
            retry_interval_seconds: 1_800,
            grace_window_seconds: 1_800,
            max_attempts: 6,
            min_attempts: 3,
            min_engagements: 10,
            low_engagement_threshold: 5,
            low_engagement_min_attempts: 2,
            max_elapsed_seconds: 7_200,
            bot_score_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    /// Delay between reward distribution and campaign expiry.
    pub expire_delay_seconds: u64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            expire_delay_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// "paper" keeps everything in memory; "http" talks to the real
    /// platform gateway.
    pub mode: String,
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub hmac_key_id: String,
    pub hmac_secret: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            mode: "paper".to_string(),
            base_url: "http://127.0.0.1:8810".to_string(),
            request_timeout_ms: 10_000,
            hmac_key_id: String::new(),
            hmac_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub mode: String,
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub hmac_key_id: String,
    pub hmac_secret: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            mode: "paper".to_string(),
            base_url: "http://127.0.0.1:8820".to_string(),
            request_timeout_ms: 15_000,
            hmac_key_id: String::new(),
            hmac_secret: String::new(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.collection.bot_score_threshold) {
            return Err(format!(
                "collection.bot_score_threshold must be within [0, 1], got {}",
                self.collection.bot_score_threshold
            ));
        }
        if self.collection.max_attempts == 0 {
            return Err("collection.max_attempts must be at least 1".to_string());
        }
        if self.queue.default_max_attempts == 0 {
            return Err("queue.default_max_attempts must be at least 1".to_string());
        }
        if self.queue.backoff_initial_seconds == 0 {
            return Err("queue.backoff_initial_seconds must be at least 1".to_string());
        }
        for (label, mode) in [
            ("platform.mode", self.platform.mode.as_str()),
            ("ledger.mode", self.ledger.mode.as_str()),
        ] {
            let normalized = mode.trim().to_ascii_lowercase();
            if normalized != "paper" && normalized != "http" {
                return Err(format!("{} must be \"paper\" or \"http\", got {:?}", label, mode));
            }
        }
        Ok(())
    }
}
