use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use promobot_collector::CollectorService;
use promobot_config::{load_from_env_or_default, AppConfig};
use promobot_core_types::TaskKind;
use promobot_ledger::{HttpLedgerClient, LedgerClient, PaperLedger};
use promobot_lifecycle::{CloseHandler, CollectHandler, ExpireHandler, RewardHandler};
use promobot_platform::{HttpSocialPlatform, PaperSocialPlatform, SocialPlatform};
use promobot_queue::{TaskQueue, WorkerPool};
use promobot_rewards::DistributionRuntime;
use promobot_storage::{sqlite_contention_snapshot, SqliteStore};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "configs/dev.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli_config = parse_config_arg();
    let default_path = cli_config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let (config, loaded_config_path) = load_from_env_or_default(&default_path)?;

    init_tracing(&config.system.log_level, config.system.log_json);
    info!(
        config_path = %loaded_config_path.display(),
        env = %config.system.env,
        "configuration loaded"
    );

    let mut store = SqliteStore::open(Path::new(&config.sqlite.path))
        .context("failed to initialize sqlite store")?;
    let migrations_dir = PathBuf::from(&config.system.migrations_dir);
    let applied = store
        .run_migrations(&migrations_dir)
        .with_context(|| format!("failed to apply migrations in {}", migrations_dir.display()))?;
    info!(applied, "sqlite migrations applied");

    store
        .record_heartbeat("promobot-app", "startup")
        .context("failed to write startup heartbeat")?;

    let platform = build_platform(&config)?;
    let ledger = build_ledger(&config)?;
    let queue = TaskQueue::from_config(&config.queue);

    let mut pool = WorkerPool::new(
        PathBuf::from(&config.sqlite.path),
        queue.clone(),
        config.queue.claim_batch_size,
        config.queue.workers_per_kind,
    );
    pool.register(Arc::new(CloseHandler::new(
        queue.clone(),
        Arc::clone(&platform),
        Arc::clone(&ledger),
        config.collection.clone(),
    )));
    pool.register(Arc::new(CollectHandler::new(
        queue.clone(),
        CollectorService::new(Arc::clone(&platform), config.collection.clone()),
    )));
    pool.register(Arc::new(RewardHandler::new(
        queue.clone(),
        DistributionRuntime::new(Arc::clone(&ledger)),
        Arc::clone(&platform),
        config.rewards.clone(),
    )));
    pool.register(Arc::new(ExpireHandler::new(
        DistributionRuntime::new(Arc::clone(&ledger)),
        Arc::clone(&platform),
        Arc::clone(&ledger),
    )));

    run_app_loop(
        store,
        queue,
        pool,
        config.system.heartbeat_seconds,
        config.system.poll_interval_seconds,
    )
    .await
}

fn parse_config_arg() -> Option<PathBuf> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(inline) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(inline));
        }
    }
    None
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .json()
            .compact()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

fn build_platform(config: &AppConfig) -> Result<Arc<dyn SocialPlatform>> {
    match config.platform.mode.as_str() {
        "paper" => {
            info!("social platform running in paper mode");
            Ok(Arc::new(PaperSocialPlatform::new()))
        }
        "http" => {
            let client = HttpSocialPlatform::new(
                &config.platform.base_url,
                config.platform.request_timeout_ms,
                &config.platform.hmac_key_id,
                &config.platform.hmac_secret,
            )
            .map_err(|error| anyhow!("failed to build platform client: {error}"))?;
            Ok(Arc::new(client))
        }
        other => Err(anyhow!("unsupported platform mode {other:?}")),
    }
}

fn build_ledger(config: &AppConfig) -> Result<Arc<dyn LedgerClient>> {
    match config.ledger.mode.as_str() {
        "paper" => {
            info!("ledger client running in paper mode");
            Ok(Arc::new(PaperLedger::new()))
        }
        "http" => {
            let client = HttpLedgerClient::new(
                &config.ledger.base_url,
                config.ledger.request_timeout_ms,
                &config.ledger.hmac_key_id,
                &config.ledger.hmac_secret,
            )
            .map_err(|error| anyhow!("failed to build ledger client: {error}"))?;
            Ok(Arc::new(client))
        }
        other => Err(anyhow!("unsupported ledger mode {other:?}")),
    }
}

async fn run_app_loop(
    store: SqliteStore,
    queue: TaskQueue,
    pool: WorkerPool,
    heartbeat_seconds: u64,
    poll_interval_seconds: u64,
) -> Result<()> {
    let mut heartbeat = time::interval(Duration::from_secs(heartbeat_seconds.max(1)));
    let mut poll = time::interval(Duration::from_secs(poll_interval_seconds.max(1)));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let contention = sqlite_contention_snapshot();
                let status = format!(
                    "alive retries={} busy={}",
                    contention.write_retry_total, contention.busy_error_total
                );
                if let Err(error) = store.record_heartbeat("promobot-app", &status) {
                    warn!(error = %error, "heartbeat write failed");
                }
            }
            _ = poll.tick() => {
                let now = Utc::now();

                // Campaigns past their close time get a close task; the
                // queue drops duplicates while one is still pending.
                match store.list_campaigns_due_for_close(now) {
                    Ok(campaign_ids) => {
                        for campaign_id in campaign_ids {
                            match queue.enqueue(
                                &store,
                                TaskKind::CloseCampaign,
                                &campaign_id,
                                now,
                                1,
                                None,
                            ) {
                                Ok(true) => {
                                    info!(campaign_id = %campaign_id, "close task enqueued");
                                }
                                Ok(false) => {
                                    debug!(campaign_id = %campaign_id, "close task already pending");
                                }
                                Err(error) => {
                                    warn!(
                                        campaign_id = %campaign_id,
                                        error = %error,
                                        "failed enqueueing close task"
                                    );
                                }
                            }
                        }
                    }
                    Err(error) => {
                        warn!(error = %error, "close-due scan failed");
                    }
                }

                match pool.run_once(now).await {
                    Ok(report) => {
                        if report.claimed > 0 {
                            info!(
                                claimed = report.claimed,
                                completed = report.completed,
                                rescheduled = report.rescheduled,
                                dead = report.dead,
                                completed_by_kind = ?report.completed_by_kind,
                                "scheduling pass finished"
                            );
                        }
                    }
                    Err(error) => {
                        warn!(error = %error, "scheduling pass failed");
                    }
                }
            }
        }
    }
}
