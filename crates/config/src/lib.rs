mod loader;
mod schema;

pub use loader::{load_from_env_or_default, load_from_path};
pub use schema::{
    AppConfig, CollectionConfig, LedgerConfig, PlatformConfig, QueueConfig, RewardsConfig,
    SqliteConfig, SystemConfig,
};
