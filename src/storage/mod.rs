//! Storage for configuration and the on-disk caches.

pub mod cache;
pub mod config;
pub mod paths;

pub use cache::{CacheStore, DampeningDocument, ForecastDocument, LoadOutcome, UsageDocument};
pub use config::{
    Config, ConfigSource, ConfigSources, ENV_API_KEYS, ENV_API_LIMITS, ENV_AUTO_UPDATE,
    ENV_BASE_URL, ENV_CONFIG, ENV_DATA_DIR, ENV_TIMEOUT, ResolvedConfig,
};
pub use paths::AppPaths;
