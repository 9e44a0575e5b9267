//! Configuration file loading and management.
//!
//! Loads configuration from `<config dir>/config.toml` (see [`AppPaths`]).
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `PVCAST_CONFIG`: Override config file path
//! - `PVCAST_API_KEYS`: Comma-separated API keys
//! - `PVCAST_API_LIMITS`: Comma-separated daily limits (one, or one per key)
//! - `PVCAST_AUTO_UPDATE`: Automatic update mode (0, 1, 2)
//! - `PVCAST_TIMEOUT`: Request timeout in seconds
//! - `PVCAST_BASE_URL`: Provider API base URL
//! - `PVCAST_DATA_DIR`: Directory for cached documents

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::cli::args::Cli;
use crate::core::coordinator::CoordinatorSettings;
use crate::core::hard_limit::HardLimitClamp;
use crate::core::models::EstimateField;
use crate::core::quota::KeyTable;
use crate::core::scheduler::AutoUpdateMode;
use crate::core::sites::is_site_id;
use crate::error::{PvcastError, Result};
use crate::providers::solcast::DEFAULT_BASE_URL;

// =============================================================================
// Environment Variable Names
// =============================================================================

pub const ENV_CONFIG: &str = "PVCAST_CONFIG";
pub const ENV_API_KEYS: &str = "PVCAST_API_KEYS";
pub const ENV_API_LIMITS: &str = "PVCAST_API_LIMITS";
pub const ENV_AUTO_UPDATE: &str = "PVCAST_AUTO_UPDATE";
pub const ENV_TIMEOUT: &str = "PVCAST_TIMEOUT";
pub const ENV_BASE_URL: &str = "PVCAST_BASE_URL";
pub const ENV_DATA_DIR: &str = "PVCAST_DATA_DIR";

const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=480;
const CUSTOM_HOURS_RANGE: std::ops::RangeInclusive<u32> = 1..=144;
const MIN_INTERVAL_MINUTES: u32 = 5;

// =============================================================================
// Config File
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub provider: ProviderConfig,
    pub forecast: ForecastConfig,
    pub quota: QuotaConfig,
    pub schedule: ScheduleConfig,
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// IANA zone used for local days, sun times and schedules.
    pub timezone: String,
    /// Override for the cached document directory.
    pub data_dir: Option<PathBuf>,
    /// Default log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
}

/// Provider account settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Comma-separated API keys.
    pub api_keys: String,
    /// Comma-separated daily call limits.
    pub api_limits: String,
    /// Comma-separated hard limits in watts.
    pub hard_limits: Option<String>,
}

/// Forecast processing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// 0 off, 1 daylight, 2 all day.
    pub auto_update: u8,
    /// estimate, estimate10 or estimate90.
    pub estimate: String,
    pub excluded_sites: Vec<String>,
    pub granular_dampening: bool,
    /// Window for the "next N hours" energy value.
    pub custom_hours: u32,
}

/// Quota day settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Zone whose midnight resets the daily counters.
    pub reset_timezone: String,
}

/// Scheduler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Fixed poll cadence instead of one derived from the budget.
    pub interval_minutes: Option<u32>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            timezone: "UTC".to_string(),
            data_dir: None,
            log_level: None,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_keys: String::new(),
            api_limits: "10".to_string(),
            hard_limits: None,
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            auto_update: 0,
            estimate: EstimateField::default().as_str().to_string(),
            excluded_sites: Vec::new(),
            granular_dampening: false,
            custom_hours: 1,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            reset_timezone: "UTC".to_string(),
        }
    }
}

fn parse_tz(key: &str, name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|_| PvcastError::ConfigInvalid {
        key: key.to_string(),
        message: format!("unknown time zone '{name}'"),
    })
}

impl Config {
    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but is invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| PvcastError::Config(format!("invalid config file: {e}")))
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| PvcastError::Config(format!("failed to serialize config: {e}")))?;
        fs::write(path, content)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// Local time zone.
    ///
    /// # Errors
    ///
    /// Returns error for an unknown zone name.
    pub fn timezone(&self) -> Result<Tz> {
        parse_tz("general.timezone", &self.general.timezone)
    }

    /// Quota reset time zone.
    ///
    /// # Errors
    ///
    /// Returns error for an unknown zone name.
    pub fn reset_timezone(&self) -> Result<Tz> {
        parse_tz("quota.reset_timezone", &self.quota.reset_timezone)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<()> {
        if !TIMEOUT_RANGE.contains(&self.general.timeout_seconds) {
            return Err(PvcastError::ConfigInvalid {
                key: "general.timeout_seconds".to_string(),
                message: "must be between 1 and 480 seconds".to_string(),
            });
        }
        self.timezone()?;
        self.reset_timezone()?;

        reqwest::Url::parse(&self.provider.base_url).map_err(|e| PvcastError::ConfigInvalid {
            key: "provider.base_url".to_string(),
            message: e.to_string(),
        })?;

        if AutoUpdateMode::from_u8(self.forecast.auto_update).is_none() {
            return Err(PvcastError::ConfigInvalid {
                key: "forecast.auto_update".to_string(),
                message: "must be 0, 1 or 2".to_string(),
            });
        }
        if EstimateField::from_arg(&self.forecast.estimate).is_none() {
            return Err(PvcastError::ConfigInvalid {
                key: "forecast.estimate".to_string(),
                message: "must be estimate, estimate10 or estimate90".to_string(),
            });
        }
        if !CUSTOM_HOURS_RANGE.contains(&self.forecast.custom_hours) {
            return Err(PvcastError::ConfigInvalid {
                key: "forecast.custom_hours".to_string(),
                message: "must be between 1 and 144".to_string(),
            });
        }
        if let Some(bad) = self.forecast.excluded_sites.iter().find(|s| !is_site_id(s)) {
            return Err(PvcastError::InvalidSiteId(bad.clone()));
        }
        if self
            .schedule
            .interval_minutes
            .is_some_and(|m| m < MIN_INTERVAL_MINUTES)
        {
            return Err(PvcastError::ConfigInvalid {
                key: "schedule.interval_minutes".to_string(),
                message: format!("must be at least {MIN_INTERVAL_MINUTES}"),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    ConfigFile,
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Tracks the source of each resolved value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub config_path: ConfigSource,
    pub data_dir: ConfigSource,
    pub api_keys: ConfigSource,
    pub api_limits: ConfigSource,
    pub auto_update: ConfigSource,
    pub timeout: ConfigSource,
    pub base_url: ConfigSource,
}

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config_path: PathBuf,
    /// The file contents as loaded, for rewriting.
    pub config: Config,
    pub paths: AppPaths,
    pub base_url: String,
    pub keys: KeyTable,
    pub hard_limits: HardLimitClamp,
    pub settings: CoordinatorSettings,
    pub sources: ConfigSources,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ResolvedConfig {
    /// Resolve final configuration from CLI args, environment variables, and config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is invalid, any resolved value is
    /// out of range, or the key and limit table cannot be built.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut sources = ConfigSources::default();

        let config_path = Self::resolve_config_path(cli, &mut sources.config_path);
        let config = Config::load_from(&config_path)?;
        config.validate()?;

        let paths = Self::resolve_paths(cli, &config, &mut sources.data_dir);
        let timeout = Self::resolve_timeout(cli, &config, &mut sources.timeout)?;
        let auto_update = Self::resolve_auto_update(cli, &config, &mut sources.auto_update)?;
        let base_url = Self::resolve_from_env(
            ENV_BASE_URL,
            &config.provider.base_url,
            DEFAULT_BASE_URL,
            &mut sources.base_url,
        );
        let api_keys =
            Self::resolve_from_env(ENV_API_KEYS, &config.provider.api_keys, "", &mut sources.api_keys);
        let api_limits = Self::resolve_from_env(
            ENV_API_LIMITS,
            &config.provider.api_limits,
            "10",
            &mut sources.api_limits,
        );

        let keys = KeyTable::build(&api_keys, &api_limits)?;
        let hard_limits =
            HardLimitClamp::from_config(config.provider.hard_limits.as_deref(), keys.len())?;

        let settings = CoordinatorSettings {
            tz: config.timezone()?,
            reset_tz: config.reset_timezone()?,
            auto_update,
            estimate: EstimateField::from_arg(&config.forecast.estimate).unwrap_or_default(),
            excluded: config.forecast.excluded_sites.clone(),
            granular: config.forecast.granular_dampening,
            custom_hours: config.forecast.custom_hours,
            interval_override: config
                .schedule
                .interval_minutes
                .map(|m| chrono::Duration::minutes(i64::from(m))),
            timeout,
        };

        Ok(Self {
            config_path,
            config,
            paths,
            base_url,
            keys,
            hard_limits,
            settings,
            sources,
        })
    }

    fn resolve_config_path(cli: &Cli, source: &mut ConfigSource) -> PathBuf {
        if let Some(path) = &cli.config {
            *source = ConfigSource::Cli;
            return path.clone();
        }
        if let Some(path) = env_value(ENV_CONFIG) {
            *source = ConfigSource::Env;
            return PathBuf::from(path);
        }
        *source = ConfigSource::Default;
        AppPaths::new().config_file()
    }

    fn resolve_paths(cli: &Cli, config: &Config, source: &mut ConfigSource) -> AppPaths {
        if let Some(dir) = &cli.data_dir {
            *source = ConfigSource::Cli;
            return AppPaths::with_data_dir(dir);
        }
        if let Some(dir) = env_value(ENV_DATA_DIR) {
            *source = ConfigSource::Env;
            return AppPaths::with_data_dir(dir);
        }
        if let Some(dir) = &config.general.data_dir {
            *source = ConfigSource::ConfigFile;
            return AppPaths::with_data_dir(dir);
        }
        *source = ConfigSource::Default;
        AppPaths::new()
    }

    fn resolve_timeout(cli: &Cli, config: &Config, source: &mut ConfigSource) -> Result<Duration> {
        let (seconds, from) = if let Some(t) = cli.timeout {
            (t, ConfigSource::Cli)
        } else if let Some(raw) = env_value(ENV_TIMEOUT) {
            let t = raw.parse::<u64>().map_err(|_| PvcastError::ConfigInvalid {
                key: ENV_TIMEOUT.to_string(),
                message: format!("'{raw}' is not a whole number of seconds"),
            })?;
            (t, ConfigSource::Env)
        } else if config.general.timeout_seconds == GeneralConfig::default().timeout_seconds {
            (config.general.timeout_seconds, ConfigSource::Default)
        } else {
            (config.general.timeout_seconds, ConfigSource::ConfigFile)
        };

        if !TIMEOUT_RANGE.contains(&seconds) {
            return Err(PvcastError::ConfigInvalid {
                key: "timeout".to_string(),
                message: "must be between 1 and 480 seconds".to_string(),
            });
        }
        *source = from;
        Ok(Duration::from_secs(seconds))
    }

    fn resolve_auto_update(
        cli: &Cli,
        config: &Config,
        source: &mut ConfigSource,
    ) -> Result<AutoUpdateMode> {
        let (value, from) = if let Some(v) = cli.auto_update {
            (v, ConfigSource::Cli)
        } else if let Some(raw) = env_value(ENV_AUTO_UPDATE) {
            let v = raw.parse::<u8>().map_err(|_| PvcastError::ConfigInvalid {
                key: ENV_AUTO_UPDATE.to_string(),
                message: format!("'{raw}' is not 0, 1 or 2"),
            })?;
            (v, ConfigSource::Env)
        } else {
            (config.forecast.auto_update, ConfigSource::ConfigFile)
        };

        let mode = AutoUpdateMode::from_u8(value).ok_or_else(|| PvcastError::ConfigInvalid {
            key: "auto_update".to_string(),
            message: "must be 0, 1 or 2".to_string(),
        })?;
        *source = from;
        Ok(mode)
    }

    fn resolve_from_env(
        env: &str,
        file_value: &str,
        default: &str,
        source: &mut ConfigSource,
    ) -> String {
        if let Some(value) = env_value(env) {
            *source = ConfigSource::Env;
            return value;
        }
        *source = if file_value == default {
            ConfigSource::Default
        } else {
            ConfigSource::ConfigFile
        };
        file_value.to_string()
    }

    /// Write the clamp's limits back to the config file.
    ///
    /// # Errors
    ///
    /// Returns error if the config file cannot be written.
    pub fn persist_hard_limits(&mut self, clamp: &HardLimitClamp) -> Result<()> {
        self.config.provider.hard_limits = clamp.to_config_string();
        self.hard_limits = clamp.clone();
        self.config.save_to(&self.config_path)
    }

    /// Write the granular dampening flag back to the config file.
    ///
    /// # Errors
    ///
    /// Returns error if the config file cannot be written.
    pub fn persist_granular(&mut self, enabled: bool) -> Result<()> {
        self.config.forecast.granular_dampening = enabled;
        self.settings.granular = enabled;
        self.config.save_to(&self.config_path)
    }
}
