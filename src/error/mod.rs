//! Error types for pvcast.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized by how the coordinator reacts to them:
//! - **Configuration**: bad keys, limits, dampening or hard-limit input; rejected
//!   at the boundary and never applied partially
//! - **Operational**: provider failures scoped to one site or key; the cycle
//!   carries on and the affected site keeps its last good data
//! - **Integrity**: corrupt or incompatible persisted state; fatal at startup
//! - **Policy**: requests that are well-formed but not allowed right now
//! - **Internal**: I/O, serialization, and unclassified failures
//!
//! Each error has a stable error code (e.g., `PVC-I001`) for programmatic handling.
//!
//! ## Fix Suggestions
//!
//! Each error type can provide actionable fix suggestions via the
//! [`PvcastError::fix_suggestions()`] method.

pub mod suggestions;

use thiserror::Error;

pub use suggestions::FixSuggestion;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected user or file configuration.
    Configuration,
    /// Per-site or per-key provider failure.
    Operational,
    /// Persisted state that cannot be trusted.
    Integrity,
    /// Well-formed request refused by the current mode or state.
    Policy,
    /// Internal errors (bugs, I/O, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration error",
            Self::Operational => "Operational error",
            Self::Integrity => "Integrity error",
            Self::Policy => "Policy error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Configuration => "C",
            Self::Operational => "O",
            Self::Integrity => "I",
            Self::Policy => "P",
            Self::Internal => "X",
        }
    }

    /// Integrity errors halt the coordinator until an operator intervenes.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Integrity)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Configuration rejected
    ConfigError = 2,
    /// Persisted state needs operator attention
    IntegrityError = 3,
    /// Provider unreachable, timed out, or refused the request
    Operational = 4,
    /// Request refused by trigger mode or cycle state
    PolicyRejected = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

/// Main error type for pvcast operations.
///
/// API keys are always stored redacted inside variants.
#[derive(Error, Debug)]
pub enum PvcastError {
    // ==========================================================================
    // Configuration errors
    // ==========================================================================
    /// No API key configured.
    #[error("no API key configured")]
    NoApiKeys,

    /// The same API key appears more than once.
    #[error("duplicate API key specified: {key}")]
    DuplicateApiKey { key: String },

    /// Blank or whitespace-containing key.
    #[error("API key #{position} is malformed")]
    MalformedApiKey { position: usize },

    /// A site resource id was pasted into the key field.
    #[error("API key looks like a site ID: {key}")]
    ApiKeyLooksLikeSite { key: String },

    /// API limit value is not an integer.
    #[error("API limit is not a number: '{value}'")]
    ApiLimitNotNumber { value: String },

    /// API limit below one.
    #[error("API limit must be one or greater: {value}")]
    ApiLimitTooSmall { value: i64 },

    /// Limit cardinality other than 0, 1, or one per key.
    #[error("there are more API limit counts entered than keys ({limits} limits for {keys} keys)")]
    ApiLimitCountMismatch { limits: usize, keys: usize },

    /// Dampening input is not 24 or 48 parseable floats.
    #[error("invalid dampening format: {0}")]
    InvalidDampeningFormat(String),

    /// A dampening factor outside [0.0, 1.0].
    #[error("dampening factor {value} at position {index} is outside 0.0 to 1.0")]
    DampeningOutOfRange { index: usize, value: f64 },

    /// Blank hard limit input.
    #[error("hard limit is empty")]
    HardLimitEmpty,

    /// Hard limit value not a positive number.
    #[error("hard limit is not a positive number: '{value}'")]
    HardLimitNotPositiveNumber { value: String },

    /// More hard limits than API keys.
    #[error("there are more hard limits entered than keys ({limits} limits for {keys} keys)")]
    HardLimitTooManyValues { limits: usize, keys: usize },

    /// Site id that does not match the provider's resource id format.
    #[error("invalid site id: {0}")]
    InvalidSiteId(String),

    /// Invalid value in configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid { key: String, message: String },

    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // Operational errors
    // ==========================================================================
    /// Provider rejected the key (401/403).
    #[error("provider rejected API key {key}")]
    AuthFailed { key: String },

    /// Provider account has no rooftop sites.
    #[error("no sites found for API key {key}")]
    NoSites { key: String },

    /// Provider does not know or will not serve the site (404).
    #[error("site {site} cannot be found or is not accessible")]
    SiteNotFound { site: String },

    /// Provider refused the site for missing capacity (400).
    #[error("site {site} is missing capacity")]
    SiteMissingCapacity { site: String },

    /// Provider is busy or the key hit its provider-side limit (429).
    #[error("provider is busy or limit reached for API key {key}")]
    ProviderBusy { key: String },

    /// Any other non-success HTTP status.
    #[error("provider API error (HTTP {status}): {message}")]
    ProviderApi { status: u16, message: String },

    /// Request exceeded its timeout.
    #[error("request timeout after {seconds}s for {target}")]
    Timeout { target: String, seconds: u64 },

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Provider response did not have the expected shape.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    /// Command referenced a site that is not registered.
    #[error("unknown site: {0}")]
    UnknownSite(String),

    /// No configured key had quota left for the site this cycle.
    #[error("API quota exhausted, site {site} skipped this cycle")]
    QuotaExhausted { site: String },

    /// Startup ended with an empty site registry.
    #[error("no sites available from any configured API key")]
    NoSitesAvailable,

    // ==========================================================================
    // Integrity errors
    // ==========================================================================
    /// Usage document is structurally invalid.
    #[error("usage data is corrupt at {path}: {reason}")]
    UsageDataCorrupt { path: String, reason: String },

    /// Document written by an incompatible version.
    #[error("incompatible cache schema at {path}: found version {found}, expected {expected}")]
    IncompatibleCacheSchema {
        path: String,
        found: u32,
        expected: u32,
    },

    /// Site metadata unavailable from the provider and the cache.
    #[error("sites unavailable: provider fetch failed and the site cache is invalid ({reason})")]
    SitesUnavailableCacheInvalid { reason: String },

    // ==========================================================================
    // Policy errors
    // ==========================================================================
    /// Force update requested while automatic updates are on.
    #[error("force update is only available when auto-update is disabled; use update instead")]
    ForceUpdateWhileAutoUpdate,

    /// Plain update requested while automatic updates are off.
    #[error("auto-update is disabled; use force update instead")]
    UpdateWhileManual,

    /// A fetch cycle is already in flight.
    #[error("a forecast update is already in progress")]
    CycleInProgress,

    /// Another coordinator owns the data directory.
    #[error("data directory {path} is in use by another pvcast process")]
    DataDirLocked { path: String },

    /// Site-level dampening requested while granular mode is off.
    #[error("granular dampening is not enabled; site-level dampening requires it")]
    GranularDampeningDisabled,

    /// 24/48 or all/per-site combination that would mix profile shapes.
    #[error("dampening granularity conflict: {0}")]
    GranularityConflict(String),

    // ==========================================================================
    // Internal errors
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PvcastError {
    /// Map error to a process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self.category() {
            ErrorCategory::Configuration => ExitCode::ConfigError,
            ErrorCategory::Integrity => ExitCode::IntegrityError,
            ErrorCategory::Operational => ExitCode::Operational,
            ErrorCategory::Policy => ExitCode::PolicyRejected,
            ErrorCategory::Internal => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NoApiKeys
            | Self::DuplicateApiKey { .. }
            | Self::MalformedApiKey { .. }
            | Self::ApiKeyLooksLikeSite { .. }
            | Self::ApiLimitNotNumber { .. }
            | Self::ApiLimitTooSmall { .. }
            | Self::ApiLimitCountMismatch { .. }
            | Self::InvalidDampeningFormat(_)
            | Self::DampeningOutOfRange { .. }
            | Self::HardLimitEmpty
            | Self::HardLimitNotPositiveNumber { .. }
            | Self::HardLimitTooManyValues { .. }
            | Self::InvalidSiteId(_)
            | Self::ConfigInvalid { .. }
            | Self::Config(_) => ErrorCategory::Configuration,

            Self::AuthFailed { .. }
            | Self::NoSites { .. }
            | Self::SiteNotFound { .. }
            | Self::SiteMissingCapacity { .. }
            | Self::ProviderBusy { .. }
            | Self::ProviderApi { .. }
            | Self::Timeout { .. }
            | Self::Network(_)
            | Self::ParseResponse(_)
            | Self::UnknownSite(_)
            | Self::QuotaExhausted { .. }
            | Self::NoSitesAvailable => ErrorCategory::Operational,

            Self::UsageDataCorrupt { .. }
            | Self::IncompatibleCacheSchema { .. }
            | Self::SitesUnavailableCacheInvalid { .. } => ErrorCategory::Integrity,

            Self::ForceUpdateWhileAutoUpdate
            | Self::UpdateWhileManual
            | Self::CycleInProgress
            | Self::DataDirLocked { .. }
            | Self::GranularDampeningDisabled
            | Self::GranularityConflict(_) => ErrorCategory::Policy,

            Self::Io(_) | Self::Json(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `PVC-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NoApiKeys => "PVC-C001",
            Self::DuplicateApiKey { .. } => "PVC-C002",
            Self::MalformedApiKey { .. } => "PVC-C003",
            Self::ApiKeyLooksLikeSite { .. } => "PVC-C004",
            Self::ApiLimitNotNumber { .. } => "PVC-C010",
            Self::ApiLimitTooSmall { .. } => "PVC-C011",
            Self::ApiLimitCountMismatch { .. } => "PVC-C012",
            Self::InvalidDampeningFormat(_) => "PVC-C020",
            Self::DampeningOutOfRange { .. } => "PVC-C021",
            Self::HardLimitEmpty => "PVC-C030",
            Self::HardLimitNotPositiveNumber { .. } => "PVC-C031",
            Self::HardLimitTooManyValues { .. } => "PVC-C032",
            Self::InvalidSiteId(_) => "PVC-C040",
            Self::ConfigInvalid { .. } => "PVC-C050",
            Self::Config(_) => "PVC-C099",

            Self::AuthFailed { .. } => "PVC-O001",
            Self::NoSites { .. } => "PVC-O002",
            Self::SiteNotFound { .. } => "PVC-O003",
            Self::SiteMissingCapacity { .. } => "PVC-O004",
            Self::ProviderBusy { .. } => "PVC-O005",
            Self::ProviderApi { .. } => "PVC-O006",
            Self::Timeout { .. } => "PVC-O010",
            Self::Network(_) => "PVC-O011",
            Self::ParseResponse(_) => "PVC-O012",
            Self::UnknownSite(_) => "PVC-O020",
            Self::QuotaExhausted { .. } => "PVC-O021",
            Self::NoSitesAvailable => "PVC-O022",

            Self::UsageDataCorrupt { .. } => "PVC-I001",
            Self::IncompatibleCacheSchema { .. } => "PVC-I002",
            Self::SitesUnavailableCacheInvalid { .. } => "PVC-I003",

            Self::ForceUpdateWhileAutoUpdate => "PVC-P001",
            Self::UpdateWhileManual => "PVC-P002",
            Self::CycleInProgress => "PVC-P003",
            Self::DataDirLocked { .. } => "PVC-P004",
            Self::GranularDampeningDisabled => "PVC-P010",
            Self::GranularityConflict(_) => "PVC-P011",

            Self::Io(_) => "PVC-X001",
            Self::Json(_) => "PVC-X002",
        }
    }

    /// Whether the next scheduled cycle may succeed without operator action.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Network(_)
                | Self::ProviderBusy { .. }
                | Self::QuotaExhausted { .. }
        )
    }

    /// True when the provider answered at all (any HTTP status).
    #[must_use]
    pub const fn provider_responded(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed { .. }
                | Self::NoSites { .. }
                | Self::SiteNotFound { .. }
                | Self::SiteMissingCapacity { .. }
                | Self::ProviderBusy { .. }
                | Self::ProviderApi { .. }
                | Self::ParseResponse(_)
        )
    }

    /// Returns actionable fix suggestions for this error.
    #[must_use]
    pub fn fix_suggestions(&self) -> Vec<FixSuggestion> {
        match self {
            Self::NoApiKeys | Self::MalformedApiKey { .. } => suggestions::api_key_suggestions(),
            Self::DuplicateApiKey { key } => suggestions::duplicate_key_suggestions(key),
            Self::ApiKeyLooksLikeSite { key } => suggestions::key_looks_like_site_suggestions(key),
            Self::ApiLimitNotNumber { .. }
            | Self::ApiLimitTooSmall { .. }
            | Self::ApiLimitCountMismatch { .. } => suggestions::api_limit_suggestions(),
            Self::InvalidDampeningFormat(_) | Self::DampeningOutOfRange { .. } => {
                suggestions::dampening_format_suggestions()
            }
            Self::HardLimitEmpty
            | Self::HardLimitNotPositiveNumber { .. }
            | Self::HardLimitTooManyValues { .. } => suggestions::hard_limit_suggestions(),
            Self::InvalidSiteId(id) => vec![FixSuggestion::new(
                vec!["pvcast sites list".to_string()],
                format!("'{id}' is not a rooftop site id (expected xxxx-xxxx-xxxx-xxxx)."),
            )],
            Self::ConfigInvalid { key, message } => {
                suggestions::config_invalid_suggestions(key, message)
            }
            Self::Config(msg) => vec![FixSuggestion::new(
                vec!["pvcast status".to_string()],
                format!("Configuration error: {msg}"),
            )],

            Self::AuthFailed { key } => suggestions::auth_failed_suggestions(key),
            Self::NoSites { key } => suggestions::no_sites_suggestions(key),
            Self::SiteNotFound { site } | Self::SiteMissingCapacity { site } => {
                suggestions::site_rejected_suggestions(site)
            }
            Self::ProviderBusy { .. } | Self::QuotaExhausted { .. } => {
                suggestions::quota_suggestions()
            }
            Self::Timeout { seconds, .. } => suggestions::timeout_suggestions(*seconds),
            Self::Network(_) | Self::ProviderApi { .. } | Self::ParseResponse(_) => {
                suggestions::transient_suggestions()
            }
            Self::UnknownSite(site) => suggestions::unknown_site_suggestions(site),
            Self::NoSitesAvailable => suggestions::no_sites_suggestions("any configured key"),

            Self::UsageDataCorrupt { path, .. } => suggestions::usage_corrupt_suggestions(path),
            Self::IncompatibleCacheSchema { path, .. } => {
                suggestions::incompatible_schema_suggestions(path)
            }
            Self::SitesUnavailableCacheInvalid { .. } => suggestions::sites_unavailable_suggestions(),

            Self::ForceUpdateWhileAutoUpdate => suggestions::trigger_mode_suggestions(true),
            Self::UpdateWhileManual => suggestions::trigger_mode_suggestions(false),
            Self::CycleInProgress => vec![FixSuggestion::new(
                vec!["pvcast status".to_string()],
                "Only one update runs at a time. Wait for it to finish and check status.",
            )],
            Self::DataDirLocked { path } => suggestions::data_dir_locked_suggestions(path),
            Self::GranularDampeningDisabled | Self::GranularityConflict(_) => {
                suggestions::granularity_suggestions()
            }

            Self::Io(_) | Self::Json(_) => Vec::new(),
        }
    }
}

/// Result type alias using `PvcastError`.
pub type Result<T> = std::result::Result<T, PvcastError>;
