//! Fix suggestion database for pvcast errors.
//!
//! Maps error types to copy-paste ready commands plus a short explanation.

// =============================================================================
// Fix Suggestion Types
// =============================================================================

/// A fix suggestion for an error.
#[derive(Debug, Clone)]
pub struct FixSuggestion {
    /// Primary fix commands in order of preference.
    pub commands: Vec<String>,

    /// Explanation of why this error occurred.
    pub context: String,

    /// Tips to prevent this error in the future.
    pub prevention: Option<String>,
}

impl FixSuggestion {
    /// Creates a new fix suggestion with required fields.
    #[must_use]
    pub fn new(commands: Vec<String>, context: impl Into<String>) -> Self {
        Self {
            commands,
            context: context.into(),
            prevention: None,
        }
    }

    /// Builder: adds prevention tips.
    #[must_use]
    pub fn with_prevention(mut self, prevention: impl Into<String>) -> Self {
        self.prevention = Some(prevention.into());
        self
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[must_use]
pub fn api_key_suggestions() -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![
            "export PVCAST_API_KEYS=<key1>,<key2>".to_string(),
            "# or set [provider] api_keys in config.toml".to_string(),
        ],
        "At least one provider API key is required. Keys are comma separated and may not contain spaces.",
    )]
}

#[must_use]
pub fn duplicate_key_suggestions(key: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["# remove the repeated entry from [provider] api_keys".to_string()],
        format!("API key {key} is listed more than once."),
    )]
}

#[must_use]
pub fn key_looks_like_site_suggestions(key: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["# copy the API key from the provider account page".to_string()],
            format!("{key} has the xxxx-xxxx-xxxx-xxxx shape of a rooftop site id, not an API key."),
        )
        .with_prevention("Site ids are discovered automatically; only keys belong in api_keys."),
    ]
}

#[must_use]
pub fn api_limit_suggestions() -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![
            "# one limit for every key:   api_limits = \"10\"".to_string(),
            "# one limit per key:         api_limits = \"10,50\"".to_string(),
        ],
        "API limits are whole numbers of one or more, given once for all keys or once per key.",
    )]
}

#[must_use]
pub fn dampening_format_suggestions() -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![
            "pvcast dampening get".to_string(),
            "pvcast dampening set 1,1,1,...  # 24 hourly or 48 half-hourly values".to_string(),
        ],
        "Dampening takes exactly 24 or 48 comma-separated factors between 0.0 and 1.0.",
    )]
}

#[must_use]
pub fn hard_limit_suggestions() -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![
            "pvcast hard-limit set 5000".to_string(),
            "pvcast hard-limit set 5000,3000  # one per key".to_string(),
            "pvcast hard-limit remove".to_string(),
        ],
        "Hard limits are positive watt values, at most one per configured API key.",
    )]
}

#[must_use]
pub fn config_invalid_suggestions(key: &str, message: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![format!("# fix '{key}' in config.toml or its PVCAST_ environment variable")],
        format!("Invalid value for '{key}': {message}"),
    )]
}

// =============================================================================
// Operational
// =============================================================================

#[must_use]
pub fn auth_failed_suggestions(key: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["# check the key on the provider account page".to_string()],
        format!("The provider rejected API key {key}. It may have been revoked or mistyped."),
    )]
}

#[must_use]
pub fn no_sites_suggestions(key: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["pvcast sites list".to_string()],
        format!("No rooftop sites were returned for {key}. Create a site on the provider account first."),
    )]
}

#[must_use]
pub fn site_rejected_suggestions(site: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["pvcast sites list".to_string()],
        format!("The provider refused site {site}. Check that it still exists and has a capacity set."),
    )]
}

#[must_use]
pub fn quota_suggestions() -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["pvcast status".to_string()],
            "The daily API allowance is used up. Fetching resumes after the quota reset.",
        )
        .with_prevention("Lower the polling cadence or raise api_limits if your plan allows."),
    ]
}

#[must_use]
pub fn timeout_suggestions(seconds: u64) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![format!("pvcast --timeout {} update", seconds.saturating_mul(2))],
        format!("The provider did not answer within {seconds}s. The next cycle will retry."),
    )]
}

#[must_use]
pub fn transient_suggestions() -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["pvcast status".to_string()],
        "The provider could not be reached or returned an unexpected reply. Cached values stay in use until the next cycle.",
    )]
}

#[must_use]
pub fn unknown_site_suggestions(site: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["pvcast sites list".to_string()],
        format!("Site {site} is not registered for any configured API key."),
    )]
}

// =============================================================================
// Integrity
// =============================================================================

#[must_use]
pub fn usage_corrupt_suggestions(path: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![format!("rm {path}")],
            "The API usage record cannot be read. It is never rebuilt automatically, because a wrong count could exceed the provider's limit.",
        )
        .with_prevention("After deleting it, usage counts restart from zero for the current day."),
    ]
}

#[must_use]
pub fn incompatible_schema_suggestions(path: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![format!("rm {path}"), "pvcast clear-cache".to_string()],
        "The cache was written by an incompatible version and cannot be read safely.",
    )]
}

#[must_use]
pub fn sites_unavailable_suggestions() -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["pvcast status".to_string()],
        "Site details could not be fetched and no valid cached copy exists. Check connectivity and API keys, then start again.",
    )]
}

// =============================================================================
// Policy
// =============================================================================

#[must_use]
pub fn trigger_mode_suggestions(auto_enabled: bool) -> Vec<FixSuggestion> {
    if auto_enabled {
        vec![FixSuggestion::new(
            vec!["pvcast update".to_string()],
            "Automatic updates are enabled, so manual fetches go through update.",
        )]
    } else {
        vec![FixSuggestion::new(
            vec!["pvcast force-update".to_string()],
            "Automatic updates are disabled, so fetches must be forced.",
        )]
    }
}

#[must_use]
pub fn data_dir_locked_suggestions(path: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["pvcast --data-dir <other-dir> status".to_string()],
            format!("Another pvcast process owns {path}. Commands that change state must run there or in a different data directory."),
        )
        .with_prevention("Stop `pvcast run` before using other commands on the same data directory."),
    ]
}

#[must_use]
pub fn granularity_suggestions() -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![
            "pvcast dampening granular on".to_string(),
            "pvcast dampening set <48 values> --site <site-id>".to_string(),
        ],
        "Per-site dampening needs granular mode and 48 half-hourly values. An all-sites 48-value entry cannot be combined with per-site entries.",
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_prevention() {
        let suggestion = FixSuggestion::new(vec![], "ctx").with_prevention("tip");
        assert_eq!(suggestion.prevention.as_deref(), Some("tip"));
    }

    #[test]
    fn usage_corrupt_names_the_file() {
        let suggestions = usage_corrupt_suggestions("/data/usage.json");
        assert_eq!(suggestions[0].commands[0], "rm /data/usage.json");
    }
}
