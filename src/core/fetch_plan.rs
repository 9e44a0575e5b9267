//! Fetch planning types.
//!
//! A [`FetchPlan`] is built during the quota check: each site is either
//! assigned to the key that was charged for it, or skipped because every key
//! is exhausted. The pipeline then runs one group per key.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::models::{ForecastRecord, Site};
use crate::error::PvcastError;

// =============================================================================
// Fetch Kind
// =============================================================================

/// Provider endpoint a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    Sites,
    Forecasts,
    EstimatedActuals,
}

impl FetchKind {
    /// Label for logs and output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sites => "rooftop_sites",
            Self::Forecasts => "forecasts",
            Self::EstimatedActuals => "estimated_actuals",
        }
    }
}

// =============================================================================
// Plan
// =============================================================================

/// One site's fetch, charged to `key_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFetch {
    pub site: String,
    pub key_index: usize,
    /// Also request estimated actuals (full resync only).
    pub with_actuals: bool,
}

/// Sites grouped by the key they were charged to, plus sites skipped for quota.
#[derive(Debug, Clone, Default)]
pub struct FetchPlan {
    groups: BTreeMap<usize, Vec<PlannedFetch>>,
    skipped: Vec<String>,
}

impl FetchPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fetch: PlannedFetch) {
        self.groups.entry(fetch.key_index).or_default().push(fetch);
    }

    pub fn skip(&mut self, site: impl Into<String>) {
        self.skipped.push(site.into());
    }

    /// Groups in key order.
    pub fn groups(&self) -> impl Iterator<Item = (usize, &[PlannedFetch])> {
        self.groups.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    #[must_use]
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Number of sites that will be fetched.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Key charged for `site`, if planned.
    #[must_use]
    pub fn key_for(&self, site: &str) -> Option<usize> {
        self.groups
            .values()
            .flatten()
            .find(|f| f.site == site)
            .map(|f| f.key_index)
    }
}

// =============================================================================
// Fetch Attempt
// =============================================================================

/// Record of a single provider request.
#[derive(Debug, Clone, Serialize)]
pub struct FetchAttempt {
    pub site: Option<String>,
    pub kind: FetchKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Records returned for one site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedSeries {
    pub forecasts: Vec<ForecastRecord>,
    pub actuals: Vec<ForecastRecord>,
}

/// What happened to one planned site fetch.
#[derive(Debug)]
pub enum FetchResult {
    Fetched(FetchedSeries),
    Failed(PvcastError),
    /// Cancellation was requested before the fetch started.
    NotStarted,
}

/// Outcome of one site's fetch, with every request it made.
#[derive(Debug)]
pub struct SiteFetchOutcome {
    pub site: String,
    pub key_index: usize,
    pub result: FetchResult,
    pub attempts: Vec<FetchAttempt>,
}

impl SiteFetchOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.result, FetchResult::Fetched(_))
    }

    #[must_use]
    pub fn error(&self) -> Option<&PvcastError> {
        match &self.result {
            FetchResult::Failed(e) => Some(e),
            FetchResult::Fetched(_) | FetchResult::NotStarted => None,
        }
    }
}

/// Outcome of one key's site metadata fetch.
#[derive(Debug)]
pub struct SitesFetchOutcome {
    pub key_index: usize,
    pub result: Result<Vec<Site>, PvcastError>,
    pub attempt: FetchAttempt,
}
