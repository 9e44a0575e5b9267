//! Test utilities for pvcast.
//!
//! Provides test data factories, a scriptable [`MockProvider`], an isolated
//! [`TestDir`], and assertion macros for use across all test modules.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pvcast::test_utils::*;
//!
//! let site = make_test_site("1111-2222-3333-4444");
//! let provider = MockProvider::new()
//!     .with_forecasts(&site.resource_id, day_of_records("2024-06-01", 1.5));
//! let dir = TestDir::new();
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Notify;

use crate::core::fetch_plan::FetchKind;
use crate::core::models::{ApiKey, ForecastRecord, Site};
use crate::core::provider::ForecastProvider;
use crate::error::{PvcastError, Result};
use crate::util::time::PERIOD;

/// Key whose fingerprint [`make_test_site`] assigns.
pub const TEST_KEY: &str = "test-key-1";

// =============================================================================
// Test Data Factories
// =============================================================================

/// Create a test `Site` in Sydney, facing north, owned by [`TEST_KEY`].
///
/// # Examples
///
/// ```rust,ignore
/// use pvcast::test_utils::make_test_site;
///
/// let site = make_test_site("1111-2222-3333-4444");
/// assert!(!site.excluded);
/// ```
#[must_use]
pub fn make_test_site(id: &str) -> Site {
    Site {
        resource_id: id.to_string(),
        name: format!("Site {id}"),
        capacity: 5.0,
        capacity_dc: Some(6.6),
        azimuth: 0.0,
        tilt: 20.0,
        latitude: -33.87,
        longitude: 151.21,
        install_date: None,
        loss_factor: None,
        key_fingerprint: ApiKey::new(TEST_KEY).fingerprint(),
        excluded: false,
        stale: false,
        acknowledged_azimuth: None,
    }
}

/// Create a record with `kw` as the estimate and a spread around it.
#[must_use]
pub fn make_test_record(period_start: DateTime<Utc>, kw: f64) -> ForecastRecord {
    ForecastRecord::new(period_start, kw, kw * 0.8, kw * 1.2)
}

/// 48 records covering the UTC day `date` (`YYYY-MM-DD`) at a flat `kw`.
///
/// # Panics
///
/// Panics if `date` is not a valid date.
#[must_use]
pub fn day_of_records(date: &str, kw: f64) -> Vec<ForecastRecord> {
    let day: NaiveDate = date.parse().expect("valid date");
    records_from(day.and_time(chrono::NaiveTime::MIN).and_utc(), 48, kw)
}

/// `count` consecutive records from `start` at a flat `kw`.
#[must_use]
pub fn records_from(start: DateTime<Utc>, count: usize, kw: f64) -> Vec<ForecastRecord> {
    (0..count)
        .map(|i| make_test_record(start + PERIOD * i32::try_from(i).unwrap_or(i32::MAX), kw))
        .collect()
}

/// Parse an RFC 3339 timestamp.
///
/// # Panics
///
/// Panics on invalid input.
#[must_use]
pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

/// Create sample config TOML content for testing.
#[must_use]
pub fn make_test_config_toml() -> String {
    r#"[general]
timeout_seconds = 30
timezone = "Australia/Sydney"

[provider]
api_keys = "test-key-1"
api_limits = "10"

[forecast]
auto_update = 0
estimate = "estimate"
"#
    .to_string()
}

// =============================================================================
// Mock Provider
// =============================================================================

/// Failure a [`MockProvider`] returns in place of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Auth,
    NoSites,
    NotFound,
    Busy,
    Network,
    /// Never answers within any reasonable timeout.
    Hang,
}

impl MockFailure {
    fn into_error(self, key: &ApiKey, site: Option<&str>) -> PvcastError {
        let site = site.unwrap_or("unknown").to_string();
        match self {
            Self::Auth => PvcastError::AuthFailed { key: key.redacted() },
            Self::NoSites => PvcastError::NoSites { key: key.redacted() },
            Self::NotFound => PvcastError::SiteNotFound { site },
            Self::Busy => PvcastError::ProviderBusy { key: key.redacted() },
            Self::Network | Self::Hang => PvcastError::Network("connection reset".to_string()),
        }
    }
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub key_fingerprint: String,
    pub site: Option<String>,
    pub kind: FetchKind,
}

pub type Scripted<T> = std::result::Result<T, MockFailure>;

/// Scriptable in-memory [`ForecastProvider`].
///
/// Unscripted sites answer with no records; unscripted keys answer with no
/// sites. With a gate installed, every forecast request waits for
/// [`MockProvider::release`] before answering.
#[derive(Debug, Default)]
pub struct MockProvider {
    sites: Mutex<HashMap<String, Scripted<Vec<Site>>>>,
    forecasts: Mutex<HashMap<String, Scripted<Vec<ForecastRecord>>>>,
    actuals: Mutex<HashMap<String, Scripted<Vec<ForecastRecord>>>>,
    calls: Mutex<Vec<MockCall>>,
    sites_calls: AtomicUsize,
    forecast_calls: AtomicUsize,
    actuals_calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    entered: Arc<Notify>,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sites(self, key: &ApiKey, sites: Vec<Site>) -> Self {
        self.set_sites(key, Ok(sites));
        self
    }

    #[must_use]
    pub fn with_sites_failure(self, key: &ApiKey, failure: MockFailure) -> Self {
        self.set_sites(key, Err(failure));
        self
    }

    #[must_use]
    pub fn with_forecasts(self, site: &str, records: Vec<ForecastRecord>) -> Self {
        self.set_forecasts(site, Ok(records));
        self
    }

    #[must_use]
    pub fn with_forecast_failure(self, site: &str, failure: MockFailure) -> Self {
        self.set_forecasts(site, Err(failure));
        self
    }

    #[must_use]
    pub fn with_actuals(self, site: &str, records: Vec<ForecastRecord>) -> Self {
        lock(&self.actuals).insert(site.to_string(), Ok(records));
        self
    }

    #[must_use]
    pub fn with_actuals_failure(self, site: &str, failure: MockFailure) -> Self {
        lock(&self.actuals).insert(site.to_string(), Err(failure));
        self
    }

    /// Hold every forecast request until [`Self::release`] is called.
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    /// Replace the scripted sites for `key`.
    pub fn set_sites(&self, key: &ApiKey, response: Scripted<Vec<Site>>) {
        lock(&self.sites).insert(key.fingerprint(), response);
    }

    /// Replace the scripted forecasts for `site`.
    pub fn set_forecasts(&self, site: &str, response: Scripted<Vec<ForecastRecord>>) {
        lock(&self.forecasts).insert(site.to_string(), response);
    }

    /// Let one gated forecast request through.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Wait until a forecast request has started.
    pub async fn wait_for_request(&self) {
        self.entered.notified().await;
    }

    #[must_use]
    pub fn sites_calls(&self) -> usize {
        self.sites_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn forecast_calls(&self) -> usize {
        self.forecast_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn actuals_calls(&self) -> usize {
        self.actuals_calls.load(Ordering::SeqCst)
    }

    /// Every call in the order received.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, key: &ApiKey, site: Option<&str>, kind: FetchKind) {
        lock(&self.calls).push(MockCall {
            key_fingerprint: key.fingerprint(),
            site: site.map(ToString::to_string),
            kind,
        });
    }

    async fn answer<T: Clone + Default>(
        scripted: Option<Scripted<T>>,
        key: &ApiKey,
        site: Option<&str>,
    ) -> Result<T> {
        match scripted {
            None => Ok(T::default()),
            Some(Ok(value)) => Ok(value),
            Some(Err(MockFailure::Hang)) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(MockFailure::Hang.into_error(key, site))
            }
            Some(Err(failure)) => Err(failure.into_error(key, site)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl ForecastProvider for MockProvider {
    async fn rooftop_sites(&self, key: &ApiKey) -> Result<Vec<Site>> {
        self.sites_calls.fetch_add(1, Ordering::SeqCst);
        self.record(key, None, FetchKind::Sites);
        let scripted = lock(&self.sites).get(&key.fingerprint()).cloned();
        let sites: Vec<Site> = Self::answer(scripted, key, None).await?;
        if sites.is_empty() {
            return Err(PvcastError::NoSites { key: key.redacted() });
        }
        Ok(sites
            .into_iter()
            .map(|s| Site {
                key_fingerprint: key.fingerprint(),
                ..s
            })
            .collect())
    }

    async fn forecasts(&self, key: &ApiKey, site: &str, _hours: u32) -> Result<Vec<ForecastRecord>> {
        self.forecast_calls.fetch_add(1, Ordering::SeqCst);
        self.record(key, Some(site), FetchKind::Forecasts);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let scripted = lock(&self.forecasts).get(site).cloned();
        Self::answer(scripted, key, Some(site)).await
    }

    async fn estimated_actuals(
        &self,
        key: &ApiKey,
        site: &str,
        _hours: u32,
    ) -> Result<Vec<ForecastRecord>> {
        self.actuals_calls.fetch_add(1, Ordering::SeqCst);
        self.record(key, Some(site), FetchKind::EstimatedActuals);
        let scripted = lock(&self.actuals).get(site).cloned();
        Self::answer(scripted, key, Some(site)).await
    }
}

// =============================================================================
// Test Directory
// =============================================================================

/// An isolated temporary directory, removed on drop.
///
/// # Examples
///
/// ```rust,ignore
/// use pvcast::test_utils::TestDir;
///
/// let dir = TestDir::new();
/// dir.create_file("config.toml", "[general]\ntimeout_seconds = 30");
/// assert!(dir.file_exists("config.toml"));
/// ```
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// Create a new isolated temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file with the given content, creating parents as needed.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
    }

    /// Read a file from the temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.inner.path().join(name))
    }

    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.inner.path().join(name).exists()
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert approximate floating point equality.
///
/// # Examples
///
/// ```rust,ignore
/// use pvcast::assert_float_eq;
///
/// assert_float_eq!(2.0, 2.0000000001);
/// assert_float_eq!(2.0, 2.05, 0.1); // Custom epsilon
/// ```
#[macro_export]
macro_rules! assert_float_eq {
    ($left:expr, $right:expr) => {
        $crate::assert_float_eq!($left, $right, 1e-9)
    };
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left;
        let right: f64 = $right;
        let epsilon: f64 = $epsilon;
        assert!(
            (left - right).abs() < epsilon,
            "Float equality assertion failed: {} != {} (epsilon: {})",
            left,
            right,
            epsilon
        );
    }};
}

/// Assert that a string does NOT contain ANSI escape codes.
#[macro_export]
macro_rules! assert_no_ansi_codes {
    ($text:expr) => {
        let text = $text;
        assert!(
            !text.contains('\x1b'),
            "Expected string to NOT contain ANSI escape codes.\n\nActual string:\n{:?}",
            text
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_of_records_is_aligned() {
        let records = day_of_records("2024-06-01", 1.0);
        assert_eq!(records.len(), 48);
        assert!(records.iter().all(ForecastRecord::is_well_formed));
        assert_eq!(records[47].period_start, utc("2024-06-01T23:30:00Z"));
    }

    #[tokio::test]
    async fn mock_records_calls() {
        let key = ApiKey::new(TEST_KEY);
        let provider = MockProvider::new()
            .with_forecast_failure("1111-1111-1111-1111", MockFailure::Busy);
        assert!(provider.forecasts(&key, "1111-1111-1111-1111", 24).await.is_err());
        assert!(provider.forecasts(&key, "2222-2222-2222-2222", 24).await.unwrap().is_empty());
        assert!(matches!(
            provider.rooftop_sites(&key).await,
            Err(PvcastError::NoSites { .. })
        ));
        assert_eq!(provider.forecast_calls(), 2);
        assert_eq!(provider.calls().len(), 3);
    }
}
