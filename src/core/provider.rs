//! Forecast provider seam and fetch horizon rules.

use std::future::Future;

use chrono::{DateTime, Days, Utc};
use chrono_tz::Tz;

use crate::core::models::{ApiKey, ForecastRecord, Site};
use crate::error::Result;
use crate::util::time::{hours_until, local_date, local_day_start, local_midnight};

/// Hours of estimated actuals requested on a full resync.
pub const ACTUALS_HOURS: u32 = 168;
/// Forecast horizon measured from the start of the local day.
pub const HORIZON_DAYS: u64 = 8;
/// Estimated actuals older than this many days before local midnight are dropped.
pub const ACTUALS_KEEP_DAYS: u64 = 6;

/// Remote source of site metadata and forecast records.
///
/// Implementations attempt each request once; retries are the caller's
/// decision.
pub trait ForecastProvider: Send + Sync {
    /// Rooftop sites visible to `key`, each tagged with the key's fingerprint.
    fn rooftop_sites(&self, key: &ApiKey) -> impl Future<Output = Result<Vec<Site>>> + Send;

    /// Forecast records for the next `hours` hours.
    fn forecasts(
        &self,
        key: &ApiKey,
        site: &str,
        hours: u32,
    ) -> impl Future<Output = Result<Vec<ForecastRecord>>> + Send;

    /// Estimated actuals for the past `hours` hours.
    fn estimated_actuals(
        &self,
        key: &ApiKey,
        site: &str,
        hours: u32,
    ) -> impl Future<Output = Result<Vec<ForecastRecord>>> + Send;
}

/// End of the forecast window: local day start plus eight days.
#[must_use]
pub fn horizon_end(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let today = local_date(now, tz);
    today
        .checked_add_days(Days::new(HORIZON_DAYS))
        .map_or_else(|| local_day_start(now, tz), |end| local_midnight(end, tz))
}

/// Hours of forecast to request so the window reaches [`horizon_end`].
#[must_use]
pub fn forecast_hours(now: DateTime<Utc>, tz: Tz) -> u32 {
    hours_until(now, horizon_end(now, tz))
}

/// Oldest estimated actual worth keeping.
#[must_use]
pub fn actuals_cutoff(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let today = local_date(now, tz);
    today
        .checked_sub_days(Days::new(ACTUALS_KEEP_DAYS))
        .map_or_else(|| local_day_start(now, tz), |d| local_midnight(d, tz))
}
