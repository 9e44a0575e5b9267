//! Derived values computed from dampened forecast series.
//!
//! Nothing here is authoritative: every value can be rebuilt from the raw
//! records, the dampening profiles and the hard limit.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::core::dampening::{self, DampeningEngine};
use crate::core::hard_limit::HardLimitClamp;
use crate::core::models::{EstimateField, ForecastRecord};
use crate::core::sites::SiteRegistry;
use crate::util::time::{PERIOD, hour_start, local_date, local_day_bounds};

/// Day offsets covered by per-day totals.
pub const DAY_OFFSETS: u8 = 8;

const POWER_WINDOW: Duration = Duration::minutes(10);

// =============================================================================
// Series helpers
// =============================================================================

/// Energy in kWh between `start` and `end`, pro rata for partial periods.
#[must_use]
pub fn energy_kwh(
    series: &[ForecastRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    field: EstimateField,
) -> f64 {
    if end <= start {
        return 0.0;
    }
    series
        .iter()
        .filter(|r| r.period_end() > start && r.period_start < end)
        .map(|r| {
            let overlap = r.period_end().min(end) - r.period_start.max(start);
            r.value(field) * overlap.num_seconds() as f64 / 3600.0
        })
        .sum()
}

/// Average power in watts over the 20 minutes centred on `at`.
#[must_use]
pub fn power_w(series: &[ForecastRecord], at: DateTime<Utc>, field: EstimateField) -> f64 {
    let window = POWER_WINDOW * 2;
    let kwh = energy_kwh(series, at - POWER_WINDOW, at + POWER_WINDOW, field);
    kwh * 3600.0 / window.num_seconds() as f64 * 1000.0
}

/// Highest period in `[start, end)`. Earliest wins on ties.
#[must_use]
pub fn peak(
    series: &[ForecastRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    field: EstimateField,
) -> Option<Peak> {
    series
        .iter()
        .filter(|r| r.period_start >= start && r.period_start < end)
        .fold(None, |best: Option<Peak>, r| {
            let watts = r.value(field) * 1000.0;
            match best {
                Some(b) if b.watts >= watts => Some(b),
                _ => Some(Peak {
                    at: r.period_start,
                    watts,
                }),
            }
        })
}

/// Per-period energy in Wh. Runs of zero periods keep only their edges.
#[must_use]
pub fn wh_series(series: &[ForecastRecord], field: EstimateField) -> BTreeMap<DateTime<Utc>, f64> {
    let values: Vec<f64> = series.iter().map(|r| r.value(field) * 500.0).collect();
    series
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let is_zero = |j: usize| values.get(j).is_none_or(|v| *v == 0.0);
            !is_zero(*i)
                || i.checked_sub(1).is_some_and(|p| !is_zero(p))
                || !is_zero(i + 1)
        })
        .map(|(i, r)| (r.period_start, values[i]))
        .collect()
}

/// Periods present for one local day, logged at debug.
pub fn log_completeness(series: &[ForecastRecord], date: NaiveDate, tz: Tz) -> (usize, usize) {
    let (start, end) = local_day_bounds(date, tz);
    let expected = usize::try_from((end - start).num_minutes() / PERIOD.num_minutes()).unwrap_or(48);
    let present = series
        .iter()
        .filter(|r| r.period_start >= start && r.period_start < end)
        .count();
    if present >= expected {
        tracing::debug!(%date, "Forecast data for {date} contains all {expected} records");
    } else {
        tracing::debug!(%date, "Forecast data for {date} contains only {present} of {expected} records");
    }
    (present, expected)
}

// =============================================================================
// Derived values
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    pub at: DateTime<Utc>,
    pub watts: f64,
}

/// Energy for one local day, all three fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayTotal {
    pub offset: u8,
    pub date: NaiveDate,
    pub estimate_kwh: f64,
    pub estimate10_kwh: f64,
    pub estimate90_kwh: f64,
    /// Periods present out of the periods in the day.
    pub records: usize,
    pub expected_records: usize,
}

/// Scalar values for one site or the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesValues {
    pub power_now_w: f64,
    pub power_30m_w: f64,
    pub power_1h_w: f64,
    pub this_hour_wh: f64,
    pub next_hour_wh: f64,
    pub custom_hours_kwh: f64,
    pub remaining_today_kwh: f64,
    pub peak_today: Option<Peak>,
    pub peak_tomorrow: Option<Peak>,
    pub days: Vec<DayTotal>,
}

impl SeriesValues {
    /// Today's total for the selected field.
    #[must_use]
    pub fn tally_kwh(&self, field: EstimateField) -> f64 {
        self.days.first().map_or(0.0, |d| match field {
            EstimateField::Estimate => d.estimate_kwh,
            EstimateField::Estimate10 => d.estimate10_kwh,
            EstimateField::Estimate90 => d.estimate90_kwh,
        })
    }
}

/// Parameters shared by every derived computation.
#[derive(Debug, Clone, Copy)]
pub struct DeriveContext {
    pub now: DateTime<Utc>,
    pub tz: Tz,
    pub field: EstimateField,
    pub custom_hours: u32,
}

#[must_use]
pub fn compute_values(series: &[ForecastRecord], ctx: &DeriveContext) -> SeriesValues {
    let DeriveContext {
        now,
        tz,
        field,
        custom_hours,
    } = *ctx;
    let today = local_date(now, tz);
    let (_, today_end) = local_day_bounds(today, tz);
    let hour = hour_start(now);

    let days: Vec<DayTotal> = (0..DAY_OFFSETS)
        .filter_map(|offset| {
            let date = today.checked_add_days(chrono::Days::new(u64::from(offset)))?;
            let (start, end) = local_day_bounds(date, tz);
            let records = series
                .iter()
                .filter(|r| r.period_start >= start && r.period_start < end)
                .count();
            Some(DayTotal {
                offset,
                date,
                estimate_kwh: energy_kwh(series, start, end, EstimateField::Estimate),
                estimate10_kwh: energy_kwh(series, start, end, EstimateField::Estimate10),
                estimate90_kwh: energy_kwh(series, start, end, EstimateField::Estimate90),
                records,
                expected_records: usize::try_from((end - start).num_minutes() / 30).unwrap_or(48),
            })
        })
        .collect();

    let tomorrow = today.succ_opt().unwrap_or(today);
    let (tomorrow_start, tomorrow_end) = local_day_bounds(tomorrow, tz);
    let (today_start, _) = local_day_bounds(today, tz);

    SeriesValues {
        power_now_w: power_w(series, now, field),
        power_30m_w: power_w(series, now + Duration::minutes(30), field),
        power_1h_w: power_w(series, now + Duration::hours(1), field),
        this_hour_wh: energy_kwh(series, hour, hour + Duration::hours(1), field) * 1000.0,
        next_hour_wh: energy_kwh(
            series,
            hour + Duration::hours(1),
            hour + Duration::hours(2),
            field,
        ) * 1000.0,
        custom_hours_kwh: energy_kwh(
            series,
            now,
            now + Duration::hours(i64::from(custom_hours)),
            field,
        ),
        remaining_today_kwh: energy_kwh(series, now, today_end, field),
        peak_today: peak(series, today_start, today_end, field),
        peak_tomorrow: peak(series, tomorrow_start, tomorrow_end, field),
        days,
    }
}

// =============================================================================
// Post-processing
// =============================================================================

/// Dampen every site's raw records with its resolved profile.
#[must_use]
pub fn dampen_all(
    raw: &BTreeMap<String, Vec<ForecastRecord>>,
    engine: &DampeningEngine,
    tz: Tz,
) -> BTreeMap<String, Vec<ForecastRecord>> {
    raw.iter()
        .map(|(site, records)| {
            let profile = engine.resolve(site);
            let dampened = records
                .iter()
                .map(|r| dampening::apply(r, profile, tz))
                .collect();
            (site.clone(), dampened)
        })
        .collect()
}

/// Sum non-excluded sites per period, then clamp each period to the hard limit.
#[must_use]
pub fn aggregate(
    per_site: &BTreeMap<String, Vec<ForecastRecord>>,
    registry: &SiteRegistry,
    clamp: &HardLimitClamp,
) -> Vec<ForecastRecord> {
    let mut totals: BTreeMap<DateTime<Utc>, ForecastRecord> = BTreeMap::new();
    for (site, records) in per_site {
        if registry.get(site).is_none_or(|s| s.excluded) {
            continue;
        }
        for r in records {
            totals
                .entry(r.period_start)
                .and_modify(|t| {
                    t.pv_estimate += r.pv_estimate;
                    t.pv_estimate10 += r.pv_estimate10;
                    t.pv_estimate90 += r.pv_estimate90;
                })
                .or_insert(*r);
        }
    }
    totals
        .into_values()
        .map(|t| t.map(|kw| clamp.clamp(kw * 1000.0) / 1000.0))
        .collect()
}

/// Every derived value plus counters, as published to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedSnapshot {
    pub generated_at: DateTime<Utc>,
    pub estimate: EstimateField,
    /// Window of `total.custom_hours_kwh`.
    pub custom_hours: u32,
    pub total: SeriesValues,
    pub sites: BTreeMap<String, SeriesValues>,
    /// Today's total per site, selected field.
    pub tally_kwh: BTreeMap<String, f64>,
    pub api_used: u32,
    pub api_limit: u32,
    pub hard_limit_w: Option<f64>,
    pub hard_limit_flags: Vec<bool>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub provider_reachable: bool,
    pub next_wake: Option<DateTime<Utc>>,
    pub stale_sites: Vec<String>,
    pub excluded_sites: Vec<String>,
    pub wh_hours: BTreeMap<DateTime<Utc>, f64>,
}

/// Inputs for [`build_snapshot`] that are not forecast data.
#[derive(Debug, Clone)]
pub struct SnapshotMeta {
    pub api_used: u32,
    pub api_limit: u32,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub provider_reachable: bool,
    pub next_wake: Option<DateTime<Utc>>,
    pub stale_sites: Vec<String>,
}

#[must_use]
pub fn build_snapshot(
    raw: &BTreeMap<String, Vec<ForecastRecord>>,
    registry: &SiteRegistry,
    engine: &DampeningEngine,
    clamp: &HardLimitClamp,
    ctx: &DeriveContext,
    meta: SnapshotMeta,
) -> DerivedSnapshot {
    let dampened = dampen_all(raw, engine, ctx.tz);
    let total_series = aggregate(&dampened, registry, clamp);

    let today = local_date(ctx.now, ctx.tz);
    for offset in 0..DAY_OFFSETS {
        if let Some(date) = today.checked_add_days(chrono::Days::new(u64::from(offset))) {
            log_completeness(&total_series, date, ctx.tz);
        }
    }

    let sites: BTreeMap<String, SeriesValues> = dampened
        .iter()
        .map(|(site, series)| (site.clone(), compute_values(series, ctx)))
        .collect();
    let tally_kwh = sites
        .iter()
        .map(|(site, values)| (site.clone(), values.tally_kwh(ctx.field)))
        .collect();

    DerivedSnapshot {
        generated_at: ctx.now,
        estimate: ctx.field,
        custom_hours: ctx.custom_hours,
        total: compute_values(&total_series, ctx),
        sites,
        tally_kwh,
        api_used: meta.api_used,
        api_limit: meta.api_limit,
        hard_limit_w: clamp.total(),
        hard_limit_flags: clamp.flags(),
        last_updated: meta.last_updated,
        last_attempt: meta.last_attempt,
        provider_reachable: meta.provider_reachable,
        next_wake: meta.next_wake,
        stale_sites: meta.stale_sites,
        excluded_sites: registry
            .iter()
            .filter(|s| s.excluded)
            .map(|s| s.resource_id.clone())
            .collect(),
        wh_hours: wh_series(&total_series, ctx.field),
    }
}
