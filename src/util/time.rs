//! Time helpers: local day boundaries and relative formatting.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Length of one forecast period.
pub const PERIOD: Duration = Duration::minutes(30);

/// UTC instant of local midnight at the start of `date` in `tz`.
///
/// On a DST gap at midnight the first valid local instant is used.
#[must_use]
pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map_or_else(|| Utc.from_utc_datetime(&naive), |dt| dt.with_timezone(&Utc))
}

/// UTC bounds `[start, end)` of the local day `date`.
#[must_use]
pub fn local_day_bounds(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = date.succ_opt().unwrap_or(date);
    (local_midnight(date, tz), local_midnight(next, tz))
}

/// Local calendar date of `now` in `tz`.
#[must_use]
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Start of the local day containing `now`.
#[must_use]
pub fn local_day_start(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    local_midnight(local_date(now, tz), tz)
}

/// Truncate to the start of the UTC hour.
#[must_use]
pub fn hour_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = now.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(now)
}

/// Whole hours from `now` until `end`, rounded up.
#[must_use]
pub fn hours_until(now: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    let secs = (end - now).num_seconds().max(0);
    u32::try_from((secs + 3599) / 3600).unwrap_or(u32::MAX)
}

/// Format a relative time (past or future).
#[must_use]
pub fn format_relative_time(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(target);

    if duration.num_seconds().abs() < 60 {
        return "just now".to_string();
    }

    let minutes = duration.num_minutes().abs();
    let hours = duration.num_hours().abs();
    let days = duration.num_days().abs();

    let suffix = if duration.num_seconds() > 0 {
        "ago"
    } else {
        "from now"
    };

    if days > 0 {
        format!("{days} day{} {suffix}", if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("{hours} hour{} {suffix}", if hours == 1 { "" } else { "s" })
    } else {
        format!(
            "{minutes} minute{} {suffix}",
            if minutes == 1 { "" } else { "s" }
        )
    }
}
