//! Approximate sunrise and sunset times.
//!
//! NOAA sunrise equation; accurate to a minute or two, which is plenty for
//! spacing polls across daylight.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::core::models::Site;
use crate::util::time::local_day_bounds;

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const OBLIQUITY_DEG: f64 = 23.4397;
/// Refraction plus solar disc radius.
const HORIZON_DEG: f64 = -0.833;

/// Sun-up interval for one location and date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaylightWindow {
    Normal {
        sunrise: DateTime<Utc>,
        sunset: DateTime<Utc>,
    },
    /// Sun never sets.
    PolarDay,
    /// Sun never rises.
    PolarNight,
}

/// Sunrise and sunset for the solar day nearest `date`.
#[must_use]
pub fn daylight(date: NaiveDate, latitude: f64, longitude: f64) -> DaylightWindow {
    let midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp() as f64;
    let jd = midnight / 86_400.0 + UNIX_EPOCH_JD;

    let n = (jd - J2000 + 0.0008).ceil();
    let mean_solar = n - longitude / 360.0;
    let anomaly = (357.5291 + 0.985_600_28 * mean_solar).rem_euclid(360.0);
    let m = anomaly.to_radians();
    let center = 1.9148 * m.sin() + 0.02 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
    let ecliptic = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0).to_radians();
    let transit = J2000 + mean_solar + 0.0053 * m.sin() - 0.0069 * (2.0 * ecliptic).sin();

    let declination = (ecliptic.sin() * OBLIQUITY_DEG.to_radians().sin()).asin();
    let phi = latitude.to_radians();
    let cos_hour_angle = (HORIZON_DEG.to_radians().sin() - phi.sin() * declination.sin())
        / (phi.cos() * declination.cos());

    if cos_hour_angle < -1.0 {
        return DaylightWindow::PolarDay;
    }
    if cos_hour_angle > 1.0 {
        return DaylightWindow::PolarNight;
    }

    let half_day = cos_hour_angle.acos().to_degrees() / 360.0;
    match (from_julian(transit - half_day), from_julian(transit + half_day)) {
        (Some(sunrise), Some(sunset)) => DaylightWindow::Normal { sunrise, sunset },
        _ => DaylightWindow::PolarNight,
    }
}

fn from_julian(jd: f64) -> Option<DateTime<Utc>> {
    let secs = ((jd - UNIX_EPOCH_JD) * 86_400.0).round() as i64;
    DateTime::from_timestamp(secs, 0)
}

/// Earliest sunrise to latest sunset across `sites` on local `date`.
///
/// A polar-day site widens the window to the whole local day. `None` when
/// the sun does not rise at any site.
#[must_use]
pub fn combined_window<'a>(
    sites: impl IntoIterator<Item = &'a Site>,
    date: NaiveDate,
    tz: Tz,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (day_start, day_end) = local_day_bounds(date, tz);
    let mut window: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

    for site in sites {
        let (rise, set) = match daylight(date, site.latitude, site.longitude) {
            DaylightWindow::Normal { sunrise, sunset } => {
                (sunrise.max(day_start), sunset.min(day_end))
            }
            DaylightWindow::PolarDay => (day_start, day_end),
            DaylightWindow::PolarNight => continue,
        };
        if rise >= set {
            continue;
        }
        window = Some(match window {
            Some((start, end)) => (start.min(rise), end.max(set)),
            None => (rise, set),
        });
    }

    window
}
