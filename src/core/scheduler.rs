//! Update triggers and poll scheduling.
//!
//! [`admit`] is the single place that decides whether a trigger may start a
//! fetch cycle. [`SchedulePolicy::next_wake`] spreads the day's poll budget over the
//! configured window.

use chrono::{DateTime, Days, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::core::models::Site;
use crate::core::sun::combined_window;
use crate::error::{PvcastError, Result};
use crate::util::time::{local_date, local_day_bounds};

/// Shortest spacing between scheduled polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::minutes(5);

/// Updates closer together than this are skipped.
pub const MIN_UPDATE_GAP: Duration = Duration::minutes(15);

/// How far ahead [`SchedulePolicy::next_wake`] looks for a slot.
const LOOKAHEAD_DAYS: u64 = 7;

// =============================================================================
// Modes
// =============================================================================

/// Configured automatic update mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoUpdateMode {
    /// No automatic polling; updates are triggered externally.
    #[default]
    Disabled,
    /// Poll between the earliest sunrise and latest sunset.
    Daylight,
    /// Poll around the clock.
    AllDay,
}

impl AutoUpdateMode {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Daylight),
            2 => Some(Self::AllDay),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Daylight => 1,
            Self::AllDay => 2,
        }
    }

    #[must_use]
    pub const fn trigger_mode(self) -> TriggerMode {
        match self {
            Self::Disabled => TriggerMode::Manual,
            Self::Daylight | Self::AllDay => TriggerMode::Automatic,
        }
    }
}

/// Which update command is callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Only `force-update` starts a cycle.
    Manual,
    /// Only `update` and the scheduler start a cycle.
    Automatic,
}

/// What asked for a fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Update,
    ForceUpdate,
    Scheduled,
    /// Startup sync of stale cached data.
    Startup,
    /// Full resync after a cache clear or invalid cache.
    Resync,
}

impl Trigger {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::ForceUpdate => "force_update",
            Self::Scheduled => "scheduled",
            Self::Startup => "startup",
            Self::Resync => "resync",
        }
    }

    /// Whether the minimum gap between updates applies.
    #[must_use]
    pub const fn respects_min_gap(self) -> bool {
        matches!(self, Self::Update | Self::Scheduled)
    }
}

/// Decide whether `trigger` may start a cycle under `mode`.
///
/// # Errors
///
/// [`PvcastError::ForceUpdateWhileAutoUpdate`] for a forced update while
/// automatic, [`PvcastError::UpdateWhileManual`] for an update or scheduled
/// poll while manual.
pub fn admit(mode: TriggerMode, trigger: Trigger) -> Result<()> {
    match (mode, trigger) {
        (TriggerMode::Automatic, Trigger::ForceUpdate) => Err(PvcastError::ForceUpdateWhileAutoUpdate),
        (TriggerMode::Manual, Trigger::Update | Trigger::Scheduled) => {
            Err(PvcastError::UpdateWhileManual)
        }
        _ => Ok(()),
    }
}

// =============================================================================
// Scheduling
// =============================================================================

/// Polls per day each site can afford: `floor(total limit / sites)`.
#[must_use]
pub fn daily_budget(total_limit: u32, site_count: usize) -> u32 {
    match u32::try_from(site_count) {
        Ok(0) | Err(_) => 0,
        Ok(n) => total_limit / n,
    }
}

/// Scheduling inputs that change only on reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub mode: AutoUpdateMode,
    pub budget: u32,
    pub interval_override: Option<Duration>,
}

impl SchedulePolicy {
    /// Spacing for a window of `window` length.
    fn interval(&self, window: Duration) -> Option<Duration> {
        if let Some(fixed) = self.interval_override {
            return Some(fixed.max(MIN_POLL_INTERVAL));
        }
        if self.budget == 0 {
            return None;
        }
        let budget = i64::from(self.budget);
        // Daylight slots end on sunset, so the step must not overshoot it.
        let per_slot = match self.mode {
            AutoUpdateMode::Daylight => window.num_seconds() / 60 / budget,
            _ => ((window.num_seconds() + 59) / 60 + budget - 1) / budget,
        };
        Some(Duration::minutes(per_slot).max(MIN_POLL_INTERVAL))
    }

    /// Poll times on local `date`, in order.
    #[must_use]
    pub fn slots(&self, sites: &[Site], date: chrono::NaiveDate, tz: Tz) -> Vec<DateTime<Utc>> {
        let (start, end, first) = match self.mode {
            AutoUpdateMode::Disabled => return Vec::new(),
            AutoUpdateMode::Daylight => match combined_window(sites, date, tz) {
                Some((rise, set)) => (rise, set, 1),
                None => return Vec::new(),
            },
            AutoUpdateMode::AllDay => {
                let (start, end) = local_day_bounds(date, tz);
                (start, end, 0)
            }
        };
        let Some(step) = self.interval(end - start) else {
            return Vec::new();
        };

        let cap = match self.interval_override {
            Some(_) => usize::MAX,
            None => self.budget as usize,
        };
        let mut slots = Vec::new();
        let mut k = first;
        while slots.len() < cap {
            let at = start + step * k;
            let in_window = match self.mode {
                AutoUpdateMode::Daylight => at <= end,
                _ => at < end,
            };
            if !in_window {
                break;
            }
            slots.push(at);
            k += 1;
        }
        slots
    }

    /// First poll strictly after `now`, if automatic polling is on.
    #[must_use]
    pub fn next_wake(&self, sites: &[Site], now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        if self.mode == AutoUpdateMode::Disabled {
            return None;
        }
        if self.budget == 0 && self.interval_override.is_none() {
            tracing::warn!(sites = sites.len(), "No API budget for automatic updates");
            return None;
        }
        let today = local_date(now, tz);
        (0..=LOOKAHEAD_DAYS)
            .filter_map(|offset| today.checked_add_days(Days::new(offset)))
            .flat_map(|date| self.slots(sites, date, tz))
            .find(|slot| *slot > now)
    }
}
