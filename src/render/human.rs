//! Human-readable output.
//!
//! Plain text laid out in aligned columns, colored with `colored` unless
//! `no_color` is set.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use colored::{ColoredString, Colorize};

use crate::core::aggregates::{DerivedSnapshot, Peak, SeriesValues};
use crate::core::coordinator::{CycleOutcome, CycleReport};
use crate::core::dampening::DampeningProfile;
use crate::core::hard_limit::HardLimitClamp;
use crate::core::models::{EstimateField, ForecastRecord, Site};
use crate::core::sites::OrientationAdvisory;
use crate::util::format::{format_kwh, format_watts};
use crate::util::time::format_relative_time;

fn paint(text: &str, no_color: bool, style: impl Fn(&str) -> ColoredString) -> String {
    if no_color {
        text.to_string()
    } else {
        style(text).to_string()
    }
}

fn heading(text: &str, no_color: bool) -> String {
    paint(text, no_color, |s| s.bold().cyan())
}

fn local(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
}

fn peak_line(label: &str, peak: Option<&Peak>, tz: Tz) -> String {
    match peak {
        Some(p) => format!(
            "  {label:<18} {} at {}",
            format_watts(p.watts),
            p.at.with_timezone(&tz).format("%H:%M")
        ),
        None => format!("  {label:<18} -"),
    }
}

fn values_block(out: &mut String, values: &SeriesValues, tz: Tz) {
    let _ = writeln!(out, "  {:<18} {}", "Power now", format_watts(values.power_now_w));
    let _ = writeln!(out, "  {:<18} {}", "Power +30 min", format_watts(values.power_30m_w));
    let _ = writeln!(out, "  {:<18} {}", "Power +1 hour", format_watts(values.power_1h_w));
    let _ = writeln!(out, "  {:<18} {:.0} Wh", "This hour", values.this_hour_wh);
    let _ = writeln!(out, "  {:<18} {:.0} Wh", "Next hour", values.next_hour_wh);
    let _ = writeln!(out, "  {:<18} {}", "Remaining today", format_kwh(values.remaining_today_kwh));
    let _ = writeln!(out, "{}", peak_line("Peak today", values.peak_today.as_ref(), tz));
    let _ = writeln!(out, "{}", peak_line("Peak tomorrow", values.peak_tomorrow.as_ref(), tz));
}

/// Render the `status` command.
#[must_use]
pub fn render_status(snapshot: &DerivedSnapshot, tz: Tz, no_color: bool) -> String {
    let mut out = String::new();
    let now = snapshot.generated_at;

    let _ = writeln!(out, "{}", heading("Forecast", no_color));
    values_block(&mut out, &snapshot.total, tz);
    let _ = writeln!(
        out,
        "  {:<18} {}",
        format!("Next {} h", snapshot.custom_hours),
        format_kwh(snapshot.total.custom_hours_kwh)
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", heading("Days", no_color));
    for day in &snapshot.total.days {
        let complete = day.records == day.expected_records;
        let marker = if complete {
            String::new()
        } else {
            paint(
                &format!(" ({} of {} periods)", day.records, day.expected_records),
                no_color,
                |s| s.yellow(),
            )
        };
        let _ = writeln!(
            out,
            "  +{} {}  {:>10}  [{} .. {}]{marker}",
            day.offset,
            day.date,
            format_kwh(day.estimate_kwh),
            format_kwh(day.estimate10_kwh),
            format_kwh(day.estimate90_kwh),
        );
    }

    if !snapshot.sites.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", heading("Sites (today)", no_color));
        for (site, kwh) in &snapshot.tally_kwh {
            let mut flags = Vec::new();
            if snapshot.excluded_sites.contains(site) {
                flags.push("excluded");
            }
            if snapshot.stale_sites.contains(site) {
                flags.push("stale");
            }
            let suffix = if flags.is_empty() {
                String::new()
            } else {
                paint(&format!(" [{}]", flags.join(", ")), no_color, |s| s.yellow())
            };
            let _ = writeln!(out, "  {site}  {:>10}{suffix}", format_kwh(*kwh));
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", heading("Account", no_color));
    let usage = format!("{} / {}", snapshot.api_used, snapshot.api_limit);
    let usage = if snapshot.api_used >= snapshot.api_limit {
        paint(&usage, no_color, |s| s.red())
    } else {
        paint(&usage, no_color, |s| s.green())
    };
    let _ = writeln!(out, "  {:<18} {usage}", "API calls");
    let _ = writeln!(
        out,
        "  {:<18} {}",
        "Hard limit",
        snapshot.hard_limit_w.map_or_else(|| "not set".to_string(), format_watts)
    );
    let _ = writeln!(
        out,
        "  {:<18} {}",
        "Last update",
        snapshot
            .last_updated
            .map_or_else(|| "never".to_string(), |t| format_relative_time(t, now))
    );
    let _ = writeln!(
        out,
        "  {:<18} {}",
        "Next update",
        snapshot
            .next_wake
            .map_or_else(|| "manual".to_string(), |t| local(t, tz))
    );
    let reachable = if snapshot.provider_reachable {
        paint("reachable", no_color, |s| s.green())
    } else {
        paint("unreachable", no_color, |s| s.red())
    };
    let _ = writeln!(out, "  {:<18} {reachable}", "Provider");
    let _ = writeln!(out, "  {:<18} {}", "Estimate", snapshot.estimate.as_str());

    out
}

/// Render the outcome of a fetch cycle.
#[must_use]
pub fn render_cycle(report: &CycleReport, no_color: bool) -> String {
    let mut out = String::new();
    let status = match report.outcome {
        CycleOutcome::Completed if report.failed.is_empty() && report.skipped.is_empty() => {
            paint("Update complete", no_color, |s| s.green())
        }
        CycleOutcome::Completed => paint("Update finished with problems", no_color, |s| s.yellow()),
        CycleOutcome::Aborted => paint("Update cancelled", no_color, |s| s.yellow()),
        CycleOutcome::SkippedRecent => {
            paint("Update skipped: last update was under 15 minutes ago", no_color, |s| {
                s.yellow()
            })
        }
    };
    let _ = writeln!(out, "{status} ({})", report.trigger.label());

    for site in &report.fetched {
        let _ = writeln!(out, "  {} {site}", paint("ok", no_color, |s| s.green()));
    }
    for failure in &report.failed {
        let _ = writeln!(
            out,
            "  {} {} [{}] {}",
            paint("failed", no_color, |s| s.red()),
            failure.site,
            failure.code,
            failure.message
        );
    }
    for site in &report.skipped {
        let _ = writeln!(out, "  {} {site} (no API quota left)", paint("skipped", no_color, |s| s.yellow()));
    }
    let _ = writeln!(out, "API calls: {} / {}", report.api_used, report.api_limit);
    if let Some(at) = report.next_wake {
        let _ = writeln!(out, "Next update: {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    out
}

/// Render a dampening profile as `HH:MM factor` rows.
#[must_use]
pub fn render_dampening(target: &str, profile: &DampeningProfile, no_color: bool) -> String {
    let mut out = String::new();
    let kind = if profile.is_half_hourly() { "half-hourly" } else { "hourly" };
    let _ = writeln!(out, "{}", heading(&format!("Dampening for {target} ({kind})"), no_color));
    let step = profile.granularity_minutes();
    for (i, factor) in profile.factors().iter().enumerate() {
        let minutes = u32::try_from(i).unwrap_or(0) * step;
        let _ = writeln!(out, "  {:02}:{:02}  {factor:.2}", minutes / 60, minutes % 60);
    }
    let _ = writeln!(out, "\n{}", profile.to_input_string());
    out
}

/// Render query results.
#[must_use]
pub fn render_records(records: &[ForecastRecord], tz: Tz, no_color: bool) -> String {
    if records.is_empty() {
        return paint("No records in range\n", no_color, |s| s.dimmed());
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        heading(
            &format!("{:<17} {:>9} {:>9} {:>9}", "period_start", "estimate", "est10", "est90"),
            no_color
        )
    );
    for r in records {
        let _ = writeln!(
            out,
            "{:<17} {:>9.3} {:>9.3} {:>9.3}",
            local(r.period_start, tz),
            r.value(EstimateField::Estimate),
            r.value(EstimateField::Estimate10),
            r.value(EstimateField::Estimate90),
        );
    }
    out
}

/// Render the site list with any orientation advisories.
#[must_use]
pub fn render_sites(sites: &[Site], advisories: &[OrientationAdvisory], no_color: bool) -> String {
    if sites.is_empty() {
        return paint("No sites registered\n", no_color, |s| s.dimmed());
    }
    let mut out = String::new();
    for site in sites {
        let mut flags = Vec::new();
        if site.excluded {
            flags.push("excluded");
        }
        if site.stale {
            flags.push("missing upstream");
        }
        let suffix = if flags.is_empty() {
            String::new()
        } else {
            paint(&format!(" [{}]", flags.join(", ")), no_color, |s| s.yellow())
        };
        let _ = writeln!(
            out,
            "{}  {}{suffix}",
            paint(&site.resource_id, no_color, |s| s.bold()),
            site.name
        );
        let _ = writeln!(
            out,
            "    {:.2} kW  azimuth {:.0}  tilt {:.0}  lat {:.3} lon {:.3}",
            site.capacity, site.azimuth, site.tilt, site.latitude, site.longitude
        );
    }
    for advisory in advisories {
        let _ = writeln!(
            out,
            "{} {} azimuth {:.0} faces away from the equator; expected about {:.0} (acknowledge with `pvcast sites acknowledge {}`)",
            paint("advisory:", no_color, |s| s.yellow()),
            advisory.site,
            advisory.azimuth,
            advisory.proposed,
            advisory.site
        );
    }
    out
}

/// Render the hard limit state after a change.
#[must_use]
pub fn render_hard_limit(clamp: &HardLimitClamp, no_color: bool) -> String {
    match clamp.total() {
        Some(total) => {
            let per_key: Vec<String> = clamp
                .limits()
                .iter()
                .map(|l| l.map_or_else(|| "-".to_string(), format_watts))
                .collect();
            format!(
                "Hard limit {} (per key: {})\n",
                paint(&format_watts(total), no_color, |s| s.bold()),
                per_key.join(", ")
            )
        }
        None => "Hard limit removed\n".to_string(),
    }
}
