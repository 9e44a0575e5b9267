//! Fixture factories for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use pvcast::core::models::{ApiKey, ForecastRecord, Site};
use pvcast::storage::cache::{CacheStore, ForecastDocument};
use pvcast::test_utils::make_test_site;

/// Site ids `0000-0000-0000-0001` upward.
#[must_use]
pub fn site_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{i:04x}-0000-0000-0000")).collect()
}

/// Test sites owned by `key`.
#[must_use]
pub fn sites_for(key: &str, ids: &[String]) -> Vec<Site> {
    let fingerprint = ApiKey::new(key).fingerprint();
    ids.iter()
        .map(|id| Site {
            key_fingerprint: fingerprint.clone(),
            ..make_test_site(id)
        })
        .collect()
}

/// Write a valid forecast cache so the coordinator does not resync.
pub fn seed_forecasts(
    data_dir: &Path,
    sites: Vec<Site>,
    records: BTreeMap<String, Vec<ForecastRecord>>,
    last_updated: DateTime<Utc>,
) {
    let doc = ForecastDocument {
        last_updated: Some(last_updated),
        last_attempt: Some(last_updated),
        sites,
        site_forecasts: records,
        ..ForecastDocument::default()
    };
    CacheStore::new(data_dir)
        .save_forecasts(&doc)
        .expect("seed forecast cache");
}

// =============================================================================
// Solcast response bodies
// =============================================================================

/// `GET /rooftop_sites` body.
#[must_use]
pub fn sites_body(ids: &[&str]) -> Value {
    let sites: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "name": format!("Roof {id}"),
                "resource_id": id,
                "capacity": 5.0,
                "capacity_dc": 6.6,
                "longitude": 151.21,
                "latitude": -33.87,
                "azimuth": 0,
                "tilt": 20,
                "install_date": "2020-01-01T00:00:00.0000000Z",
                "loss_factor": 0.9,
                "tags": ["roof"]
            })
        })
        .collect();
    json!({
        "sites": sites,
        "page_count": 1,
        "current_page": 1,
        "total_records": ids.len()
    })
}

/// `GET /rooftop_sites/{id}/forecasts` body with one period per value,
/// the first ending at `first_end`.
#[must_use]
pub fn forecasts_body(first_end: DateTime<Utc>, estimates: &[f64]) -> Value {
    let forecasts: Vec<Value> = estimates
        .iter()
        .enumerate()
        .map(|(i, kw)| {
            let end = first_end + chrono::Duration::minutes(30 * i64::try_from(i).unwrap_or(0));
            json!({
                "pv_estimate": kw,
                "pv_estimate10": kw * 0.5,
                "pv_estimate90": kw * 1.5,
                "period_end": end.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
                "period": "PT30M"
            })
        })
        .collect();
    json!({ "forecasts": forecasts })
}

/// `GET /rooftop_sites/{id}/estimated_actuals` body.
#[must_use]
pub fn actuals_body(first_end: DateTime<Utc>, estimates: &[f64]) -> Value {
    let forecasts = forecasts_body(first_end, estimates);
    let periods: Vec<Value> = forecasts["forecasts"]
        .as_array()
        .map(|a| {
            a.iter()
                .map(|p| {
                    json!({
                        "pv_estimate": p["pv_estimate"],
                        "period_end": p["period_end"],
                        "period": "PT30M"
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    json!({ "estimated_actuals": periods })
}

// =============================================================================
// Config files
// =============================================================================

/// Config TOML pointing at `base_url` with the given keys and limits.
#[must_use]
pub fn config_toml(base_url: &str, keys: &str, limits: &str, auto_update: u8) -> String {
    format!(
        r#"[general]
timeout_seconds = 5
timezone = "UTC"

[provider]
base_url = "{base_url}"
api_keys = "{keys}"
api_limits = "{limits}"

[forecast]
auto_update = {auto_update}
"#
    )
}
