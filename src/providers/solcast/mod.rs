//! Solcast rooftop sites API client.
//!
//! Endpoints:
//! - `GET /rooftop_sites` for site metadata
//! - `GET /rooftop_sites/{id}/forecasts` for the forward forecast
//! - `GET /rooftop_sites/{id}/estimated_actuals` for recent history
//!
//! Every request carries `format=json` and `api_key`. The key never reaches
//! logs or error messages unredacted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::core::http::{build_client, get_text};
use crate::core::models::{ApiKey, ForecastRecord, Site};
use crate::core::provider::ForecastProvider;
use crate::error::{PvcastError, Result};
use crate::util::format::redact_in;
use crate::util::time::PERIOD;

/// Production API base.
pub const DEFAULT_BASE_URL: &str = "https://api.solcast.com.au";

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct SitesResponse {
    #[serde(default)]
    sites: Vec<SiteDto>,
}

#[derive(Debug, Deserialize)]
struct SiteDto {
    resource_id: String,
    #[serde(default)]
    name: Option<String>,
    capacity: f64,
    #[serde(default)]
    capacity_dc: Option<f64>,
    #[serde(default)]
    azimuth: f64,
    #[serde(default)]
    tilt: f64,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    install_date: Option<String>,
    #[serde(default)]
    loss_factor: Option<f64>,
}

impl SiteDto {
    fn into_site(self, key: &ApiKey) -> Site {
        Site {
            name: self.name.unwrap_or_else(|| self.resource_id.clone()),
            resource_id: self.resource_id,
            capacity: self.capacity,
            capacity_dc: self.capacity_dc,
            azimuth: self.azimuth,
            tilt: self.tilt,
            latitude: self.latitude,
            longitude: self.longitude,
            install_date: self.install_date,
            loss_factor: self.loss_factor,
            key_fingerprint: key.fingerprint(),
            excluded: false,
            stale: false,
            acknowledged_azimuth: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastsResponse {
    forecasts: Vec<PeriodDto>,
}

#[derive(Debug, Deserialize)]
struct ActualsResponse {
    estimated_actuals: Vec<PeriodDto>,
}

#[derive(Debug, Deserialize)]
struct PeriodDto {
    period_end: DateTime<Utc>,
    pv_estimate: f64,
    #[serde(default)]
    pv_estimate10: Option<f64>,
    #[serde(default)]
    pv_estimate90: Option<f64>,
}

fn to_records(periods: Vec<PeriodDto>, actuals: bool) -> Result<Vec<ForecastRecord>> {
    let mut records = periods
        .into_iter()
        .map(|p| {
            let record = if actuals {
                ForecastRecord::new(p.period_end - PERIOD, p.pv_estimate, p.pv_estimate, p.pv_estimate)
            } else {
                ForecastRecord::new(
                    p.period_end - PERIOD,
                    p.pv_estimate,
                    p.pv_estimate10.unwrap_or(p.pv_estimate),
                    p.pv_estimate90.unwrap_or(p.pv_estimate),
                )
            };
            if record.is_well_formed() {
                Ok(record)
            } else {
                Err(PvcastError::ParseResponse(format!(
                    "malformed period ending {}",
                    p.period_end
                )))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    records.sort_by_key(|r| r.period_start);
    records.dedup_by_key(|r| r.period_start);
    Ok(records)
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the Solcast API.
#[derive(Debug, Clone)]
pub struct SolcastClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl SolcastClient {
    /// Create a client for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base_url).map_err(|e| PvcastError::ConfigInvalid {
            key: "provider.base_url".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str, key: &ApiKey, extra: &[(&str, String)]) -> Result<Url> {
        let mut params: Vec<(&str, String)> = vec![
            ("format", "json".to_string()),
            ("api_key", key.expose().to_string()),
        ];
        params.extend(extra.iter().cloned());
        Url::parse_with_params(&format!("{}/{path}", self.base_url), &params)
            .map_err(|e| PvcastError::Config(format!("invalid request URL: {e}")))
    }

    async fn get(&self, url: Url, key: &ApiKey, target: &str, site: Option<&str>) -> Result<String> {
        let (status, body) = get_text(&self.client, url, target, self.timeout).await?;
        if status == StatusCode::OK {
            return Ok(body);
        }
        let err = map_status(status, key, site, &redact_in(&body, key.expose()));
        tracing::debug!(
            key = %key,
            status = status.as_u16(),
            target,
            "Provider returned error status"
        );
        Err(err)
    }
}

/// Map a non-200 status to a typed error.
fn map_status(status: StatusCode, key: &ApiKey, site: Option<&str>, body: &str) -> PvcastError {
    let site_label = || site.unwrap_or("unknown").to_string();
    match status.as_u16() {
        400 => PvcastError::SiteMissingCapacity { site: site_label() },
        401 | 403 => PvcastError::AuthFailed { key: key.redacted() },
        404 => PvcastError::SiteNotFound { site: site_label() },
        429 => PvcastError::ProviderBusy { key: key.redacted() },
        code => PvcastError::ProviderApi {
            status: code,
            message: body.chars().take(200).collect(),
        },
    }
}

impl ForecastProvider for SolcastClient {
    async fn rooftop_sites(&self, key: &ApiKey) -> Result<Vec<Site>> {
        tracing::debug!(key = %key, "Fetching rooftop sites");
        let url = self.url("rooftop_sites", key, &[])?;
        let body = self.get(url, key, "rooftop_sites", None).await?;
        let response: SitesResponse =
            serde_json::from_str(&body).map_err(|e| PvcastError::ParseResponse(e.to_string()))?;

        if response.sites.is_empty() {
            return Err(PvcastError::NoSites { key: key.redacted() });
        }

        let sites: Vec<Site> = response.sites.into_iter().map(|s| s.into_site(key)).collect();
        tracing::info!(key = %key, count = sites.len(), "Rooftop sites retrieved");
        Ok(sites)
    }

    async fn forecasts(&self, key: &ApiKey, site: &str, hours: u32) -> Result<Vec<ForecastRecord>> {
        tracing::debug!(key = %key, site, hours, "Fetching forecasts");
        let url = self.url(
            &format!("rooftop_sites/{site}/forecasts"),
            key,
            &[("hours", hours.to_string())],
        )?;
        let body = self.get(url, key, site, Some(site)).await?;
        let response: ForecastsResponse =
            serde_json::from_str(&body).map_err(|e| PvcastError::ParseResponse(e.to_string()))?;
        to_records(response.forecasts, false)
    }

    async fn estimated_actuals(&self, key: &ApiKey, site: &str, hours: u32) -> Result<Vec<ForecastRecord>> {
        tracing::debug!(key = %key, site, hours, "Fetching estimated actuals");
        let url = self.url(
            &format!("rooftop_sites/{site}/estimated_actuals"),
            key,
            &[("hours", hours.to_string())],
        )?;
        let body = self.get(url, key, site, Some(site)).await?;
        let response: ActualsResponse =
            serde_json::from_str(&body).map_err(|e| PvcastError::ParseResponse(e.to_string()))?;
        to_records(response.estimated_actuals, true)
    }
}
