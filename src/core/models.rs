//! Core data models shared by the coordinator, cache, and provider client.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::util::format::redact_key;
use crate::util::time::PERIOD;

// =============================================================================
// API Key
// =============================================================================

/// Provider API key.
///
/// `Debug` and `Display` print the redacted form; the raw value is only
/// reachable through [`ApiKey::expose`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw key for request parameters.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `******` plus the last six characters.
    #[must_use]
    pub fn redacted(&self) -> String {
        redact_key(&self.0)
    }

    /// Stable identifier used in persisted documents instead of the key itself.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.redacted()).finish()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

// =============================================================================
// Estimate Field
// =============================================================================

/// Which of the three forecast percentiles drives scalar derived values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateField {
    /// Median.
    #[default]
    Estimate,
    /// 10th percentile.
    Estimate10,
    /// 90th percentile.
    Estimate90,
}

impl EstimateField {
    /// Parse from config or CLI value.
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "estimate" | "pv_estimate" | "median" => Some(Self::Estimate),
            "estimate10" | "pv_estimate10" | "low" => Some(Self::Estimate10),
            "estimate90" | "pv_estimate90" | "high" => Some(Self::Estimate90),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Estimate => "estimate",
            Self::Estimate10 => "estimate10",
            Self::Estimate90 => "estimate90",
        }
    }
}

// =============================================================================
// Forecast Record
// =============================================================================

/// One 30-minute forecast slice, values in kW.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub period_start: DateTime<Utc>,
    pub pv_estimate: f64,
    pub pv_estimate10: f64,
    pub pv_estimate90: f64,
}

impl ForecastRecord {
    #[must_use]
    pub const fn new(period_start: DateTime<Utc>, estimate: f64, estimate10: f64, estimate90: f64) -> Self {
        Self {
            period_start,
            pv_estimate: estimate,
            pv_estimate10: estimate10,
            pv_estimate90: estimate90,
        }
    }

    #[must_use]
    pub fn period_end(&self) -> DateTime<Utc> {
        self.period_start + PERIOD
    }

    /// Value of the selected field.
    #[must_use]
    pub const fn value(&self, field: EstimateField) -> f64 {
        match field {
            EstimateField::Estimate => self.pv_estimate,
            EstimateField::Estimate10 => self.pv_estimate10,
            EstimateField::Estimate90 => self.pv_estimate90,
        }
    }

    /// Apply `f` to all three values.
    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            period_start: self.period_start,
            pv_estimate: f(self.pv_estimate),
            pv_estimate10: f(self.pv_estimate10),
            pv_estimate90: f(self.pv_estimate90),
        }
    }

    /// Values finite and non-negative, period aligned to :00 or :30.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        use chrono::Timelike;
        let aligned = matches!(self.period_start.minute(), 0 | 30)
            && self.period_start.second() == 0
            && self.period_start.nanosecond() == 0;
        aligned
            && [self.pv_estimate, self.pv_estimate10, self.pv_estimate90]
                .iter()
                .all(|v| v.is_finite() && *v >= 0.0)
    }
}

// =============================================================================
// Site
// =============================================================================

/// Hemisphere derived from latitude sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    Northern,
    Southern,
}

impl Hemisphere {
    #[must_use]
    pub fn from_latitude(latitude: f64) -> Self {
        if latitude > 0.0 {
            Self::Northern
        } else {
            Self::Southern
        }
    }
}

/// A rooftop site as described by provider metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub resource_id: String,
    pub name: String,
    /// AC capacity, kW.
    pub capacity: f64,
    #[serde(default)]
    pub capacity_dc: Option<f64>,
    /// Degrees; 0 faces north, positive toward west, +/-180 faces south.
    pub azimuth: f64,
    pub tilt: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub install_date: Option<String>,
    #[serde(default)]
    pub loss_factor: Option<f64>,
    /// Fingerprint of the API key that owns the site.
    pub key_fingerprint: String,
    /// Omitted from aggregate totals, still forecast.
    #[serde(default)]
    pub excluded: bool,
    /// Missing from the most recent metadata response.
    #[serde(default)]
    pub stale: bool,
    /// Azimuth value for which the orientation advisory was acknowledged.
    #[serde(default)]
    pub acknowledged_azimuth: Option<f64>,
}

impl Site {
    #[must_use]
    pub fn hemisphere(&self) -> Hemisphere {
        Hemisphere::from_latitude(self.latitude)
    }
}
