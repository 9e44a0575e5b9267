//! Dampening profiles: validation, resolution, and application.
//!
//! A profile is either the global 24 hourly factors, or (in granular mode)
//! 48 half-hourly factors for one site or for `"all"`. Per-site profiles are
//! always half-hourly so half-hour resolution is never collapsed.

use std::collections::BTreeMap;

use chrono::Timelike;
use chrono_tz::Tz;

use crate::core::models::ForecastRecord;
use crate::core::sites::SiteRegistry;
use crate::error::{PvcastError, Result};
use crate::storage::cache::DampeningDocument;

pub const HOURLY_FACTORS: usize = 24;
pub const HALF_HOURLY_FACTORS: usize = 48;
/// Override key that applies to every site in granular mode.
pub const ALL_SITES: &str = "all";

const MINUTES_PER_DAY: u32 = 1440;

/// What a dampening command addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DampeningTarget {
    All,
    Site(String),
}

impl DampeningTarget {
    /// `None` or `"all"` address every site.
    #[must_use]
    pub fn from_arg(site: Option<&str>) -> Self {
        match site.map(str::trim) {
            None | Some("") => Self::All,
            Some(s) if s.eq_ignore_ascii_case(ALL_SITES) => Self::All,
            Some(s) => Self::Site(s.to_string()),
        }
    }

    #[must_use]
    pub fn as_key(&self) -> &str {
        match self {
            Self::All => ALL_SITES,
            Self::Site(id) => id,
        }
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Ordered factors covering one local day.
#[derive(Debug, Clone, PartialEq)]
pub struct DampeningProfile {
    factors: Vec<f64>,
}

impl DampeningProfile {
    /// All ones.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            factors: vec![1.0; HOURLY_FACTORS],
        }
    }

    fn from_validated(factors: Vec<f64>) -> Self {
        Self { factors }
    }

    #[must_use]
    pub fn factors(&self) -> &[f64] {
        &self.factors
    }

    #[must_use]
    pub fn is_half_hourly(&self) -> bool {
        self.factors.len() == HALF_HOURLY_FACTORS
    }

    /// 60 for hourly profiles, 30 for half-hourly.
    #[must_use]
    pub fn granularity_minutes(&self) -> u32 {
        MINUTES_PER_DAY / u32::try_from(self.factors.len().max(1)).unwrap_or(1)
    }

    /// Factor for a local minute of day.
    #[must_use]
    pub fn factor_at(&self, minutes_since_midnight: u32) -> f64 {
        let index = (minutes_since_midnight / self.granularity_minutes()) as usize;
        self.factors
            .get(index.min(self.factors.len().saturating_sub(1)))
            .copied()
            .unwrap_or(1.0)
    }

    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.factors.iter().all(|f| (*f - 1.0).abs() < f64::EPSILON)
    }

    /// Comma-separated form accepted by [`parse_factors`].
    #[must_use]
    pub fn to_input_string(&self) -> String {
        self.factors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Parse 24 or 48 comma-separated factors in [0.0, 1.0].
pub fn parse_factors(input: &str) -> Result<Vec<f64>> {
    let values = input
        .split(',')
        .map(|raw| raw.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| PvcastError::InvalidDampeningFormat(e.to_string()))?;

    if values.len() != HOURLY_FACTORS && values.len() != HALF_HOURLY_FACTORS {
        return Err(PvcastError::InvalidDampeningFormat(format!(
            "expected {HOURLY_FACTORS} or {HALF_HOURLY_FACTORS} values, got {}",
            values.len()
        )));
    }

    check_range(&values)?;
    Ok(values)
}

fn check_range(values: &[f64]) -> Result<()> {
    match values
        .iter()
        .enumerate()
        .find(|(_, v)| !(0.0..=1.0).contains(*v))
    {
        Some((index, value)) => Err(PvcastError::DampeningOutOfRange {
            index,
            value: *value,
        }),
        None => Ok(()),
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Global profile plus optional granular overrides.
#[derive(Debug, Clone)]
pub struct DampeningEngine {
    global: DampeningProfile,
    granular: bool,
    overrides: BTreeMap<String, DampeningProfile>,
}

impl Default for DampeningEngine {
    fn default() -> Self {
        Self::new(false)
    }
}

impl DampeningEngine {
    #[must_use]
    pub fn new(granular: bool) -> Self {
        Self {
            global: DampeningProfile::neutral(),
            granular,
            overrides: BTreeMap::new(),
        }
    }

    /// Restore from the persisted document. Entries that do not fit the
    /// current mode are dropped with a warning.
    #[must_use]
    pub fn from_document(doc: &DampeningDocument, granular: bool) -> Self {
        let mut engine = Self::new(granular);

        if doc.global.len() == HOURLY_FACTORS && check_range(&doc.global).is_ok() {
            engine.global = DampeningProfile::from_validated(doc.global.clone());
        } else {
            tracing::warn!(len = doc.global.len(), "Ignoring invalid global dampening profile");
        }

        for (site, factors) in &doc.sites {
            if !granular {
                tracing::debug!(site = %site, "Granular dampening off, ignoring site profile");
                continue;
            }
            if factors.len() != HALF_HOURLY_FACTORS || check_range(factors).is_err() {
                tracing::warn!(
                    site = %site,
                    len = factors.len(),
                    "Dropping site dampening profile; re-enter it with 48 values"
                );
                continue;
            }
            engine
                .overrides
                .insert(site.clone(), DampeningProfile::from_validated(factors.clone()));
        }

        engine
    }

    #[must_use]
    pub fn to_document(&self) -> DampeningDocument {
        DampeningDocument {
            global: self.global.factors.clone(),
            sites: self
                .overrides
                .iter()
                .map(|(k, v)| (k.clone(), v.factors.clone()))
                .collect(),
            ..DampeningDocument::default()
        }
    }

    #[must_use]
    pub const fn is_granular(&self) -> bool {
        self.granular
    }

    /// Switch granular mode. Turning it off discards every override.
    /// Returns true when the mode changed.
    pub fn set_granular(&mut self, enabled: bool) -> bool {
        if self.granular == enabled {
            return false;
        }
        if !enabled && !self.overrides.is_empty() {
            tracing::info!(count = self.overrides.len(), "Discarding granular dampening profiles");
            self.overrides.clear();
        }
        self.granular = enabled;
        true
    }

    /// Validate and store a profile. Nothing changes on error.
    pub fn set(&mut self, target: &DampeningTarget, input: &str, registry: &SiteRegistry) -> Result<()> {
        let factors = parse_factors(input)?;
        let half_hourly = factors.len() == HALF_HOURLY_FACTORS;

        match target {
            DampeningTarget::All if !half_hourly => {
                self.global = DampeningProfile::from_validated(factors);
                self.overrides.remove(ALL_SITES);
            }
            DampeningTarget::All => {
                if !self.granular {
                    return Err(PvcastError::GranularDampeningDisabled);
                }
                if self.overrides.keys().any(|k| k != ALL_SITES) {
                    return Err(PvcastError::GranularityConflict(
                        "per-site profiles exist; 48 values cannot also be set for all sites"
                            .to_string(),
                    ));
                }
                self.overrides
                    .insert(ALL_SITES.to_string(), DampeningProfile::from_validated(factors));
            }
            DampeningTarget::Site(site) => {
                if !registry.contains(site) {
                    return Err(PvcastError::UnknownSite(site.clone()));
                }
                if !self.granular {
                    return Err(PvcastError::GranularDampeningDisabled);
                }
                if !half_hourly {
                    return Err(PvcastError::GranularityConflict(
                        "site profiles need 48 half-hourly values".to_string(),
                    ));
                }
                if self.overrides.contains_key(ALL_SITES) {
                    return Err(PvcastError::GranularityConflict(
                        "a 48-value profile for all sites is active".to_string(),
                    ));
                }
                self.overrides
                    .insert(site.clone(), DampeningProfile::from_validated(factors));
            }
        }

        tracing::info!(profile = %target.as_key(), granular = self.granular, "Dampening profile set");
        Ok(())
    }

    /// Active profile for a command target.
    pub fn get(&self, target: &DampeningTarget, registry: &SiteRegistry) -> Result<DampeningProfile> {
        match target {
            DampeningTarget::All => Ok(self
                .overrides
                .get(ALL_SITES)
                .filter(|_| self.granular)
                .unwrap_or(&self.global)
                .clone()),
            DampeningTarget::Site(site) => {
                if !registry.contains(site) {
                    return Err(PvcastError::UnknownSite(site.clone()));
                }
                Ok(self.resolve(site).clone())
            }
        }
    }

    /// Profile that applies to `site`: its override, then `"all"`, then global.
    #[must_use]
    pub fn resolve(&self, site: &str) -> &DampeningProfile {
        if !self.granular {
            return &self.global;
        }
        self.overrides
            .get(site)
            .or_else(|| self.overrides.get(ALL_SITES))
            .unwrap_or(&self.global)
    }

    /// Sites with their own override.
    #[must_use]
    pub fn site_overrides(&self) -> Vec<String> {
        self.overrides
            .keys()
            .filter(|k| k.as_str() != ALL_SITES)
            .cloned()
            .collect()
    }
}

/// Dampen one record by the factor covering its local start time.
#[must_use]
pub fn apply(record: &ForecastRecord, profile: &DampeningProfile, tz: Tz) -> ForecastRecord {
    let local = record.period_start.with_timezone(&tz);
    let minutes = local.hour() * 60 + local.minute();
    let factor = profile.factor_at(minutes);
    record.map(|v| v * factor)
}
