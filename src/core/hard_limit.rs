//! Inverter ceiling applied to aggregated forecast power.

use crate::error::{PvcastError, Result};

/// Per-key hard limits in watts, positional with the configured key order.
///
/// A single value caps the whole account; one value per key caps the
/// aggregate at the sum of the set limits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HardLimitClamp {
    limits: Vec<Option<f64>>,
}

impl HardLimitClamp {
    /// No limits for `key_count` keys.
    #[must_use]
    pub fn unset(key_count: usize) -> Self {
        Self {
            limits: vec![None; key_count],
        }
    }

    /// Parse a comma-separated list of positive watt values.
    pub fn parse(input: &str, key_count: usize) -> Result<Vec<f64>> {
        if input.trim().is_empty() {
            return Err(PvcastError::HardLimitEmpty);
        }

        let values = input
            .split(',')
            .map(|raw| {
                let raw = raw.trim();
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .ok_or_else(|| PvcastError::HardLimitNotPositiveNumber {
                        value: raw.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        if values.len() > key_count {
            return Err(PvcastError::HardLimitTooManyValues {
                limits: values.len(),
                keys: key_count,
            });
        }
        Ok(values)
    }

    /// Build from the persisted config string; `None` means unset.
    pub fn from_config(input: Option<&str>, key_count: usize) -> Result<Self> {
        let mut clamp = Self::unset(key_count);
        if let Some(input) = input.filter(|s| !s.trim().is_empty()) {
            clamp.set_from_input(input)?;
        }
        Ok(clamp)
    }

    /// Replace all limits from user input. Nothing changes on error.
    pub fn set_from_input(&mut self, input: &str) -> Result<()> {
        let values = Self::parse(input, self.limits.len())?;
        let mut next = vec![None; self.limits.len()];
        for (slot, value) in next.iter_mut().zip(values) {
            *slot = Some(value);
        }
        self.limits = next;
        Ok(())
    }

    pub fn remove(&mut self) {
        self.limits.iter_mut().for_each(|l| *l = None);
    }

    /// Sum of the set limits, `None` when no key has one.
    #[must_use]
    pub fn total(&self) -> Option<f64> {
        let set: Vec<f64> = self.limits.iter().flatten().copied().collect();
        (!set.is_empty()).then(|| set.iter().sum())
    }

    /// `min(watts, total)`; unchanged when no limit is set.
    #[must_use]
    pub fn clamp(&self, watts: f64) -> f64 {
        self.total().map_or(watts, |limit| watts.min(limit))
    }

    /// Per-key "limit set" flags.
    #[must_use]
    pub fn flags(&self) -> Vec<bool> {
        self.limits.iter().map(Option::is_some).collect()
    }

    #[must_use]
    pub fn limits(&self) -> &[Option<f64>] {
        &self.limits
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.limits.iter().any(Option::is_some)
    }

    /// Config representation, `None` when unset.
    #[must_use]
    pub fn to_config_string(&self) -> Option<String> {
        let set: Vec<String> = self
            .limits
            .iter()
            .map_while(|l| l.map(|v| v.to_string()))
            .collect();
        (!set.is_empty()).then(|| set.join(","))
    }
}
