//! Site registry and orientation advisor.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::models::{Hemisphere, Site};
use crate::error::{PvcastError, Result};

static SITE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{4}(-[0-9a-f]{4}){3}$").expect("valid site id regex")
});

/// Whether `s` has the shape of a rooftop site resource id.
#[must_use]
pub fn is_site_id(s: &str) -> bool {
    SITE_ID_RE.is_match(s.trim())
}

/// Non-blocking notice that a site's azimuth looks mirrored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrientationAdvisory {
    pub site: String,
    pub name: String,
    pub hemisphere: Hemisphere,
    pub azimuth: f64,
    pub proposed: f64,
}

/// Counts from merging one key's metadata response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub updated: usize,
    pub stale: usize,
}

/// In-memory catalog of known sites, keyed by resource id.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: BTreeMap<String, Site>,
}

impl SiteRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_cached(sites: Vec<Site>) -> Self {
        Self {
            sites: sites
                .into_iter()
                .map(|s| (s.resource_id.clone(), s))
                .collect(),
        }
    }

    /// Rebuild the sites owned by one key from a fresh metadata response.
    ///
    /// Cached sites of that key missing from the response are kept and
    /// flagged stale. Exclusion and acknowledgement survive the rebuild.
    pub fn merge_key_sites(&mut self, fingerprint: &str, fetched: Vec<Site>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let fetched_ids: Vec<String> = fetched.iter().map(|s| s.resource_id.clone()).collect();

        for mut site in fetched {
            site.key_fingerprint = fingerprint.to_string();
            site.stale = false;
            match self.sites.get(&site.resource_id) {
                Some(existing) => {
                    site.excluded = existing.excluded;
                    site.acknowledged_azimuth = existing.acknowledged_azimuth;
                    summary.updated += 1;
                }
                None => summary.added += 1,
            }
            self.sites.insert(site.resource_id.clone(), site);
        }

        for site in self.sites.values_mut() {
            if site.key_fingerprint == fingerprint && !fetched_ids.contains(&site.resource_id) {
                if !site.stale {
                    tracing::warn!(site = %site.resource_id, "Site missing from provider response, keeping cached metadata");
                }
                site.stale = true;
                summary.stale += 1;
            }
        }

        summary
    }

    /// Drop sites whose owning key is no longer configured.
    pub fn retain_keys(&mut self, fingerprints: &[String]) -> Vec<String> {
        let removed: Vec<String> = self
            .sites
            .values()
            .filter(|s| !fingerprints.contains(&s.key_fingerprint))
            .map(|s| s.resource_id.clone())
            .collect();
        for id in &removed {
            tracing::info!(site = %id, "Removing site of unconfigured API key");
            self.sites.remove(id);
        }
        removed
    }

    /// Set exclusion flags from the configured excluded list.
    pub fn apply_exclusions(&mut self, excluded: &[String]) {
        for site in self.sites.values_mut() {
            site.excluded = excluded
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&site.resource_id));
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Site> {
        self.sites.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sites.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.sites.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Site> {
        self.sites.values().cloned().collect()
    }

    /// Orientation advisories not yet acknowledged.
    #[must_use]
    pub fn advisories(&self) -> Vec<OrientationAdvisory> {
        self.sites.values().filter_map(check_orientation).collect()
    }

    /// Suppress the advisory for the site's current azimuth.
    pub fn acknowledge(&mut self, id: &str) -> Result<f64> {
        let site = self
            .sites
            .get_mut(id)
            .ok_or_else(|| PvcastError::UnknownSite(id.to_string()))?;
        site.acknowledged_azimuth = Some(site.azimuth);
        Ok(site.azimuth)
    }
}

/// Advisory for a site whose azimuth faces away from the equator.
///
/// Azimuth convention: 0 faces north, positive toward west, +/-180 faces south.
#[must_use]
pub fn check_orientation(site: &Site) -> Option<OrientationAdvisory> {
    if site.acknowledged_azimuth == Some(site.azimuth) {
        return None;
    }

    let hemisphere = site.hemisphere();
    let magnitude = site.azimuth.abs();
    let suspicious = match hemisphere {
        Hemisphere::Northern => magnitude < 90.0,
        Hemisphere::Southern => magnitude > 90.0,
    };
    if !suspicious {
        return None;
    }

    let mirrored = 180.0 - magnitude;
    let proposed = if site.azimuth < 0.0 { -mirrored } else { mirrored };

    Some(OrientationAdvisory {
        site: site.resource_id.clone(),
        name: site.name.clone(),
        hemisphere,
        azimuth: site.azimuth,
        proposed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_test_site;

    fn site_at(id: &str, latitude: f64, azimuth: f64) -> Site {
        Site {
            latitude,
            azimuth,
            ..make_test_site(id)
        }
    }

    #[test]
    fn site_id_shape() {
        assert!(is_site_id("1234-abcd-5678-ef90"));
        assert!(is_site_id("1234-ABCD-5678-EF90"));
        assert!(!is_site_id("1234-abcd-5678"));
        assert!(!is_site_id("zzzz-abcd-5678-ef90"));
        assert!(!is_site_id("some-api-key-value"));
    }

    #[test]
    fn northern_site_facing_north_gets_advisory() {
        let advisory = check_orientation(&site_at("1111-1111-1111-1111", 51.5, 30.0)).unwrap();
        assert_eq!(advisory.hemisphere, Hemisphere::Northern);
        assert_eq!(advisory.proposed, 150.0);

        let advisory = check_orientation(&site_at("1111-1111-1111-1111", 51.5, -10.0)).unwrap();
        assert_eq!(advisory.proposed, -170.0);

        assert!(check_orientation(&site_at("1111-1111-1111-1111", 51.5, 180.0)).is_none());
    }

    #[test]
    fn southern_site_facing_south_gets_advisory() {
        let advisory = check_orientation(&site_at("2222-2222-2222-2222", -33.8, 170.0)).unwrap();
        assert_eq!(advisory.hemisphere, Hemisphere::Southern);
        assert_eq!(advisory.proposed, 10.0);
        assert!(check_orientation(&site_at("2222-2222-2222-2222", -33.8, 0.0)).is_none());
    }

    #[test]
    fn acknowledgement_is_per_azimuth() {
        let mut registry = SiteRegistry::from_cached(vec![site_at("3333-3333-3333-3333", -33.8, 170.0)]);
        assert_eq!(registry.advisories().len(), 1);

        registry.acknowledge("3333-3333-3333-3333").unwrap();
        assert!(registry.advisories().is_empty());

        // A changed azimuth raises the advisory again
        let mut moved = registry.get("3333-3333-3333-3333").unwrap().clone();
        moved.azimuth = 160.0;
        registry.merge_key_sites(&moved.key_fingerprint.clone(), vec![moved]);
        assert_eq!(registry.advisories().len(), 1);

        assert!(matches!(
            registry.acknowledge("9999-9999-9999-9999"),
            Err(PvcastError::UnknownSite(_))
        ));
    }

    #[test]
    fn missing_sites_become_stale_not_deleted() {
        let a = make_test_site("aaaa-0000-0000-0001");
        let b = make_test_site("aaaa-0000-0000-0002");
        let fp = a.key_fingerprint.clone();
        let mut registry = SiteRegistry::from_cached(vec![a.clone(), b]);
        registry.apply_exclusions(&["aaaa-0000-0000-0001".to_string()]);

        let summary = registry.merge_key_sites(&fp, vec![a]);
        assert_eq!(summary, MergeSummary { added: 0, updated: 1, stale: 1 });
        assert_eq!(registry.len(), 2);
        assert!(registry.get("aaaa-0000-0000-0002").unwrap().stale);
        assert!(registry.get("aaaa-0000-0000-0001").unwrap().excluded);
    }

    #[test]
    fn retain_keys_drops_orphans() {
        let mut orphan = make_test_site("bbbb-0000-0000-0001");
        orphan.key_fingerprint = "0000000000000000".to_string();
        let kept = make_test_site("bbbb-0000-0000-0002");
        let fp = kept.key_fingerprint.clone();
        let mut registry = SiteRegistry::from_cached(vec![orphan, kept]);

        let removed = registry.retain_keys(&[fp]);
        assert_eq!(removed, vec!["bbbb-0000-0000-0001".to_string()]);
        assert_eq!(registry.ids(), vec!["bbbb-0000-0000-0002".to_string()]);
    }
}
