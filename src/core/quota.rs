//! API key table and per-key daily quota accounting.
//!
//! [`KeyTable`] is the validated {key → daily limit} mapping built once from
//! configuration. [`QuotaTracker`] owns the mutable usage counters and the
//! key-selection policy.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::core::models::ApiKey;
use crate::core::sites::is_site_id;
use crate::error::{PvcastError, Result};
use crate::storage::cache::UsageDocument;
use crate::util::time::{local_date, local_day_start, local_midnight};

/// Limit applied when none is configured.
pub const DEFAULT_API_LIMIT: u32 = 10;

// =============================================================================
// Key Table
// =============================================================================

/// One configured key with its daily call limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub key: ApiKey,
    pub limit: u32,
}

/// Validated, fixed-size key table. Order is the configured order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTable {
    entries: Vec<KeyEntry>,
}

impl KeyTable {
    /// Build from the comma-separated `api_keys` and `api_limits` strings.
    ///
    /// Limits may be blank (default for every key), a single value (applied
    /// to every key), or exactly one value per key.
    pub fn build(keys: &str, limits: &str) -> Result<Self> {
        if keys.trim().is_empty() {
            return Err(PvcastError::NoApiKeys);
        }

        let mut parsed: Vec<ApiKey> = Vec::new();
        for (index, raw) in keys.split(',').enumerate() {
            let raw = raw.trim();
            if raw.is_empty() || raw.chars().any(char::is_whitespace) {
                return Err(PvcastError::MalformedApiKey { position: index + 1 });
            }
            let key = ApiKey::new(raw);
            if is_site_id(raw) {
                return Err(PvcastError::ApiKeyLooksLikeSite {
                    key: key.redacted(),
                });
            }
            if parsed.contains(&key) {
                return Err(PvcastError::DuplicateApiKey {
                    key: key.redacted(),
                });
            }
            parsed.push(key);
        }

        let limits = parse_limits(limits, parsed.len())?;

        Ok(Self {
            entries: parsed
                .into_iter()
                .zip(limits)
                .map(|(key, limit)| KeyEntry { key, limit })
                .collect(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&KeyEntry> {
        self.entries.get(index)
    }

    /// Index of the key with the given fingerprint.
    #[must_use]
    pub fn position(&self, fingerprint: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.key.fingerprint() == fingerprint)
    }

    #[must_use]
    pub fn total_limit(&self) -> u32 {
        self.entries.iter().map(|e| e.limit).fold(0, u32::saturating_add)
    }
}

fn parse_limits(input: &str, key_count: usize) -> Result<Vec<u32>> {
    if input.trim().is_empty() {
        return Ok(vec![DEFAULT_API_LIMIT; key_count]);
    }

    let mut values = Vec::new();
    for raw in input.split(',') {
        let raw = raw.trim();
        let value: i64 = raw.parse().map_err(|_| PvcastError::ApiLimitNotNumber {
            value: raw.to_string(),
        })?;
        if value < 1 {
            return Err(PvcastError::ApiLimitTooSmall { value });
        }
        values.push(u32::try_from(value).unwrap_or(u32::MAX));
    }

    match values.len() {
        1 => Ok(vec![values[0]; key_count]),
        n if n == key_count => Ok(values),
        n => Err(PvcastError::ApiLimitCountMismatch {
            limits: n,
            keys: key_count,
        }),
    }
}

// =============================================================================
// Usage
// =============================================================================

/// Usage counters for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub daily_limit: u32,
    pub daily_limit_consumed: u32,
    /// Start of the quota day the counter belongs to.
    pub reset: DateTime<Utc>,
}

impl KeyUsage {
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.daily_limit_consumed)
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.daily_limit_consumed >= self.daily_limit
    }
}

// =============================================================================
// Quota Tracker
// =============================================================================

/// Per-key daily counters, in configured key order.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    keys: Vec<ApiKey>,
    usage: Vec<KeyUsage>,
    reset_tz: Tz,
}

impl QuotaTracker {
    /// Fresh counters for every key.
    #[must_use]
    pub fn new(table: &KeyTable, reset_tz: Tz, now: DateTime<Utc>) -> Self {
        Self::restore(table, reset_tz, None, now)
    }

    /// Counters restored from a usage document. Configured limits win over
    /// persisted ones; keys absent from the document start at zero.
    #[must_use]
    pub fn restore(
        table: &KeyTable,
        reset_tz: Tz,
        doc: Option<&UsageDocument>,
        now: DateTime<Utc>,
    ) -> Self {
        let day_start = local_day_start(now, reset_tz);
        let mut keys = Vec::with_capacity(table.len());
        let mut usage = Vec::with_capacity(table.len());

        for entry in table.iter() {
            let fingerprint = entry.key.fingerprint();
            let restored = doc.and_then(|d| d.keys.get(&fingerprint));
            let record = match restored {
                Some(saved) => {
                    if saved.daily_limit != entry.limit {
                        tracing::info!(
                            key = %entry.key,
                            from = saved.daily_limit,
                            to = entry.limit,
                            "API limit changed"
                        );
                    }
                    KeyUsage {
                        daily_limit: entry.limit,
                        daily_limit_consumed: saved.daily_limit_consumed,
                        reset: saved.reset,
                    }
                }
                None => KeyUsage {
                    daily_limit: entry.limit,
                    daily_limit_consumed: 0,
                    reset: day_start,
                },
            };
            keys.push(entry.key.clone());
            usage.push(record);
        }

        Self {
            keys,
            usage,
            reset_tz,
        }
    }

    /// Consume one call for `key` if it has quota left.
    pub fn reserve(&mut self, key: &ApiKey) -> bool {
        self.keys
            .iter()
            .position(|k| k == key)
            .is_some_and(|index| self.reserve_index(index))
    }

    fn reserve_index(&mut self, index: usize) -> bool {
        let Some(usage) = self.usage.get_mut(index) else {
            return false;
        };
        if usage.is_exhausted() {
            return false;
        }
        usage.daily_limit_consumed += 1;
        true
    }

    /// Reserve on the preferred key, else the first key in configured order
    /// with quota left. Returns the index of the key charged.
    pub fn reserve_any(&mut self, preferred: Option<usize>) -> Option<usize> {
        let order = preferred
            .into_iter()
            .chain((0..self.keys.len()).filter(move |i| Some(*i) != preferred));
        for index in order.collect::<Vec<_>>() {
            if self.reserve_index(index) {
                return Some(index);
            }
        }
        None
    }

    /// Zero every counter whose quota day has passed. Returns true if any reset.
    pub fn reset_if_new_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = local_date(now, self.reset_tz);
        let day_start = local_day_start(now, self.reset_tz);
        let mut reset_any = false;

        for (key, usage) in self.keys.iter().zip(self.usage.iter_mut()) {
            if local_date(usage.reset, self.reset_tz) < today {
                tracing::info!(key = %key, consumed = usage.daily_limit_consumed, "Resetting API usage");
                usage.daily_limit_consumed = 0;
                usage.reset = day_start;
                reset_any = true;
            }
        }

        if !reset_any {
            tracing::debug!("Usage cache is fresh, so not resetting");
        }
        reset_any
    }

    /// Next quota-day boundary after `now`.
    #[must_use]
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today: NaiveDate = local_date(now, self.reset_tz);
        local_midnight(today.succ_opt().unwrap_or(today), self.reset_tz)
    }

    #[must_use]
    pub fn key(&self, index: usize) -> Option<&ApiKey> {
        self.keys.get(index)
    }

    #[must_use]
    pub fn usage(&self, index: usize) -> Option<&KeyUsage> {
        self.usage.get(index)
    }

    #[must_use]
    pub fn is_exhausted(&self, index: usize) -> bool {
        self.usage.get(index).is_none_or(KeyUsage::is_exhausted)
    }

    #[must_use]
    pub fn all_exhausted(&self) -> bool {
        self.usage.iter().all(KeyUsage::is_exhausted)
    }

    #[must_use]
    pub fn used_total(&self) -> u32 {
        self.usage.iter().map(|u| u.daily_limit_consumed).fold(0, u32::saturating_add)
    }

    #[must_use]
    pub fn limit_total(&self) -> u32 {
        self.usage.iter().map(|u| u.daily_limit).fold(0, u32::saturating_add)
    }

    #[must_use]
    pub const fn reset_timezone(&self) -> Tz {
        self.reset_tz
    }

    /// Persistable form, keyed by fingerprint.
    #[must_use]
    pub fn to_document(&self) -> UsageDocument {
        UsageDocument {
            keys: self
                .keys
                .iter()
                .zip(&self.usage)
                .map(|(k, u)| (k.fingerprint(), u.clone()))
                .collect(),
            ..UsageDocument::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tracing_test::traced_test;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn limits_default_uniform_and_positional() {
        let table = KeyTable::build("aaa,bbb", "").unwrap();
        assert_eq!(table.iter().map(|e| e.limit).collect::<Vec<_>>(), [10, 10]);

        let table = KeyTable::build("aaa,bbb", "50").unwrap();
        assert_eq!(table.total_limit(), 100);

        let table = KeyTable::build("aaa, bbb", "10, 5").unwrap();
        assert_eq!(table.iter().map(|e| e.limit).collect::<Vec<_>>(), [10, 5]);
    }

    #[test]
    fn total_limit_saturates_instead_of_overflowing() {
        let table = KeyTable::build("aaa,bbb", "4294967295,1").unwrap();
        assert_eq!(table.total_limit(), u32::MAX);

        let tracker = QuotaTracker::new(&table, Tz::UTC, utc("2024-06-01T00:00:00Z"));
        assert_eq!(tracker.limit_total(), u32::MAX);
        assert_eq!(tracker.used_total(), 0);
    }

    #[test]
    fn key_validation_errors() {
        assert!(matches!(KeyTable::build("  ", ""), Err(PvcastError::NoApiKeys)));
        assert!(matches!(
            KeyTable::build("aaa,,bbb", ""),
            Err(PvcastError::MalformedApiKey { position: 2 })
        ));
        assert!(matches!(
            KeyTable::build("aaa,bbb,aaa", ""),
            Err(PvcastError::DuplicateApiKey { .. })
        ));
        assert!(matches!(
            KeyTable::build("1234-abcd-5678-ef90", ""),
            Err(PvcastError::ApiKeyLooksLikeSite { .. })
        ));
    }

    #[test]
    fn limit_validation_errors() {
        assert!(matches!(
            KeyTable::build("aaa", "ten"),
            Err(PvcastError::ApiLimitNotNumber { .. })
        ));
        assert!(matches!(
            KeyTable::build("aaa", "0"),
            Err(PvcastError::ApiLimitTooSmall { value: 0 })
        ));
        assert!(matches!(
            KeyTable::build("aaa,bbb", "1,2,3"),
            Err(PvcastError::ApiLimitCountMismatch { limits: 3, keys: 2 })
        ));
        assert!(matches!(
            KeyTable::build("aaa,bbb,ccc", "1,2"),
            Err(PvcastError::ApiLimitCountMismatch { limits: 2, keys: 3 })
        ));
    }

    #[test]
    fn duplicate_error_does_not_leak_key() {
        let err = KeyTable::build("secretkey123456,secretkey123456", "").unwrap_err();
        assert!(!err.to_string().contains("secretkey"));
    }

    #[test]
    fn reserve_until_limit_then_rollover() {
        let now = utc("2024-06-01T08:00:00Z");
        for limit in [1_u32, 3, 10] {
            let table = KeyTable::build("aaa", &limit.to_string()).unwrap();
            let mut quota = QuotaTracker::new(&table, Tz::UTC, now);
            let key = table.get(0).unwrap().key.clone();

            for _ in 0..limit {
                assert!(quota.reserve(&key));
            }
            assert!(!quota.reserve(&key));
            assert_eq!(quota.used_total(), limit);

            assert!(!quota.reset_if_new_day(now + Duration::hours(2)));
            assert!(quota.reset_if_new_day(now + Duration::days(1)));
            assert_eq!(quota.used_total(), 0);
            assert!(quota.reserve(&key));
        }
    }

    #[test]
    fn routing_falls_through_in_configured_order() {
        let now = utc("2024-06-01T08:00:00Z");
        let table = KeyTable::build("aaa,bbb", "10,5").unwrap();
        let mut quota = QuotaTracker::new(&table, Tz::UTC, now);

        let charged: Vec<_> = (0..16).map(|_| quota.reserve_any(Some(0))).collect();
        assert!(charged[..10].iter().all(|c| *c == Some(0)));
        assert!(charged[10..15].iter().all(|c| *c == Some(1)));
        assert_eq!(charged[15], None);
        assert!(quota.all_exhausted());
    }

    #[test]
    fn reset_boundary_follows_timezone() {
        let tz: Tz = "Australia/Sydney".parse().unwrap();
        // 13:30 UTC is 23:30 AEST on 2024-06-01
        let now = utc("2024-06-01T13:30:00Z");
        let table = KeyTable::build("aaa", "2").unwrap();
        let mut quota = QuotaTracker::new(&table, tz, now);
        assert_eq!(quota.next_reset(now), utc("2024-06-01T14:00:00Z"));

        assert!(quota.reserve_any(None).is_some());
        assert!(quota.reset_if_new_day(utc("2024-06-01T14:05:00Z")));
    }

    #[test]
    fn restore_keeps_counts_and_config_limits() {
        let now = utc("2024-06-01T08:00:00Z");
        let table = KeyTable::build("aaa,bbb", "10,5").unwrap();
        let mut quota = QuotaTracker::new(&table, Tz::UTC, now);
        quota.reserve_any(Some(0));
        quota.reserve_any(Some(1));
        let doc = quota.to_document();

        let raised = KeyTable::build("aaa,bbb,ccc", "20").unwrap();
        let restored = QuotaTracker::restore(&raised, Tz::UTC, Some(&doc), now);
        assert_eq!(restored.usage(0).unwrap().daily_limit_consumed, 1);
        assert_eq!(restored.usage(0).unwrap().daily_limit, 20);
        assert_eq!(restored.usage(2).unwrap().daily_limit_consumed, 0);
        assert!(doc.keys.keys().all(|fp| fp.len() == 16));
    }

    #[test]
    #[traced_test]
    fn reset_log_shows_redacted_key() {
        let now = utc("2024-06-01T08:00:00Z");
        let table = KeyTable::build("secretkey123456", "3").unwrap();
        let mut quota = QuotaTracker::new(&table, Tz::UTC, now);
        quota.reserve_any(None);

        assert!(quota.reset_if_new_day(now + Duration::days(1)));
        assert!(logs_contain("Resetting API usage"));
        assert!(!logs_contain("secretkey123456"));
    }
}
