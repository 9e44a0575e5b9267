//! Forecast data coordinator.
//!
//! Owns the site registry, raw records, quota counters, dampening and hard
//! limits, and runs the fetch cycle:
//!
//! ```text
//! IDLE -> QUOTA_CHECK -> FETCHING -> MERGING -> POST_PROCESSING -> PERSISTING -> SCHEDULED -> IDLE
//! ```
//!
//! Every cycle enters through [`Coordinator::start_cycle`], which checks the
//! trigger mode and claims the phase cell. Readers take the latest
//! [`DerivedSnapshot`] from a watch channel and never see a half-built one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::{Mutex, watch};

use super::aggregates::{
    DeriveContext, DerivedSnapshot, SnapshotMeta, aggregate, build_snapshot, dampen_all,
};
use super::dampening::{self, DampeningEngine, DampeningProfile, DampeningTarget};
use super::fetch_plan::{FetchPlan, FetchResult, PlannedFetch, SitesFetchOutcome};
use super::hard_limit::HardLimitClamp;
use super::models::{EstimateField, ForecastRecord, Site};
use super::pipeline::{self, FetchRequest};
use super::provider::{ForecastProvider, actuals_cutoff, forecast_hours, horizon_end};
use super::quota::{KeyTable, QuotaTracker};
use super::scheduler::{self, AutoUpdateMode, MIN_UPDATE_GAP, SchedulePolicy, Trigger, daily_budget};
use super::sites::{OrientationAdvisory, SiteRegistry};
use crate::error::{PvcastError, Result};
use crate::storage::cache::{CacheStore, DataDirLock, ForecastDocument, LoadOutcome};
use crate::util::time::local_day_start;

/// Records older than this are pruned at merge time.
pub const RETENTION: Duration = Duration::days(730);

// =============================================================================
// Settings
// =============================================================================

/// Coordinator behaviour resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    /// Zone for local days, sun times and schedules.
    pub tz: Tz,
    /// Zone whose midnight resets quota counters.
    pub reset_tz: Tz,
    pub auto_update: AutoUpdateMode,
    pub estimate: EstimateField,
    pub excluded: Vec<String>,
    pub granular: bool,
    pub custom_hours: u32,
    pub interval_override: Option<Duration>,
    /// Per-request timeout.
    pub timeout: StdDuration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            tz: Tz::UTC,
            reset_tz: Tz::UTC,
            auto_update: AutoUpdateMode::Disabled,
            estimate: EstimateField::default(),
            excluded: Vec::new(),
            granular: false,
            custom_hours: 1,
            interval_override: None,
            timeout: StdDuration::from_secs(60),
        }
    }
}

// =============================================================================
// Cycle Phase
// =============================================================================

/// Where the current fetch cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CyclePhase {
    Idle = 0,
    QuotaCheck = 1,
    Fetching = 2,
    Merging = 3,
    PostProcessing = 4,
    Persisting = 5,
    Scheduled = 6,
}

impl CyclePhase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::QuotaCheck,
            2 => Self::Fetching,
            3 => Self::Merging,
            4 => Self::PostProcessing,
            5 => Self::Persisting,
            6 => Self::Scheduled,
            _ => Self::Idle,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::QuotaCheck => "quota_check",
            Self::Fetching => "fetching",
            Self::Merging => "merging",
            Self::PostProcessing => "post_processing",
            Self::Persisting => "persisting",
            Self::Scheduled => "scheduled",
        }
    }
}

/// Holds the phase cell for one cycle and returns it to idle on drop.
struct PhaseGuard<'a> {
    cell: &'a AtomicU8,
}

impl<'a> PhaseGuard<'a> {
    fn enter(cell: &'a AtomicU8) -> Result<Self> {
        cell.compare_exchange(
            CyclePhase::Idle as u8,
            CyclePhase::QuotaCheck as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .map_err(|_| PvcastError::CycleInProgress)?;
        tracing::debug!(phase = CyclePhase::QuotaCheck.label(), "Cycle phase");
        Ok(Self { cell })
    }

    fn advance(&self, phase: CyclePhase) {
        self.cell.store(phase as u8, Ordering::SeqCst);
        tracing::debug!(phase = phase.label(), "Cycle phase");
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.cell.store(CyclePhase::Idle as u8, Ordering::SeqCst);
    }
}

// =============================================================================
// Cycle Report
// =============================================================================

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    /// Cancelled before persisting; the previous cache stays authoritative.
    Aborted,
    /// Last successful update is within the minimum gap.
    SkippedRecent,
}

/// A site whose fetch failed this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteFailure {
    pub site: String,
    pub code: &'static str,
    pub message: String,
}

/// Summary of one fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
    pub fetched: Vec<String>,
    pub failed: Vec<SiteFailure>,
    /// Sites with no key left to charge.
    pub skipped: Vec<String>,
    pub api_used: u32,
    pub api_limit: u32,
    pub next_wake: Option<DateTime<Utc>>,
}

impl CycleReport {
    const fn new(trigger: Trigger, started_at: DateTime<Utc>) -> Self {
        Self {
            trigger,
            started_at,
            outcome: CycleOutcome::Completed,
            fetched: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            api_used: 0,
            api_limit: 0,
            next_wake: None,
        }
    }

    fn finish(mut self, outcome: CycleOutcome, state: &State) -> Self {
        self.outcome = outcome;
        self.api_used = state.quota.used_total();
        self.api_limit = state.quota.limit_total();
        self.next_wake = state.next_wake;
        self
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct State {
    registry: SiteRegistry,
    raw: BTreeMap<String, Vec<ForecastRecord>>,
    quota: QuotaTracker,
    dampening: DampeningEngine,
    clamp: HardLimitClamp,
    last_updated: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    provider_reachable: bool,
    next_wake: Option<DateTime<Utc>>,
    /// Sites whose latest data is older than the last cycle.
    stale_data: BTreeSet<String>,
    /// The forecast cache was missing or invalid and has not been rebuilt.
    needs_resync: bool,
}

impl State {
    fn stale_sites(&self) -> Vec<String> {
        self.registry
            .iter()
            .filter(|s| s.stale)
            .map(|s| s.resource_id.clone())
            .chain(self.stale_data.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn forecast_document(&self, auto_update: AutoUpdateMode) -> ForecastDocument {
        ForecastDocument {
            last_updated: self.last_updated,
            last_attempt: self.last_attempt,
            auto_updated: auto_update.as_u8(),
            sites: self.registry.to_vec(),
            site_forecasts: self.raw.clone(),
            ..ForecastDocument::default()
        }
    }
}

fn derive(
    state: &State,
    raw: &BTreeMap<String, Vec<ForecastRecord>>,
    settings: &CoordinatorSettings,
    now: DateTime<Utc>,
) -> DerivedSnapshot {
    let ctx = DeriveContext {
        now,
        tz: settings.tz,
        field: settings.estimate,
        custom_hours: settings.custom_hours,
    };
    let meta = SnapshotMeta {
        api_used: state.quota.used_total(),
        api_limit: state.quota.limit_total(),
        last_updated: state.last_updated,
        last_attempt: state.last_attempt,
        provider_reachable: state.provider_reachable,
        next_wake: state.next_wake,
        stale_sites: state.stale_sites(),
    };
    build_snapshot(raw, &state.registry, &state.dampening, &state.clamp, &ctx, meta)
}

/// Supersede records for identical periods; keep everything else.
fn merge_records(
    existing: &[ForecastRecord],
    fresh: impl IntoIterator<Item = ForecastRecord>,
) -> Vec<ForecastRecord> {
    let mut by_period: BTreeMap<DateTime<Utc>, ForecastRecord> =
        existing.iter().map(|r| (r.period_start, *r)).collect();
    for record in fresh {
        by_period.insert(record.period_start, record);
    }
    by_period.into_values().collect()
}

// =============================================================================
// Coordinator
// =============================================================================

/// The single writer of forecast, usage and dampening state.
pub struct Coordinator<P> {
    provider: P,
    keys: KeyTable,
    settings: CoordinatorSettings,
    store: CacheStore,
    _lock: DataDirLock,
    state: Mutex<State>,
    phase: AtomicU8,
    cancel: AtomicBool,
    snapshot: watch::Sender<Arc<DerivedSnapshot>>,
}

impl<P: ForecastProvider> Coordinator<P> {
    /// Lock the data directory and load persisted state without touching
    /// the provider.
    ///
    /// # Errors
    ///
    /// Returns [`PvcastError::DataDirLocked`] while another coordinator owns
    /// the directory, or [`PvcastError::UsageDataCorrupt`] or
    /// [`PvcastError::IncompatibleCacheSchema`]; both need the operator.
    pub fn open(
        provider: P,
        keys: KeyTable,
        clamp: HardLimitClamp,
        settings: CoordinatorSettings,
        store: CacheStore,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let lock = store.lock()?;
        let usage = store.load_usage()?;
        let mut quota = QuotaTracker::restore(&keys, settings.reset_tz, usage.as_ref(), now);
        quota.reset_if_new_day(now);

        let dampening = match store.load_dampening()? {
            LoadOutcome::Loaded(doc) => DampeningEngine::from_document(&doc, settings.granular),
            LoadOutcome::Missing => DampeningEngine::new(settings.granular),
            LoadOutcome::Invalid(reason) => {
                tracing::warn!(%reason, "Dampening document unreadable, using neutral factors");
                DampeningEngine::new(settings.granular)
            }
        };

        let (registry, raw, last_updated, last_attempt, needs_resync) = match store
            .load_forecasts()?
        {
            LoadOutcome::Loaded(doc) => (
                SiteRegistry::from_cached(doc.sites),
                doc.site_forecasts,
                doc.last_updated,
                doc.last_attempt,
                false,
            ),
            LoadOutcome::Missing => {
                tracing::info!("No forecast cache, a full resync is needed");
                (SiteRegistry::new(), BTreeMap::new(), None, None, true)
            }
            LoadOutcome::Invalid(reason) => {
                tracing::warn!(%reason, "Forecast cache invalid, a full resync is needed");
                (SiteRegistry::new(), BTreeMap::new(), None, None, true)
            }
        };

        let mut state = State {
            registry,
            raw,
            quota,
            dampening,
            clamp,
            last_updated,
            last_attempt,
            provider_reachable: true,
            next_wake: None,
            stale_data: BTreeSet::new(),
            needs_resync,
        };

        let fingerprints: Vec<String> = keys.iter().map(|e| e.key.fingerprint()).collect();
        for removed in state.registry.retain_keys(&fingerprints) {
            state.raw.remove(&removed);
        }
        state.registry.apply_exclusions(&settings.excluded);

        let policy = Self::policy_for(&keys, &settings, &state.registry);
        state.next_wake = policy.next_wake(&state.registry.to_vec(), now, settings.tz);

        let initial = derive(&state, &state.raw, &settings, now);
        let (snapshot, _) = watch::channel(Arc::new(initial));

        Ok(Self {
            provider,
            keys,
            settings,
            store,
            _lock: lock,
            state: Mutex::new(state),
            phase: AtomicU8::new(CyclePhase::Idle as u8),
            cancel: AtomicBool::new(false),
            snapshot,
        })
    }

    /// Bring cached data up to date after [`Self::open`].
    ///
    /// Runs a full resync when the forecast cache was missing or invalid, or
    /// an update when cached data predates today and automatic updates are
    /// on. Otherwise only site metadata is refreshed, which costs no quota.
    ///
    /// # Errors
    ///
    /// Returns [`PvcastError::SitesUnavailableCacheInvalid`] when the cache
    /// was unusable and the provider could not list sites either.
    pub async fn startup(&self, now: DateTime<Utc>) -> Result<Option<CycleReport>> {
        let (needs_resync, last_updated) = {
            let state = self.state.lock().await;
            (state.needs_resync, state.last_updated)
        };

        if needs_resync {
            return self.start_cycle(Trigger::Resync, now).await.map(Some);
        }

        let stale = last_updated.is_none_or(|t| t < local_day_start(now, self.settings.tz));
        if stale && self.settings.auto_update != AutoUpdateMode::Disabled {
            tracing::info!("Cached forecasts predate today, updating");
            return self.start_cycle(Trigger::Startup, now).await.map(Some);
        }

        let outcomes = pipeline::fetch_sites(&self.provider, &self.keys, self.settings.timeout).await;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.merge_sites(state, outcomes, false)?;
        self.store
            .save_forecasts(&state.forecast_document(self.settings.auto_update))?;
        self.schedule(state, now);
        self.publish(derive(state, &state.raw, &self.settings, now));
        Ok(None)
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// `update` command; automatic mode only.
    pub async fn update(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.start_cycle(Trigger::Update, now).await
    }

    /// `force-update` command; manual mode only.
    pub async fn force_update(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.start_cycle(Trigger::ForceUpdate, now).await
    }

    /// Timer wake from the run loop.
    pub async fn run_scheduled(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.start_cycle(Trigger::Scheduled, now).await
    }

    /// Delete the forecast cache and resync from the provider.
    ///
    /// Usage counters and dampening survive.
    pub async fn clear_cache(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.start_cycle(Trigger::Resync, now).await
    }

    /// Ask an in-flight cycle to stop before persisting. Returns false when idle.
    pub fn cancel_in_flight(&self) -> bool {
        if self.phase() == CyclePhase::Idle {
            return false;
        }
        tracing::info!(phase = self.phase().label(), "Cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
        true
    }

    /// The single entry point that starts a fetch cycle.
    ///
    /// # Errors
    ///
    /// Policy errors when the trigger does not match the update mode,
    /// [`PvcastError::CycleInProgress`] when another cycle holds the phase
    /// cell, [`PvcastError::NoSitesAvailable`] when no key lists a site, and
    /// integrity or I/O errors from persisting.
    pub async fn start_cycle(&self, trigger: Trigger, now: DateTime<Utc>) -> Result<CycleReport> {
        scheduler::admit(self.settings.auto_update.trigger_mode(), trigger)?;
        let guard = PhaseGuard::enter(&self.phase)?;
        self.cancel.store(false, Ordering::SeqCst);

        let mut report = CycleReport::new(trigger, now);
        tracing::info!(trigger = trigger.label(), "Fetch cycle started");

        // QUOTA_CHECK
        let (resync, refresh) = {
            let mut locked = self.state.lock().await;
            let state = &mut *locked;
            if trigger.respects_min_gap()
                && let Some(last) = state.last_updated
                && now - last < MIN_UPDATE_GAP
            {
                tracing::warn!(
                    last_updated = %last,
                    "Not updating, last update was less than 15 minutes ago"
                );
                return Ok(report.finish(CycleOutcome::SkippedRecent, state));
            }

            state.quota.reset_if_new_day(now);
            let resync = trigger == Trigger::Resync || state.needs_resync;
            if trigger == Trigger::Resync {
                self.store.clear_forecasts()?;
                state.raw.clear();
                state.stale_data.clear();
                state.last_updated = None;
                state.needs_resync = true;
            }
            (resync, resync || state.registry.is_empty())
        };

        // Provider calls run without the state lock.
        let site_lists = if refresh {
            Some(pipeline::fetch_sites(&self.provider, &self.keys, self.settings.timeout).await)
        } else {
            None
        };
        let plan = {
            let mut locked = self.state.lock().await;
            let state = &mut *locked;
            if let Some(outcomes) = site_lists {
                self.merge_sites(state, outcomes, resync)?;
            }
            if state.registry.is_empty() {
                tracing::warn!("No sites registered for any key, nothing to fetch");
                return Err(PvcastError::NoSitesAvailable);
            }
            let plan = self.plan(state, resync);
            self.store.save_usage(&state.quota.to_document())?;
            plan
        };

        // FETCHING
        guard.advance(CyclePhase::Fetching);
        let request = FetchRequest::new(forecast_hours(now, self.settings.tz), self.settings.timeout);
        let outcomes =
            pipeline::fetch_plan(&self.provider, &self.keys, &plan, &request, &self.cancel).await;

        // MERGING
        guard.advance(CyclePhase::Merging);
        let mut locked = self.state.lock().await;
        let state = &mut *locked;
        let horizon = horizon_end(now, self.settings.tz);
        let keep_actuals_from = actuals_cutoff(now, self.settings.tz);
        let retain_from = now - RETENTION;
        let mut raw = state.raw.clone();
        let mut stale = state.stale_data.clone();
        let mut responded = false;

        for site in plan.skipped() {
            stale.insert(site.clone());
            report.skipped.push(site.clone());
        }
        for outcome in outcomes {
            match outcome.result {
                FetchResult::Fetched(series) => {
                    let existing = raw.remove(&outcome.site).unwrap_or_default();
                    let actuals = series
                        .actuals
                        .into_iter()
                        .filter(|r| r.period_start >= keep_actuals_from);
                    let forecasts = series
                        .forecasts
                        .into_iter()
                        .filter(|r| r.period_start < horizon);
                    let merged = merge_records(&merge_records(&existing, actuals), forecasts);
                    raw.insert(outcome.site.clone(), merged);
                    stale.remove(&outcome.site);
                    report.fetched.push(outcome.site);
                    responded = true;
                }
                FetchResult::Failed(e) => {
                    responded |= e.provider_responded();
                    report.failed.push(SiteFailure {
                        site: outcome.site.clone(),
                        code: e.error_code(),
                        message: e.to_string(),
                    });
                    stale.insert(outcome.site);
                }
                FetchResult::NotStarted => {
                    stale.insert(outcome.site);
                }
            }
        }
        for records in raw.values_mut() {
            records.retain(|r| r.period_start >= retain_from);
        }
        raw.retain(|site, _| state.registry.contains(site));
        if plan.fetch_count() > 0 {
            state.provider_reachable = responded;
        }
        if !plan.skipped().is_empty() {
            tracing::warn!(
                skipped = plan.skipped().len(),
                "API quota exhausted on every key, sites skipped this cycle"
            );
        }

        // POST_PROCESSING
        guard.advance(CyclePhase::PostProcessing);
        let mut snapshot = derive(state, &raw, &self.settings, now);

        if self.cancel.load(Ordering::SeqCst) {
            tracing::warn!(trigger = trigger.label(), "Cycle cancelled, previous cache kept");
            return Ok(report.finish(CycleOutcome::Aborted, state));
        }

        // PERSISTING
        guard.advance(CyclePhase::Persisting);
        state.raw = raw;
        state.stale_data = stale;
        state.last_attempt = Some(now);
        if !report.fetched.is_empty() {
            state.last_updated = Some(now);
            state.needs_resync = false;
        }
        self.store
            .save_forecasts(&state.forecast_document(self.settings.auto_update))?;
        self.store.save_usage(&state.quota.to_document())?;

        // SCHEDULED
        guard.advance(CyclePhase::Scheduled);
        self.schedule(state, now);
        snapshot.last_updated = state.last_updated;
        snapshot.last_attempt = state.last_attempt;
        snapshot.stale_sites = state.stale_sites();
        snapshot.next_wake = state.next_wake;
        snapshot.provider_reachable = state.provider_reachable;
        self.publish(snapshot);

        tracing::info!(
            trigger = trigger.label(),
            fetched = report.fetched.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Fetch cycle complete"
        );
        Ok(report.finish(CycleOutcome::Completed, state))
    }

    /// Reserve one call per site, owner key first. Actuals on a resync take
    /// a second call on the same key when it has one left.
    fn plan(&self, state: &mut State, resync: bool) -> FetchPlan {
        let mut plan = FetchPlan::new();
        for site in state.registry.iter() {
            if site.stale {
                tracing::debug!(site = %site.resource_id, "Site missing upstream, not fetching");
                continue;
            }
            let preferred = self.keys.position(&site.key_fingerprint);
            match state.quota.reserve_any(preferred) {
                Some(key_index) => {
                    let with_actuals = resync
                        && state
                            .quota
                            .key(key_index)
                            .cloned()
                            .is_some_and(|key| state.quota.reserve(&key));
                    plan.push(PlannedFetch {
                        site: site.resource_id.clone(),
                        key_index,
                        with_actuals,
                    });
                }
                None => {
                    tracing::warn!(site = %site.resource_id, "No API key has quota left, skipping site");
                    plan.skip(site.resource_id.clone());
                }
            }
        }
        plan
    }

    /// Merge per-key site listings into the registry.
    fn merge_sites(
        &self,
        state: &mut State,
        outcomes: Vec<SitesFetchOutcome>,
        required: bool,
    ) -> Result<()> {
        let mut any_ok = false;
        let mut responded = false;
        let mut last_error = None;

        for outcome in outcomes {
            let Some(entry) = self.keys.get(outcome.key_index) else {
                continue;
            };
            match outcome.result {
                Ok(sites) => {
                    let summary = state.registry.merge_key_sites(&entry.key.fingerprint(), sites);
                    tracing::info!(
                        key = %entry.key,
                        added = summary.added,
                        updated = summary.updated,
                        stale = summary.stale,
                        "Site metadata refreshed"
                    );
                    any_ok = true;
                }
                Err(e) => {
                    responded |= e.provider_responded();
                    last_error = Some(e);
                }
            }
        }

        state.provider_reachable = any_ok || responded;
        state.registry.apply_exclusions(&self.settings.excluded);
        for advisory in state.registry.advisories() {
            tracing::warn!(
                site = %advisory.site,
                azimuth = advisory.azimuth,
                proposed = advisory.proposed,
                "Site azimuth faces away from the equator; check the orientation"
            );
        }

        if !any_ok && required {
            return Err(PvcastError::SitesUnavailableCacheInvalid {
                reason: last_error.map_or_else(|| "no API keys".to_string(), |e| e.to_string()),
            });
        }
        Ok(())
    }

    fn policy_for(
        keys: &KeyTable,
        settings: &CoordinatorSettings,
        registry: &SiteRegistry,
    ) -> SchedulePolicy {
        SchedulePolicy {
            mode: settings.auto_update,
            budget: daily_budget(keys.total_limit(), registry.len()),
            interval_override: settings.interval_override,
        }
    }

    fn schedule(&self, state: &mut State, now: DateTime<Utc>) {
        let policy = Self::policy_for(&self.keys, &self.settings, &state.registry);
        state.next_wake = policy.next_wake(&state.registry.to_vec(), now, self.settings.tz);
        if let Some(at) = state.next_wake {
            tracing::debug!(next_wake = %at, budget = policy.budget, "Next update scheduled");
        }
    }

    fn publish(&self, snapshot: DerivedSnapshot) {
        self.snapshot.send_replace(Arc::new(snapshot));
    }

    async fn republish(&self, now: DateTime<Utc>) {
        let state = self.state.lock().await;
        self.publish(derive(&state, &state.raw, &self.settings, now));
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Active dampening profile for a site, or for every site when `None`/`"all"`.
    pub async fn get_dampening(&self, site: Option<&str>) -> Result<DampeningProfile> {
        let state = self.state.lock().await;
        state
            .dampening
            .get(&DampeningTarget::from_arg(site), &state.registry)
    }

    /// Validate, store and persist a dampening profile.
    pub async fn set_dampening(&self, site: Option<&str>, factors: &str) -> Result<()> {
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let mut engine = state.dampening.clone();
            engine.set(&DampeningTarget::from_arg(site), factors, &state.registry)?;
            self.store.save_dampening(&engine.to_document())?;
            state.dampening = engine;
        }
        self.republish(Utc::now()).await;
        Ok(())
    }

    /// Turn per-site half-hourly dampening on or off. Returns true on change.
    pub async fn set_granular(&self, enabled: bool) -> Result<bool> {
        let changed = {
            let mut state = self.state.lock().await;
            let mut engine = state.dampening.clone();
            let changed = engine.set_granular(enabled);
            if changed {
                self.store.save_dampening(&engine.to_document())?;
                state.dampening = engine;
            }
            changed
        };
        if changed {
            self.republish(Utc::now()).await;
        }
        Ok(changed)
    }

    /// Replace hard limits from user input; returns the new clamp for config.
    pub async fn set_hard_limit(&self, input: &str) -> Result<HardLimitClamp> {
        let clamp = {
            let mut state = self.state.lock().await;
            let mut clamp = state.clamp.clone();
            clamp.set_from_input(input)?;
            state.clamp = clamp.clone();
            clamp
        };
        tracing::info!(total_w = ?clamp.total(), "Hard limit set");
        self.republish(Utc::now()).await;
        Ok(clamp)
    }

    /// Remove every hard limit; returns the cleared clamp for config.
    pub async fn remove_hard_limit(&self) -> HardLimitClamp {
        let clamp = {
            let mut state = self.state.lock().await;
            state.clamp.remove();
            state.clamp.clone()
        };
        tracing::info!("Hard limit removed");
        self.republish(Utc::now()).await;
        clamp
    }

    /// Records with `start <= period_start < end`, for one site or the
    /// aggregate of non-excluded sites. Dampened records of the aggregate
    /// are clamped to the hard limit.
    ///
    /// # Errors
    ///
    /// [`PvcastError::UnknownSite`] for an unregistered site.
    pub async fn query_forecast_data(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        site: Option<&str>,
        undampened: bool,
    ) -> Result<Vec<ForecastRecord>> {
        let state = self.state.lock().await;
        let in_range = |r: &ForecastRecord| r.period_start >= start && r.period_start < end;
        let tz = self.settings.tz;

        let records = match site {
            Some(id) => {
                if !state.registry.contains(id) {
                    return Err(PvcastError::UnknownSite(id.to_string()));
                }
                let profile = state.dampening.resolve(id);
                state
                    .raw
                    .get(id)
                    .map(|records| {
                        records
                            .iter()
                            .filter(|r| in_range(r))
                            .map(|r| {
                                if undampened {
                                    *r
                                } else {
                                    dampening::apply(r, profile, tz)
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            }
            None if undampened => aggregate(&state.raw, &state.registry, &HardLimitClamp::default())
                .into_iter()
                .filter(in_range)
                .collect(),
            None => {
                let dampened = dampen_all(&state.raw, &state.dampening, tz);
                aggregate(&dampened, &state.registry, &state.clamp)
                    .into_iter()
                    .filter(in_range)
                    .collect()
            }
        };
        Ok(records)
    }

    /// Recompute derived values for `now` and publish them.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Arc<DerivedSnapshot> {
        self.republish(now).await;
        self.snapshot()
    }

    /// Zero quota counters when the quota day has turned over.
    pub async fn roll_quota(&self, now: DateTime<Utc>) -> Result<bool> {
        let reset = {
            let mut state = self.state.lock().await;
            let reset = state.quota.reset_if_new_day(now);
            if reset {
                self.store.save_usage(&state.quota.to_document())?;
            }
            reset
        };
        if reset {
            self.republish(now).await;
        }
        Ok(reset)
    }

    /// Accept a site's current azimuth and silence its advisory.
    pub async fn acknowledge_orientation(&self, site: &str) -> Result<f64> {
        let mut state = self.state.lock().await;
        let azimuth = state.registry.acknowledge(site)?;
        self.store
            .save_forecasts(&state.forecast_document(self.settings.auto_update))?;
        tracing::info!(site, azimuth, "Orientation acknowledged");
        Ok(azimuth)
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Latest published derived values.
    #[must_use]
    pub fn snapshot(&self) -> Arc<DerivedSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Receiver that sees every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<DerivedSnapshot>> {
        self.snapshot.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        CyclePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    #[must_use]
    pub const fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn sites(&self) -> Vec<Site> {
        self.state.lock().await.registry.to_vec()
    }

    pub async fn advisories(&self) -> Vec<OrientationAdvisory> {
        self.state.lock().await.registry.advisories()
    }

    /// Next quota-day boundary after `now`.
    pub async fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.state.lock().await.quota.next_reset(now)
    }

    /// Next scheduled poll, if automatic updates are on.
    #[must_use]
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.snapshot.borrow().next_wake
    }
}
