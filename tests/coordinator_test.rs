//! Coordinator scenarios against the scriptable mock provider.
//!
//! Covers:
//! - Quota spreading across keys and skipped sites
//! - Single in-flight cycle and cancellation
//! - One coordinator per data directory
//! - Partial completion when some sites fail
//! - Reads served while a fetch is in flight
//! - Persistence across reopen
//! - Integrity failures on startup
//! - Dampening precedence

mod common;

use std::collections::BTreeMap;

use chrono::Duration;

use pvcast::core::coordinator::{Coordinator, CoordinatorSettings, CycleOutcome, CyclePhase};
use pvcast::core::fetch_plan::FetchKind;
use pvcast::core::hard_limit::HardLimitClamp;
use pvcast::core::models::ApiKey;
use pvcast::core::quota::KeyTable;
use pvcast::core::scheduler::AutoUpdateMode;
use pvcast::error::{ExitCode, PvcastError};
use pvcast::storage::cache::CacheStore;
use pvcast::test_utils::{
    MockFailure, MockProvider, TEST_KEY, TestDir, day_of_records, records_from, utc,
};

use common::fixtures::{seed_forecasts, site_ids, sites_for};
use common::logger::TestLogger;

const SECOND_KEY: &str = "test-key-2";

fn open(
    dir: &TestDir,
    provider: MockProvider,
    keys: &str,
    limits: &str,
    settings: CoordinatorSettings,
) -> pvcast::Result<Coordinator<MockProvider>> {
    let keys = KeyTable::build(keys, limits)?;
    let clamp = HardLimitClamp::unset(keys.len());
    Coordinator::open(
        provider,
        keys,
        clamp,
        settings,
        CacheStore::new(dir.path()),
        utc("2024-06-01T02:00:00Z"),
    )
}

// =============================================================================
// Quota
// =============================================================================

#[tokio::test]
async fn quota_spills_to_second_key_then_skips() {
    let log = TestLogger::new("quota_spills_to_second_key_then_skips");
    log.phase("setup");

    let dir = TestDir::new();
    let ids = site_ids(17);
    seed_forecasts(
        dir.path(),
        sites_for(TEST_KEY, &ids),
        BTreeMap::new(),
        utc("2024-05-31T02:00:00Z"),
    );
    let coordinator = open(
        &dir,
        MockProvider::new(),
        &format!("{TEST_KEY},{SECOND_KEY}"),
        "10,5",
        CoordinatorSettings::default(),
    )
    .unwrap();

    log.phase("execute");
    let report = coordinator
        .force_update(utc("2024-06-01T02:00:00Z"))
        .await
        .unwrap();

    log.phase("verify");
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.fetched.len(), 15);
    assert_eq!(report.skipped, ids[15..].to_vec());
    assert_eq!(report.api_used, 15);
    assert_eq!(report.api_limit, 15);

    let calls = coordinator.provider().calls();
    let first = ApiKey::new(TEST_KEY).fingerprint();
    let second = ApiKey::new(SECOND_KEY).fingerprint();
    let on = |fp: &str| {
        calls
            .iter()
            .filter(|c| c.kind == FetchKind::Forecasts && c.key_fingerprint == fp)
            .count()
    };
    assert_eq!(on(&first), 10);
    assert_eq!(on(&second), 5);
    assert_eq!(coordinator.provider().sites_calls(), 0);

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.stale_sites, ids[15..].to_vec());

    let usage = CacheStore::new(dir.path()).load_usage().unwrap().unwrap();
    assert_eq!(usage.keys[&first].daily_limit_consumed, 10);
    assert_eq!(usage.keys[&second].daily_limit_consumed, 5);
    log.finish_ok();
}

#[tokio::test]
async fn usage_survives_reopen_and_resets_next_day() {
    let dir = TestDir::new();
    let ids = site_ids(1);
    seed_forecasts(
        dir.path(),
        sites_for(TEST_KEY, &ids),
        BTreeMap::new(),
        utc("2024-05-31T02:00:00Z"),
    );

    let first = open(&dir, MockProvider::new(), TEST_KEY, "10", CoordinatorSettings::default()).unwrap();
    first.force_update(utc("2024-06-01T02:00:00Z")).await.unwrap();
    drop(first);

    let reopened = open(&dir, MockProvider::new(), TEST_KEY, "10", CoordinatorSettings::default()).unwrap();
    assert_eq!(reopened.snapshot().api_used, 1);

    assert!(reopened.roll_quota(utc("2024-06-02T00:10:00Z")).await.unwrap());
    assert_eq!(reopened.snapshot().api_used, 0);
    let usage = CacheStore::new(dir.path()).load_usage().unwrap().unwrap();
    assert!(usage.keys.values().all(|u| u.daily_limit_consumed == 0));
}

// =============================================================================
// Cycle exclusivity
// =============================================================================

#[tokio::test]
async fn second_cycle_is_rejected_and_cancel_keeps_cache() {
    let log = TestLogger::new("second_cycle_is_rejected_and_cancel_keeps_cache");
    let dir = TestDir::new();
    let ids = site_ids(1);
    seed_forecasts(
        dir.path(),
        sites_for(TEST_KEY, &ids),
        BTreeMap::new(),
        utc("2024-05-31T02:00:00Z"),
    );
    let provider = MockProvider::new()
        .with_forecasts(&ids[0], day_of_records("2024-06-01", 2.0))
        .gated();
    let coordinator = open(&dir, provider, TEST_KEY, "10", CoordinatorSettings::default()).unwrap();
    let now = utc("2024-06-01T02:00:00Z");

    log.phase("execute");
    let (first, ()) = tokio::join!(coordinator.force_update(now), async {
        coordinator.provider().wait_for_request().await;
        assert_eq!(coordinator.phase(), CyclePhase::Fetching);

        let second = coordinator.force_update(now).await;
        assert!(matches!(second, Err(PvcastError::CycleInProgress)));

        assert!(coordinator.cancel_in_flight());
        coordinator.provider().release();
    });

    log.phase("verify");
    let report = first.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Aborted);
    assert_eq!(coordinator.phase(), CyclePhase::Idle);
    assert!(!coordinator.cancel_in_flight());

    let records = coordinator
        .query_forecast_data(utc("2024-06-01T00:00:00Z"), utc("2024-06-02T00:00:00Z"), Some(&ids[0]), true)
        .await
        .unwrap();
    assert!(records.is_empty());

    let cached = CacheStore::new(dir.path()).load_forecasts().unwrap().loaded().unwrap();
    assert_eq!(cached.last_updated, Some(utc("2024-05-31T02:00:00Z")));
    log.finish_ok();
}

#[tokio::test]
async fn trigger_must_match_update_mode() {
    let dir = TestDir::new();
    seed_forecasts(
        dir.path(),
        sites_for(TEST_KEY, &site_ids(1)),
        BTreeMap::new(),
        utc("2024-05-31T02:00:00Z"),
    );
    let settings = CoordinatorSettings {
        auto_update: AutoUpdateMode::AllDay,
        ..CoordinatorSettings::default()
    };
    let coordinator = open(&dir, MockProvider::new(), TEST_KEY, "10", settings).unwrap();
    let now = utc("2024-06-01T02:00:00Z");

    let err = coordinator.force_update(now).await.unwrap_err();
    assert!(matches!(err, PvcastError::ForceUpdateWhileAutoUpdate));
    assert_eq!(coordinator.provider().forecast_calls(), 0);

    let report = coordinator.update(now).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);

    let again = coordinator.update(now + Duration::minutes(10)).await.unwrap();
    assert_eq!(again.outcome, CycleOutcome::SkippedRecent);
    assert_eq!(coordinator.provider().forecast_calls(), 1);
}

#[tokio::test]
async fn second_coordinator_on_same_dir_is_refused() {
    let log = TestLogger::new("second_coordinator_on_same_dir_is_refused");
    let dir = TestDir::new();
    seed_forecasts(
        dir.path(),
        sites_for(TEST_KEY, &site_ids(1)),
        BTreeMap::new(),
        utc("2024-05-31T02:00:00Z"),
    );
    let settings = CoordinatorSettings {
        auto_update: AutoUpdateMode::AllDay,
        ..CoordinatorSettings::default()
    };

    log.phase("daemon cycle");
    let daemon = open(&dir, MockProvider::new(), TEST_KEY, "10", settings.clone()).unwrap();
    let report = daemon.run_scheduled(utc("2024-06-01T03:00:00Z")).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);

    log.phase("cli while daemon runs");
    let err = open(&dir, MockProvider::new(), TEST_KEY, "10", settings.clone())
        .err()
        .expect("second open must fail");
    assert!(matches!(err, PvcastError::DataDirLocked { .. }));
    assert_eq!(err.exit_code(), ExitCode::PolicyRejected);
    assert_eq!(err.error_code(), "PVC-P004");

    log.phase("cli after daemon exits");
    drop(daemon);
    let cli = open(&dir, MockProvider::new(), TEST_KEY, "10", settings).unwrap();
    assert_eq!(cli.snapshot().api_used, 1);
    let report = cli.update(utc("2024-06-01T03:00:05Z")).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::SkippedRecent);
    assert_eq!(cli.provider().forecast_calls(), 0);

    let usage = CacheStore::new(dir.path()).load_usage().unwrap().unwrap();
    assert_eq!(usage.keys.values().map(|u| u.daily_limit_consumed).sum::<u32>(), 1);
    log.finish_ok();
}

#[tokio::test]
async fn reads_are_served_while_a_cycle_is_fetching() {
    let dir = TestDir::new();
    let ids = site_ids(1);
    let cached = BTreeMap::from([(ids[0].clone(), records_from(utc("2024-06-01T00:00:00Z"), 4, 1.0))]);
    seed_forecasts(dir.path(), sites_for(TEST_KEY, &ids), cached, utc("2024-05-31T02:00:00Z"));
    let provider = MockProvider::new()
        .with_forecasts(&ids[0], day_of_records("2024-06-01", 2.0))
        .gated();
    let coordinator = open(&dir, provider, TEST_KEY, "10", CoordinatorSettings::default()).unwrap();
    let limit = std::time::Duration::from_secs(5);

    let (report, ()) = tokio::join!(coordinator.force_update(utc("2024-06-01T02:00:00Z")), async {
        coordinator.provider().wait_for_request().await;
        assert_eq!(coordinator.phase(), CyclePhase::Fetching);

        let rows = tokio::time::timeout(
            limit,
            coordinator.query_forecast_data(
                utc("2024-06-01T00:00:00Z"),
                utc("2024-06-01T02:00:00Z"),
                Some(&ids[0]),
                true,
            ),
        )
        .await
        .expect("query waited on the fetch")
        .unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| (r.pv_estimate - 1.0).abs() < 1e-9));

        let profile = tokio::time::timeout(limit, coordinator.get_dampening(None))
            .await
            .expect("dampening read waited on the fetch")
            .unwrap();
        assert_eq!(profile.factors().len(), 24);

        let sites = tokio::time::timeout(limit, coordinator.sites())
            .await
            .expect("site list waited on the fetch");
        assert_eq!(sites.len(), 1);

        coordinator.provider().release();
    });

    let report = report.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.fetched, ids);
}

// =============================================================================
// Partial completion
// =============================================================================

#[tokio::test]
async fn failed_site_keeps_cached_records_while_others_refresh() {
    let log = TestLogger::new("failed_site_keeps_cached_records_while_others_refresh");
    log.phase("setup");
    let dir = TestDir::new();
    let ids = site_ids(2);
    let (failing, healthy) = (ids[0].clone(), ids[1].clone());
    let cached = BTreeMap::from([
        (failing.clone(), day_of_records("2024-06-01", 1.0)),
        (healthy.clone(), day_of_records("2024-06-01", 1.0)),
    ]);
    seed_forecasts(dir.path(), sites_for(TEST_KEY, &ids), cached, utc("2024-05-31T02:00:00Z"));
    let provider = MockProvider::new()
        .with_forecast_failure(&failing, MockFailure::Busy)
        .with_forecasts(&healthy, day_of_records("2024-06-01", 3.0));
    let coordinator = open(&dir, provider, TEST_KEY, "10", CoordinatorSettings::default()).unwrap();
    let now = utc("2024-06-01T02:00:00Z");

    log.phase("execute");
    let report = coordinator.force_update(now).await.unwrap();

    log.phase("verify report");
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.fetched, vec![healthy.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].site, failing);
    assert_eq!(
        report.failed[0].code,
        PvcastError::ProviderBusy { key: String::new() }.error_code()
    );
    assert_eq!(coordinator.snapshot().stale_sites, vec![failing.clone()]);

    log.phase("verify persisted");
    drop(coordinator);
    let reopened = open(&dir, MockProvider::new(), TEST_KEY, "10", CoordinatorSettings::default()).unwrap();
    let (start, end) = (utc("2024-06-01T00:00:00Z"), utc("2024-06-02T00:00:00Z"));
    let kept = reopened
        .query_forecast_data(start, end, Some(&failing), true)
        .await
        .unwrap();
    assert_eq!(kept.len(), 48);
    assert!(kept.iter().all(|r| (r.pv_estimate - 1.0).abs() < 1e-9));

    let fresh = reopened
        .query_forecast_data(start, end, Some(&healthy), true)
        .await
        .unwrap();
    assert_eq!(fresh.len(), 48);
    assert!(fresh.iter().all(|r| (r.pv_estimate - 3.0).abs() < 1e-9));

    let cached = CacheStore::new(dir.path()).load_forecasts().unwrap().loaded().unwrap();
    assert_eq!(cached.last_updated, Some(now));
    log.finish_ok();
}

#[tokio::test]
async fn cycle_without_any_site_is_an_operational_error() {
    let dir = TestDir::new();
    seed_forecasts(dir.path(), Vec::new(), BTreeMap::new(), utc("2024-05-31T02:00:00Z"));
    let coordinator = open(&dir, MockProvider::new(), TEST_KEY, "10", CoordinatorSettings::default()).unwrap();

    let err = coordinator
        .force_update(utc("2024-06-01T02:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, PvcastError::NoSitesAvailable));
    assert_eq!(err.exit_code(), ExitCode::Operational);
    assert_eq!(coordinator.provider().sites_calls(), 1);
    assert_eq!(coordinator.provider().forecast_calls(), 0);
    assert_eq!(coordinator.phase(), CyclePhase::Idle);
}

// =============================================================================
// Persistence and integrity
// =============================================================================

#[tokio::test]
async fn fetched_records_persist_across_reopen() {
    let dir = TestDir::new();
    let ids = site_ids(1);
    seed_forecasts(
        dir.path(),
        sites_for(TEST_KEY, &ids),
        BTreeMap::new(),
        utc("2024-05-31T02:00:00Z"),
    );
    let provider = MockProvider::new().with_forecasts(&ids[0], day_of_records("2024-06-01", 2.0));
    let coordinator = open(&dir, provider, TEST_KEY, "10", CoordinatorSettings::default()).unwrap();
    coordinator.force_update(utc("2024-06-01T02:00:00Z")).await.unwrap();
    drop(coordinator);

    let reopened = open(&dir, MockProvider::new(), TEST_KEY, "10", CoordinatorSettings::default()).unwrap();
    let records = reopened
        .query_forecast_data(utc("2024-06-01T00:00:00Z"), utc("2024-06-02T00:00:00Z"), None, true)
        .await
        .unwrap();
    assert_eq!(records.len(), 48);
    assert!(records.iter().all(|r| (r.pv_estimate - 2.0).abs() < 1e-9));
}

#[tokio::test]
async fn corrupt_usage_refuses_to_open() {
    let dir = TestDir::new();
    dir.create_file("usage.json", "{ not json");

    let err = open(&dir, MockProvider::new(), TEST_KEY, "10", CoordinatorSettings::default())
        .err()
        .expect("open must fail");
    assert!(matches!(err, PvcastError::UsageDataCorrupt { .. }));
    assert!(err.category().is_fatal());
    assert_eq!(dir.read_file("usage.json").unwrap(), "{ not json");
}

#[tokio::test]
async fn foreign_cache_version_refuses_to_open() {
    let dir = TestDir::new();
    dir.create_file("forecasts.json", r#"{"version": 99, "sites": []}"#);

    let err = open(&dir, MockProvider::new(), TEST_KEY, "10", CoordinatorSettings::default())
        .err()
        .expect("open must fail");
    assert!(matches!(
        err,
        PvcastError::IncompatibleCacheSchema { found: 99, expected: 1, .. }
    ));
}

#[tokio::test]
async fn invalid_cache_without_sites_is_fatal() {
    let dir = TestDir::new();
    dir.create_file("forecasts.json", "garbage");
    let provider = MockProvider::new().with_sites_failure(&ApiKey::new(TEST_KEY), MockFailure::Auth);
    let coordinator = open(&dir, provider, TEST_KEY, "10", CoordinatorSettings::default()).unwrap();

    let err = coordinator
        .startup(utc("2024-06-01T02:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, PvcastError::SitesUnavailableCacheInvalid { .. }));
    assert_eq!(coordinator.provider().forecast_calls(), 0);
    assert_eq!(coordinator.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn clear_cache_keeps_usage_and_dampening() {
    let dir = TestDir::new();
    let ids = site_ids(1);
    let key = ApiKey::new(TEST_KEY);
    let provider = MockProvider::new()
        .with_sites(&key, sites_for(TEST_KEY, &ids))
        .with_forecasts(&ids[0], day_of_records("2024-06-01", 1.0));
    let coordinator = open(&dir, provider, TEST_KEY, "10", CoordinatorSettings::default()).unwrap();
    let now = utc("2024-06-01T02:00:00Z");

    let report = coordinator.startup(now).await.unwrap().expect("resync ran");
    assert_eq!(report.fetched, ids);
    coordinator
        .set_dampening(None, &["0.5"; 24].join(","))
        .await
        .unwrap();

    let report = coordinator.clear_cache(now + Duration::hours(1)).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(coordinator.provider().sites_calls(), 2);
    assert_eq!(report.api_used, 4);

    let profile = coordinator.get_dampening(None).await.unwrap();
    assert!(profile.factors().iter().all(|f| (f - 0.5).abs() < 1e-9));
}

// =============================================================================
// Dampening
// =============================================================================

#[tokio::test]
async fn site_override_beats_global_profile() {
    let dir = TestDir::new();
    let ids = site_ids(1);
    let site = ids[0].clone();
    let records = BTreeMap::from([(site.clone(), records_from(utc("2024-06-01T14:00:00Z"), 1, 4.0))]);
    seed_forecasts(dir.path(), sites_for(TEST_KEY, &ids), records, utc("2024-06-01T13:00:00Z"));

    let settings = CoordinatorSettings {
        granular: true,
        ..CoordinatorSettings::default()
    };
    let coordinator = open(&dir, MockProvider::new(), TEST_KEY, "10", settings).unwrap();
    let (start, end) = (utc("2024-06-01T14:00:00Z"), utc("2024-06-01T14:30:00Z"));

    coordinator
        .set_dampening(None, &["0.5"; 24].join(","))
        .await
        .unwrap();
    let dampened = coordinator
        .query_forecast_data(start, end, Some(&site), false)
        .await
        .unwrap();
    assert!((dampened[0].pv_estimate - 2.0).abs() < 1e-9);

    coordinator
        .set_dampening(Some(&site), &["0.25"; 48].join(","))
        .await
        .unwrap();
    let dampened = coordinator
        .query_forecast_data(start, end, Some(&site), false)
        .await
        .unwrap();
    assert!((dampened[0].pv_estimate - 1.0).abs() < 1e-9);

    let raw = coordinator
        .query_forecast_data(start, end, Some(&site), true)
        .await
        .unwrap();
    assert!((raw[0].pv_estimate - 4.0).abs() < 1e-9);

    let err = coordinator
        .set_dampening(None, &["0.5"; 48].join(","))
        .await
        .unwrap_err();
    assert!(matches!(err, PvcastError::GranularityConflict(_)));
}

#[tokio::test]
async fn query_unknown_site_is_rejected() {
    let dir = TestDir::new();
    seed_forecasts(
        dir.path(),
        sites_for(TEST_KEY, &site_ids(1)),
        BTreeMap::new(),
        utc("2024-06-01T00:00:00Z"),
    );
    let coordinator = open(&dir, MockProvider::new(), TEST_KEY, "10", CoordinatorSettings::default()).unwrap();

    let err = coordinator
        .query_forecast_data(
            utc("2024-06-01T00:00:00Z"),
            utc("2024-06-02T00:00:00Z"),
            Some("ffff-ffff-ffff-ffff"),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PvcastError::UnknownSite(_)));
}
