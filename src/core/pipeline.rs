//! Provider fetch pipeline executor.
//!
//! Runs a [`FetchPlan`]: one group per API key, groups concurrently, sites
//! within a group sequentially. Every request is bounded by a timeout and
//! attempted once.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use tokio::time::{Duration, timeout};

use super::fetch_plan::{
    FetchAttempt, FetchKind, FetchPlan, FetchResult, FetchedSeries, PlannedFetch,
    SiteFetchOutcome, SitesFetchOutcome,
};
use super::models::ApiKey;
use super::provider::{ACTUALS_HOURS, ForecastProvider};
use super::quota::KeyTable;
use crate::error::{PvcastError, Result};

/// Parameters shared by every request in a cycle.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest {
    pub forecast_hours: u32,
    pub actuals_hours: u32,
    pub timeout: Duration,
}

impl FetchRequest {
    #[must_use]
    pub const fn new(forecast_hours: u32, timeout: Duration) -> Self {
        Self {
            forecast_hours,
            actuals_hours: ACTUALS_HOURS,
            timeout,
        }
    }
}

/// Run `fut` under `limit` and record the attempt.
async fn attempt<T, F>(
    fut: F,
    kind: FetchKind,
    site: Option<&str>,
    limit: Duration,
    attempts: &mut Vec<FetchAttempt>,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started_at = Utc::now();
    let start = Instant::now();

    let result = match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PvcastError::Timeout {
            target: site.unwrap_or(kind.label()).to_string(),
            seconds: limit.as_secs(),
        }),
    };
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    attempts.push(FetchAttempt {
        site: site.map(ToString::to_string),
        kind,
        started_at,
        duration_ms,
        success: result.is_ok(),
        error: result.as_ref().err().map(ToString::to_string),
    });
    result
}

/// Fetch one site: forecasts, then estimated actuals when requested.
///
/// A failed actuals request does not fail the site.
async fn fetch_site<P: ForecastProvider>(
    provider: &P,
    key: &ApiKey,
    planned: &PlannedFetch,
    request: &FetchRequest,
) -> SiteFetchOutcome {
    let site = planned.site.as_str();
    let mut attempts = Vec::new();

    let forecasts = attempt(
        provider.forecasts(key, site, request.forecast_hours),
        FetchKind::Forecasts,
        Some(site),
        request.timeout,
        &mut attempts,
    )
    .await;

    let result = match forecasts {
        Ok(forecasts) => {
            let actuals = if planned.with_actuals {
                attempt(
                    provider.estimated_actuals(key, site, request.actuals_hours),
                    FetchKind::EstimatedActuals,
                    Some(site),
                    request.timeout,
                    &mut attempts,
                )
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(site, error = %e, "Estimated actuals fetch failed");
                    Vec::new()
                })
            } else {
                Vec::new()
            };
            tracing::info!(
                site,
                key = %key,
                records = forecasts.len(),
                actuals = actuals.len(),
                "Site fetch succeeded"
            );
            FetchResult::Fetched(FetchedSeries { forecasts, actuals })
        }
        Err(e) => {
            tracing::warn!(site, key = %key, error = %e, "Site fetch failed");
            FetchResult::Failed(e)
        }
    };

    SiteFetchOutcome {
        site: planned.site.clone(),
        key_index: planned.key_index,
        result,
        attempts,
    }
}

/// Fetch a key's sites in order. Stops starting new fetches once `cancel` is set.
async fn fetch_group<P: ForecastProvider>(
    provider: &P,
    key: &ApiKey,
    group: &[PlannedFetch],
    request: &FetchRequest,
    cancel: &AtomicBool,
) -> Vec<SiteFetchOutcome> {
    let mut outcomes = Vec::with_capacity(group.len());
    for planned in group {
        if cancel.load(Ordering::SeqCst) {
            tracing::debug!(site = %planned.site, "Cancelled before fetch started");
            outcomes.push(SiteFetchOutcome {
                site: planned.site.clone(),
                key_index: planned.key_index,
                result: FetchResult::NotStarted,
                attempts: Vec::new(),
            });
            continue;
        }
        outcomes.push(fetch_site(provider, key, planned, request).await);
    }
    outcomes
}

/// Execute every group in `plan` concurrently.
pub async fn fetch_plan<P: ForecastProvider>(
    provider: &P,
    table: &KeyTable,
    plan: &FetchPlan,
    request: &FetchRequest,
    cancel: &AtomicBool,
) -> Vec<SiteFetchOutcome> {
    let futures: Vec<_> = plan
        .groups()
        .filter_map(|(index, group)| {
            table
                .get(index)
                .map(|entry| fetch_group(provider, &entry.key, group, request, cancel))
        })
        .collect();

    futures::future::join_all(futures)
        .await
        .into_iter()
        .flatten()
        .collect()
}

/// Fetch site metadata for every configured key concurrently.
pub async fn fetch_sites<P: ForecastProvider>(
    provider: &P,
    table: &KeyTable,
    limit: Duration,
) -> Vec<SitesFetchOutcome> {
    let futures: Vec<_> = table
        .iter()
        .enumerate()
        .map(|(index, entry)| async move {
            let mut attempts = Vec::with_capacity(1);
            let result = attempt(
                provider.rooftop_sites(&entry.key),
                FetchKind::Sites,
                None,
                limit,
                &mut attempts,
            )
            .await;
            if let Err(e) = &result {
                tracing::warn!(key = %entry.key, error = %e, "Site metadata fetch failed");
            }
            SitesFetchOutcome {
                key_index: index,
                result,
                attempt: attempts.remove(0),
            }
        })
        .collect();

    futures::future::join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetch_plan::PlannedFetch;
    use crate::test_utils::{MockFailure, MockProvider, day_of_records, make_test_site};

    fn table() -> KeyTable {
        KeyTable::build("key-one-111111,key-two-222222", "10").unwrap()
    }

    fn planned(site: &str, key_index: usize, with_actuals: bool) -> PlannedFetch {
        PlannedFetch {
            site: site.to_string(),
            key_index,
            with_actuals,
        }
    }

    #[tokio::test]
    async fn fetches_every_group() {
        let provider = MockProvider::new()
            .with_forecasts("1111-1111-1111-1111", day_of_records("2024-06-01", 1.0))
            .with_forecasts("2222-2222-2222-2222", day_of_records("2024-06-01", 2.0));
        let mut plan = FetchPlan::new();
        plan.push(planned("1111-1111-1111-1111", 0, false));
        plan.push(planned("2222-2222-2222-2222", 1, false));

        let cancel = AtomicBool::new(false);
        let request = FetchRequest::new(48, Duration::from_secs(5));
        let outcomes = fetch_plan(&provider, &table(), &plan, &request, &cancel).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(SiteFetchOutcome::is_success));
        assert_eq!(provider.forecast_calls(), 2);
        assert_eq!(provider.actuals_calls(), 0);
    }

    #[tokio::test]
    async fn failure_is_scoped_to_site() {
        let provider = MockProvider::new()
            .with_forecast_failure("1111-1111-1111-1111", MockFailure::NotFound)
            .with_forecasts("2222-2222-2222-2222", day_of_records("2024-06-01", 2.0));
        let mut plan = FetchPlan::new();
        plan.push(planned("1111-1111-1111-1111", 0, false));
        plan.push(planned("2222-2222-2222-2222", 0, false));

        let cancel = AtomicBool::new(false);
        let request = FetchRequest::new(48, Duration::from_secs(5));
        let outcomes = fetch_plan(&provider, &table(), &plan, &request, &cancel).await;

        assert!(matches!(
            outcomes[0].error(),
            Some(PvcastError::SiteNotFound { .. })
        ));
        assert!(outcomes[1].is_success());
    }

    #[tokio::test]
    async fn stuck_request_times_out() {
        let provider =
            MockProvider::new().with_forecast_failure("1111-1111-1111-1111", MockFailure::Hang);
        let mut plan = FetchPlan::new();
        plan.push(planned("1111-1111-1111-1111", 0, false));

        let cancel = AtomicBool::new(false);
        let request = FetchRequest::new(48, Duration::from_millis(50));
        let outcomes = fetch_plan(&provider, &table(), &plan, &request, &cancel).await;

        assert!(matches!(outcomes[0].error(), Some(PvcastError::Timeout { .. })));
        assert_eq!(outcomes[0].attempts.len(), 1);
        assert!(!outcomes[0].attempts[0].success);
    }

    #[tokio::test]
    async fn actuals_failure_keeps_forecasts() {
        let provider = MockProvider::new()
            .with_forecasts("1111-1111-1111-1111", day_of_records("2024-06-01", 1.0))
            .with_actuals_failure("1111-1111-1111-1111", MockFailure::Busy);
        let mut plan = FetchPlan::new();
        plan.push(planned("1111-1111-1111-1111", 0, true));

        let cancel = AtomicBool::new(false);
        let request = FetchRequest::new(48, Duration::from_secs(5));
        let outcomes = fetch_plan(&provider, &table(), &plan, &request, &cancel).await;

        match &outcomes[0].result {
            FetchResult::Fetched(series) => {
                assert_eq!(series.forecasts.len(), 48);
                assert!(series.actuals.is_empty());
            }
            other => panic!("expected fetched, got {other:?}"),
        }
        assert_eq!(outcomes[0].attempts.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_plan_starts_nothing() {
        let provider = MockProvider::new();
        let mut plan = FetchPlan::new();
        plan.push(planned("1111-1111-1111-1111", 0, false));

        let cancel = AtomicBool::new(true);
        let request = FetchRequest::new(48, Duration::from_secs(5));
        let outcomes = fetch_plan(&provider, &table(), &plan, &request, &cancel).await;

        assert!(matches!(outcomes[0].result, FetchResult::NotStarted));
        assert_eq!(provider.forecast_calls(), 0);
    }

    #[tokio::test]
    async fn sites_fetched_per_key() {
        let table = table();
        let first = table.get(0).unwrap().key.clone();
        let second = table.get(1).unwrap().key.clone();
        let provider = MockProvider::new()
            .with_sites(&first, vec![make_test_site("1111-1111-1111-1111")])
            .with_sites_failure(&second, MockFailure::Auth);

        let outcomes = fetch_sites(&provider, &table, Duration::from_secs(5)).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].result.as_ref().unwrap().len(), 1);
        assert!(matches!(
            outcomes[1].result,
            Err(PvcastError::AuthFailed { .. })
        ));
        assert_eq!(outcomes[1].attempt.kind, FetchKind::Sites);
    }
}
