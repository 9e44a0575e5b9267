//! The `run` command: keep forecasts current until interrupted.
//!
//! The loop sleeps until the earliest of the next scheduled poll, the next
//! quota reset, or a refresh tick for the time-dependent values. Ctrl+C
//! during a fetch cancels the cycle before it persists anything.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Duration, Utc};

use crate::cli::commands::{Session, print_cycle};
use crate::core::coordinator::CycleOutcome;
use crate::error::Result;

/// Derived values such as "power now" are recomputed at least this often.
pub const REFRESH_INTERVAL: Duration = Duration::minutes(5);

type Shutdown<'a> = Pin<&'a mut dyn Future<Output = std::io::Result<()>>>;

/// Earliest of the next poll, the next quota reset, and the refresh tick.
#[must_use]
pub fn next_deadline(
    now: DateTime<Utc>,
    next_wake: Option<DateTime<Utc>>,
    next_reset: DateTime<Utc>,
) -> DateTime<Utc> {
    let tick = now + REFRESH_INTERVAL;
    next_wake.map_or(tick, |w| w.min(tick)).min(next_reset)
}

/// Run until Ctrl+C.
///
/// # Errors
///
/// Returns integrity errors, which stop the coordinator. Other cycle
/// errors are logged and the loop carries on.
pub async fn execute(session: &Session) -> Result<()> {
    let coordinator = &session.coordinator;
    let mut shutdown = Box::pin(tokio::signal::ctrl_c());

    if let Some(report) = coordinator.startup(Utc::now()).await? {
        print_cycle(session, "run", &report)?;
    }
    tracing::info!(
        mode = coordinator.settings().auto_update.as_u8(),
        next_wake = ?coordinator.next_wake(),
        "Coordinator running"
    );

    loop {
        let now = Utc::now();
        let next_wake = coordinator.next_wake();
        let deadline = next_deadline(now, next_wake, coordinator.next_reset(now).await);
        let sleep = tokio::time::sleep((deadline - now).to_std().unwrap_or_default());

        tokio::select! {
            () = sleep => {
                let now = Utc::now();
                if coordinator.roll_quota(now).await? {
                    tracing::info!("API usage counters reset for the new day");
                }
                if next_wake.is_some_and(|w| w <= now) {
                    if !scheduled_cycle(session, shutdown.as_mut()).await? {
                        break;
                    }
                } else {
                    coordinator.refresh(now).await;
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

/// Run one scheduled cycle. Returns false when shutdown arrived meanwhile.
async fn scheduled_cycle(session: &Session, shutdown: Shutdown<'_>) -> Result<bool> {
    let coordinator = &session.coordinator;
    let cycle = coordinator.run_scheduled(Utc::now());
    tokio::pin!(cycle);

    let (result, keep_running) = tokio::select! {
        result = &mut cycle => (result, true),
        _ = shutdown => {
            tracing::info!(phase = coordinator.phase().label(), "Shutdown requested during fetch");
            coordinator.cancel_in_flight();
            (cycle.await, false)
        }
    };

    match result {
        Ok(report) => {
            if report.outcome != CycleOutcome::SkippedRecent {
                print_cycle(session, "run", &report)?;
            }
            Ok(keep_running)
        }
        Err(e) if e.category().is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, code = e.error_code(), "Scheduled update failed");
            Ok(keep_running)
        }
    }
}
