//! Core domain: sites, quota, dampening, scheduling, and the cycle coordinator.

pub mod aggregates;
pub mod coordinator;
pub mod dampening;
pub mod fetch_plan;
pub mod hard_limit;
pub mod http;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod quota;
pub mod scheduler;
pub mod sites;
pub mod sun;

pub use aggregates::{DayTotal, DerivedSnapshot, Peak, SnapshotMeta};
pub use coordinator::{
    Coordinator, CoordinatorSettings, CycleOutcome, CyclePhase, CycleReport, SiteFailure,
};
pub use dampening::{DampeningEngine, DampeningProfile, DampeningTarget};
pub use fetch_plan::{FetchKind, FetchPlan, PlannedFetch, SiteFetchOutcome, SitesFetchOutcome};
pub use hard_limit::HardLimitClamp;
pub use models::{ApiKey, EstimateField, ForecastRecord, Hemisphere, Site};
pub use provider::ForecastProvider;
pub use quota::{KeyTable, KeyUsage, QuotaTracker};
pub use scheduler::{AutoUpdateMode, SchedulePolicy, Trigger, TriggerMode};
pub use sites::{OrientationAdvisory, SiteRegistry};
