//! Command implementations.
//!
//! Every command resolves configuration, opens the coordinator over the
//! on-disk caches, and prints either the human view or the JSON envelope.
//! Only the fetch commands and `run` contact the provider.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::args::{
    Cli, Commands, DampeningCommand, HardLimitCommand, OutputFormat, QueryArgs, SitesCommand,
};
use crate::cli::run;
use crate::core::coordinator::{Coordinator, CycleReport};
use crate::core::dampening::DampeningTarget;
use crate::core::hard_limit::HardLimitClamp;
use crate::core::models::{ForecastRecord, Site};
use crate::core::sites::OrientationAdvisory;
use crate::error::{PvcastError, Result};
use crate::providers::SolcastClient;
use crate::render::{self, RenderOptions, human};
use crate::storage::cache::CacheStore;
use crate::storage::config::ResolvedConfig;
use crate::util::env::should_use_color;

/// A resolved configuration plus the coordinator built from it.
pub struct Session {
    pub config: ResolvedConfig,
    pub coordinator: Coordinator<SolcastClient>,
    pub options: RenderOptions,
}

impl Session {
    /// Resolve configuration and load cached state. No network access.
    ///
    /// # Errors
    ///
    /// Configuration errors, or integrity errors from the caches.
    pub fn open(cli: &Cli) -> Result<Self> {
        let config = ResolvedConfig::resolve(cli)?;
        let client = SolcastClient::new(&config.base_url, config.settings.timeout)?;
        let coordinator = Coordinator::open(
            client,
            config.keys.clone(),
            config.hard_limits.clone(),
            config.settings.clone(),
            CacheStore::from_paths(&config.paths),
            Utc::now(),
        )?;
        tracing::debug!(
            config = %config.config_path.display(),
            data = %config.paths.data.display(),
            keys = config.keys.len(),
            "Coordinator opened"
        );
        Ok(Self {
            config,
            coordinator,
            options: render_options(cli),
        })
    }

    fn print<T: Serialize>(
        &self,
        command: &str,
        data: &T,
        errors: Vec<String>,
        human: impl FnOnce(bool) -> String,
    ) -> Result<()> {
        let output = render::render(command, data, errors, self.options, human)?;
        println!("{output}");
        Ok(())
    }
}

/// Output options from global flags and the terminal.
#[must_use]
pub fn render_options(cli: &Cli) -> RenderOptions {
    RenderOptions {
        format: cli.effective_format(),
        pretty: cli.pretty,
        no_color: cli.no_color || !should_use_color(cli.no_color),
    }
}

/// Run the parsed command.
///
/// # Errors
///
/// Returns the command's error; `main` renders it and maps the exit code.
pub async fn execute(cli: &Cli) -> Result<()> {
    let mut session = Session::open(cli)?;
    match &cli.command {
        Commands::Run => run::execute(&session).await,
        Commands::Update => {
            let report = session.coordinator.update(Utc::now()).await?;
            print_cycle(&session, "update", &report)
        }
        Commands::ForceUpdate => {
            let report = session.coordinator.force_update(Utc::now()).await?;
            print_cycle(&session, "force-update", &report)
        }
        Commands::ClearCache => {
            let report = session.coordinator.clear_cache(Utc::now()).await?;
            print_cycle(&session, "clear-cache", &report)
        }
        Commands::Dampening(cmd) => dampening(&mut session, cmd).await,
        Commands::HardLimit(cmd) => hard_limit(&mut session, cmd).await,
        Commands::Query(args) => query(&session, args).await,
        Commands::Status => status(&session).await,
        Commands::Sites(cmd) => sites(&session, cmd).await,
    }
}

// =============================================================================
// Fetch cycles
// =============================================================================

/// Print a cycle report; per-site failures go into the envelope's `errors`.
pub(crate) fn print_cycle(session: &Session, command: &str, report: &CycleReport) -> Result<()> {
    session.print(command, report, cycle_errors(report), |no_color| {
        human::render_cycle(report, no_color)
    })
}

/// Envelope error lines: failed fetches, then sites skipped for quota.
fn cycle_errors(report: &CycleReport) -> Vec<String> {
    let skipped = report.skipped.iter().map(|site| {
        let err = PvcastError::QuotaExhausted { site: site.clone() };
        format!("{site} [{}]: {err}", err.error_code())
    });
    report
        .failed
        .iter()
        .map(|f| format!("{} [{}]: {}", f.site, f.code, f.message))
        .chain(skipped)
        .collect()
}

// =============================================================================
// Dampening
// =============================================================================

#[derive(Debug, Serialize)]
struct DampeningData {
    target: String,
    granular: bool,
    interval_minutes: u32,
    factors: Vec<f64>,
}

async fn dampening(session: &mut Session, cmd: &DampeningCommand) -> Result<()> {
    let coordinator = &session.coordinator;
    let site = match cmd {
        DampeningCommand::Get { site } => site.as_deref(),
        DampeningCommand::Set { factors, site } => {
            coordinator.set_dampening(site.as_deref(), factors).await?;
            site.as_deref()
        }
        DampeningCommand::Granular { state } => {
            let enabled = state.enabled();
            if coordinator.set_granular(enabled).await? {
                session.config.persist_granular(enabled)?;
            }
            None
        }
    };

    let target = DampeningTarget::from_arg(site);
    let profile = session.coordinator.get_dampening(site).await?;
    let data = DampeningData {
        target: target.as_key().to_string(),
        granular: session.config.settings.granular,
        interval_minutes: profile.granularity_minutes(),
        factors: profile.factors().to_vec(),
    };
    session.print("dampening", &data, Vec::new(), |no_color| {
        human::render_dampening(target.as_key(), &profile, no_color)
    })
}

// =============================================================================
// Hard limit
// =============================================================================

#[derive(Debug, Serialize)]
struct HardLimitData {
    limits: Vec<Option<f64>>,
    total_w: Option<f64>,
}

impl HardLimitData {
    fn from_clamp(clamp: &HardLimitClamp) -> Self {
        Self {
            limits: clamp.limits().to_vec(),
            total_w: clamp.total(),
        }
    }
}

async fn hard_limit(session: &mut Session, cmd: &HardLimitCommand) -> Result<()> {
    let clamp = match cmd {
        HardLimitCommand::Set { watts } => session.coordinator.set_hard_limit(watts).await?,
        HardLimitCommand::Remove => session.coordinator.remove_hard_limit().await,
    };
    session.config.persist_hard_limits(&clamp)?;
    session.print("hard-limit", &HardLimitData::from_clamp(&clamp), Vec::new(), |no_color| {
        human::render_hard_limit(&clamp, no_color)
    })
}

// =============================================================================
// Query
// =============================================================================

fn parse_instant(flag: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PvcastError::ConfigInvalid {
            key: flag.to_string(),
            message: format!("'{value}' is not an RFC 3339 timestamp: {e}"),
        })
}

async fn query(session: &Session, args: &QueryArgs) -> Result<()> {
    let start = parse_instant("--start", &args.start)?;
    let end = parse_instant("--end", &args.end)?;
    if end <= start {
        return Err(PvcastError::ConfigInvalid {
            key: "--end".to_string(),
            message: "must be after --start".to_string(),
        });
    }

    let records: Vec<ForecastRecord> = session
        .coordinator
        .query_forecast_data(start, end, args.site.as_deref(), args.undampened)
        .await?;
    let tz = session.config.settings.tz;
    session.print("query", &records, Vec::new(), |no_color| {
        human::render_records(&records, tz, no_color)
    })
}

// =============================================================================
// Status and sites
// =============================================================================

async fn status(session: &Session) -> Result<()> {
    let snapshot = session.coordinator.refresh(Utc::now()).await;
    let tz = session.config.settings.tz;
    session.print("status", snapshot.as_ref(), Vec::new(), |no_color| {
        human::render_status(&snapshot, tz, no_color)
    })
}

#[derive(Debug, Serialize)]
struct SitesData {
    sites: Vec<Site>,
    advisories: Vec<OrientationAdvisory>,
}

async fn sites(session: &Session, cmd: &SitesCommand) -> Result<()> {
    if let SitesCommand::Acknowledge { site } = cmd {
        let azimuth = session.coordinator.acknowledge_orientation(site).await?;
        if session.options.format == OutputFormat::Human {
            println!("Acknowledged azimuth {azimuth:.0} for {site}");
        }
    }

    let data = SitesData {
        sites: session.coordinator.sites().await,
        advisories: session.coordinator.advisories().await,
    };
    session.print("sites", &data, Vec::new(), |no_color| {
        human::render_sites(&data.sites, &data.advisories, no_color)
    })
}
