//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Solar forecast coordinator: fetch, cache and post-process PV forecasts.
#[derive(Parser, Debug)]
#[command(name = "pvcast")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    // === Global flags ===
    /// Config file path (overrides PVCAST_CONFIG)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Directory for cached documents (overrides PVCAST_DATA_DIR)
    #[arg(long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,

    /// Automatic update mode: 0 off, 1 daylight, 2 all day
    #[arg(long, value_name = "MODE", global = true, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub auto_update: Option<u8>,

    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log level
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSON logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub const fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator until interrupted, polling on schedule
    Run,

    /// Fetch new forecasts (automatic update mode only)
    Update,

    /// Fetch new forecasts now (manual update mode only)
    ForceUpdate,

    /// Delete cached forecasts and resync from the provider
    ClearCache,

    /// Show or change dampening factors
    #[command(subcommand)]
    Dampening(DampeningCommand),

    /// Set or remove the inverter hard limit
    #[command(subcommand)]
    HardLimit(HardLimitCommand),

    /// Print forecast records for a time range
    Query(QueryArgs),

    /// Show derived values and API usage
    Status,

    /// List sites or acknowledge orientation advisories
    #[command(subcommand)]
    Sites(SitesCommand),
}

/// `dampening` subcommands.
#[derive(Subcommand, Debug)]
pub enum DampeningCommand {
    /// Show the active profile
    Get {
        /// Site id, or "all" for the shared profile
        #[arg(long)]
        site: Option<String>,
    },
    /// Set 24 hourly or 48 half-hourly factors between 0.0 and 1.0
    Set {
        /// Comma-separated factors
        factors: String,
        /// Site id, or "all" for the shared profile
        #[arg(long)]
        site: Option<String>,
    },
    /// Turn per-site half-hourly dampening on or off
    Granular {
        #[arg(value_enum)]
        state: Toggle,
    },
}

/// `hard-limit` subcommands.
#[derive(Subcommand, Debug)]
pub enum HardLimitCommand {
    /// Set limits in watts, one value or one per API key
    Set { watts: String },
    /// Remove every hard limit
    Remove,
}

/// `sites` subcommands.
#[derive(Subcommand, Debug)]
pub enum SitesCommand {
    /// List registered sites
    List,
    /// Accept a site's current azimuth and silence its advisory
    Acknowledge { site: String },
}

/// Arguments for the `query` command.
#[derive(Parser, Debug)]
pub struct QueryArgs {
    /// Range start (RFC 3339)
    #[arg(long)]
    pub start: String,

    /// Range end (RFC 3339), exclusive
    #[arg(long)]
    pub end: String,

    /// Restrict to one site
    #[arg(long)]
    pub site: Option<String>,

    /// Return raw values instead of dampened ones
    #[arg(long)]
    pub undampened: bool,
}

/// On/off switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    #[must_use]
    pub const fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Human,
    /// JSON envelope
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_dampening_set() {
        let cli = Cli::parse_from(["pvcast", "dampening", "set", "0.5,0.5", "--site", "all"]);
        match cli.command {
            Commands::Dampening(DampeningCommand::Set { factors, site }) => {
                assert_eq!(factors, "0.5,0.5");
                assert_eq!(site.as_deref(), Some("all"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn json_flag_overrides_format() {
        let cli = Cli::parse_from(["pvcast", "status", "--json"]);
        assert_eq!(cli.effective_format(), OutputFormat::Json);
    }

    #[test]
    fn auto_update_is_range_checked() {
        assert!(Cli::try_parse_from(["pvcast", "--auto-update", "3", "status"]).is_err());
        let cli = Cli::parse_from(["pvcast", "--auto-update", "2", "status"]);
        assert_eq!(cli.auto_update, Some(2));
    }

    #[test]
    fn granular_toggle() {
        let cli = Cli::parse_from(["pvcast", "dampening", "granular", "on"]);
        assert!(matches!(
            cli.command,
            Commands::Dampening(DampeningCommand::Granular { state: Toggle::On })
        ));
    }
}
