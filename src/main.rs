//! pvcast - rooftop solar forecast coordinator
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use clap::Parser;
use std::process::ExitCode;

use pvcast::cli::{self, Cli};
use pvcast::core::logging::{self, LogSettings};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_settings = LogSettings::resolve(cli.log_level.as_deref(), cli.json_output, cli.verbose);
    logging::init(&log_settings);

    let options = cli::commands::render_options(&cli);

    match cli::execute(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.error_code(), "{}", e);
            let error_output = pvcast::render::error::render_error(
                &e,
                options.format,
                options.no_color,
                options.pretty,
            );
            eprintln!("{error_output}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
