//! Output rendering for human and robot modes.

pub mod error;
pub mod human;
pub mod robot;

use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::Result;
pub use robot::{RobotOutput, SCHEMA_VERSION};

/// Options shared by every renderer.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub format: OutputFormat,
    pub pretty: bool,
    pub no_color: bool,
}

/// Render `data` as JSON in the robot envelope, or with `human` otherwise.
pub fn render<T: Serialize>(
    command: &str,
    data: &T,
    errors: Vec<String>,
    options: RenderOptions,
    human: impl FnOnce(bool) -> String,
) -> Result<String> {
    match options.format {
        OutputFormat::Json => {
            robot::render_json(&RobotOutput::with_errors(command, data, errors), options.pretty)
        }
        OutputFormat::Human => Ok(human(options.no_color)),
    }
}
