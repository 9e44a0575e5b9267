//! Error rendering for pvcast.
//!
//! Human output prints the message, its code, and the first fix command;
//! JSON output carries the full suggestion list for scripts.

use colored::Colorize;
use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::PvcastError;

/// Render an error for stderr in the requested format.
#[must_use]
pub fn render_error(error: &PvcastError, format: OutputFormat, no_color: bool, pretty: bool) -> String {
    match format {
        OutputFormat::Json => render_error_json(error, pretty),
        OutputFormat::Human => render_human(error, no_color),
    }
}

/// Render error as structured JSON for machine consumption.
#[must_use]
pub fn render_error_json(error: &PvcastError, pretty: bool) -> String {
    let error_json = ErrorJson::from_error(error);
    let rendered = if pretty {
        serde_json::to_string_pretty(&error_json)
    } else {
        serde_json::to_string(&error_json)
    };
    rendered.unwrap_or_else(|_| render_human(error, true))
}

fn render_human(error: &PvcastError, no_color: bool) -> String {
    let suggestions = error.fix_suggestions();
    let mut lines = Vec::new();

    let header = format!("Error [{}]: {}", error.error_code(), error);
    lines.push(if no_color { header } else { header.red().bold().to_string() });

    if let Some(suggestion) = suggestions.first() {
        if let Some(cmd) = suggestion.commands.iter().find(|c| !c.starts_with('#')) {
            let fix = format!("Fix: {cmd}");
            lines.push(if no_color { fix } else { fix.green().to_string() });
        }
        if !suggestion.context.is_empty() {
            lines.push(suggestion.context.clone());
        }
        if let Some(prevention) = &suggestion.prevention {
            lines.push(format!("Tip: {prevention}"));
        }
    }

    lines.join("\n")
}

// =============================================================================
// JSON Rendering
// =============================================================================

#[derive(Serialize)]
struct ErrorJson {
    error_code: &'static str,
    category: String,
    message: String,
    is_transient: bool,
    is_fatal: bool,
    suggestions: Vec<SuggestionJson>,
}

#[derive(Serialize)]
struct SuggestionJson {
    commands: Vec<String>,
    context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prevention: Option<String>,
}

impl ErrorJson {
    fn from_error(error: &PvcastError) -> Self {
        Self {
            error_code: error.error_code(),
            category: error.category().to_string(),
            message: error.to_string(),
            is_transient: error.is_transient(),
            is_fatal: error.category().is_fatal(),
            suggestions: error
                .fix_suggestions()
                .into_iter()
                .map(|s| SuggestionJson {
                    commands: s.commands,
                    context: s.context,
                    prevention: s.prevention,
                })
                .collect(),
        }
    }
}
