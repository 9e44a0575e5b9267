//! Robot-mode output (JSON).
//!
//! Every command's data is wrapped in the same envelope so scripts can
//! check `schema_version` before reading `data`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// Envelope schema identifier.
pub const SCHEMA_VERSION: &str = "pvcast.v1";

/// JSON envelope for command output.
#[derive(Debug, Clone, Serialize)]
pub struct RobotOutput<T> {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub command: String,
    pub data: T,
    pub errors: Vec<String>,
}

impl<T> RobotOutput<T> {
    /// Create a new robot output envelope.
    pub fn new(command: impl Into<String>, data: T) -> Self {
        Self::with_errors(command, data, Vec::new())
    }

    /// Create with non-fatal errors, such as per-site fetch failures.
    pub fn with_errors(command: impl Into<String>, data: T, errors: Vec<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            command: command.into(),
            data,
            errors,
        }
    }
}

/// Render an envelope as JSON.
pub fn render_json<T: Serialize>(output: &RobotOutput<T>, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(output)?)
    } else {
        Ok(serde_json::to_string(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let output = RobotOutput::with_errors("status", vec![1, 2], vec!["site failed".to_string()]);
        let json: serde_json::Value = serde_json::from_str(&render_json(&output, false).unwrap()).unwrap();
        assert_eq!(json["schema_version"], "pvcast.v1");
        assert_eq!(json["command"], "status");
        assert_eq!(json["data"][1], 2);
        assert_eq!(json["errors"][0], "site failed");
        assert!(json["generated_at"].is_string());
    }

    #[test]
    fn pretty_output_is_multiline() {
        let output = RobotOutput::new("sites", serde_json::json!({"count": 0}));
        assert!(render_json(&output, true).unwrap().contains('\n'));
        assert!(!render_json(&output, false).unwrap().contains('\n'));
    }
}
