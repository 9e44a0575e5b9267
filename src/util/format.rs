//! Number and credential formatting utilities.

/// Redact an API key for logs and messages: `******` plus the last six characters.
#[must_use]
pub fn redact_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("******{tail}")
}

/// Replace every occurrence of `key` in `message` with its redacted form.
#[must_use]
pub fn redact_in(message: &str, key: &str) -> String {
    if key.is_empty() {
        return message.to_string();
    }
    message.replace(key, &redact_key(key))
}

/// Format watts, switching to kW above 1000.
#[must_use]
pub fn format_watts(watts: f64) -> String {
    if watts.abs() >= 1000.0 {
        format!("{:.2} kW", watts / 1000.0)
    } else {
        format!("{watts:.0} W")
    }
}

/// Format energy in kWh.
#[must_use]
pub fn format_kwh(kwh: f64) -> String {
    format!("{kwh:.2} kWh")
}
