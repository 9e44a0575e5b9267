//! Utility functions.

pub mod env;
pub mod format;
pub mod time;

pub use format::{format_kwh, format_watts, redact_key};
pub use time::{local_date, local_day_bounds, local_day_start, local_midnight};
