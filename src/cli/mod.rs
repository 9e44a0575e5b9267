//! CLI argument parsing and command dispatch.

pub mod args;
pub mod commands;
pub mod run;

pub use args::{Cli, Commands, OutputFormat};
pub use commands::execute;
