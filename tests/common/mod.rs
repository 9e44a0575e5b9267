//! Common test utilities and fixtures for integration tests.
//!
//! # Modules
//!
//! - `fixtures`: Solcast response bodies, seeded caches, config files
//! - `logger`: Phase-tagged test output for debugging failures

pub mod fixtures;
pub mod logger;
