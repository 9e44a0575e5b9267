//! Forecast provider implementations.
//!
//! Each provider implements [`ForecastProvider`](crate::core::provider::ForecastProvider).

pub mod solcast;

pub use solcast::SolcastClient;
