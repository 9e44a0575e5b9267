//! HTTP client utilities.
//!
//! Provides the shared HTTP client used by the forecast provider.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, StatusCode, Url};

use crate::error::{PvcastError, Result};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("pvcast/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PvcastError::Network(e.to_string()))
}

/// GET `url` and return the status with the body text.
///
/// Transport errors are mapped without the URL, which carries the API key.
///
/// # Errors
///
/// Returns [`PvcastError::Timeout`] or [`PvcastError::Network`]; HTTP error
/// statuses are returned to the caller for mapping.
pub async fn get_text(
    client: &Client,
    url: Url,
    target: &str,
    timeout: Duration,
) -> Result<(StatusCode, String)> {
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PvcastError::Timeout {
                target: target.to_string(),
                seconds: timeout.as_secs(),
            }
        } else {
            PvcastError::Network(e.without_url().to_string())
        }
    })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PvcastError::Network(e.without_url().to_string()))?;

    Ok((status, body))
}
