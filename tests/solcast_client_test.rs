//! Integration tests for the Solcast client against a mock server.
//!
//! Covers:
//! - Site metadata and forecast parsing
//! - Status code mapping (401, 404, 429, 5xx)
//! - Timeout handling
//! - API key redaction in errors

mod common;

use std::time::Duration;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pvcast::assert_float_eq;
use pvcast::core::models::ApiKey;
use pvcast::core::provider::ForecastProvider;
use pvcast::error::PvcastError;
use pvcast::providers::SolcastClient;
use pvcast::test_utils::utc;

use common::fixtures::{actuals_body, forecasts_body, sites_body};
use common::logger::TestLogger;

const KEY: &str = "secret-key-abcdef";
const SITE: &str = "1111-2222-3333-4444";

fn client(server: &MockServer, timeout: Duration) -> SolcastClient {
    SolcastClient::new(&server.uri(), timeout).expect("client build")
}

// =============================================================================
// Success Responses
// =============================================================================

#[tokio::test]
async fn rooftop_sites_are_tagged_with_key() {
    let log = TestLogger::new("rooftop_sites_are_tagged_with_key");
    log.phase("setup");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rooftop_sites"))
        .and(query_param("api_key", KEY))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sites_body(&[SITE, "aaaa-bbbb-cccc-dddd"])))
        .expect(1)
        .mount(&server)
        .await;

    log.phase("execute");
    let key = ApiKey::new(KEY);
    let sites = client(&server, Duration::from_secs(5))
        .rooftop_sites(&key)
        .await
        .expect("sites");

    log.phase("verify");
    assert_eq!(sites.len(), 2);
    assert_eq!(sites[0].resource_id, SITE);
    assert_eq!(sites[0].name, format!("Roof {SITE}"));
    assert!(sites.iter().all(|s| s.key_fingerprint == key.fingerprint()));
    assert_float_eq!(sites[0].capacity, 5.0);
    log.finish_ok();
}

#[tokio::test]
async fn forecasts_request_hours_and_shift_to_period_start() {
    let log = TestLogger::new("forecasts_request_hours_and_shift_to_period_start");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/rooftop_sites/{SITE}/forecasts")))
        .and(query_param("hours", "48"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(forecasts_body(utc("2024-06-01T10:30:00Z"), &[1.0, 2.0, 3.0])),
        )
        .mount(&server)
        .await;

    log.phase("execute");
    let records = client(&server, Duration::from_secs(5))
        .forecasts(&ApiKey::new(KEY), SITE, 48)
        .await
        .expect("forecasts");

    log.phase("verify");
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].period_start, utc("2024-06-01T10:00:00Z"));
    assert_eq!(records[2].period_start, utc("2024-06-01T11:00:00Z"));
    assert_float_eq!(records[1].pv_estimate10, 1.0);
    assert_float_eq!(records[1].pv_estimate90, 3.0);
    log.finish_ok();
}

#[tokio::test]
async fn estimated_actuals_fill_percentiles_from_estimate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/rooftop_sites/{SITE}/estimated_actuals")))
        .and(query_param("hours", "168"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(actuals_body(utc("2024-05-31T10:30:00Z"), &[2.5])),
        )
        .mount(&server)
        .await;

    let records = client(&server, Duration::from_secs(5))
        .estimated_actuals(&ApiKey::new(KEY), SITE, 168)
        .await
        .expect("actuals");

    assert_eq!(records.len(), 1);
    assert_float_eq!(records[0].pv_estimate10, 2.5);
    assert_float_eq!(records[0].pv_estimate90, 2.5);
}

// =============================================================================
// Error Responses
// =============================================================================

#[tokio::test]
async fn empty_site_list_is_no_sites() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rooftop_sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sites_body(&[])))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .rooftop_sites(&ApiKey::new(KEY))
        .await
        .unwrap_err();
    assert!(matches!(err, PvcastError::NoSites { .. }));
}

#[tokio::test]
async fn unauthorized_never_leaks_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rooftop_sites"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .rooftop_sites(&ApiKey::new(KEY))
        .await
        .unwrap_err();
    assert!(matches!(err, PvcastError::AuthFailed { .. }));
    assert!(!err.to_string().contains(KEY));
    assert!(err.provider_responded());
}

#[tokio::test]
async fn busy_and_missing_site_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/rooftop_sites/{SITE}/forecasts")))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rooftop_sites/9999-9999-9999-9999/forecasts"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let solcast = client(&server, Duration::from_secs(5));
    let key = ApiKey::new(KEY);

    let busy = solcast.forecasts(&key, SITE, 24).await.unwrap_err();
    assert!(matches!(busy, PvcastError::ProviderBusy { .. }));
    assert!(busy.is_transient());

    let missing = solcast
        .forecasts(&key, "9999-9999-9999-9999", 24)
        .await
        .unwrap_err();
    assert!(matches!(missing, PvcastError::SiteNotFound { ref site } if site == "9999-9999-9999-9999"));
}

#[tokio::test]
async fn server_error_body_is_redacted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/rooftop_sites/{SITE}/forecasts")))
        .respond_with(ResponseTemplate::new(500).set_body_string(format!("bad key {KEY}")))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .forecasts(&ApiKey::new(KEY), SITE, 24)
        .await
        .unwrap_err();
    assert!(matches!(err, PvcastError::ProviderApi { status: 500, .. }));
    assert!(!err.to_string().contains(KEY));
}

#[tokio::test]
async fn malformed_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/rooftop_sites/{SITE}/forecasts")))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"forecasts\": 7}"))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .forecasts(&ApiKey::new(KEY), SITE, 24)
        .await
        .unwrap_err();
    assert!(matches!(err, PvcastError::ParseResponse(_)));
}

#[tokio::test]
async fn slow_response_times_out() {
    let log = TestLogger::new("slow_response_times_out");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rooftop_sites"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(sites_body(&[SITE]))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    log.phase("execute");
    let err = client(&server, Duration::from_secs(1))
        .rooftop_sites(&ApiKey::new(KEY))
        .await
        .unwrap_err();

    log.phase("verify");
    assert!(matches!(err, PvcastError::Timeout { seconds: 1, .. }));
    assert!(!err.provider_responded());
    log.finish_ok();
}
