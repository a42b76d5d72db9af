//! Credit meter behavior against a mock metering endpoint.

use std::sync::Arc;

use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use benchgate::Config;
use benchgate::auth::SessionManager;
use benchgate::credits::CreditMeter;

fn test_config(tmp: &TempDir, server_uri: &str) -> Config {
    let mut config = Config::default();
    config.benchgate_dir = tmp.path().to_path_buf();
    config.config_path = tmp.path().join("config.toml");
    config.identity.base_url = server_uri.to_string();
    config.metering.base_url = server_uri.to_string();
    config
}

/// Helper: mount a sign-in mock and authenticate the manager.
async fn signed_in_manager(server: &MockServer, config: &Config) -> Arc<SessionManager> {
    Mock::given(method("POST"))
        .and(path("/signin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id_token": "idtok-abc",
            "refresh_token": "rt-abc",
            "expires_in": 3600
        })))
        .mount(server)
        .await;

    let manager = Arc::new(SessionManager::new(config));
    manager.sign_in("a@b.test", "hunter2").await.unwrap();
    manager
}

#[tokio::test]
async fn refresh_adopts_the_server_counter() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &server.uri());
    let manager = signed_in_manager(&server, &config).await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("Authorization", "Bearer idtok-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tokens_used": 4_200
        })))
        .mount(&server)
        .await;

    let meter = CreditMeter::new(&config, manager);
    meter.refresh().await;

    let quota = meter.snapshot();
    assert_eq!(quota.tokens_used, 4_200);
    assert_eq!(quota.credits_available, 72);
    assert!(!quota.is_exhausted);
}

#[tokio::test]
async fn failed_refresh_leaves_the_cache_unchanged() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &server.uri());
    let manager = signed_in_manager(&server, &config).await;

    let ok_mock = Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tokens_used": 4_200
        })))
        .expect(1)
        .mount_as_scoped(&server)
        .await;

    let meter = CreditMeter::new(&config, manager);
    meter.refresh().await;
    assert_eq!(meter.tokens_used(), 4_200);
    drop(ok_mock);

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    meter.refresh().await;
    assert_eq!(meter.tokens_used(), 4_200, "non-2xx must not clobber cache");
}

#[tokio::test]
async fn record_adopts_the_confirmed_counter() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &server.uri());
    let manager = signed_in_manager(&server, &config).await;

    Mock::given(method("PUT"))
        .and(path("/data"))
        .and(header("Authorization", "Bearer idtok-abc"))
        .and(body_partial_json(serde_json::json!({ "tokens": 1_200 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tokens_used": 5_400
        })))
        .mount(&server)
        .await;

    let meter = CreditMeter::new(&config, manager);
    meter.record(1_200).await;
    assert_eq!(meter.tokens_used(), 5_400);
}

#[tokio::test]
async fn failed_record_neither_throws_nor_advances_the_cache() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &server.uri());
    let manager = signed_in_manager(&server, &config).await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tokens_used": 4_200
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let meter = CreditMeter::new(&config, manager);
    meter.refresh().await;
    meter.record(1_200).await;
    assert_eq!(
        meter.tokens_used(),
        4_200,
        "cache only moves on a server-confirmed value"
    );
}

#[tokio::test]
async fn anonymous_meter_never_calls_out() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &server.uri());

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tokens_used": 9_999
        })))
        .expect(0)
        .mount(&server)
        .await;

    let manager = Arc::new(SessionManager::new(&config));
    let meter = CreditMeter::new(&config, manager);
    meter.refresh().await;
    meter.record(100).await;

    assert_eq!(meter.tokens_used(), 0);
}

#[tokio::test]
async fn losing_authentication_clears_the_counter() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &server.uri());
    let manager = signed_in_manager(&server, &config).await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tokens_used": 4_200
        })))
        .mount(&server)
        .await;

    let meter = CreditMeter::new(&config, manager.clone());
    meter.refresh().await;
    assert_eq!(meter.tokens_used(), 4_200);

    manager.sign_out();
    meter.refresh().await;
    assert_eq!(
        meter.tokens_used(),
        0,
        "counter is not valid for an anonymous viewer"
    );
}

#[tokio::test]
async fn exhausted_counter_gates_generation() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, &server.uri());
    let manager = signed_in_manager(&server, &config).await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tokens_used": 15_000
        })))
        .mount(&server)
        .await;

    let meter = CreditMeter::new(&config, manager);
    meter.refresh().await;

    let quota = meter.snapshot();
    assert!(quota.is_exhausted);
    assert_eq!(quota.credits_available, 0);
    assert_eq!(quota.max_test_cases_allowed, 0);
}
