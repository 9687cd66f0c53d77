use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use reach_diag::config::{AppConfig, DiscoveryConfig, EchoService};
use reach_diag::connectivity::ConnectivityCheck;
use reach_diag::diagnosis::DiagnosisCorrelator;
use reach_diag::error::Result;
use reach_diag::resolver::AddressResolver;
use reach_diag::server::{router, AppState};
use reach_diag::types::{AddressFamily, ConnectivityStage, ResolvedAddress};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn app_with(config: AppConfig) -> Router {
    let state = AppState::new(config, CancellationToken::new()).unwrap();
    router(state)
}

fn app() -> Router {
    app_with(AppConfig {
        max_ports: 4,
        ..AppConfig::default()
    })
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post(app: Router, uri: &str, body: impl Into<String>) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap();
    send(app, req).await
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn port_scan_validation_errors_are_400() {
    let cases = [
        json!({ "ports": [80] }).to_string(),
        json!({ "host": "  ", "ports": [80] }).to_string(),
        json!({ "host": "127.0.0.1", "ports": [] }).to_string(),
        json!({ "host": "127.0.0.1" }).to_string(),
        json!({ "host": "127.0.0.1", "ports": [0, 80] }).to_string(),
        json!({ "host": "127.0.0.1", "ports": [70000] }).to_string(),
        json!({ "host": "127.0.0.1", "ports": [1, 2, 3, 4, 5] }).to_string(),
        json!({ "host": "127.0.0.1", "ports": [80], "timeout": 0 }).to_string(),
        "{not json".to_string(),
    ];
    for body in cases {
        let (status, value) = post(app(), "/api/port-scan", body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert!(value["error"].is_string(), "body: {body}");
    }
}

#[tokio::test]
async fn port_scan_returns_sorted_classified_results() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();
    let closed = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };
    let (hi, lo) = (open.max(closed), open.min(closed));

    let body = json!({ "host": "127.0.0.1", "ports": [hi, lo, hi], "timeout": 1000 });
    let (status, value) = post(app(), "/api/port-scan", body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["host"], "127.0.0.1");
    assert_eq!(value["resolvedAddresses"][0]["family"], "IPv4");
    assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));

    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["port"], lo);
    assert_eq!(results[1]["port"], hi);
    for r in results {
        let expected = if r["port"] == open { "open" } else { "closed" };
        assert_eq!(r["status"], expected);
        assert_eq!(r["response"], "responded");
    }
    drop(listener);
}

#[tokio::test]
async fn common_ports_lists_presets() {
    let (status, value) = get(app(), "/api/common-ports").await;
    assert_eq!(status, StatusCode::OK);
    let presets = value.as_array().unwrap();
    assert!(presets
        .iter()
        .any(|p| p["name"] == "HTTPS" && p["port"] == 443));
}

#[tokio::test]
async fn http_test_rejects_bad_urls() {
    for body in [
        json!({}),
        json!({ "url": "" }),
        json!({ "url": "ftp://example.com" }),
        json!({ "url": "not a url" }),
        json!({ "url": "http://127.0.0.1/", "method": "BAD METHOD" }),
    ] {
        let (status, value) = post(app(), "/api/http-test", body.to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert!(value["error"].is_string());
    }
}

#[tokio::test]
async fn http_test_success_has_no_diagnosis() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let body = json!({ "url": format!("{}/", server.uri()), "timeout": 5000 });
    let (status, value) = post(app(), "/api/http-test", body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["success"], true);
    assert_eq!(value["statusCode"], 200);
    assert_eq!(value["redirectCount"], 0);
    assert!(value.get("diagnosis").is_none());
}

struct Loopback;

#[async_trait]
impl AddressResolver for Loopback {
    async fn resolve(&self, _host: &str) -> Result<Vec<ResolvedAddress>> {
        Ok(vec![ResolvedAddress {
            address: "127.0.0.1".into(),
            family: AddressFamily::IPv4,
        }])
    }
}

struct Reachable;

#[async_trait]
impl ConnectivityCheck for Reachable {
    async fn check(&self, _host: &str, _family: AddressFamily) -> ConnectivityStage {
        ConnectivityStage {
            success: true,
            output: Some("1 packets transmitted, 1 received".into()),
            error: None,
        }
    }
}

#[tokio::test]
async fn http_test_failure_includes_diagnosis() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let correlator = DiagnosisCorrelator::with_checks(
        Arc::new(Loopback),
        Arc::new(Reachable),
        Duration::from_secs(2),
    );
    let state =
        AppState::with_correlator(correlator, AppConfig::default(), CancellationToken::new())
            .unwrap();

    let body = json!({ "url": format!("{}/api", server.uri()), "timeout": 5000 });
    let (status, value) = post(router(state), "/api/http-test", body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["success"], false);
    assert_eq!(value["statusCode"], 503);
    assert_eq!(value["diagnosis"]["dns"]["success"], true);
    assert_eq!(value["diagnosis"]["ping"]["success"], true);
    assert_eq!(value["diagnosis"]["portScan"]["status"], "open");
    assert_eq!(value["diagnosis"]["analysis"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn command_endpoints_require_host() {
    for uri in ["/api/ping", "/api/mtr"] {
        let (status, value) = post(app(), uri, json!({}).to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(value["error"].is_string());
    }
    let (status, _) = post(app(), "/api/ping", json!({ "host": "a;rm -rf /" }).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dns_resolve_requires_hostname() {
    let (status, value) = post(app(), "/api/dns-resolve", json!({}).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["error"].is_string());
}

#[tokio::test]
async fn ip_addresses_uses_configured_echo_services() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v4"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ip":"203.0.113.50"}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v6"))
        .respond_with(ResponseTemplate::new(200).set_body_string("2001:db8::50\n"))
        .mount(&server)
        .await;

    let config = AppConfig {
        discovery: DiscoveryConfig {
            ipv4_services: vec![EchoService::json(format!("{}/v4", server.uri()))],
            ipv6_services: vec![EchoService::plain(format!("{}/v6", server.uri()))],
            attempts_per_service: 1,
            retry_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(2),
        },
        ..AppConfig::default()
    };
    let (status, value) = get(app_with(config), "/api/ip-addresses").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({
        "ipv4": [{ "address": "203.0.113.50" }],
        "ipv6": [{ "address": "2001:db8::50" }],
    }));
}
