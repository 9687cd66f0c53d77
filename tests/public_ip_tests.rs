use std::time::Duration;

use reach_diag::config::{DiscoveryConfig, EchoService};
use reach_diag::public_ip::PublicIpDiscoverer;
use reach_diag::types::PublicAddress;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn config(v4: Vec<EchoService>, v6: Vec<EchoService>) -> DiscoveryConfig {
    DiscoveryConfig {
        ipv4_services: v4,
        ipv6_services: v6,
        attempts_per_service: 3,
        retry_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(2),
    }
}

async fn respond(server: &MockServer, route: &str, template: ResponseTemplate, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn json_service_answers_first_time() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/json",
        ResponseTemplate::new(200).set_body_string(r#"{"ip":"203.0.113.9"}"#),
        1,
    )
    .await;

    let cfg = config(vec![EchoService::json(format!("{}/json", server.uri()))], vec![]);
    let found = PublicIpDiscoverer::new(cfg).unwrap().discover_v4().await;
    assert_eq!(found.as_deref(), Some("203.0.113.9"));
}

#[tokio::test]
async fn failing_service_is_retried_then_fallback_used() {
    let server = MockServer::start().await;
    respond(&server, "/primary", ResponseTemplate::new(500), 3).await;
    respond(
        &server,
        "/fallback",
        ResponseTemplate::new(200).set_body_string("198.51.100.20\n"),
        1,
    )
    .await;

    let cfg = config(
        vec![
            EchoService::json(format!("{}/primary", server.uri())),
            EchoService::plain(format!("{}/fallback", server.uri())),
        ],
        vec![],
    );
    let found = PublicIpDiscoverer::new(cfg).unwrap().discover_v4().await;
    assert_eq!(found.as_deref(), Some("198.51.100.20"));
}

#[tokio::test]
async fn wrong_family_answer_moves_to_next_service() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/dual",
        ResponseTemplate::new(200).set_body_string(r#"{"ip":"203.0.113.9"}"#),
        1,
    )
    .await;
    respond(
        &server,
        "/v6",
        ResponseTemplate::new(200).set_body_string("2001:db8::42"),
        1,
    )
    .await;

    let cfg = config(
        vec![],
        vec![
            EchoService::json(format!("{}/dual", server.uri())),
            EchoService::plain(format!("{}/v6", server.uri())),
        ],
    );
    let found = PublicIpDiscoverer::new(cfg).unwrap().discover_v6().await;
    assert_eq!(found.as_deref(), Some("2001:db8::42"));
}

#[tokio::test]
async fn every_service_failing_means_undetected() {
    let server = MockServer::start().await;
    respond(&server, "/a", ResponseTemplate::new(503), 3).await;
    respond(
        &server,
        "/b",
        ResponseTemplate::new(200).set_body_string("not an address"),
        1,
    )
    .await;

    let cfg = config(
        vec![
            EchoService::json(format!("{}/a", server.uri())),
            EchoService::plain(format!("{}/b", server.uri())),
        ],
        vec![],
    );
    assert!(PublicIpDiscoverer::new(cfg).unwrap().discover_v4().await.is_none());
}

#[tokio::test]
async fn discover_all_reports_each_family() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/v4",
        ResponseTemplate::new(200).set_body_string(r#"{"ip":"192.0.2.1"}"#),
        1,
    )
    .await;
    respond(&server, "/v6", ResponseTemplate::new(404), 3).await;

    let cfg = config(
        vec![EchoService::json(format!("{}/v4", server.uri()))],
        vec![EchoService::plain(format!("{}/v6", server.uri()))],
    );
    let result = PublicIpDiscoverer::new(cfg).unwrap().discover_all().await;
    assert_eq!(
        result.ipv4,
        vec![PublicAddress {
            address: "192.0.2.1".into()
        }]
    );
    assert!(result.ipv6.is_empty());
}

#[tokio::test]
async fn hung_service_gives_way_to_fallback_under_client_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hang"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    respond(
        &server,
        "/quick",
        ResponseTemplate::new(200).set_body_string("192.0.2.77"),
        1,
    )
    .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(150))
        .build()
        .unwrap();
    let cfg = config(
        vec![
            EchoService::json(format!("{}/hang", server.uri())),
            EchoService::plain(format!("{}/quick", server.uri())),
        ],
        vec![],
    );
    let found = PublicIpDiscoverer::with_client(client, cfg).discover_v4().await;
    assert_eq!(found.as_deref(), Some("192.0.2.77"));
}
