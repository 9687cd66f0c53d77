use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::{
    config::{timeout_from_millis, AppConfig},
    connectivity,
    diagnosis::DiagnosisCorrelator,
    dns_records,
    error::DiagError,
    http_probe::{self, HttpProbe, HttpProbeRequest},
    ports,
    public_ip::PublicIpDiscoverer,
    resolver::strip_brackets,
    scanner,
    types::{AddressFamily, CommandReport},
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Services>,
}

struct Services {
    config: AppConfig,
    discoverer: PublicIpDiscoverer,
    http: HttpProbe,
    correlator: DiagnosisCorrelator,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, shutdown: CancellationToken) -> crate::error::Result<Self> {
        Self::with_correlator(
            DiagnosisCorrelator::new(config.diagnosis_port_timeout),
            config,
            shutdown,
        )
    }

    pub fn with_correlator(
        correlator: DiagnosisCorrelator,
        config: AppConfig,
        shutdown: CancellationToken,
    ) -> crate::error::Result<Self> {
        let discoverer = PublicIpDiscoverer::new(config.discovery.clone())?;
        let http = HttpProbe::new()?;
        Ok(Self {
            inner: Arc::new(Services {
                config,
                discoverer,
                http,
                correlator,
                shutdown,
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub host: Option<String>,
    pub ports: Option<Vec<u16>>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DnsRequest {
    pub hostname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub host: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTestRequest {
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub follow_redirects: Option<bool>,
    #[serde(default)]
    pub auto_diagnose: Option<bool>,
}

/// Build the `/api` router plus optional static UI fallback.
pub fn router(state: AppState) -> Router {
    let ui_dir = state.inner.config.ui_dir.clone();

    let api = Router::new()
        .route("/ip-addresses", get(get_ip_addresses))
        .route("/common-ports", get(get_common_ports))
        .route("/port-scan", post(post_port_scan))
        .route("/dns-resolve", post(post_dns_resolve))
        .route("/ping", post(post_ping))
        .route("/mtr", post(post_mtr))
        .route("/http-test", post(post_http_test))
        .with_state(state);

    let app = Router::new().nest("/api", api).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    match ui_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true)),
        None => app,
    }
}

pub async fn spawn_server(config: AppConfig, shutdown: CancellationToken) -> Result<()> {
    let bind = config.bind;
    let state = AppState::new(config, shutdown.clone()).context("failed to initialise services")?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("serving API on http://{bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Parse a JSON body, turning any rejection into a 400 with an `error` field.
fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> Result<T, DiagError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| DiagError::validation(format!("invalid request body: {}", e.body_text())))
}

fn required(field: Option<String>, name: &str) -> Result<String, DiagError> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DiagError::validation(format!("{name} is required")))
}

async fn get_ip_addresses(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.inner.discoverer.discover_all().await)
}

async fn get_common_ports() -> impl IntoResponse {
    Json(ports::common_ports())
}

async fn post_port_scan(
    State(app): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Response, DiagError> {
    let req = body(payload)?;
    let cfg = &app.inner.config;
    let host = required(req.host, "host")?;
    let ports = req
        .ports
        .filter(|p| !p.is_empty())
        .ok_or_else(|| DiagError::validation("ports must be a non-empty array"))?;
    if ports.contains(&0) {
        return Err(DiagError::validation("ports must be between 1 and 65535"));
    }
    let ports = ports::dedup_ports(&ports);
    if ports.len() > cfg.max_ports {
        return Err(DiagError::validation(format!(
            "at most {} ports may be scanned per request",
            cfg.max_ports
        )));
    }
    let timeout = timeout_from_millis(req.timeout, cfg.scan_timeout)?;

    let report = scanner::scan_host_with_cancel(
        &host,
        &ports,
        cfg.scan_concurrency,
        timeout,
        app.inner.shutdown.child_token(),
    )
    .await?;
    Ok(Json(report).into_response())
}

async fn post_dns_resolve(
    payload: Result<Json<DnsRequest>, JsonRejection>,
) -> Result<Response, DiagError> {
    let req = body(payload)?;
    let hostname = required(req.hostname, "hostname")?;
    let report = dns_records::lookup_records(&hostname).await?;
    Ok(Json(report).into_response())
}

async fn post_ping(
    State(app): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Response, DiagError> {
    let req = body(payload)?;
    let host = required(req.host, "host")?;
    let host = strip_brackets(&host);
    let family = if host.contains(':') {
        AddressFamily::IPv6
    } else {
        AddressFamily::IPv4
    };
    let report = connectivity::run_ping(
        host,
        req.count.unwrap_or(4),
        family,
        app.inner.config.ping_timeout,
    )
    .await?;
    Ok(command_response(report))
}

async fn post_mtr(
    State(app): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Response, DiagError> {
    let req = body(payload)?;
    let host = required(req.host, "host")?;
    let report =
        connectivity::run_mtr(&host, req.count.unwrap_or(10), app.inner.config.mtr_timeout)
            .await?;
    Ok(command_response(report))
}

fn command_response(report: CommandReport) -> Response {
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report)).into_response()
}

async fn post_http_test(
    State(app): State<AppState>,
    payload: Result<Json<HttpTestRequest>, JsonRejection>,
) -> Result<Response, DiagError> {
    let req = body(payload)?;
    let url = required(req.url, "url")?;
    let timeout: Duration = timeout_from_millis(req.timeout, app.inner.config.http_timeout)?;
    let probe_req = HttpProbeRequest::new(
        &url,
        req.method.as_deref(),
        timeout,
        req.follow_redirects.unwrap_or(true),
    )?;
    let report = http_probe::http_test(
        &app.inner.http,
        &app.inner.correlator,
        &probe_req,
        req.auto_diagnose.unwrap_or(true),
    )
    .await;
    Ok(Json(report).into_response())
}
