//! HTTP(S) probe with latency measurement and bounded redirect following.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io;
use std::time::{Duration, Instant};

use reqwest::{header::LOCATION, redirect::Policy, Client, Method, Response};
use tracing::{debug, info};
use url::Url;

use crate::diagnosis::DiagnosisCorrelator;
use crate::error::{DiagError, Result};
use crate::probe::error_code;
use crate::resolver::strip_brackets;
use crate::types::{HttpProbeResult, HttpTestReport};

/// Hops followed before a redirect chain is abandoned.
pub const MAX_REDIRECTS: u32 = 5;

pub const TOO_MANY_REDIRECTS: &str = "ETOOMANYREDIRECTS";
pub const INVALID_REDIRECT: &str = "EINVALIDREDIRECT";

/// A validated probe request.
#[derive(Debug, Clone)]
pub struct HttpProbeRequest {
    /// The URL exactly as the caller wrote it.
    pub raw_url: String,
    pub url: Url,
    pub method: Method,
    pub timeout: Duration,
    pub follow_redirects: bool,
}

impl HttpProbeRequest {
    pub fn new(
        url: &str,
        method: Option<&str>,
        timeout: Duration,
        follow_redirects: bool,
    ) -> Result<Self> {
        let raw_url = url.trim().to_string();
        if raw_url.is_empty() {
            return Err(DiagError::validation("url is required"));
        }
        let parsed = Url::parse(&raw_url)
            .map_err(|e| DiagError::validation(format!("invalid url {raw_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DiagError::validation(
                "url must use the http:// or https:// scheme",
            ));
        }
        if parsed.host_str().is_none() {
            return Err(DiagError::validation("url must include a host"));
        }
        let method = match method.map(str::trim).filter(|m| !m.is_empty()) {
            None => Method::GET,
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| DiagError::validation(format!("invalid HTTP method: {m}")))?,
        };
        Ok(Self {
            raw_url,
            url: parsed,
            method,
            timeout,
            follow_redirects,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Build a probe whose client never follows redirects by itself.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .user_agent(concat!("reach-diag/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Issue the request and chase redirects up to [`MAX_REDIRECTS`] hops.
    ///
    /// Never fails: transport errors and redirect-policy violations end up in
    /// `error` / `error_code` with `success = false`.
    pub async fn request(&self, req: &HttpProbeRequest) -> HttpProbeResult {
        let start = Instant::now();
        let mut current = req.url.clone();
        let mut hops: u32 = 0;

        loop {
            debug!(method = %req.method, url = %current, hops, "sending request");
            let sent = self
                .client
                .request(req.method.clone(), current.clone())
                .timeout(req.timeout)
                .send()
                .await;

            let response = match sent {
                Ok(r) => r,
                Err(e) => {
                    return failure(
                        req,
                        &current,
                        hops,
                        start,
                        error_chain(&e),
                        transport_error_code(&e),
                    )
                }
            };

            let status = response.status();
            if req.follow_redirects && status.is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    if hops >= MAX_REDIRECTS {
                        info!(url = %req.raw_url, "redirect limit reached");
                        return failure(
                            req,
                            &current,
                            hops,
                            start,
                            format!("Too many redirects (max {MAX_REDIRECTS})"),
                            TOO_MANY_REDIRECTS.to_string(),
                        );
                    }
                    let next = location
                        .to_str()
                        .ok()
                        .and_then(|loc| current.join(loc).ok());
                    match next {
                        Some(next) => {
                            current = next;
                            hops += 1;
                            continue;
                        }
                        None => {
                            let raw = String::from_utf8_lossy(location.as_bytes()).into_owned();
                            return failure(
                                req,
                                &current,
                                hops,
                                start,
                                format!("Invalid redirect location: {raw}"),
                                INVALID_REDIRECT.to_string(),
                            );
                        }
                    }
                }
            }

            return completed(req, &current, hops, start, response);
        }
    }
}

fn final_url(req: &HttpProbeRequest, current: &Url, hops: u32) -> String {
    if hops > 0 {
        current.to_string()
    } else {
        req.raw_url.clone()
    }
}

fn completed(
    req: &HttpProbeRequest,
    current: &Url,
    hops: u32,
    start: Instant,
    response: Response,
) -> HttpProbeResult {
    let status = response.status();
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in response.headers() {
        let value = value.to_str().unwrap_or("<binary>");
        headers
            .entry(name.to_string())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    drop(response);

    let code = status.as_u16();
    HttpProbeResult {
        requested_url: req.raw_url.clone(),
        final_url: final_url(req, current, hops),
        status_code: Some(code),
        status_message: Some(status.canonical_reason().unwrap_or("Unknown").to_string()),
        headers: Some(headers),
        response_time_ms: start.elapsed().as_millis() as u64,
        redirect_count: hops,
        success: (200..400).contains(&code),
        error: None,
        error_code: None,
    }
}

fn failure(
    req: &HttpProbeRequest,
    current: &Url,
    hops: u32,
    start: Instant,
    error: String,
    code: String,
) -> HttpProbeResult {
    debug!(url = %current, %error, %code, "request failed");
    HttpProbeResult {
        requested_url: req.raw_url.clone(),
        final_url: final_url(req, current, hops),
        status_code: None,
        status_message: None,
        headers: None,
        response_time_ms: start.elapsed().as_millis() as u64,
        redirect_count: hops,
        success: false,
        error: Some(error),
        error_code: Some(code),
    }
}

/// The error message followed by each of its sources.
fn error_chain(e: &reqwest::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(err) = source {
        let msg = err.to_string();
        if !out.contains(&msg) {
            out.push_str(": ");
            out.push_str(&msg);
        }
        source = err.source();
    }
    out
}

fn transport_error_code(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return "ETIMEDOUT".to_string();
    }
    let mut source = e.source();
    while let Some(err) = source {
        if err.to_string().contains("dns error") {
            return "ENOTFOUND".to_string();
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return error_code(io_err);
        }
        source = err.source();
    }
    if e.is_connect() {
        "ECONNECT".to_string()
    } else {
        "EREQUEST".to_string()
    }
}

/// Host and port of the request that produced `result`.
pub fn diagnosis_target(result: &HttpProbeResult) -> Option<(String, u16)> {
    let url = Url::parse(&result.final_url).ok()?;
    let host = strip_brackets(url.host_str()?).to_string();
    let port = url.port_or_known_default()?;
    Some((host, port))
}

/// Probe `req`; on failure, and when asked to, attach a diagnosis of the target.
pub async fn http_test(
    probe: &HttpProbe,
    correlator: &DiagnosisCorrelator,
    req: &HttpProbeRequest,
    auto_diagnose: bool,
) -> HttpTestReport {
    let result = probe.request(req).await;
    let diagnosis = if !result.success && auto_diagnose {
        match diagnosis_target(&result) {
            Some((host, port)) => {
                info!(%host, port, "request failed, running diagnosis");
                Some(correlator.diagnose(&host, port).await)
            }
            None => None,
        }
    } else {
        None
    };
    HttpTestReport { result, diagnosis }
}
