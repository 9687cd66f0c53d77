use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DiagError, Result};

/// Where a public-IP echo service puts the address in its response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoFormat {
    /// `{"ip": "..."}`
    Json,
    /// The bare address, optionally followed by whitespace.
    PlainText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoService {
    pub url: String,
    pub format: EchoFormat,
}

impl EchoService {
    pub fn json(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: EchoFormat::Json,
        }
    }

    pub fn plain(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: EchoFormat::PlainText,
        }
    }
}

/// Retry-then-fallback policy for public IP discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub ipv4_services: Vec<EchoService>,
    pub ipv6_services: Vec<EchoService>,
    pub attempts_per_service: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ipv4_services: vec![
                EchoService::json("https://api.ipify.org/?format=json"),
                EchoService::plain("http://ifconfig.me/ip"),
            ],
            ipv6_services: vec![
                EchoService::json("https://api64.ipify.org/?format=json"),
                EchoService::plain("https://ifconfig.co/ip"),
            ],
            attempts_per_service: 3,
            retry_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(5000),
        }
    }
}

/// Runtime settings shared by the CLI and the HTTP server.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub ui_dir: Option<PathBuf>,
    /// Default per-port connect timeout for interactive scans.
    pub scan_timeout: Duration,
    /// Upper bound on ports accepted in one scan request.
    pub max_ports: usize,
    /// Upper bound on simultaneously pending connects within one scan.
    pub scan_concurrency: usize,
    /// Connect timeout for the port stage of a diagnosis.
    pub diagnosis_port_timeout: Duration,
    pub http_timeout: Duration,
    pub ping_timeout: Duration,
    pub mtr_timeout: Duration,
    pub discovery: DiscoveryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3001)),
            ui_dir: None,
            scan_timeout: Duration::from_millis(3000),
            max_ports: 1024,
            scan_concurrency: 1024,
            diagnosis_port_timeout: Duration::from_millis(5000),
            http_timeout: Duration::from_millis(10_000),
            ping_timeout: Duration::from_secs(30),
            mtr_timeout: Duration::from_secs(60),
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Hard ceiling for any caller-provided timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(120);

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_ports == 0 {
            return Err(DiagError::validation("max_ports must be at least 1"));
        }
        if self.scan_concurrency == 0 {
            return Err(DiagError::validation("scan_concurrency must be at least 1"));
        }
        for (name, value) in [
            ("scan_timeout", self.scan_timeout),
            ("diagnosis_port_timeout", self.diagnosis_port_timeout),
            ("http_timeout", self.http_timeout),
        ] {
            if value.is_zero() || value > MAX_TIMEOUT {
                return Err(DiagError::validation(format!(
                    "{name} must be between 1ms and {}s",
                    MAX_TIMEOUT.as_secs()
                )));
            }
        }
        if self.discovery.attempts_per_service == 0 {
            return Err(DiagError::validation(
                "attempts_per_service must be at least 1",
            ));
        }
        if let Some(dir) = &self.ui_dir {
            if !dir.is_dir() {
                return Err(DiagError::validation(format!(
                    "ui directory does not exist: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// Parse a caller-supplied timeout in milliseconds, falling back to `default`.
pub fn timeout_from_millis(ms: Option<u64>, default: Duration) -> Result<Duration> {
    match ms {
        None => Ok(default),
        Some(0) => Err(DiagError::validation("timeout must be greater than 0")),
        Some(ms) => {
            let d = Duration::from_millis(ms);
            if d > MAX_TIMEOUT {
                return Err(DiagError::validation(format!(
                    "timeout must not exceed {}ms",
                    MAX_TIMEOUT.as_millis()
                )));
            }
            Ok(d)
        }
    }
}
