//! Public address discovery through third-party echo services.
//!
//! Each address family has an ordered list of services. A service is tried up
//! to `attempts_per_service` times, sequentially, with a fixed delay between
//! attempts; once it is exhausted the next service is tried. A response is
//! only trusted after family-specific validation. When every service fails the
//! address is simply undetected (`None`).

use std::net::Ipv6Addr;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{DiscoveryConfig, EchoFormat, EchoService};
use crate::error::Result;
use crate::types::{PublicAddress, PublicIpResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn is_valid(self, candidate: &str) -> bool {
        match self {
            IpFamily::V4 => is_valid_ipv4(candidate),
            IpFamily::V6 => is_valid_ipv6(candidate),
        }
    }
}

#[derive(Deserialize)]
struct EchoJson {
    ip: String,
}

/// Result of a single request to an echo service.
enum Attempt {
    Found(String),
    /// The service answered with something that is not an address of the
    /// requested family. Retrying the same service will not change that.
    Rejected(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PublicIpDiscoverer {
    client: Client,
    config: DiscoveryConfig,
}

impl PublicIpDiscoverer {
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("reach-diag/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: Client, config: DiscoveryConfig) -> Self {
        Self { client, config }
    }

    pub async fn discover_v4(&self) -> Option<String> {
        self.discover(IpFamily::V4, &self.config.ipv4_services).await
    }

    pub async fn discover_v6(&self) -> Option<String> {
        self.discover(IpFamily::V6, &self.config.ipv6_services).await
    }

    /// Run both families concurrently.
    pub async fn discover_all(&self) -> PublicIpResult {
        let (v4, v6) = tokio::join!(self.discover_v4(), self.discover_v6());
        let wrap = |ip: Option<String>| {
            ip.map(|address| vec![PublicAddress { address }])
                .unwrap_or_default()
        };
        PublicIpResult {
            ipv4: wrap(v4),
            ipv6: wrap(v6),
        }
    }

    async fn discover(&self, family: IpFamily, services: &[EchoService]) -> Option<String> {
        for service in services {
            for attempt in 1..=self.config.attempts_per_service {
                if attempt > 1 {
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                match self.query(service, family).await {
                    Attempt::Found(ip) => {
                        info!(?family, service = %service.url, %ip, "public address detected");
                        return Some(ip);
                    }
                    Attempt::Rejected(body) => {
                        debug!(?family, service = %service.url, %body, "response failed validation");
                        break;
                    }
                    Attempt::Failed(reason) => {
                        debug!(?family, service = %service.url, attempt, %reason, "echo request failed");
                    }
                }
            }
        }
        info!(?family, "public address undetected");
        None
    }

    async fn query(&self, service: &EchoService, family: IpFamily) -> Attempt {
        let response = match self.client.get(&service.url).send().await {
            Ok(r) => r,
            Err(e) => return Attempt::Failed(e.to_string()),
        };
        if !response.status().is_success() {
            return Attempt::Failed(format!("HTTP {}", response.status()));
        }
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return Attempt::Failed(e.to_string()),
        };
        let candidate = extract_address(service.format, &body);
        if family.is_valid(&candidate) {
            Attempt::Found(candidate)
        } else {
            Attempt::Rejected(candidate)
        }
    }
}

/// Pull the address out of an echo response body.
///
/// JSON services that answer with a bare address are tolerated.
pub fn extract_address(format: EchoFormat, body: &str) -> String {
    match format {
        EchoFormat::Json => match serde_json::from_str::<EchoJson>(body) {
            Ok(parsed) => parsed.ip.trim().to_string(),
            Err(_) => body.trim().to_string(),
        },
        EchoFormat::PlainText => body.trim().to_string(),
    }
}

/// Four dot-separated decimal octets in 0..=255, and no colon.
pub fn is_valid_ipv4(s: &str) -> bool {
    if s.contains(':') {
        return false;
    }
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|p| {
            (1..=3).contains(&p.len())
                && p.bytes().all(|b| b.is_ascii_digit())
                && p.parse::<u16>().is_ok_and(|n| n <= 255)
        })
}

/// Contains a colon and is a full or compressed IPv6 address.
pub fn is_valid_ipv6(s: &str) -> bool {
    s.contains(':') && s.parse::<Ipv6Addr>().is_ok()
}
