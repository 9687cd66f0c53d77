//! Failure diagnosis: DNS, connectivity and port checks combined into
//! deduplicated findings.
//!
//! Raw signals overlap (a filtered port and a silent ping both point at a
//! firewall), so findings are keyed by root-cause [`Category`] and each
//! category is reported at most once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::connectivity::{ConnectivityCheck, PingCheck};
use crate::probe::probe_port;
use crate::resolver::{AddressResolver, SystemResolver};
use crate::types::{
    AddressFamily, Diagnosis, DnsStage, PortResponse, PortResult, PortStatus,
};

/// Root cause a finding is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    DnsFailure,
    PortFiltered,
    PortClosed,
    ProtocolLayer,
    HostUnreachable,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::DnsFailure => "dns-failure",
            Category::PortFiltered => "port-filtered",
            Category::PortClosed => "port-closed",
            Category::ProtocolLayer => "protocol-layer",
            Category::HostUnreachable => "host-unreachable",
        }
    }

    fn analysis(self, host: &str, port: u16) -> String {
        match self {
            Category::DnsFailure => {
                format!("DNS resolution failed: {host} does not resolve to any address")
            }
            Category::PortFiltered => format!(
                "Port {port} on {host} is blocked or unresponsive (filtered, no response)"
            ),
            Category::PortClosed => format!(
                "Port {port} on {host} actively refused the connection: nothing is listening"
            ),
            Category::ProtocolLayer => format!(
                "Port {port} on {host} is reachable, the failure is likely at the protocol layer (TLS/HTTP)"
            ),
            Category::HostUnreachable => {
                format!("{host} did not answer the connectivity check: possible network-layer problem")
            }
        }
    }

    fn recommendation(self, port: u16) -> String {
        match self {
            Category::DnsFailure => {
                "Check the hostname spelling and the DNS configuration".to_string()
            }
            Category::PortFiltered => format!(
                "Check firewall rules and security groups, and make sure port {port} is open"
            ),
            Category::PortClosed => format!(
                "Verify that the target service is running and listening on port {port}"
            ),
            Category::ProtocolLayer => {
                "Check the TLS certificate and HTTP server configuration, and the scheme used (http vs https)"
                    .to_string()
            }
            Category::HostUnreachable => {
                "Check routing and network connectivity to the host, ICMP may also be blocked"
                    .to_string()
            }
        }
    }
}

/// Ordered, category-deduplicated analysis and recommendations.
#[derive(Debug, Default, Clone)]
pub struct Findings {
    recorded: HashSet<Category>,
    categories: Vec<Category>,
    pub analysis: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Findings {
    /// Record `category` unless it already is. Returns whether it was new.
    pub fn record(&mut self, category: Category, host: &str, port: u16) -> bool {
        if !self.recorded.insert(category) {
            return false;
        }
        self.categories.push(category);
        self.analysis.push(category.analysis(host, port));
        self.recommendations.push(category.recommendation(port));
        true
    }

    pub fn contains(&self, category: Category) -> bool {
        self.recorded.contains(&category)
    }

    /// Categories in the order they were recorded.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }
}

/// Signals gathered after the DNS stage succeeded.
#[derive(Debug, Clone, Copy)]
pub struct Signals<'a> {
    pub port: Option<&'a PortResult>,
    pub connectivity_ok: Option<bool>,
    pub request_failed: bool,
}

/// Apply the category rules, in order, to `signals`.
pub fn correlate(host: &str, port: u16, signals: Signals<'_>) -> Findings {
    let mut findings = Findings::default();

    if let Some(p) = signals.port {
        match (p.status, p.response) {
            (PortStatus::Filtered, PortResponse::NoResponse) => {
                findings.record(Category::PortFiltered, host, port);
            }
            (PortStatus::Closed, PortResponse::Responded) => {
                findings.record(Category::PortClosed, host, port);
            }
            (PortStatus::Open, _) => {
                findings.record(Category::ProtocolLayer, host, port);
            }
            _ => {}
        }
    }

    if signals.connectivity_ok == Some(false) && !findings.contains(Category::PortFiltered) {
        findings.record(Category::HostUnreachable, host, port);
    }

    let port_open = signals.port.is_some_and(|p| p.status == PortStatus::Open);
    if port_open && signals.request_failed && !findings.contains(Category::ProtocolLayer) {
        findings.record(Category::ProtocolLayer, host, port);
    }

    findings
}

/// Runs the diagnosis stages against one `host:port`.
#[derive(Clone)]
pub struct DiagnosisCorrelator {
    resolver: Arc<dyn AddressResolver>,
    connectivity: Arc<dyn ConnectivityCheck>,
    port_timeout: Duration,
}

impl DiagnosisCorrelator {
    /// System resolver plus a short `ping` as the connectivity check.
    pub fn new(port_timeout: Duration) -> Self {
        Self::with_checks(
            Arc::new(SystemResolver),
            Arc::new(PingCheck::default()),
            port_timeout,
        )
    }

    pub fn with_checks(
        resolver: Arc<dyn AddressResolver>,
        connectivity: Arc<dyn ConnectivityCheck>,
        port_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            connectivity,
            port_timeout,
        }
    }

    /// Diagnose why a request to `hostname:port` failed.
    ///
    /// A DNS failure short-circuits: only the DNS stage is populated. Other
    /// stage failures are recorded and the remaining stages still run.
    pub async fn diagnose(&self, hostname: &str, port: u16) -> Diagnosis {
        info!(hostname, port, "diagnosing");

        let addresses = match self.resolver.resolve(hostname).await {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!(hostname, error = %e, "dns stage failed");
                let mut findings = Findings::default();
                findings.record(Category::DnsFailure, hostname, port);
                return Diagnosis {
                    dns: DnsStage {
                        success: false,
                        addresses: None,
                        error: Some(e.to_string()),
                    },
                    ping: None,
                    port_scan: None,
                    analysis: findings.analysis,
                    recommendations: findings.recommendations,
                };
            }
        };

        let family = if hostname.contains(':')
            || addresses.iter().any(|a| a.family == AddressFamily::IPv6)
        {
            AddressFamily::IPv6
        } else {
            AddressFamily::IPv4
        };
        let (ping, port_result) = tokio::join!(
            self.connectivity.check(hostname, family),
            probe_port(hostname, port, self.port_timeout),
        );

        let findings = correlate(
            hostname,
            port,
            Signals {
                port: Some(&port_result),
                connectivity_ok: Some(ping.success),
                request_failed: true,
            },
        );
        debug!(
            hostname,
            categories = ?findings.categories().iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            "diagnosis complete"
        );

        Diagnosis {
            dns: DnsStage {
                success: true,
                addresses: Some(addresses),
                error: None,
            },
            ping: Some(ping),
            port_scan: Some(port_result),
            analysis: findings.analysis,
            recommendations: findings.recommendations,
        }
    }
}
