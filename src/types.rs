use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize, Serializer};

/// Reachability state of one scanned TCP port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    Open,
    Closed,
    Filtered,
}

/// Whether the remote side produced any answer at all (SYN-ACK or RST).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortResponse {
    Responded,
    NoResponse,
}

/// Time from probe start to its terminal event.
///
/// Serializes as a number of milliseconds, or the string `"timeout"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDuration {
    Millis(u64),
    Timeout,
}

impl ProbeDuration {
    pub fn as_millis(&self) -> Option<u64> {
        match self {
            ProbeDuration::Millis(ms) => Some(*ms),
            ProbeDuration::Timeout => None,
        }
    }
}

impl Serialize for ProbeDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProbeDuration::Millis(ms) => serializer.serialize_u64(*ms),
            ProbeDuration::Timeout => serializer.serialize_str("timeout"),
        }
    }
}

impl fmt::Display for ProbeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeDuration::Millis(ms) => write!(f, "{ms}ms"),
            ProbeDuration::Timeout => f.write_str("timeout"),
        }
    }
}

/// Outcome of a single TCP connect attempt.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortResult {
    pub port: u16,
    pub status: PortStatus,
    pub response: PortResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<ProbeDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::IPv4,
            IpAddr::V6(_) => AddressFamily::IPv6,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub address: String,
    pub family: AddressFamily,
}

/// Aggregate result of one port scan request.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub host: String,
    pub resolved_addresses: Vec<ResolvedAddress>,
    pub timestamp: String,
    pub results: Vec<PortResult>,
}

impl ScanReport {
    pub fn open_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == PortStatus::Open)
            .count()
    }
}

/// Terminal result of an HTTP probe, after any redirects were chased.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpProbeResult {
    pub requested_url: String,
    pub final_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    pub response_time_ms: u64,
    pub redirect_count: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// HTTP probe result enriched with a diagnosis when the probe failed.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HttpTestReport {
    #[serde(flatten)]
    pub result: HttpProbeResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DnsStage {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<ResolvedAddress>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityStage {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Correlated findings for a failed probe.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub dns: DnsStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping: Option<ConnectivityStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_scan: Option<PortResult>,
    pub analysis: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublicAddress {
    pub address: String,
}

/// Public addresses as seen by external echo services. Empty means undetected.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicIpResult {
    pub ipv4: Vec<PublicAddress>,
    pub ipv6: Vec<PublicAddress>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub priority: u16,
    pub exchange: String,
}

#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "UPPERCASE")]
pub struct DnsRecordSet {
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
    pub cname: Vec<String>,
    pub mx: Vec<MxRecord>,
    pub ns: Vec<String>,
    pub txt: Vec<String>,
    pub all: Vec<ResolvedAddress>,
}

#[derive(Serialize, Debug, Clone)]
pub struct DnsRecordsReport {
    pub hostname: String,
    pub timestamp: String,
    pub records: DnsRecordSet,
}

/// Captured output of an external diagnostic command (`ping`, `mtr`).
#[derive(Serialize, Debug, Clone)]
pub struct CommandReport {
    pub host: String,
    pub count: u32,
    pub timestamp: String,
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_serializes_as_number_or_timeout() {
        let open = PortResult {
            port: 80,
            status: PortStatus::Open,
            response: PortResponse::Responded,
            duration_ms: Some(ProbeDuration::Millis(12)),
            error_code: None,
        };
        let v = serde_json::to_value(&open).unwrap();
        assert_eq!(v["durationMs"], 12);
        assert_eq!(v["status"], "open");
        assert!(v.get("errorCode").is_none());

        let filtered = PortResult {
            port: 81,
            status: PortStatus::Filtered,
            response: PortResponse::NoResponse,
            duration_ms: Some(ProbeDuration::Timeout),
            error_code: Some("ETIMEDOUT".into()),
        };
        let v = serde_json::to_value(&filtered).unwrap();
        assert_eq!(v["durationMs"], "timeout");
        assert_eq!(v["response"], "no_response");
    }

    #[test]
    fn record_set_uses_uppercase_keys() {
        let v = serde_json::to_value(DnsRecordSet::default()).unwrap();
        for key in ["A", "AAAA", "CNAME", "MX", "NS", "TXT", "ALL"] {
            assert!(v.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn http_test_report_flattens_probe_result() {
        let report = HttpTestReport {
            result: HttpProbeResult {
                requested_url: "http://a/".into(),
                final_url: "http://a/".into(),
                ..Default::default()
            },
            diagnosis: None,
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["requestedUrl"], "http://a/");
        assert_eq!(v["redirectCount"], 0);
        assert!(v.get("diagnosis").is_none());
    }
}
