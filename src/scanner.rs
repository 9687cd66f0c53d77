use crate::error::{DiagError, Result};
use crate::ports::dedup_ports;
use crate::probe::probe_port;
use crate::resolver::resolve_or_literal;
use crate::types::{PortResult, ScanReport};
use ::time::{format_description::well_known, OffsetDateTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scan `ports` on `host` with one concurrent TCP connect per port.
///
/// - Resolves `host` first; on failure the host string itself is reported as the address.
/// - Repeated ports are probed once.
/// - Each probe owns its own `timeout`; the scan waits for all of them.
/// - Results are sorted by port regardless of completion order.
pub async fn scan_host(
    host: &str,
    ports: &[u16],
    concurrency: usize,
    timeout: Duration,
) -> Result<ScanReport> {
    scan_host_internal(host, ports, concurrency, timeout, None).await
}

/// Variant that accepts a `CancellationToken` to allow external cancellation.
///
/// A cancelled scan yields `DiagError::Cancelled`, never a partial report.
pub async fn scan_host_with_cancel(
    host: &str,
    ports: &[u16],
    concurrency: usize,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<ScanReport> {
    scan_host_internal(host, ports, concurrency, timeout, Some(cancel)).await
}

async fn scan_host_internal(
    host: &str,
    ports: &[u16],
    concurrency: usize,
    timeout: Duration,
    cancel_opt: Option<CancellationToken>,
) -> Result<ScanReport> {
    let host = host.trim();
    if host.is_empty() {
        return Err(DiagError::validation("host must not be empty"));
    }
    let ports = dedup_ports(ports);
    let cancel = cancel_opt.unwrap_or_default();

    let resolved_addresses = resolve_or_literal(host).await;
    info!(
        host,
        ports = ports.len(),
        timeout_ms = timeout.as_millis() as u64,
        "starting port scan"
    );

    let sem = Arc::new(Semaphore::new(concurrency.clamp(1, 5_000)));
    let mut set: JoinSet<PortResult> = JoinSet::new();

    for &port in &ports {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DiagError::Cancelled),
            permit = sem.clone().acquire_owned() => permit.map_err(|_| DiagError::Cancelled)?,
        };
        let host = host.to_string();
        set.spawn(async move {
            let _permit = permit; // keep permit until the probe completes
            probe_port(&host, port, timeout).await
        });
    }

    let mut results = Vec::with_capacity(ports.len());
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(host, "port scan cancelled");
                // Dropping the set aborts the remaining probes.
                return Err(DiagError::Cancelled);
            }
            next = set.join_next() => match next {
                Some(Ok(result)) => results.push(result),
                Some(Err(e)) => {
                    // A probe never panics by contract; surface it if one does.
                    return Err(DiagError::Io(std::io::Error::other(e)));
                }
                None => break,
            },
        }
    }

    results.sort_by_key(|r| r.port);
    let report = ScanReport {
        host: host.to_string(),
        resolved_addresses,
        timestamp: now_rfc3339(),
        results,
    };
    debug!(host, open = report.open_count(), "port scan finished");
    Ok(report)
}

/// RFC3339 UTC timestamp.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
