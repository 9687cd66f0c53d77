//! Single TCP connect probe and its three-way classification.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::{self, Instant};
use tracing::trace;

use crate::resolver::strip_brackets;
use crate::types::{PortResponse, PortResult, PortStatus, ProbeDuration};

/// Terminal event of one connect attempt.
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected,
    Failed(io::Error),
    TimedOut,
    Unresolved(io::Error),
}

/// Attempt one TCP connection to `host:port` and classify the outcome.
///
/// Never fails: every outcome, including name resolution failure, becomes a
/// `PortResult`. `timeout` bounds resolution and connect together, and the
/// socket is released on every path.
pub async fn probe_port(host: &str, port: u16, timeout: Duration) -> PortResult {
    let start = Instant::now();
    let outcome = match time::timeout(timeout, connect(host, port)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            ConnectOutcome::Connected
        }
        Ok(Err(outcome)) => outcome,
        // Dropping the pending connect future closes its socket.
        Err(_) => ConnectOutcome::TimedOut,
    };
    let result = classify(port, outcome, start.elapsed());
    trace!(host, port, status = ?result.status, "probe finished");
    result
}

/// Map a connect outcome onto status, response and error code.
pub fn classify(port: u16, outcome: ConnectOutcome, elapsed: Duration) -> PortResult {
    let ms = ProbeDuration::Millis(elapsed.as_millis() as u64);
    let (status, response, duration, error_code) = match outcome {
        ConnectOutcome::Connected => (PortStatus::Open, PortResponse::Responded, ms, None),
        ConnectOutcome::TimedOut => (
            PortStatus::Filtered,
            PortResponse::NoResponse,
            ProbeDuration::Timeout,
            Some("ETIMEDOUT".to_string()),
        ),
        ConnectOutcome::Unresolved(_) => (
            PortStatus::Filtered,
            PortResponse::NoResponse,
            ms,
            Some("ENOTFOUND".to_string()),
        ),
        ConnectOutcome::Failed(e) if e.kind() == io::ErrorKind::ConnectionRefused => (
            PortStatus::Closed,
            PortResponse::Responded,
            ms,
            Some(error_code(&e)),
        ),
        // Unreachable, timed out at the OS level, or anything else.
        ConnectOutcome::Failed(e) => (
            PortStatus::Filtered,
            PortResponse::NoResponse,
            ms,
            Some(error_code(&e)),
        ),
    };
    PortResult {
        port,
        status,
        response,
        duration_ms: Some(duration),
        error_code,
    }
}

/// errno-style name for a socket error.
pub fn error_code(e: &io::Error) -> String {
    use io::ErrorKind::*;
    let code = match e.kind() {
        ConnectionRefused => "ECONNREFUSED",
        TimedOut => "ETIMEDOUT",
        HostUnreachable => "EHOSTUNREACH",
        NetworkUnreachable => "ENETUNREACH",
        ConnectionReset => "ECONNRESET",
        ConnectionAborted => "ECONNABORTED",
        AddrNotAvailable => "EADDRNOTAVAIL",
        PermissionDenied => "EACCES",
        _ => {
            return e
                .raw_os_error()
                .map(|n| format!("ERRNO_{n}"))
                .unwrap_or_else(|| "EUNKNOWN".to_string())
        }
    };
    code.to_string()
}

async fn connect(host: &str, port: u16) -> Result<TcpStream, ConnectOutcome> {
    let host = strip_brackets(host.trim());
    if let Ok(ip) = host.parse::<IpAddr>() {
        return TcpStream::connect(SocketAddr::new(ip, port))
            .await
            .map_err(ConnectOutcome::Failed);
    }

    let addrs = lookup_host((host, port))
        .await
        .map_err(ConnectOutcome::Unresolved)?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) => ConnectOutcome::Failed(e),
        None => ConnectOutcome::Unresolved(io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses returned",
        )),
    })
}
