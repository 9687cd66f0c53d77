//! Wrappers around the platform `ping` and `mtr` binaries.
//!
//! Output is captured verbatim; only the exit status is interpreted.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

use crate::error::{DiagError, Result};
use crate::scanner::now_rfc3339;
use crate::types::{AddressFamily, CommandReport, ConnectivityStage};

pub const MAX_COUNT: u32 = 100;

const MTR_HINT: &str = "macOS: brew install mtr, Linux: apt-get install mtr-tiny";

/// Lightweight reachability check used by the diagnosis correlator.
#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    async fn check(&self, host: &str, family: AddressFamily) -> ConnectivityStage;
}

/// Connectivity check backed by a short `ping` run.
#[derive(Debug, Clone)]
pub struct PingCheck {
    pub count: u32,
    pub timeout: Duration,
}

impl Default for PingCheck {
    fn default() -> Self {
        Self {
            count: 2,
            timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl ConnectivityCheck for PingCheck {
    async fn check(&self, host: &str, family: AddressFamily) -> ConnectivityStage {
        match run_ping(host, self.count, family, self.timeout).await {
            Ok(report) => ConnectivityStage {
                success: report.success,
                output: Some(report.output),
                error: report.error,
            },
            Err(e) => ConnectivityStage {
                success: false,
                output: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Reject anything that could be read as a command-line option or is not
/// plausibly a hostname or address.
pub fn validate_host(host: &str) -> Result<&str> {
    let host = host.trim();
    if host.is_empty() {
        return Err(DiagError::validation("host is required"));
    }
    if host.starts_with('-')
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_' | '%'))
    {
        return Err(DiagError::validation(format!("invalid host: {host}")));
    }
    Ok(host)
}

pub fn validate_count(count: u32) -> Result<u32> {
    if count == 0 || count > MAX_COUNT {
        return Err(DiagError::validation(format!(
            "count must be between 1 and {MAX_COUNT}"
        )));
    }
    Ok(count)
}

/// Program and arguments for pinging `host` on the current platform.
pub fn ping_command(host: &str, count: u32, family: AddressFamily) -> (&'static str, Vec<String>) {
    let count = count.to_string();
    let v6 = family == AddressFamily::IPv6;
    if cfg!(target_os = "windows") {
        let mut args = vec!["-n".to_string(), count];
        if v6 {
            args.push("-6".into());
        }
        args.push(host.to_string());
        ("ping", args)
    } else if cfg!(target_os = "macos") {
        let program = if v6 { "ping6" } else { "ping" };
        (program, vec!["-c".into(), count, host.to_string()])
    } else {
        let mut args = vec!["-c".to_string(), count];
        if v6 {
            args.push("-6".into());
        }
        args.push(host.to_string());
        ("ping", args)
    }
}

pub async fn run_ping(
    host: &str,
    count: u32,
    family: AddressFamily,
    timeout: Duration,
) -> Result<CommandReport> {
    let host = validate_host(host)?;
    let count = validate_count(count)?;
    let (program, args) = ping_command(host, count, family);
    let output = run_command(program, &args, timeout).await?;
    Ok(output.into_report(host, count))
}

pub async fn run_mtr(host: &str, count: u32, timeout: Duration) -> Result<CommandReport> {
    let host = validate_host(host)?;
    let count = validate_count(count)?;
    let args = vec![
        "--report".to_string(),
        "--report-cycles".to_string(),
        count.to_string(),
        host.to_string(),
    ];
    let output = run_command("mtr", &args, timeout)
        .await
        .map_err(|e| match e {
            DiagError::Io(err) if err.kind() == io::ErrorKind::NotFound => DiagError::Command {
                message: "mtr is not installed on this system".into(),
                output: String::new(),
                hint: Some(MTR_HINT.into()),
            },
            other => other,
        })?;
    Ok(output.into_report(host, count))
}

struct CommandOutput {
    success: bool,
    status: String,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn into_report(self, host: &str, count: u32) -> CommandReport {
        let (output, error) = if self.success {
            (self.stdout, None)
        } else {
            let output = if self.stderr.trim().is_empty() {
                self.stdout
            } else {
                self.stderr
            };
            (output, Some(format!("command failed: {}", self.status)))
        };
        CommandReport {
            host: host.to_string(),
            count,
            timestamp: now_rfc3339(),
            success: self.success,
            output,
            error,
        }
    }
}

async fn run_command(program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
    debug!(program, ?args, "running command");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match time::timeout(timeout, child.wait_with_output()).await {
        Ok(res) => res?,
        Err(_) => {
            warn!(program, timeout_s = timeout.as_secs(), "command timed out");
            return Err(DiagError::Command {
                message: format!("{program} timed out after {}s", timeout.as_secs()),
                output: String::new(),
                hint: None,
            });
        }
    };

    Ok(CommandOutput {
        success: output.status.success(),
        status: output.status.to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
