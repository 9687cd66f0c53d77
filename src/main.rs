use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use reach_diag::config::{timeout_from_millis, AppConfig};
use reach_diag::diagnosis::DiagnosisCorrelator;
use reach_diag::http_probe::{self, HttpProbe, HttpProbeRequest};
use reach_diag::public_ip::PublicIpDiscoverer;
use reach_diag::types::{PortResponse, PortStatus, PublicAddress, ScanReport};
use reach_diag::{dns_records, ports, scanner, server};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Level};
use tracing_subscriber::EnvFilter;

/// Find out whether, and why, a host or URL is unreachable.
#[derive(Debug, Parser)]
#[command(name = "reach-diag", version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct Tuning {
    /// Default per-port connect timeout in milliseconds.
    #[arg(long = "scan-timeout-ms", env = "REACH_DIAG_SCAN_TIMEOUT_MS", default_value_t = 3000, global = true)]
    scan_timeout_ms: u64,

    /// Maximum number of ports accepted in one scan.
    #[arg(long, env = "REACH_DIAG_MAX_PORTS", default_value_t = 1024, global = true)]
    max_ports: usize,

    /// Maximum simultaneous connects within one scan.
    #[arg(long, env = "REACH_DIAG_CONCURRENCY", default_value_t = 1024, global = true)]
    concurrency: usize,

    /// Connect timeout of the port stage of a diagnosis, in milliseconds.
    #[arg(long = "diagnosis-timeout-ms", env = "REACH_DIAG_DIAGNOSIS_TIMEOUT_MS", default_value_t = 5000, global = true)]
    diagnosis_timeout_ms: u64,

    /// Delay between attempts against the same public-IP echo service, in milliseconds.
    #[arg(long = "ip-retry-delay-ms", env = "REACH_DIAG_IP_RETRY_DELAY_MS", default_value_t = 1000, global = true)]
    ip_retry_delay_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the JSON API.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "REACH_DIAG_BIND", default_value = "127.0.0.1:3001")]
        bind: SocketAddr,

        /// Directory of static UI files served for non-API paths.
        #[arg(long = "ui-dir", env = "REACH_DIAG_UI_DIR")]
        ui_dir: Option<PathBuf>,
    },
    /// Scan TCP ports on one host.
    Scan {
        host: String,

        /// Ports, e.g. `22,80,443,8000-8010`. Defaults to the common-port presets.
        #[arg(long, short)]
        ports: Option<String>,

        /// File with one port or range per line.
        #[arg(long = "ports-file", conflicts_with = "ports")]
        ports_file: Option<PathBuf>,

        /// Write the report as pretty JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Probe a URL, chasing redirects, and diagnose failures.
    Http {
        url: String,

        #[arg(long, short = 'X', default_value = "GET")]
        method: String,

        /// Request timeout in milliseconds.
        #[arg(long = "timeout-ms", default_value_t = 10_000)]
        timeout_ms: u64,

        #[arg(long = "no-follow")]
        no_follow: bool,

        #[arg(long = "no-diagnose")]
        no_diagnose: bool,
    },
    /// Discover this machine's public IPv4 and IPv6 addresses.
    Ip,
    /// Run the DNS, connectivity and port checks against host:port.
    Diagnose { host: String, port: u16 },
    /// List DNS records for a hostname.
    Dns { hostname: String },
}

impl Tuning {
    fn into_config(self) -> Result<AppConfig> {
        let defaults = AppConfig::default();
        let mut config = AppConfig {
            scan_timeout: timeout_from_millis(Some(self.scan_timeout_ms), defaults.scan_timeout)?,
            max_ports: self.max_ports,
            scan_concurrency: self.concurrency,
            diagnosis_port_timeout: timeout_from_millis(
                Some(self.diagnosis_timeout_ms),
                defaults.diagnosis_port_timeout,
            )?,
            ..defaults
        };
        config.discovery.retry_delay = Duration::from_millis(self.ip_retry_delay_ms);
        Ok(config)
    }
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let mut config = cli.tuning.into_config()?;

    match cli.command {
        Command::Serve { bind, ui_dir } => {
            config.bind = bind;
            config.ui_dir = ui_dir;
            config.validate()?;

            let shutdown = CancellationToken::new();
            let ctrlc = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrlc.cancel();
                }
            });
            println!("API listening on http://{} (Ctrl+C to stop)", config.bind);
            server::spawn_server(config, shutdown).await?;
        }
        Command::Scan {
            host,
            ports: spec,
            ports_file,
            output,
        } => {
            config.validate()?;
            let ports = match (spec, ports_file) {
                (Some(s), _) => ports::parse_ports_str(&s)?,
                (None, Some(path)) => ports::load_ports_from_path(path)?,
                (None, None) => ports::default_ports(),
            };
            if ports.is_empty() {
                bail!("no ports to scan");
            }
            if ports.len() > config.max_ports {
                bail!(
                    "{} ports requested, at most {} allowed (see --max-ports)",
                    ports.len(),
                    config.max_ports
                );
            }
            let report =
                scanner::scan_host(&host, &ports, config.scan_concurrency, config.scan_timeout)
                    .await?;
            print_results_table(&report);
            if let Some(path) = output.as_deref() {
                if let Err(e) = write_json(path, &report) {
                    eprintln!("Failed to write JSON to {}: {}", path.display(), e);
                } else {
                    println!("Wrote JSON results to {}", path.display());
                }
            }
        }
        Command::Http {
            url,
            method,
            timeout_ms,
            no_follow,
            no_diagnose,
        } => {
            config.validate()?;
            let timeout = timeout_from_millis(Some(timeout_ms), config.http_timeout)?;
            let req = HttpProbeRequest::new(&url, Some(method.as_str()), timeout, !no_follow)?;
            let probe = HttpProbe::new()?;
            let correlator = DiagnosisCorrelator::new(config.diagnosis_port_timeout);
            let report = http_probe::http_test(&probe, &correlator, &req, !no_diagnose).await;
            if !report.result.success {
                warn!(url = %url, "request failed");
            }
            print_json(&report)?;
        }
        Command::Ip => {
            let discoverer = PublicIpDiscoverer::new(config.discovery)?;
            let result = discoverer.discover_all().await;
            let show = |list: &[PublicAddress]| {
                list.first()
                    .map(|a| a.address.clone())
                    .unwrap_or_else(|| "undetected".to_string())
            };
            println!("IPv4: {}", show(result.ipv4.as_slice()));
            println!("IPv6: {}", show(result.ipv6.as_slice()));
        }
        Command::Diagnose { host, port } => {
            config.validate()?;
            let correlator = DiagnosisCorrelator::new(config.diagnosis_port_timeout);
            print_json(&correlator.diagnose(&host, port).await)?;
        }
        Command::Dns { hostname } => {
            print_json(&dns_records::lookup_records(&hostname).await?)?;
        }
    }

    Ok(())
}

fn print_results_table(report: &ScanReport) {
    let port_w = 5usize;
    let mut service_w = "service".len();
    for r in &report.results {
        service_w = service_w.max(ports::service_name(r.port).unwrap_or("").len());
    }
    let status_w = "filtered".len();
    let response_w = "no_response".len();

    let addrs: Vec<&str> = report
        .resolved_addresses
        .iter()
        .map(|a| a.address.as_str())
        .collect();
    println!("\nHost: {} ({})", report.host, addrs.join(", "));
    println!(
        "Open ports: {} (scanned: {})",
        report.open_count(),
        report.results.len()
    );
    println!(
        "{:>port_w$}  {:<service_w$}  {:<status_w$}  {:<response_w$}  {:>9}  error",
        "port", "service", "status", "response", "duration",
    );
    println!(
        "{:->port_w$}  {:-<service_w$}  {:-<status_w$}  {:-<response_w$}  {:->9}  -----",
        "", "", "", "", "",
    );
    for r in &report.results {
        let status = match r.status {
            PortStatus::Open => "open",
            PortStatus::Closed => "closed",
            PortStatus::Filtered => "filtered",
        };
        let response = match r.response {
            PortResponse::Responded => "responded",
            PortResponse::NoResponse => "no_response",
        };
        let duration = r.duration_ms.map(|d| d.to_string()).unwrap_or_default();
        println!(
            "{:>port_w$}  {:<service_w$}  {:<status_w$}  {:<response_w$}  {:>9}  {}",
            r.port,
            ports::service_name(r.port).unwrap_or(""),
            status,
            response,
            duration,
            r.error_code.as_deref().unwrap_or(""),
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}
