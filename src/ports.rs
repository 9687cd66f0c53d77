use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

/// Parse a port list such as `22,80,8000-8010` into TCP ports (1..=65535).
///
/// Entries are split on commas and newlines, `#` starts a comment that runs
/// to the end of the line, and `a-b` is an inclusive range. Repeats are
/// dropped; the first occurrence decides the order.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for (line_no, line) in s.lines().enumerate().map(|(i, l)| (i + 1, l)) {
        let content = line.split_once('#').map_or(line, |(before, _)| before);
        for entry in content.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let range = parse_entry(entry).with_context(|| format!("line {line_no}: `{entry}`"))?;
            ports.extend(range);
        }
    }
    Ok(dedup_ports(&ports))
}

fn parse_entry(entry: &str) -> Result<RangeInclusive<u16>> {
    match entry.split_once('-') {
        Some((lo, hi)) => {
            let (lo, hi) = (parse_port(lo)?, parse_port(hi)?);
            if lo > hi {
                bail!("range start {lo} is above its end {hi}");
            }
            Ok(lo..=hi)
        }
        None => {
            let port = parse_port(entry)?;
            Ok(port..=port)
        }
    }
}

fn parse_port(s: &str) -> Result<u16> {
    match s.trim().parse::<u16>() {
        Ok(0) => bail!("port 0 is not scannable"),
        Ok(port) => Ok(port),
        Err(e) => Err(anyhow!("not a port number ({e})")),
    }
}

/// Read a port list from `path`, in the format of [`parse_ports_str`].
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read port list {}", path.display()))?;
    parse_ports_str(&text)
}

/// Drop repeated ports, keeping the first occurrence of each.
pub fn dedup_ports(ports: &[u16]) -> Vec<u16> {
    let mut seen = HashSet::with_capacity(ports.len());
    ports.iter().copied().filter(|p| seen.insert(*p)).collect()
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct NamedPort {
    pub name: &'static str,
    pub port: u16,
}

const COMMON: &[NamedPort] = &[
    NamedPort { name: "HTTP", port: 80 },
    NamedPort { name: "HTTPS", port: 443 },
    NamedPort { name: "SSH", port: 22 },
    NamedPort { name: "FTP", port: 21 },
    NamedPort { name: "Telnet", port: 23 },
    NamedPort { name: "SMTP", port: 25 },
    NamedPort { name: "DNS", port: 53 },
    NamedPort { name: "DHCP", port: 67 },
    NamedPort { name: "TFTP", port: 69 },
    NamedPort { name: "HTTP-Alt", port: 8080 },
    NamedPort { name: "MySQL", port: 3306 },
    NamedPort { name: "PostgreSQL", port: 5432 },
    NamedPort { name: "Redis", port: 6379 },
    NamedPort { name: "MongoDB", port: 27017 },
    NamedPort { name: "RDP", port: 3389 },
];

/// Well-known service ports offered as scan presets.
pub fn common_ports() -> &'static [NamedPort] {
    COMMON
}

/// Port numbers of [`common_ports`], used when a scan names no ports.
pub fn default_ports() -> Vec<u16> {
    COMMON.iter().map(|p| p.port).collect()
}

pub fn service_name(port: u16) -> Option<&'static str> {
    COMMON.iter().find(|p| p.port == port).map(|p| p.name)
}
