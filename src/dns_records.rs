//! Record-type enumeration for one hostname.
//!
//! A thin pass-through to hickory-resolver: every record type is queried
//! independently and a failed lookup simply yields an empty list.

use std::sync::LazyLock;

use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::rr::RecordType,
    TokioResolver,
};
use tracing::warn;

use crate::error::{DiagError, Result};
use crate::resolver::resolve_host;
use crate::scanner::now_rfc3339;
use crate::types::{DnsRecordSet, DnsRecordsReport, MxRecord};

/// Resolver built from the host system configuration, falling back to
/// hickory's defaults when that cannot be read.
static SYSTEM_RESOLVER: LazyLock<TokioResolver> = LazyLock::new(|| {
    match TokioResolver::builder_tokio() {
        Ok(builder) => builder.build(),
        Err(e) => {
            warn!("failed to load system DNS configuration, using defaults: {e}");
            TokioResolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .with_options(ResolverOpts::default())
            .build()
        }
    }
});

pub async fn lookup_records(hostname: &str) -> Result<DnsRecordsReport> {
    let hostname = hostname.trim();
    if hostname.is_empty() {
        return Err(DiagError::validation("hostname is required"));
    }
    let resolver = &*SYSTEM_RESOLVER;

    let (a, aaaa, cname, mx, ns, txt, all) = tokio::join!(
        lookup_a(resolver, hostname),
        lookup_aaaa(resolver, hostname),
        lookup_cname(resolver, hostname),
        lookup_mx(resolver, hostname),
        lookup_ns(resolver, hostname),
        lookup_txt(resolver, hostname),
        resolve_host(hostname),
    );

    Ok(DnsRecordsReport {
        hostname: hostname.to_string(),
        timestamp: now_rfc3339(),
        records: DnsRecordSet {
            a,
            aaaa,
            cname,
            mx,
            ns,
            txt,
            all: all.unwrap_or_default(),
        },
    })
}

fn trim_root(name: String) -> String {
    name.trim_end_matches('.').to_string()
}

async fn lookup_a(resolver: &TokioResolver, name: &str) -> Vec<String> {
    match resolver.ipv4_lookup(name).await {
        Ok(response) => response.iter().map(|ip| ip.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_aaaa(resolver: &TokioResolver, name: &str) -> Vec<String> {
    match resolver.ipv6_lookup(name).await {
        Ok(response) => response.iter().map(|ip| ip.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_cname(resolver: &TokioResolver, name: &str) -> Vec<String> {
    match resolver.lookup(name, RecordType::CNAME).await {
        Ok(response) => response
            .record_iter()
            .filter_map(|record| record.data().as_cname())
            .map(|cname| trim_root(cname.0.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_mx(resolver: &TokioResolver, name: &str) -> Vec<MxRecord> {
    match resolver.mx_lookup(name).await {
        Ok(response) => response
            .iter()
            .map(|mx| MxRecord {
                priority: mx.preference(),
                exchange: trim_root(mx.exchange().to_string()),
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_ns(resolver: &TokioResolver, name: &str) -> Vec<String> {
    match resolver.ns_lookup(name).await {
        Ok(response) => response
            .iter()
            .map(|ns| trim_root(ns.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_txt(resolver: &TokioResolver, name: &str) -> Vec<String> {
    match resolver.txt_lookup(name).await {
        Ok(response) => response
            .iter()
            .map(|txt| {
                txt.iter()
                    .map(|data| String::from_utf8_lossy(data).into_owned())
                    .collect::<String>()
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}
