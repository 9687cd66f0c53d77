//! System name resolution for a single hostname.

use std::net::IpAddr;

use async_trait::async_trait;
use tokio::net::lookup_host;
use tracing::debug;

use crate::error::{DiagError, Result};
use crate::types::{AddressFamily, ResolvedAddress};

/// Resolves a hostname into every address the system resolver knows.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<ResolvedAddress>>;
}

/// Resolver backed by the platform's `getaddrinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl AddressResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<ResolvedAddress>> {
        resolve_host(host).await
    }
}

/// Resolve all A/AAAA addresses of `host`, without duplicates, in resolver order.
pub async fn resolve_host(host: &str) -> Result<Vec<ResolvedAddress>> {
    let host = strip_brackets(host.trim());
    if host.is_empty() {
        return Err(DiagError::validation("host must not be empty"));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![to_resolved(ip)]);
    }

    let addrs = lookup_host((host, 0))
        .await
        .map_err(|e| DiagError::Resolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    let mut out: Vec<ResolvedAddress> = Vec::new();
    for addr in addrs {
        let resolved = to_resolved(addr.ip());
        if !out.contains(&resolved) {
            out.push(resolved);
        }
    }
    if out.is_empty() {
        return Err(DiagError::Resolution {
            host: host.to_string(),
            reason: "no addresses returned".into(),
        });
    }
    debug!(host, count = out.len(), "resolved host");
    Ok(out)
}

/// Best-effort resolution: on failure, treat `host` itself as the address.
pub async fn resolve_or_literal(host: &str) -> Vec<ResolvedAddress> {
    match resolve_host(host).await {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!(host, error = %e, "resolution failed, using host literally");
            vec![literal_address(host)]
        }
    }
}

/// Treat `host` as an address, inferring the family from the presence of `:`.
pub fn literal_address(host: &str) -> ResolvedAddress {
    let family = if host.contains(':') {
        AddressFamily::IPv6
    } else {
        AddressFamily::IPv4
    };
    ResolvedAddress {
        address: host.to_string(),
        family,
    }
}

/// `[::1]` as written in URLs becomes `::1`.
pub fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn to_resolved(ip: IpAddr) -> ResolvedAddress {
    ResolvedAddress {
        address: ip.to_string(),
        family: AddressFamily::of(&ip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literal_resolves_to_itself() {
        let addrs = resolve_host("127.0.0.1").await.unwrap();
        assert_eq!(
            addrs,
            vec![ResolvedAddress {
                address: "127.0.0.1".into(),
                family: AddressFamily::IPv4
            }]
        );

        let v6 = resolve_host("[::1]").await.unwrap();
        assert_eq!(v6[0].family, AddressFamily::IPv6);
        assert_eq!(v6[0].address, "::1");
    }

    #[tokio::test]
    async fn empty_host_is_validation_error() {
        assert!(matches!(
            resolve_host("  ").await,
            Err(DiagError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unresolvable_name_falls_back_to_literal() {
        let addrs = resolve_or_literal("no-such-host.invalid").await;
        assert_eq!(addrs, vec![literal_address("no-such-host.invalid")]);
    }

    #[test]
    fn literal_family_inferred_from_colon() {
        assert_eq!(literal_address("fe80::1").family, AddressFamily::IPv6);
        assert_eq!(literal_address("example.com").family, AddressFamily::IPv4);
    }
}
