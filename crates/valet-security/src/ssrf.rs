// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SSRF-safe DNS resolver that blocks connections to private IP ranges.
//!
//! Implements `reqwest::dns::Resolve` to filter resolved IP addresses before
//! any connection is made, preventing the web-fetch tool from being steered
//! into internal services.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::{error, info};
use valet_core::ValetError;

/// Custom DNS resolver that blocks private/reserved IP addresses.
///
/// When a hostname resolves to a private IP, the connection is blocked
/// unless that IP is in the configured allowlist.
pub struct SsrfSafeResolver {
    allowed_private_ips: Vec<IpAddr>,
}

impl SsrfSafeResolver {
    /// Create a new resolver with the given private IP allowlist.
    pub fn new(allowed: Vec<String>) -> Self {
        let allowed_ips = allowed
            .iter()
            .filter_map(|s| s.parse::<IpAddr>().ok())
            .collect();
        Self {
            allowed_private_ips: allowed_ips,
        }
    }

    /// Check if an IP is in a private or reserved range.
    ///
    /// Blocks: RFC 1918, loopback, link-local, broadcast, unspecified,
    /// cloud metadata endpoint, IPv6 loopback, unique-local, link-local.
    pub fn is_private(ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_unspecified()
                    || *v4 == Ipv4Addr::new(169, 254, 169, 254)
            }
            IpAddr::V6(v6) => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    || (v6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7 unique local
                    || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10 link-local
            }
        }
    }
}

impl Resolve for SsrfSafeResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let allowed = self.allowed_private_ips.clone();
        let hostname = name.as_str().to_string();

        Box::pin(async move {
            let host = format!("{hostname}:0");
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&host)
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?
                .collect();

            let filtered: Vec<SocketAddr> = addrs
                .into_iter()
                .filter(|addr| {
                    let ip = addr.ip();
                    if SsrfSafeResolver::is_private(&ip) {
                        if allowed.contains(&ip) {
                            info!(ip = %ip, host = %hostname, "allowing configured private IP");
                            true
                        } else {
                            error!(ip = %ip, host = %hostname, "SSRF blocked: resolved to private IP");
                            false
                        }
                    } else {
                        true
                    }
                })
                .collect();

            if filtered.is_empty() {
                let err: Box<dyn std::error::Error + Send + Sync> =
                    format!("SSRF blocked: {hostname} resolves only to private IPs").into();
                return Err(err);
            }

            let addrs: Addrs = Box::new(filtered.into_iter());
            Ok(addrs)
        })
    }
}

/// Validate that a URL does not target a private IP.
///
/// Static check on the URL host -- catches literal IP addresses but not
/// hostnames (those are filtered at DNS resolution by [`SsrfSafeResolver`]).
pub fn validate_url_host(url: &str) -> Result<(), ValetError> {
    if let Ok(parsed) = url::Url::parse(url)
        && let Some(host) = parsed.host_str()
        && let Ok(ip) = host.parse::<IpAddr>()
        && SsrfSafeResolver::is_private(&ip)
    {
        error!(ip = %ip, url = %url, "SSRF blocked: URL targets private IP");
        return Err(ValetError::Security(format!(
            "SSRF blocked: URL targets private IP {ip}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn blocks_rfc1918_ranges() {
        for ip in ["10.0.0.1", "172.16.0.1", "192.168.1.1"] {
            let ip: IpAddr = ip.parse().unwrap();
            assert!(SsrfSafeResolver::is_private(&ip), "{ip} should be private");
        }
    }

    #[test]
    fn blocks_loopback_and_metadata() {
        let loopback: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(SsrfSafeResolver::is_private(&loopback));
        let metadata: IpAddr = "169.254.169.254".parse().unwrap();
        assert!(SsrfSafeResolver::is_private(&metadata));
    }

    #[test]
    fn blocks_ipv6_local_ranges() {
        assert!(SsrfSafeResolver::is_private(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
        let ula: IpAddr = "fd00::1".parse().unwrap();
        assert!(SsrfSafeResolver::is_private(&ula));
        let link_local: IpAddr = "fe80::1".parse().unwrap();
        assert!(SsrfSafeResolver::is_private(&link_local));
    }

    #[test]
    fn allows_public_ips() {
        let ip: IpAddr = "93.184.216.34".parse().unwrap();
        assert!(!SsrfSafeResolver::is_private(&ip));
        let v6: IpAddr = "2606:2800:220:1::1".parse().unwrap();
        assert!(!SsrfSafeResolver::is_private(&v6));
    }

    #[test]
    fn validate_url_blocks_private_literal() {
        let err = validate_url_host("http://127.0.0.1:8080/admin").unwrap_err();
        assert_eq!(err.kind(), "security");
        assert!(validate_url_host("http://10.1.2.3/").is_err());
    }

    #[test]
    fn validate_url_allows_public_and_hostnames() {
        assert!(validate_url_host("https://example.com/page").is_ok());
        assert!(validate_url_host("https://93.184.216.34/").is_ok());
    }
}
