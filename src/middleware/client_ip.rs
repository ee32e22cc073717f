//! Client IP extraction behind reverse proxies.
//!
//! Per-IP buckets, the login guard and session IP pinning all key on the
//! address resolved here, so forwarded headers are only believed when the
//! direct peer is a configured proxy.

use std::net::{IpAddr, SocketAddr};

use axum::{extract::ConnectInfo, http::HeaderMap};
use ipnet::IpNet;

use crate::config::TrustedProxiesConfig;

/// Resolved client address of the current request, set by the request-id
/// stage. `None` only when no connection info is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

/// Trusted proxy policy with CIDRs parsed once at startup.
#[derive(Debug, Clone)]
pub struct ClientIpResolver {
    config: TrustedProxiesConfig,
    cidrs: Vec<IpNet>,
}

impl ClientIpResolver {
    pub fn new(config: TrustedProxiesConfig) -> Self {
        let cidrs = config.parsed_cidrs();
        Self { config, cidrs }
    }

    /// Resolve from a request's headers and connection info.
    pub fn resolve(
        &self,
        headers: &HeaderMap,
        connect_info: Option<&ConnectInfo<SocketAddr>>,
    ) -> Option<IpAddr> {
        let connecting_ip = connect_info.map(|ci| ci.0.ip());

        if !self.config.is_configured() {
            return connecting_ip;
        }

        let trust_headers = match connecting_ip {
            Some(ip) => self.config.is_trusted_ip(ip, &self.cidrs),
            // Only reachable without a socket, e.g. in-process tests
            None => self.config.dangerously_trust_all,
        };

        if !trust_headers {
            if let Some(ip) = connecting_ip
                && headers.contains_key(&self.config.real_ip_header)
            {
                tracing::debug!(
                    connecting_ip = %ip,
                    header = %self.config.real_ip_header,
                    "Ignoring proxy header from untrusted peer"
                );
            }
            return connecting_ip;
        }

        self.from_forwarded(headers)
            .or_else(|| {
                headers
                    .get("X-Real-IP")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse().ok())
            })
            .or(connecting_ip)
    }

    /// Walk the forwarded chain right to left and return the first hop that
    /// is not one of our proxies. Entries further left were written by the
    /// client and cannot be believed.
    fn from_forwarded(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let value = headers.get(&self.config.real_ip_header)?.to_str().ok()?;
        let ips: Vec<IpAddr> = value
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();

        if self.config.dangerously_trust_all {
            return ips.first().copied();
        }

        ips.into_iter()
            .rev()
            .find(|&ip| !self.config.is_trusted_ip(ip, &self.cidrs))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn resolver(cidrs: &[&str], trust_all: bool) -> ClientIpResolver {
        ClientIpResolver::new(TrustedProxiesConfig {
            dangerously_trust_all: trust_all,
            cidrs: cidrs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    fn peer(addr: &str) -> ConnectInfo<SocketAddr> {
        ConnectInfo(format!("{addr}:40000").parse().unwrap())
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_no_proxy_config_uses_peer() {
        let r = resolver(&[], false);
        let h = headers(&[("x-forwarded-for", "1.2.3.4")]);
        assert_eq!(r.resolve(&h, Some(&peer("10.0.0.5"))), ip("10.0.0.5"));
    }

    #[test]
    fn test_untrusted_peer_headers_ignored() {
        let r = resolver(&["10.0.0.0/8"], false);
        let h = headers(&[("x-forwarded-for", "1.2.3.4"), ("x-real-ip", "5.6.7.8")]);
        assert_eq!(r.resolve(&h, Some(&peer("203.0.113.50"))), ip("203.0.113.50"));
    }

    #[test]
    fn test_trusted_peer_single_hop() {
        let r = resolver(&["10.0.0.0/8"], false);
        let h = headers(&[("x-forwarded-for", "198.51.100.7")]);
        assert_eq!(r.resolve(&h, Some(&peer("10.0.0.1"))), ip("198.51.100.7"));
    }

    #[test]
    fn test_spoofed_leftmost_entry_skipped() {
        let r = resolver(&["10.0.0.0/8"], false);
        // Client sent "1.1.1.1"; the proxy appended the real address
        let h = headers(&[("x-forwarded-for", "1.1.1.1, 198.51.100.7, 10.0.0.2")]);
        assert_eq!(r.resolve(&h, Some(&peer("10.0.0.1"))), ip("198.51.100.7"));
    }

    #[test]
    fn test_all_hops_trusted_falls_back_to_peer() {
        let r = resolver(&["10.0.0.0/8"], false);
        let h = headers(&[("x-forwarded-for", "10.0.0.3, 10.0.0.2")]);
        assert_eq!(r.resolve(&h, Some(&peer("10.0.0.1"))), ip("10.0.0.1"));
    }

    #[test]
    fn test_real_ip_fallback() {
        let r = resolver(&["10.0.0.0/8"], false);
        let h = headers(&[("x-real-ip", " 198.51.100.9 ")]);
        assert_eq!(r.resolve(&h, Some(&peer("10.0.0.1"))), ip("198.51.100.9"));
    }

    #[test]
    fn test_garbage_entries_ignored() {
        let r = resolver(&["10.0.0.0/8"], false);
        let h = headers(&[("x-forwarded-for", "unknown, 198.51.100.7, not-an-ip")]);
        assert_eq!(r.resolve(&h, Some(&peer("10.0.0.1"))), ip("198.51.100.7"));
    }

    #[test]
    fn test_trust_all_takes_leftmost() {
        let r = resolver(&[], true);
        let h = headers(&[("x-forwarded-for", "1.1.1.1, 2.2.2.2")]);
        assert_eq!(r.resolve(&h, Some(&peer("203.0.113.1"))), ip("1.1.1.1"));
        assert_eq!(r.resolve(&h, None), ip("1.1.1.1"));
    }

    #[test]
    fn test_ipv6() {
        let r = resolver(&["fd00::/8"], false);
        let h = headers(&[("x-forwarded-for", "2001:db8::1, fd00::2")]);
        let ci = ConnectInfo("[fd00::1]:443".parse().unwrap());
        assert_eq!(r.resolve(&h, Some(&ci)), ip("2001:db8::1"));
    }

    #[test]
    fn test_no_connect_info_without_trust_all() {
        let r = resolver(&["10.0.0.0/8"], false);
        let h = headers(&[("x-forwarded-for", "1.2.3.4")]);
        assert_eq!(r.resolve(&h, None), None);
    }
}
