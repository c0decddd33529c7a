//! Client IP resolution.
//!
//! # Design Decisions
//! - Forwarded headers are honoured only when the peer is a trusted proxy
//! - The header is read right to left; trusted proxy hops are skipped and the
//!   first untrusted address is the client, since everything left of it is
//!   client-controlled
//! - When every hop is trusted the leftmost valid address is used
//! - Without a peer or a usable header the IP is the literal `unknown`

use std::net::IpAddr;

use axum::http::HeaderMap;

use crate::config::ClientIpConfig;

/// Placeholder used when no address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

#[derive(Debug, Clone)]
pub struct ClientIpResolver {
    header: String,
    trust_all: bool,
    trusted: Vec<IpAddr>,
}

impl ClientIpResolver {
    pub fn new(config: &ClientIpConfig) -> Self {
        let trust_all = config.trusted_proxies.iter().any(|p| p == "*");
        let trusted = config
            .trusted_proxies
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect();
        Self {
            header: config.header.to_ascii_lowercase(),
            trust_all,
            trusted,
        }
    }

    fn is_trusted(&self, peer: Option<IpAddr>) -> bool {
        match peer {
            Some(ip) => self.is_trusted_ip(ip),
            None => self.trust_all,
        }
    }

    fn is_trusted_ip(&self, ip: IpAddr) -> bool {
        self.trust_all || self.trusted.contains(&ip.to_canonical())
    }

    /// Resolve the originating client address.
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
        if self.is_trusted(peer) {
            let hops: Vec<IpAddr> = headers
                .get_all(self.header.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .filter_map(|part| part.trim().parse::<IpAddr>().ok())
                .map(|ip| ip.to_canonical())
                .collect();
            let client = hops
                .iter()
                .rev()
                .find(|ip| !self.is_trusted_ip(**ip))
                .or_else(|| hops.first());
            if let Some(ip) = client {
                return ip.to_string();
            }
        }

        peer.map(|ip| ip.to_canonical().to_string())
            .unwrap_or_else(|| UNKNOWN_IP.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(xff: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("x-forwarded-for", HeaderValue::from_str(xff).unwrap());
        map
    }

    fn loopback() -> Option<IpAddr> {
        Some("127.0.0.1".parse().unwrap())
    }

    #[test]
    fn test_trusted_proxy_header_is_used() {
        let resolver = ClientIpResolver::new(&ClientIpConfig::default());
        let ip = resolver.resolve(&headers("garbage, 203.0.113.5"), loopback());
        assert_eq!(ip, "203.0.113.5");
    }

    #[test]
    fn test_client_supplied_prefix_is_ignored() {
        let resolver = ClientIpResolver::new(&ClientIpConfig::default());
        assert_eq!(resolver.resolve(&headers("10.9.9.1, 203.0.113.9"), loopback()), "203.0.113.9");
        assert_eq!(resolver.resolve(&headers("10.9.9.2, 203.0.113.9"), loopback()), "203.0.113.9");
    }

    #[test]
    fn test_trusted_hops_are_skipped() {
        let resolver = ClientIpResolver::new(&ClientIpConfig {
            trusted_proxies: vec!["127.0.0.1".into(), "10.0.0.1".into()],
            ..Default::default()
        });
        let ip = resolver.resolve(&headers("198.51.100.4, 203.0.113.9, 10.0.0.1"), loopback());
        assert_eq!(ip, "203.0.113.9");

        // Every hop trusted: fall back to the leftmost.
        let ip = resolver.resolve(&headers("10.0.0.1, 127.0.0.1"), loopback());
        assert_eq!(ip, "10.0.0.1");
    }

    #[test]
    fn test_spoofed_prefix_cannot_evade_brute_force() {
        use crate::config::TrackerConfig;
        use crate::security::tracker::BehavioralTracker;

        let resolver = ClientIpResolver::new(&ClientIpConfig::default());
        let tracker = BehavioralTracker::new(TrackerConfig::default());
        for i in 0..20 {
            let ip = resolver.resolve(&headers(&format!("10.9.9.{i}, 203.0.113.9")), loopback());
            tracker.track_failed_login(&ip, None);
        }
        assert!(tracker.is_blocked("203.0.113.9"));
        assert!(!tracker.is_blocked("10.9.9.0"));
    }

    #[test]
    fn test_untrusted_peer_header_is_ignored() {
        let resolver = ClientIpResolver::new(&ClientIpConfig::default());
        let ip = resolver.resolve(&headers("203.0.113.5"), Some("198.51.100.2".parse().unwrap()));
        assert_eq!(ip, "198.51.100.2");
    }

    #[test]
    fn test_unknown_without_peer() {
        let resolver = ClientIpResolver::new(&ClientIpConfig::default());
        assert_eq!(resolver.resolve(&headers("203.0.113.5"), None), UNKNOWN_IP);

        let trust_all = ClientIpResolver::new(&ClientIpConfig {
            trusted_proxies: vec!["*".into()],
            ..Default::default()
        });
        assert_eq!(trust_all.resolve(&headers("203.0.113.5"), None), "203.0.113.5");
        assert_eq!(trust_all.resolve(&HeaderMap::new(), None), UNKNOWN_IP);
    }

    #[test]
    fn test_mapped_ipv4_peer_is_canonical() {
        let resolver = ClientIpResolver::new(&ClientIpConfig::default());
        let peer: IpAddr = "::ffff:127.0.0.1".parse().unwrap();
        assert_eq!(resolver.resolve(&headers("203.0.113.5"), Some(peer)), "203.0.113.5");
    }
}
