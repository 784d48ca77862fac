//! SSRF defense for destination URLs.
//!
//! Destination URLs are attacker-influenced input: a hostile endpoint
//! registration could point the engine at loopback, cloud metadata, or
//! internal services. `UrlGuard` rejects those destinations by scheme and
//! hostname checks plus DNS resolution of every candidate address. It runs
//! at endpoint registration and again immediately before every send, because
//! DNS answers can change in between.

use std::{
    future::Future,
    net::IpAddr,
    pin::Pin,
    sync::Arc,
};

use tracing::warn;
use url::{Host, Url};

use crate::error::{DeliveryError, Result};

/// Hostname fragments that are rejected outright, before any DNS lookup.
///
/// Substring matching is deliberate: `metadata.internal.example` and
/// `localhost.evil.example` are both rejected.
const BLOCKED_HOST_KEYWORDS: &[&str] =
    &["localhost", "local", "internal", "intranet", "private", "admin", "metadata"];

/// Resolves a hostname to candidate addresses.
///
/// Split out from `UrlGuard` so tests can map hostnames to fixed addresses
/// without touching real DNS.
pub trait HostResolver: Send + Sync + std::fmt::Debug {
    /// Resolves a hostname to all its addresses.
    fn resolve(
        &self,
        host: &str,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<IpAddr>>> + Send + '_>>;
}

/// Resolver backed by the operating system, via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(
        &self,
        host: &str,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<IpAddr>>> + Send + '_>> {
        // lookup_host needs a port; 0 is discarded with the SocketAddr.
        let target = format!("{host}:0");
        Box::pin(async move {
            let addrs = tokio::net::lookup_host(&target).await?;
            Ok(addrs.map(|a| a.ip()).collect())
        })
    }
}

/// Decides whether a destination URL may be contacted.
///
/// `UrlGuard` is the production implementation. Tests that exercise dispatch
/// mechanics rather than security behavior can substitute a permissive
/// policy.
pub trait DestinationPolicy: Send + Sync + std::fmt::Debug {
    /// Validates a destination URL, returning `SecurityBlocked` on rejection.
    fn check(&self, url: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// SSRF validator for destination URLs.
#[derive(Debug, Clone)]
pub struct UrlGuard {
    resolver: Arc<dyn HostResolver>,
}

impl Default for UrlGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlGuard {
    /// Creates a guard using the system DNS resolver.
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(SystemResolver))
    }

    /// Creates a guard with an injected resolver.
    pub fn with_resolver(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }

    /// Validates a destination URL.
    ///
    /// Rejection reasons, in check order: blank URL, unparseable URL,
    /// non-HTTP scheme, missing hostname, blocked hostname keyword, DNS
    /// failure, no resolved addresses, or any candidate address falling in a
    /// blocked range. A URL passing here is safe to contact right now; the
    /// verdict is not durable.
    pub async fn validate(&self, url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(DeliveryError::security_blocked("URL cannot be blank"));
        }

        let parsed = parse_lenient(url)?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(DeliveryError::security_blocked(format!(
                "URL must use HTTP or HTTPS, got {scheme}"
            )));
        }

        let host = parsed
            .host()
            .ok_or_else(|| DeliveryError::security_blocked("URL must include a hostname"))?;

        match host {
            Host::Ipv4(addr) => self.check_ip(IpAddr::V4(addr), url),
            Host::Ipv6(addr) => self.check_ip(IpAddr::V6(addr), url),
            Host::Domain(domain) => {
                let lowered = domain.to_ascii_lowercase();
                if let Some(keyword) =
                    BLOCKED_HOST_KEYWORDS.iter().find(|k| lowered.contains(*k))
                {
                    return Err(DeliveryError::security_blocked(format!(
                        "hostname contains blocked keyword {keyword}"
                    )));
                }

                // Resolution failure is a rejection: accepting an unresolvable
                // host would let DNS rebinding pass validation.
                let addrs = self.resolver.resolve(&lowered).await.map_err(|e| {
                    DeliveryError::security_blocked(format!("unable to resolve hostname: {e}"))
                })?;

                if addrs.is_empty() {
                    return Err(DeliveryError::security_blocked(
                        "hostname does not resolve to any addresses",
                    ));
                }

                for addr in addrs {
                    self.check_ip(addr, url)?;
                }

                Ok(())
            },
        }
    }

    fn check_ip(&self, addr: IpAddr, url: &str) -> Result<()> {
        if is_blocked_ip(addr) {
            warn!(address = %addr, url, "destination resolves to blocked address");
            return Err(DeliveryError::security_blocked(format!(
                "destination resolves to blocked address {addr}"
            )));
        }
        Ok(())
    }
}

impl DestinationPolicy for UrlGuard {
    fn check(&self, url: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let url = url.to_string();
        Box::pin(async move { self.validate(&url).await })
    }
}

/// Parses a URL, percent-encoding the path on a second try.
///
/// Unicode paths arrive unencoded from host applications; one encoding pass
/// over everything after the authority recovers them. Anything still
/// unparseable is rejected.
fn parse_lenient(url: &str) -> Result<Url> {
    match Url::parse(url) {
        Ok(parsed) => Ok(parsed),
        Err(first_error) => {
            let Some(scheme_end) = url.find("://") else {
                return Err(DeliveryError::security_blocked(format!(
                    "invalid URL format: {first_error}"
                )));
            };
            let authority_start = scheme_end + 3;
            let tail_start = url[authority_start..]
                .find('/')
                .map_or(url.len(), |i| authority_start + i);

            let encoded = format!("{}{}", &url[..tail_start], encode_tail(&url[tail_start..]));
            Url::parse(&encoded).map_err(|e| {
                DeliveryError::security_blocked(format!("invalid URL format: {e}"))
            })
        },
    }
}

/// Percent-encodes bytes outside the URL-safe set.
fn encode_tail(tail: &str) -> String {
    let mut out = String::with_capacity(tail.len());
    for byte in tail.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-' | b'_' | b'.' | b'~' | b'/' | b'?' | b'&' | b'=' | b'%' | b'#'
            | b':' | b'@' | b'+' | b',' | b';' => out.push(char::from(byte)),
            _ => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            },
        }
    }
    out
}

/// Returns true for addresses the engine must never contact.
///
/// IPv4: this-network (0/8), loopback, RFC 1918, link-local, carrier-grade
/// NAT (100.64/10), multicast (224/4), and reserved (240/4, including
/// broadcast). IPv6: loopback, unspecified, unique-local (fc00::/7),
/// link-local (fe80::/10), and IPv4-mapped forms of any blocked IPv4
/// address.
pub fn is_blocked_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 0
                || v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
                || v4.is_multicast()
                || octets[0] >= 240
        },
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_ip(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        },
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    /// Resolver returning fixed addresses per hostname.
    #[derive(Debug, Default)]
    struct FixedResolver {
        entries: std::collections::HashMap<String, Vec<IpAddr>>,
    }

    impl FixedResolver {
        fn with(host: &str, addrs: &[IpAddr]) -> Arc<Self> {
            let mut entries = std::collections::HashMap::new();
            entries.insert(host.to_string(), addrs.to_vec());
            Arc::new(Self { entries })
        }
    }

    impl HostResolver for FixedResolver {
        fn resolve(
            &self,
            host: &str,
        ) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<IpAddr>>> + Send + '_>> {
            let result = self.entries.get(host).cloned().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such host")
            });
            Box::pin(async move { result })
        }
    }

    fn public_v4() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))
    }

    #[tokio::test]
    async fn accepts_public_destination() {
        let guard =
            UrlGuard::with_resolver(FixedResolver::with("example.com", &[public_v4()]));
        guard.validate("https://example.com/hooks").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_blank_and_malformed_urls() {
        let guard = UrlGuard::with_resolver(FixedResolver::with("example.com", &[public_v4()]));

        assert!(guard.validate("").await.is_err());
        assert!(guard.validate("   ").await.is_err());
        assert!(guard.validate("not a url").await.is_err());
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let guard = UrlGuard::with_resolver(FixedResolver::with("example.com", &[public_v4()]));

        for url in ["ftp://example.com/x", "file:///etc/passwd", "gopher://example.com"] {
            let err = guard.validate(url).await.unwrap_err();
            assert!(matches!(err, DeliveryError::SecurityBlocked { .. }), "{url}");
        }
    }

    #[tokio::test]
    async fn rejects_blocked_hostname_keywords() {
        let guard = UrlGuard::with_resolver(FixedResolver::with("example.com", &[public_v4()]));

        for url in [
            "http://localhost/hook",
            "http://metadata.google.example/compute",
            "https://admin.example.com/hook",
            "https://api.internal.example.com/hook",
            "https://intranet.example.com/hook",
        ] {
            let err = guard.validate(url).await.unwrap_err();
            assert!(matches!(err, DeliveryError::SecurityBlocked { .. }), "{url}");
        }
    }

    #[tokio::test]
    async fn rejects_literal_blocked_addresses() {
        let guard = UrlGuard::with_resolver(FixedResolver::with("example.com", &[public_v4()]));

        for url in [
            "http://127.0.0.1/hook",
            "http://10.1.2.3/hook",
            "http://172.20.0.1/hook",
            "http://192.168.1.1/hook",
            "http://169.254.169.254/latest/meta-data",
            "http://100.64.0.1/hook",
            "http://224.0.0.1/hook",
            "http://255.255.255.255/hook",
            "http://0.0.0.0/hook",
            "http://[::1]/hook",
            "http://[fc00::1]/hook",
            "http://[fe80::1]/hook",
            "http://[::ffff:10.0.0.1]/hook",
        ] {
            let err = guard.validate(url).await.unwrap_err();
            assert!(matches!(err, DeliveryError::SecurityBlocked { .. }), "{url}");
        }
    }

    #[tokio::test]
    async fn rejects_hostname_resolving_to_blocked_address() {
        let internal = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let guard = UrlGuard::with_resolver(FixedResolver::with("rebind.example.com", &[internal]));

        let err = guard.validate("https://rebind.example.com/hook").await.unwrap_err();
        assert!(matches!(err, DeliveryError::SecurityBlocked { .. }));
    }

    #[tokio::test]
    async fn rejects_when_any_resolved_address_is_blocked() {
        // A host answering with one public and one loopback address is a
        // rebinding attempt, not a safe destination.
        let addrs = [public_v4(), IpAddr::V4(Ipv4Addr::LOCALHOST)];
        let guard = UrlGuard::with_resolver(FixedResolver::with("mixed.example.com", &addrs));

        assert!(guard.validate("https://mixed.example.com/hook").await.is_err());
    }

    #[tokio::test]
    async fn rejects_unresolvable_hostname() {
        let guard = UrlGuard::with_resolver(FixedResolver::with("example.com", &[public_v4()]));

        let err = guard.validate("https://unknown.example.org/hook").await.unwrap_err();
        assert!(matches!(err, DeliveryError::SecurityBlocked { .. }));
    }

    #[tokio::test]
    async fn recovers_unicode_paths_by_encoding() {
        let guard = UrlGuard::with_resolver(FixedResolver::with("example.com", &[public_v4()]));
        guard.validate("https://example.com/hooks/événement").await.unwrap();
    }

    #[test]
    fn blocked_ranges_cover_reserved_networks() {
        let blocked = [
            IpAddr::V4(Ipv4Addr::new(0, 1, 2, 3)),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(172, 31, 255, 255)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254)),
            IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(100, 127, 255, 255)),
            IpAddr::V4(Ipv4Addr::new(224, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(240, 0, 0, 1)),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V6(Ipv6Addr::new(0xfd12, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
        ];
        for addr in blocked {
            assert!(is_blocked_ip(addr), "{addr} should be blocked");
        }

        let allowed = [
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            IpAddr::V4(Ipv4Addr::new(172, 15, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(172, 32, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(100, 63, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(100, 128, 0, 1)),
            IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)),
        ];
        for addr in allowed {
            assert!(!is_blocked_ip(addr), "{addr} should be allowed");
        }
    }
}
