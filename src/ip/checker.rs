//! CIDR allow-list matching.
//!
//! # Responsibilities
//! - Parse configured source ranges (CIDR blocks or bare addresses)
//! - Decide whether a candidate client IP falls inside any range
//!
//! # Design Decisions
//! - A bare address is a single-host block (/32 or /128)
//! - One bad entry rejects the whole list; partial allow-lists are never built
//! - Unparsable candidates are unauthorized, never implicitly allowed
//! - IPv4-mapped IPv6 candidates match IPv4 ranges

use std::net::{IpAddr, SocketAddr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// Error building a [`Checker`] from configured ranges.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("no source ranges given")]
    Empty,
    #[error("invalid source range {entry:?}: {reason}")]
    Invalid { entry: String, reason: String },
}

/// Why a candidate IP was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unauthorized {
    #[error("invalid IP {0:?}")]
    InvalidIp(String),
    #[error("IP {0} not in allow-list")]
    NotAllowed(IpAddr),
}

/// Immutable set of authorized networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checker {
    ranges: Vec<IpNet>,
}

impl Checker {
    /// Parse every entry of `ranges`.
    ///
    /// Fails on the first malformed entry, or when `ranges` is empty.
    pub fn new<I, S>(ranges: I) -> Result<Self, RangeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ranges = ranges
            .into_iter()
            .map(|entry| parse_range(entry.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        if ranges.is_empty() {
            return Err(RangeError::Empty);
        }

        Ok(Self { ranges })
    }

    /// Configured networks, in declaration order.
    pub fn ranges(&self) -> &[IpNet] {
        &self.ranges
    }

    /// Check a textual candidate (`ip`, `ip:port` or `[ipv6]:port`).
    pub fn is_authorized(&self, candidate: &str) -> Result<(), Unauthorized> {
        let ip = parse_candidate(candidate)
            .ok_or_else(|| Unauthorized::InvalidIp(candidate.to_string()))?;

        if self.contains(ip) {
            Ok(())
        } else {
            Err(Unauthorized::NotAllowed(ip))
        }
    }

    /// Returns true if `ip` is inside at least one configured network.
    ///
    /// An IPv4-mapped IPv6 address matches in either form, so it is inside
    /// both `10.0.0.0/8` and `::ffff:0:0/96`.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let canonical = ip.to_canonical();
        self.ranges
            .iter()
            .any(|net| net.contains(&ip) || net.contains(&canonical))
    }
}

fn parse_range(entry: &str) -> Result<IpNet, RangeError> {
    let trimmed = entry.trim();
    let invalid = |reason: String| RangeError::Invalid {
        entry: entry.to_string(),
        reason,
    };

    if trimmed.contains('/') {
        return trimmed.parse::<IpNet>().map_err(|e| invalid(e.to_string()));
    }

    match trimmed.parse::<IpAddr>().map_err(|e| invalid(e.to_string()))? {
        IpAddr::V4(addr) => Ok(IpNet::V4(Ipv4Net::from(addr))),
        IpAddr::V6(addr) => Ok(IpNet::V6(Ipv6Net::from(addr))),
    }
}

fn parse_candidate(candidate: &str) -> Option<IpAddr> {
    let candidate = candidate.trim();
    candidate
        .parse::<IpAddr>()
        .or_else(|_| candidate.parse::<SocketAddr>().map(|addr| addr.ip()))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(ranges: &[&str]) -> Checker {
        Checker::new(ranges).unwrap()
    }

    #[test]
    fn test_cidr_containment() {
        let c = checker(&["192.168.0.0/16"]);
        assert!(c.is_authorized("192.168.1.5").is_ok());
        assert!(c.is_authorized("192.168.255.255").is_ok());
        assert_eq!(
            c.is_authorized("192.169.0.1"),
            Err(Unauthorized::NotAllowed("192.169.0.1".parse().unwrap()))
        );
    }

    #[test]
    fn test_bare_ip_is_single_host() {
        let c = checker(&["10.0.0.1", "2001:db8::1"]);
        assert_eq!(c.ranges()[0].prefix_len(), 32);
        assert_eq!(c.ranges()[1].prefix_len(), 128);
        assert!(c.is_authorized("10.0.0.1").is_ok());
        assert!(c.is_authorized("10.0.0.2").is_err());
        assert!(c.is_authorized("2001:db8::1").is_ok());
        assert!(c.is_authorized("2001:db8::2").is_err());
    }

    #[test]
    fn test_any_range_matches() {
        let c = checker(&["10.0.0.0/8", "172.16.0.0/12", "fd00::/8"]);
        assert!(c.is_authorized("10.20.30.40").is_ok());
        assert!(c.is_authorized("172.20.5.10").is_ok());
        assert!(c.is_authorized("fd12:3456::1").is_ok());
        assert!(c.is_authorized("8.8.8.8").is_err());
    }

    #[test]
    fn test_host_bits_in_range_are_tolerated() {
        let c = checker(&["192.168.1.77/24"]);
        assert!(c.is_authorized("192.168.1.1").is_ok());
        assert!(c.is_authorized("192.168.2.1").is_err());
    }

    #[test]
    fn test_candidate_with_port() {
        let c = checker(&["127.0.0.1", "::1"]);
        assert!(c.is_authorized("127.0.0.1:8080").is_ok());
        assert!(c.is_authorized("[::1]:443").is_ok());
    }

    #[test]
    fn test_ipv4_mapped_candidate_matches_ipv4_range() {
        let c = checker(&["192.168.0.0/16"]);
        assert!(c.is_authorized("::ffff:192.168.1.5").is_ok());
    }

    #[test]
    fn test_ipv4_mapped_candidate_matches_ipv6_range() {
        assert!(checker(&["::/0"]).is_authorized("::ffff:1.2.3.4").is_ok());
        assert!(checker(&["::ffff:0:0/96"])
            .is_authorized("::ffff:10.0.0.1")
            .is_ok());
        assert!(checker(&["::ffff:0:0/96"]).is_authorized("10.0.0.1").is_err());
        assert!(checker(&["2001:db8::/32"])
            .is_authorized("::ffff:10.0.0.1")
            .is_err());
    }

    #[test]
    fn test_invalid_candidate_fails_closed() {
        let c = checker(&["0.0.0.0/0", "::/0"]);
        assert_eq!(
            c.is_authorized(""),
            Err(Unauthorized::InvalidIp(String::new()))
        );
        assert!(matches!(
            c.is_authorized("not-an-ip"),
            Err(Unauthorized::InvalidIp(_))
        ));
    }

    #[test]
    fn test_empty_ranges_rejected() {
        let empty: [&str; 0] = [];
        assert_eq!(Checker::new(empty), Err(RangeError::Empty));
    }

    #[test]
    fn test_any_invalid_entry_rejects_all() {
        for bad in ["10.0.0.0/33", "999.1.1.1", "not-a-cidr", "10.0.0.0/8/1", ""] {
            let result = Checker::new(["192.168.0.0/16", bad]);
            assert!(
                matches!(result, Err(RangeError::Invalid { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_construction_is_idempotent() {
        let ranges = ["10.0.0.0/8", "192.168.1.1"];
        assert_eq!(Checker::new(ranges), Checker::new(ranges));
        assert_eq!(Checker::new(["bogus"]), Checker::new(["bogus"]));
    }

    #[test]
    fn test_order_preserved() {
        let c = checker(&["10.0.0.0/8", "192.168.0.0/16", "10.1.0.0/16"]);
        let rendered: Vec<String> = c.ranges().iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["10.0.0.0/8", "192.168.0.0/16", "10.1.0.0/16"]);
    }

    #[test]
    fn test_is_authorized_is_pure() {
        let c = checker(&["10.0.0.0/8"]);
        for candidate in ["10.1.2.3", "11.1.2.3", "garbage"] {
            assert_eq!(c.is_authorized(candidate), c.is_authorized(candidate));
        }
    }

    #[test]
    fn test_matches_prefix_arithmetic() {
        // Membership agrees with a mask comparison over a sample of prefixes.
        let base = u32::from(std::net::Ipv4Addr::new(172, 16, 8, 0));
        for prefix in [0u8, 1, 8, 12, 20, 24, 31, 32] {
            let c = checker(&[format!("172.16.8.0/{prefix}").as_str()]);
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            for raw in [base, base + 1, base + 255, base ^ 0x0010_0000, !base, 0] {
                let ip = std::net::Ipv4Addr::from(raw);
                let expected = raw & mask == base & mask;
                assert_eq!(c.contains(IpAddr::V4(ip)), expected, "{ip} in /{prefix}");
            }
        }

        let base = u128::from("2001:db8:aa00::".parse::<std::net::Ipv6Addr>().unwrap());
        for prefix in [0u8, 16, 32, 40, 64, 127, 128] {
            let c = checker(&[format!("2001:db8:aa00::/{prefix}").as_str()]);
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            for raw in [base, base + 1, base ^ (1 << 90), !base, 0] {
                let ip = std::net::Ipv6Addr::from(raw);
                let expected = raw & mask == base & mask;
                assert_eq!(c.contains(IpAddr::V6(ip)), expected, "{ip} in /{prefix}");
            }
        }
    }
}
