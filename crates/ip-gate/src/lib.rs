//! Strict admission checks for IP addresses.
//!
//! `ip-gate` decides whether a string is an address worth sending to a
//! geolocation backend. An address is admitted when it:
//!
//! - parses as IPv4 or IPv6 (dotted-quad with no leading zeros, or any
//!   standard IPv6 text form without a zone id), and
//! - for IPv4, does not fall inside one of the IANA special-purpose blocks
//!   (private-use, loopback, link-local, documentation, multicast, ...).
//!
//! IPv6 addresses are admitted as soon as they parse. Range filtering for
//! IPv6 is available as an opt-in through [`GateBuilder::ipv6_ranges`].
//!
//! ## Quick Start
//!
//! ```
//! use ip_gate::Gate;
//!
//! let gate = Gate::default();
//! assert!(gate.check("8.8.8.8").is_ok());
//! assert!(gate.check("192.168.1.1").is_err());
//! assert!(gate.check("not an ip").is_err());
//! ```
//!
//! ## Configuration
//!
//! ```
//! use ip_gate::GateBuilder;
//!
//! let gate = GateBuilder::new()
//!     .ipv6_ranges(true) // Also reject ::1, fc00::/7, fe80::/10, ...
//!     .build();
//! assert!(gate.check("::1").is_err());
//! assert!(gate.check("2606:4700:4700::1111").is_ok());
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Why an address was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The input is not an IPv4 or IPv6 address.
    #[error("the IP address '{input}' is invalid")]
    Malformed { input: String },

    /// The input is a valid address inside a private or reserved block.
    #[error("private or reserved addresses like '{address}' cannot be located ({range})")]
    Reserved {
        address: IpAddr,
        range: &'static SpecialRange,
    },
}

/// A named entry of the special-purpose address registries.
#[derive(Debug, PartialEq, Eq)]
pub struct SpecialRange {
    /// Registry name of the block, e.g. `private-use`.
    pub name: &'static str,
    /// Block in CIDR notation.
    pub cidr: &'static str,
    network: IpAddr,
    prefix: u8,
}

impl std::fmt::Display for SpecialRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.cidr)
    }
}

impl SpecialRange {
    const fn v4(name: &'static str, cidr: &'static str, octets: [u8; 4], prefix: u8) -> Self {
        Self {
            name,
            cidr,
            network: IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3])),
            prefix,
        }
    }

    const fn v6(name: &'static str, cidr: &'static str, segments: [u16; 8], prefix: u8) -> Self {
        Self {
            name,
            cidr,
            network: IpAddr::V6(Ipv6Addr::new(
                segments[0],
                segments[1],
                segments[2],
                segments[3],
                segments[4],
                segments[5],
                segments[6],
                segments[7],
            )),
            prefix,
        }
    }

    /// Whether `ip` lies inside this block. Addresses of the other family never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

#[inline]
fn mask32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

#[inline]
fn mask128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

/// IPv4 blocks refused by every gate.
pub static IPV4_SPECIAL: &[SpecialRange] = &[
    SpecialRange::v4("this network", "0.0.0.0/8", [0, 0, 0, 0], 8),
    SpecialRange::v4("private-use", "10.0.0.0/8", [10, 0, 0, 0], 8),
    SpecialRange::v4("shared address space", "100.64.0.0/10", [100, 64, 0, 0], 10),
    SpecialRange::v4("loopback", "127.0.0.0/8", [127, 0, 0, 0], 8),
    SpecialRange::v4("link-local", "169.254.0.0/16", [169, 254, 0, 0], 16),
    SpecialRange::v4("private-use", "172.16.0.0/12", [172, 16, 0, 0], 12),
    SpecialRange::v4("IETF protocol assignments", "192.0.0.0/24", [192, 0, 0, 0], 24),
    SpecialRange::v4("documentation (TEST-NET-1)", "192.0.2.0/24", [192, 0, 2, 0], 24),
    SpecialRange::v4("6to4 relay anycast", "192.88.99.0/24", [192, 88, 99, 0], 24),
    SpecialRange::v4("private-use", "192.168.0.0/16", [192, 168, 0, 0], 16),
    SpecialRange::v4("benchmarking", "198.18.0.0/15", [198, 18, 0, 0], 15),
    SpecialRange::v4("documentation (TEST-NET-2)", "198.51.100.0/24", [198, 51, 100, 0], 24),
    SpecialRange::v4("documentation (TEST-NET-3)", "203.0.113.0/24", [203, 0, 113, 0], 24),
    SpecialRange::v4("multicast", "224.0.0.0/4", [224, 0, 0, 0], 4),
    SpecialRange::v4("reserved", "240.0.0.0/4", [240, 0, 0, 0], 4),
];

/// IPv6 blocks, refused only when [`GateBuilder::ipv6_ranges`] is enabled.
pub static IPV6_SPECIAL: &[SpecialRange] = &[
    SpecialRange::v6("unspecified", "::/128", [0, 0, 0, 0, 0, 0, 0, 0], 128),
    SpecialRange::v6("loopback", "::1/128", [0, 0, 0, 0, 0, 0, 0, 1], 128),
    SpecialRange::v6("IPv4-mapped", "::ffff:0:0/96", [0, 0, 0, 0, 0, 0xffff, 0, 0], 96),
    SpecialRange::v6("documentation", "2001:db8::/32", [0x2001, 0xdb8, 0, 0, 0, 0, 0, 0], 32),
    SpecialRange::v6("unique-local", "fc00::/7", [0xfc00, 0, 0, 0, 0, 0, 0, 0], 7),
    SpecialRange::v6("link-local", "fe80::/10", [0xfe80, 0, 0, 0, 0, 0, 0, 0], 10),
    SpecialRange::v6("multicast", "ff00::/8", [0xff00, 0, 0, 0, 0, 0, 0, 0], 8),
];

/// Find the special-purpose block an address belongs to, if any.
///
/// Both tables are consulted regardless of gate configuration.
pub fn special_range(ip: IpAddr) -> Option<&'static SpecialRange> {
    let table = match ip {
        IpAddr::V4(_) => IPV4_SPECIAL,
        IpAddr::V6(_) => IPV6_SPECIAL,
    };
    table.iter().find(|range| range.contains(ip))
}

/// Admission check for addresses about to be geolocated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gate {
    ipv6_ranges: bool,
}

impl Gate {
    /// Parse `input` and refuse it if it is malformed or reserved.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::Malformed`] when `input` is not an address and
    /// [`Rejection::Reserved`] when it falls in a filtered special-purpose block.
    pub fn check(&self, input: &str) -> Result<IpAddr, Rejection> {
        let ip: IpAddr = input.parse().map_err(|_| Rejection::Malformed {
            input: input.to_string(),
        })?;

        if ip.is_ipv6() && !self.ipv6_ranges {
            return Ok(ip);
        }

        match special_range(ip) {
            Some(range) => Err(Rejection::Reserved { address: ip, range }),
            None => Ok(ip),
        }
    }

    /// Shorthand for `check(input).is_ok()`.
    #[inline]
    pub fn admits(&self, input: &str) -> bool {
        self.check(input).is_ok()
    }
}

/// A builder for configuring a [`Gate`].
///
/// By default, only IPv4 special-purpose blocks are refused.
#[derive(Debug, Clone, Default)]
pub struct GateBuilder {
    ipv6_ranges: bool,
}

impl GateBuilder {
    /// Create a builder with the default IPv4-only filtering.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also refuse IPv6 loopback, unique-local, link-local, multicast and
    /// documentation addresses.
    pub fn ipv6_ranges(&mut self, enable: bool) -> &mut Self {
        self.ipv6_ranges = enable;
        self
    }

    /// Build the gate.
    pub fn build(&self) -> Gate {
        Gate {
            ipv6_ranges: self.ipv6_ranges,
        }
    }
}

/// Check `input` with the default gate.
///
/// ```
/// assert!(ip_gate::check("1.1.1.1").is_ok());
/// assert!(ip_gate::check("127.0.0.1").is_err());
/// ```
pub fn check(input: &str) -> Result<IpAddr, Rejection> {
    Gate::default().check(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_cover_edges() {
        assert_eq!(mask32(0), 0);
        assert_eq!(mask32(32), u32::MAX);
        assert_eq!(mask32(8), 0xff00_0000);
        assert_eq!(mask128(128), u128::MAX);
        assert_eq!(mask128(7), 0xfe_u128 << 120);
    }

    #[test]
    fn range_contains_boundaries() {
        let range = &IPV4_SPECIAL[5]; // 172.16.0.0/12
        assert!(range.contains("172.16.0.0".parse().unwrap()));
        assert!(range.contains("172.31.255.255".parse().unwrap()));
        assert!(!range.contains("172.32.0.0".parse().unwrap()));
        assert!(!range.contains("::1".parse().unwrap()));
    }

    #[test]
    fn rejection_names_range() {
        let err = check("10.1.2.3").unwrap_err();
        assert_eq!(
            err.to_string(),
            "private or reserved addresses like '10.1.2.3' cannot be located (private-use 10.0.0.0/8)"
        );
    }
}
