//! Classification of host name strings for certificate eligibility.
//!
//! A CA reached through the webroot flow can only validate DNS names, so any
//! name that is really an IP address literal must be kept out of the
//! certificate's SAN list. Private and link-local addresses in particular must
//! never leak into a publicly-trusted certificate.

use std::net::{IpAddr, Ipv6Addr};

/// Returns whether `name` is a literal IPv4 or IPv6 address.
///
/// All RFC 4291 textual forms are recognized: full 8-group, `::`-compressed,
/// IPv4-mapped/compatible and IPv4-embedded forms, and link-local addresses
/// carrying a zone ID (`fe80::1%eth0`). Hex digit case is irrelevant.
///
/// Purely syntactic; no resolver is ever consulted.
pub fn is_ip_literal(name: &str) -> bool {
    if name.parse::<IpAddr>().is_ok() {
        return true;
    }
    // Zone IDs (RFC 4007) are not part of the address grammar the std parser
    // accepts, but names like fe80::1%eth0 are still address literals.
    if let Some((address, zone)) = name.split_once('%') {
        return !zone.is_empty()
            && zone.chars().all(|c| c.is_ascii_alphanumeric())
            && address.parse::<Ipv6Addr>().is_ok();
    }
    false
}
