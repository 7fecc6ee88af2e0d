use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use once_cell::sync::Lazy;
use regex::Regex;

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$",
    )
    .unwrap()
});

fn is_port(s: &str) -> bool {
    !s.is_empty() && s.len() <= 5 && s.bytes().all(|b| b.is_ascii_digit())
}

/// Syntactic validity of a Host header value. Accepts RFC 1123 hostnames,
/// IPv4 literals and bracketed IPv6 literals, each with an optional port.
pub fn is_valid_hostname(host: &str) -> bool {
    let host = host.trim();
    if host.is_empty() {
        return false;
    }
    if let Some(rest) = host.strip_prefix('[') {
        let Some(end) = rest.find(']') else {
            return false;
        };
        let tail = &rest[end + 1..];
        let port_ok = tail.is_empty()
            || tail
                .strip_prefix(':')
                .map(is_port)
                .unwrap_or(false);
        return port_ok && rest[..end].parse::<Ipv6Addr>().is_ok();
    }
    if host.parse::<Ipv6Addr>().is_ok() {
        return true;
    }
    let name = match host.rsplit_once(':') {
        Some((h, p)) if is_port(p) => h,
        Some(_) => return false,
        None => host,
    };
    if name.parse::<Ipv4Addr>().is_ok() {
        return true;
    }
    name.len() <= 253 && HOSTNAME_RE.is_match(name)
}

/// True when `addr` falls inside the CIDR range `subnet` ("10.0.0.0/8",
/// "2001:db8::/32"). A bare address counts as a full-length prefix.
/// Malformed entries never match.
pub fn subnet_contains(subnet: &str, addr: IpAddr) -> bool {
    let subnet = subnet.trim();
    let (net, len) = match subnet.split_once('/') {
        Some((n, l)) => {
            let Ok(len) = l.parse::<u32>() else {
                return false;
            };
            let Ok(net) = n.parse::<IpAddr>() else {
                return false;
            };
            (net, len)
        }
        None => match subnet.parse::<IpAddr>() {
            Ok(net @ IpAddr::V4(_)) => (net, 32),
            Ok(net @ IpAddr::V6(_)) => (net, 128),
            Err(_) => return false,
        },
    };
    match (net, addr) {
        (IpAddr::V4(n), IpAddr::V4(a)) => {
            if len > 32 {
                return false;
            }
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            (u32::from(n) & mask) == (u32::from(a) & mask)
        }
        (IpAddr::V6(n), IpAddr::V6(a)) => {
            if len > 128 {
                return false;
            }
            let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
            (u128::from(n) & mask) == (u128::from(a) & mask)
        }
        _ => false,
    }
}

/// Admission policy for check-ins: at least one allow entry must match and
/// no deny entry may match. An empty allow-list rejects everything.
pub fn ip_admitted(addr: IpAddr, allowed: &[String], denied: &[String]) -> bool {
    if !allowed.iter().any(|s| subnet_contains(s, addr)) {
        return false;
    }
    !denied.iter().any(|s| subnet_contains(s, addr))
}
