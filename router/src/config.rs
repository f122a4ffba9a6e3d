//! Startup configuration: interface and routing-table text formats.
//!
//! Both files are whitespace-separated columns, one entry per line; blank
//! lines and `#` comments are skipped.
//!
//! Interfaces (`name mac ip`):
//!
//! ```text
//! eth0  aa:00:00:00:00:01  10.0.0.1
//! eth1  aa:00:00:00:00:02  10.1.0.1
//! ```
//!
//! Routing table (`destination mask gateway iface`), gateway `0.0.0.0`
//! meaning directly connected:
//!
//! ```text
//! 10.0.0.0   255.0.0.0      0.0.0.0    eth0
//! 20.0.0.0   255.0.0.0      10.0.0.9   eth0
//! 0.0.0.0    0.0.0.0        10.1.0.9   eth1
//! ```
//!
//! Configuration is parsed once before the dispatcher starts; the resulting
//! tables are immutable.

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use crate::iface::Interface;
use crate::route::{RouteEntry, RouteTable};
use crate::types::{IfaceIndex, Ipv4Addr, MacAddr};

// =============================================================================
// Errors
// =============================================================================

/// A rejected configuration line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Wrong number of columns.
    MissingField { line: usize },
    /// A column that should be an IPv4 address is not one.
    BadAddress { line: usize },
    /// A column that should be a MAC address is not one.
    BadLinkAddress { line: usize },
    /// A route references an interface name that was not configured.
    UnknownInterface { line: usize, name: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { line } => write!(f, "line {line}: missing field"),
            Self::BadAddress { line } => write!(f, "line {line}: malformed IPv4 address"),
            Self::BadLinkAddress { line } => write!(f, "line {line}: malformed link address"),
            Self::UnknownInterface { line, name } => {
                write!(f, "line {line}: unknown interface {name:?}")
            }
        }
    }
}

// =============================================================================
// Specs
// =============================================================================

/// One parsed routing-table line; the interface is still a name at this
/// stage and is resolved against the interface set by [`resolve_routes`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteSpec {
    pub dest: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub iface: String,
}

// =============================================================================
// Parsing
// =============================================================================

fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines().enumerate().filter_map(|(i, line)| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            None
        } else {
            Some((i + 1, line))
        }
    })
}

/// Parse a dotted-quad IPv4 address.
pub fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in &mut octets {
        *octet = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr(octets))
}

/// Parse a colon-separated MAC address (`aa:bb:cc:dd:ee:ff`).
pub fn parse_mac(s: &str) -> Option<MacAddr> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut bytes {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(MacAddr(bytes))
}

/// Parse the interface file into descriptors, in file order.
pub fn parse_interfaces(text: &str) -> Result<Vec<Interface>, ConfigError> {
    let mut out = Vec::new();
    for (line, content) in content_lines(text) {
        let mut cols = content.split_whitespace();
        let (Some(name), Some(mac), Some(ip)) = (cols.next(), cols.next(), cols.next()) else {
            return Err(ConfigError::MissingField { line });
        };
        let mac = parse_mac(mac).ok_or(ConfigError::BadLinkAddress { line })?;
        let ip = parse_ipv4(ip).ok_or(ConfigError::BadAddress { line })?;
        out.push(Interface::new(name.to_string(), mac, ip));
    }
    Ok(out)
}

/// Parse the routing-table file.
pub fn parse_rtable(text: &str) -> Result<Vec<RouteSpec>, ConfigError> {
    let mut out = Vec::new();
    for (line, content) in content_lines(text) {
        let mut cols = content.split_whitespace();
        let (Some(dest), Some(mask), Some(gateway), Some(iface)) =
            (cols.next(), cols.next(), cols.next(), cols.next())
        else {
            return Err(ConfigError::MissingField { line });
        };
        let dest = parse_ipv4(dest).ok_or(ConfigError::BadAddress { line })?;
        let mask = parse_ipv4(mask).ok_or(ConfigError::BadAddress { line })?;
        let gateway = parse_ipv4(gateway).ok_or(ConfigError::BadAddress { line })?;
        out.push(RouteSpec {
            dest,
            mask,
            gateway,
            iface: iface.to_string(),
        });
    }
    Ok(out)
}

/// Resolve route specs against the interface set (by position, matching the
/// indices [`Router::new`](crate::router::Router::new) assigns).
pub fn resolve_routes(
    specs: &[RouteSpec],
    interfaces: &[Interface],
) -> Result<RouteTable, ConfigError> {
    let mut entries = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let Some(pos) = interfaces.iter().position(|iface| iface.name == spec.iface) else {
            return Err(ConfigError::UnknownInterface {
                line: i + 1,
                name: spec.iface.clone(),
            });
        };
        entries.push(RouteEntry {
            dest: spec.dest,
            mask: spec.mask,
            gateway: spec.gateway,
            iface: IfaceIndex(pos),
        });
    }
    Ok(RouteTable::new(entries))
}
