//! Immutable IPv4 routing table with longest-prefix-match lookup.
//!
//! The table is an ordered sequence of `(destination, mask, gateway,
//! interface)` entries created at startup and never mutated afterwards, so
//! lookups need no lock.  A lookup scans every entry and keeps the match with
//! the largest mask; for a well-formed table ties cannot occur, and if they do
//! the first entry wins, deterministic by insertion order.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use crate::types::{IfaceIndex, Ipv4Addr};

// =============================================================================
// RouteEntry
// =============================================================================

/// A single entry in the routing table.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    /// Destination network (e.g. `192.168.1.0` for a /24 route).
    pub dest: Ipv4Addr,
    /// Network mask (e.g. `255.255.255.0`).  An all-zero mask is a default
    /// route and matches everything.
    pub mask: Ipv4Addr,
    /// Gateway address.  [`Ipv4Addr::UNSPECIFIED`] means directly connected:
    /// the next hop is the final destination itself.
    pub gateway: Ipv4Addr,
    /// Egress interface.
    pub iface: IfaceIndex,
}

impl RouteEntry {
    /// Returns `true` if `dst` falls within this route's destination network.
    #[inline]
    pub fn matches(&self, dst: Ipv4Addr) -> bool {
        (dst.to_u32_be() & self.mask.to_u32_be()) == self.dest.to_u32_be()
    }

    /// Returns the next-hop address for a destination matching this route.
    ///
    /// - Non-zero `gateway`: the frame is physically sent to the gateway.
    /// - Zero `gateway`: directly connected, the destination is the next hop.
    #[inline]
    pub fn next_hop(&self, dst: Ipv4Addr) -> Ipv4Addr {
        if self.gateway.is_unspecified() {
            dst
        } else {
            self.gateway
        }
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.gateway.is_unspecified() {
            write!(
                f,
                "{} mask {} dev {} (connected)",
                self.dest, self.mask, self.iface
            )
        } else {
            write!(
                f,
                "{} mask {} via {} dev {}",
                self.dest, self.mask, self.gateway, self.iface
            )
        }
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// RouteTable
// =============================================================================

/// Immutable routing table with longest-prefix-match lookup.
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Build a table from the configured entries, in order.
    pub fn new(entries: Vec<RouteEntry>) -> Self {
        Self { entries }
    }

    /// Longest-prefix-match lookup.
    ///
    /// Among all entries whose masked destination matches `dst`, returns the
    /// one with the numerically largest mask.  The result is independent of
    /// the order the entries were loaded in, except for the (ill-formed)
    /// case of duplicate `(dest, mask)` pairs, where the first wins.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<&RouteEntry> {
        let mut best: Option<&RouteEntry> = None;
        for entry in &self.entries {
            if !entry.matches(dst) {
                continue;
            }
            match best {
                Some(current) if current.mask.to_u32_be() >= entry.mask.to_u32_be() => {}
                _ => best = Some(entry),
            }
        }
        best
    }

    /// Number of routes in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the table holds no routes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all routes (diagnostic display).
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }
}
