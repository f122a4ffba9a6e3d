//! The router context: interfaces, routing table, ARP state, collaborators.
//!
//! A [`Router`] owns everything one router instance needs and is passed
//! explicitly to every operation; no process-global state exists, so multiple
//! routers can coexist.  Interfaces and the routing table are immutable after
//! construction; all mutable shared state lives in the
//! [`NeighborTable`](crate::neighbor::NeighborTable).

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use log::warn;

use crate::iface::{Clock, Interface, Transport};
use crate::neighbor::NeighborTable;
use crate::route::RouteTable;
use crate::types::{IfaceIndex, Ipv4Addr, NetError};

// =============================================================================
// Statistics
// =============================================================================

/// Monotonic event counters, updated with relaxed atomics on the data path.
#[derive(Default)]
pub struct RouterStats {
    pub received: AtomicU64,
    pub forwarded: AtomicU64,
    pub icmp_sent: AtomicU64,
    pub arp_sent: AtomicU64,
    pub parked: AtomicU64,
    pub dropped: AtomicU64,
    pub expired: AtomicU64,
}

impl RouterStats {
    const fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            icmp_sent: AtomicU64::new(0),
            arp_sent: AtomicU64::new(0),
            parked: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            icmp_sent: self.icmp_sent.load(Ordering::Relaxed),
            arp_sent: self.arp_sent.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

/// Read-only copy of the counters at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub icmp_sent: u64,
    pub arp_sent: u64,
    pub parked: u64,
    pub dropped: u64,
    pub expired: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx {} fwd {} icmp {} arp {} parked {} dropped {} expired {}",
            self.received,
            self.forwarded,
            self.icmp_sent,
            self.arp_sent,
            self.parked,
            self.dropped,
            self.expired
        )
    }
}

// =============================================================================
// Router
// =============================================================================

/// One router instance.
///
/// `T` moves frames, `C` tells time; both are chosen by the harness.  All
/// methods take `&self`: the dispatcher is serialised by the harness, the
/// retry sweep may run concurrently, and the shared ARP state synchronises
/// the two internally.
pub struct Router<T: Transport, C: Clock> {
    pub(crate) interfaces: Vec<Interface>,
    pub(crate) routes: RouteTable,
    pub(crate) neighbors: NeighborTable,
    pub(crate) transport: T,
    pub(crate) clock: C,
    pub(crate) stats: RouterStats,
}

impl<T: Transport, C: Clock> Router<T, C> {
    /// Assemble a router from its startup configuration.
    ///
    /// Interface indices are assigned by position; routing entries must
    /// reference interfaces by these indices (see
    /// [`config::resolve_routes`](crate::config::resolve_routes)).
    pub fn new(mut interfaces: Vec<Interface>, routes: RouteTable, transport: T, clock: C) -> Self {
        for (i, iface) in interfaces.iter_mut().enumerate() {
            iface.index = IfaceIndex(i);
        }
        Self {
            interfaces,
            routes,
            neighbors: NeighborTable::new(),
            transport,
            clock,
            stats: RouterStats::new(),
        }
    }

    /// Resolve an interface handle.
    #[inline]
    pub fn interface(&self, index: IfaceIndex) -> Option<&Interface> {
        self.interfaces.get(index.0)
    }

    /// All interfaces owned by this router.
    #[inline]
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// `true` if `ip` is assigned to any interface of this router.
    pub fn owns_ip(&self, ip: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|iface| iface.ip == ip)
    }

    /// The routing table.
    #[inline]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The ARP cache + pending registry.
    #[inline]
    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// The transport collaborator.
    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The clock collaborator.
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Emit one frame, logging transport failures.
    ///
    /// Never called with the ARP lock held.
    pub(crate) fn emit(&self, iface: &Interface, frame: &[u8]) -> Result<(), NetError> {
        self.transport.send(iface, frame).inspect_err(|e| {
            warn!("tx failed on {}: {}", iface.name, e);
        })
    }
}
