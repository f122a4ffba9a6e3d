//! ARP cache and pending-request registry behind the single ARP lock.
//!
//! Two views of the same resolution state live under one mutex:
//!
//! - the **cache**: `(ip, mac, inserted_at)` entries that expire after
//!   [`ARP_CACHE_TTL_SECS`], consulted on every forward;
//! - the **pending registry**: one entry per unresolved target IP, carrying
//!   the retry counter, the last-send timestamp, and the withheld frames that
//!   are waiting for the resolution.
//!
//! A cache entry and a pending entry for the same IP never coexist:
//! [`on_reply`](NeighborTable::on_reply) inserts into the cache and removes
//! the pending entry in a single locked operation.
//!
//! # Concurrency
//!
//! The dispatcher and the retry sweep run against this table concurrently.
//! Every method acquires the lock, mutates, and returns any deferred I/O
//! (frames to flush, ARP requests to send) as plain data; the caller performs
//! transport sends only after the lock has been released.  The lock is never
//! held across a transport call.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use log::debug;
use spin::Mutex;

use crate::frame::FrameBuf;
use crate::types::{IfaceIndex, Ipv4Addr, MacAddr, NetError};

// =============================================================================
// Constants
// =============================================================================

/// Seconds before a cache entry expires.
pub const ARP_CACHE_TTL_SECS: u64 = 15;

/// Seconds between retransmissions of an unanswered ARP request.
pub const ARP_RETRY_INTERVAL_SECS: u64 = 1;

/// Total ARP requests sent per target before the resolution is abandoned.
pub const MAX_ARP_RETRIES: u32 = 5;

/// Maximum frames withheld per pending entry; overflow drops silently.
pub const MAX_WITHHELD_FRAMES: usize = 32;

/// Capacity of the ARP cache.
pub const MAX_CACHE_ENTRIES: usize = 64;

/// Capacity of the pending registry.
pub const MAX_PENDING_REQUESTS: usize = 64;

// =============================================================================
// Entries
// =============================================================================

/// A resolved `(ip, mac)` pair with its insertion timestamp.
#[derive(Clone, Copy)]
pub struct CacheEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub inserted_at: u64,
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} (t={})", self.ip, self.mac, self.inserted_at)
    }
}

/// A deep-copied inbound frame parked while its next hop resolves, together
/// with the interface it arrived on (needed to address ICMP diagnostics back
/// at the sender).
#[derive(Debug, PartialEq)]
pub struct Withheld {
    pub ingress: IfaceIndex,
    pub frame: FrameBuf,
}

/// An outstanding resolution: at most one exists per target IP.
pub struct PendingRequest {
    pub target_ip: Ipv4Addr,
    /// Interface the ARP requests go out on (from the routing entry).
    pub egress: IfaceIndex,
    /// Requests sent so far; never exceeds [`MAX_ARP_RETRIES`].
    pub times_sent: u32,
    /// Timestamp of the most recent request.
    pub last_sent: u64,
    pub withheld: Vec<Withheld>,
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PendingRequest {{ {} dev {}, sent {} (last t={}), withheld {} }}",
            self.target_ip,
            self.egress,
            self.times_sent,
            self.last_sent,
            self.withheld.len()
        )
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Outcome of [`NeighborTable::park`].
#[derive(Debug, PartialEq, Eq)]
pub enum ParkOutcome {
    /// A new pending entry was created; the caller must emit the first ARP
    /// request (the entry already counts it as sent).
    Created,
    /// The frame joined an existing entry.  No request is emitted and the
    /// retry counter is untouched; only the sweep sends further requests.
    Appended,
    /// The entry's withheld list is full; the frame was dropped.
    QueueFull,
}

/// Deferred I/O collected by [`NeighborTable::sweep`], executed by the caller
/// outside the lock.
pub enum SweepAction {
    /// Send another ARP request for a still-unresolved target.
    Retransmit {
        target: Ipv4Addr,
        egress: IfaceIndex,
    },
    /// The retry limit was reached; the entry was dropped and each withheld
    /// frame should be answered with host-unreachable toward its source.
    Expire { withheld: Vec<Withheld> },
}

// =============================================================================
// NeighborTable
// =============================================================================

struct NeighborTableInner {
    cache: Vec<CacheEntry>,
    pending: Vec<PendingRequest>,
}

/// The ARP lock: cache + pending registry under one mutex.
///
/// See [module documentation](self) for the concurrency contract.
pub struct NeighborTable {
    inner: Mutex<NeighborTableInner>,
}

impl NeighborTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(NeighborTableInner {
                cache: Vec::new(),
                pending: Vec::new(),
            }),
        }
    }

    /// Look up a non-expired cache entry.
    ///
    /// Expiration is lazy: an entry older than [`ARP_CACHE_TTL_SECS`] is
    /// removed here and reported as a miss.
    pub fn lookup(&self, ip: Ipv4Addr, now: u64) -> Option<MacAddr> {
        let mut inner = self.inner.lock();
        let idx = inner.cache.iter().position(|e| e.ip == ip)?;
        if now.saturating_sub(inner.cache[idx].inserted_at) >= ARP_CACHE_TTL_SECS {
            let stale = inner.cache.swap_remove(idx);
            debug!("neighbor: cache entry {:?} expired on lookup", stale);
            return None;
        }
        Some(inner.cache[idx].mac)
    }

    /// Record a resolution from an ARP reply and detach the pending entry.
    ///
    /// Inserts or refreshes the cache entry for `ip`, removes any pending
    /// request for it, and hands its withheld frames back to the caller for
    /// forwarding outside the lock.  When the cache is full, expired entries
    /// are evicted first; a cache that is full of live entries fails the
    /// insert with [`TableFull`](NetError::TableFull).
    pub fn on_reply(
        &self,
        ip: Ipv4Addr,
        mac: MacAddr,
        now: u64,
    ) -> Result<Vec<Withheld>, NetError> {
        let mut inner = self.inner.lock();

        match inner.cache.iter().position(|e| e.ip == ip) {
            Some(idx) => {
                inner.cache[idx].mac = mac;
                inner.cache[idx].inserted_at = now;
            }
            None => {
                if inner.cache.len() >= MAX_CACHE_ENTRIES {
                    inner
                        .cache
                        .retain(|e| now.saturating_sub(e.inserted_at) < ARP_CACHE_TTL_SECS);
                }
                if inner.cache.len() >= MAX_CACHE_ENTRIES {
                    return Err(NetError::TableFull);
                }
                inner.cache.push(CacheEntry {
                    ip,
                    mac,
                    inserted_at: now,
                });
                debug!("neighbor: learned {} -> {}", ip, mac);
            }
        }

        let withheld = match inner.pending.iter().position(|p| p.target_ip == ip) {
            Some(idx) => {
                let req = inner.pending.swap_remove(idx);
                if !req.withheld.is_empty() {
                    debug!(
                        "neighbor: releasing {} withheld frames for {}",
                        req.withheld.len(),
                        ip
                    );
                }
                req.withheld
            }
            None => Vec::new(),
        };
        Ok(withheld)
    }

    /// Park a frame while its next hop resolves.
    ///
    /// Appends to the existing pending entry for `target` or creates a new
    /// one with `times_sent = 1` and `last_sent = now` (the caller emits the
    /// corresponding first request after this returns).  Creating an entry
    /// when the registry is at capacity fails with
    /// [`TableFull`](NetError::TableFull).
    pub fn park(
        &self,
        target: Ipv4Addr,
        egress: IfaceIndex,
        frame: Withheld,
        now: u64,
    ) -> Result<ParkOutcome, NetError> {
        let mut inner = self.inner.lock();

        if let Some(req) = inner.pending.iter_mut().find(|p| p.target_ip == target) {
            if req.withheld.len() >= MAX_WITHHELD_FRAMES {
                debug!("neighbor: withheld queue full for {}, dropping frame", target);
                return Ok(ParkOutcome::QueueFull);
            }
            req.withheld.push(frame);
            return Ok(ParkOutcome::Appended);
        }

        if inner.pending.len() >= MAX_PENDING_REQUESTS {
            return Err(NetError::TableFull);
        }

        let mut withheld = Vec::with_capacity(4);
        withheld.push(frame);
        inner.pending.push(PendingRequest {
            target_ip: target,
            egress,
            times_sent: 1,
            last_sent: now,
            withheld,
        });
        debug!("neighbor: new pending request for {} dev {}", target, egress);
        Ok(ParkOutcome::Created)
    }

    /// Periodic sweep: age the cache, retransmit or expire pending requests.
    ///
    /// For each pending entry whose last request is at least
    /// [`ARP_RETRY_INTERVAL_SECS`] old, either bumps the counter for another
    /// request or, once [`MAX_ARP_RETRIES`] requests have gone unanswered,
    /// drops the entry.  All resulting I/O is returned as [`SweepAction`]s
    /// for the caller to execute after the lock is released.
    pub fn sweep(&self, now: u64) -> Vec<SweepAction> {
        let mut inner = self.inner.lock();
        let mut actions = Vec::new();

        inner
            .cache
            .retain(|e| now.saturating_sub(e.inserted_at) < ARP_CACHE_TTL_SECS);

        let mut i = 0;
        while i < inner.pending.len() {
            if now.saturating_sub(inner.pending[i].last_sent) < ARP_RETRY_INTERVAL_SECS {
                i += 1;
                continue;
            }
            if inner.pending[i].times_sent >= MAX_ARP_RETRIES {
                let req = inner.pending.swap_remove(i);
                debug!(
                    "neighbor: giving up on {} after {} requests, {} frames unreachable",
                    req.target_ip,
                    req.times_sent,
                    req.withheld.len()
                );
                actions.push(SweepAction::Expire {
                    withheld: req.withheld,
                });
                // swap_remove moved the last element here; don't advance.
                continue;
            }
            let req = &mut inner.pending[i];
            req.times_sent += 1;
            req.last_sent = now;
            actions.push(SweepAction::Retransmit {
                target: req.target_ip,
                egress: req.egress,
            });
            i += 1;
        }

        actions
    }

    /// Number of live cache entries (diagnostic).
    pub fn cache_len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    /// Number of pending requests (diagnostic).
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Retry state of a pending request: `(times_sent, withheld)` (diagnostic).
    pub fn pending_state(&self, ip: Ipv4Addr) -> Option<(u32, usize)> {
        let inner = self.inner.lock();
        inner
            .pending
            .iter()
            .find(|p| p.target_ip == ip)
            .map(|p| (p.times_sent, p.withheld.len()))
    }
}

impl Default for NeighborTable {
    fn default() -> Self {
        Self::new()
    }
}
