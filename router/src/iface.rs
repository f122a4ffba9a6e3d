//! Interface descriptors and the external collaborator traits.
//!
//! The router does not own a NIC, a socket, or a timer.  It emits frames
//! through a [`Transport`] and reads time from a [`Clock`]; both are supplied
//! by the harness.  Interfaces themselves are immutable descriptors created
//! at startup, identified by a stable [`IfaceIndex`](crate::types::IfaceIndex)
//! resolved against the router context.

extern crate alloc;

use alloc::string::String;
use core::fmt;

use crate::types::{IfaceIndex, Ipv4Addr, MacAddr, NetError};

// =============================================================================
// Interface
// =============================================================================

/// An immutable interface descriptor owned by the router context.
#[derive(Clone, PartialEq)]
pub struct Interface {
    /// Stable index within the owning router.
    pub index: IfaceIndex,
    /// Human-readable name (`eth0`, ...).
    pub name: String,
    /// Link address of this interface.
    pub mac: MacAddr,
    /// IPv4 address assigned to this interface.
    pub ip: Ipv4Addr,
}

impl Interface {
    /// Create a descriptor.  The index is reassigned by
    /// [`Router::new`](crate::router::Router::new) to the interface's position
    /// in the router's arena.
    pub fn new(name: String, mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self {
            index: IfaceIndex(0),
            name,
            mac,
            ip,
        }
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Interface {{ {}: {} ({}) }}",
            self.name, self.ip, self.mac
        )
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Frame emission boundary.
///
/// Implementations may block on the underlying socket and may fail
/// transiently; the router logs such failures and abandons the frame.  The
/// router never calls `send` while holding its ARP lock.
pub trait Transport: Send + Sync {
    /// Emit one frame on a specific interface.
    fn send(&self, iface: &Interface, frame: &[u8]) -> Result<(), NetError>;
}

/// Monotonic time source, in whole seconds.
///
/// Used for ARP cache aging and retry pacing only; the absolute epoch is
/// irrelevant as long as the value never decreases.
pub trait Clock: Send + Sync {
    /// Seconds since an arbitrary fixed origin.
    fn now(&self) -> u64;
}
