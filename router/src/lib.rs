//! Packet-processing core of a minimal IPv4 router.
//!
//! The router terminates Ethernet-style frames on a set of owned interfaces
//! and either answers them locally, responds with an ICMP diagnostic, or
//! forwards them toward a next hop learned via ARP.  Three concerns make up
//! the core:
//!
//! - **Dispatch** ([`Router::process_frame`](router::Router::process_frame)):
//!   classify each inbound frame and route it to local delivery, forwarding,
//!   or an ICMP response.
//! - **ARP resolution** ([`neighbor`]): resolve next-hop link addresses on
//!   demand, park frames that cannot yet be forwarded, and retry or expire
//!   unresolved queries from a periodic sweep ([`Router::arp_sweep`](router::Router::arp_sweep)).
//! - **ICMP generation** ([`icmp`]): echo replies and the
//!   destination-unreachable / time-exceeded family.
//!
//! The transport that moves frames, the clock, and the log sink are external
//! collaborators: the harness feeds inbound frames to `process_frame`, calls
//! `arp_sweep` once per second, and supplies [`Transport`](iface::Transport)
//! and [`Clock`](iface::Clock) implementations.  The routing table and the
//! interface set are loaded once (see [`config`]) and never mutated.
//!
//! All mutable shared state (ARP cache + pending requests) lives behind a
//! single lock; no global state is used, so several routers can coexist in
//! one process.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arp;
pub mod config;
pub mod dispatch;
pub mod ethernet;
pub mod frame;
pub mod icmp;
pub mod iface;
pub mod ipv4;
pub mod neighbor;
pub mod route;
pub mod router;
pub mod retry;
pub mod types;

#[cfg(test)]
mod dispatch_tests;

pub use frame::{FrameBuf, MAX_FRAME_LEN, icmp_checksum, internet_checksum, ipv4_header_checksum};
pub use iface::{Clock, Interface, Transport};
pub use route::{RouteEntry, RouteTable};
pub use router::{Router, StatsSnapshot};
pub use types::{EtherType, IfaceIndex, IpProtocol, Ipv4Addr, MacAddr, NetError, ProcessError};

// =============================================================================
// Ethernet
// =============================================================================

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETH_HEADER_LEN: usize = 14;
pub const ETH_ADDR_LEN: usize = 6;

// =============================================================================
// ARP (Ethernet + IPv4 only)
// =============================================================================

pub const ARP_HTYPE_ETHERNET: u16 = 1;
pub const ARP_PTYPE_IPV4: u16 = ETHERTYPE_IPV4;
pub const ARP_HLEN_ETHERNET: u8 = 6;
pub const ARP_PLEN_IPV4: u8 = 4;
pub const ARP_OPER_REQUEST: u16 = 1;
pub const ARP_OPER_REPLY: u16 = 2;
pub const ARP_PACKET_LEN: usize = 28;

// =============================================================================
// IPv4 / ICMP
// =============================================================================

pub const IPV4_HEADER_LEN: usize = 20;
pub const ICMP_HEADER_LEN: usize = 8;

/// TTL placed in every locally generated IP datagram.
pub const DEFAULT_TTL: u8 = 64;
