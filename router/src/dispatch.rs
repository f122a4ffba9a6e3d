//! Frame classification and dispatch.
//!
//! [`Router::process_frame`] is the single entry point for every inbound
//! frame.  It decides whether the frame is addressed to the router itself,
//! to one of its other interfaces, or must be forwarded, and responds in each
//! case:
//!
//! - **Addressed to the ingress interface**: TCP/UDP gets port-unreachable;
//!   an ICMP echo request gets an echo reply (even at TTL 1, since TTL is not
//!   decremented for locally terminated traffic); other traffic at TTL 1 gets
//!   time-exceeded; other ICMP is ignored; anything else gets
//!   protocol-unreachable.
//! - **Addressed to another interface of this router**: host-unreachable,
//!   even if a route to that address exists.
//! - **Anything else**: forwarded via the routing table and the ARP state,
//!   or parked while the next hop resolves, or answered with
//!   net-unreachable when no route matches.
//!
//! The caller may not assume the frame buffer is retained: anything that must
//! outlive the call (a parked frame) is deep-copied first.
//!
//! Malformed frames are dropped silently (debug log, success return); see
//! [`ProcessError`](crate::types::ProcessError) for the two failure
//! severities.

use log::debug;

use crate::ethernet::EthHeader;
use crate::frame::{self, FrameBuf};
use crate::icmp;
use crate::iface::{Clock, Interface, Transport};
use crate::ipv4::Ipv4Header;
use crate::neighbor::{ParkOutcome, Withheld};
use crate::router::{Router, RouterStats};
use crate::types::{EtherType, IfaceIndex, IpProtocol, MacAddr, NetError, ProcessError};
use crate::{ETH_ADDR_LEN, ETH_HEADER_LEN, ETHERTYPE_IPV4, IPV4_HEADER_LEN};

impl<T: Transport, C: Clock> Router<T, C> {
    /// Process one inbound frame received on `ingress`.
    ///
    /// Returns `Ok(())` on success (including every silent drop),
    /// [`Recoverable`](ProcessError::Recoverable) when this frame was
    /// abandoned but processing can continue, and
    /// [`Fatal`](ProcessError::Fatal) when the router should shut down.
    pub fn process_frame(&self, ingress: IfaceIndex, raw: &[u8]) -> Result<(), ProcessError> {
        RouterStats::bump(&self.stats.received);

        let Some(iface) = self.interface(ingress) else {
            debug!("dispatch: frame on unknown interface {}", ingress);
            return Err(ProcessError::Recoverable(NetError::UnknownInterface));
        };
        let Some(eth) = EthHeader::parse(raw) else {
            debug!("dispatch: runt frame ({} bytes) on {}", raw.len(), iface.name);
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        };

        match eth.ethertype() {
            Some(EtherType::Ipv4) => self.handle_ipv4(iface, raw),
            Some(EtherType::Arp) => self.handle_arp(iface, raw),
            Some(EtherType::Ipv6) => {
                // Not routed; dropped rather than misparsed as IPv4.
                RouterStats::bump(&self.stats.dropped);
                Ok(())
            }
            None => {
                debug!(
                    "dispatch: unknown EtherType {:#06x} on {}",
                    eth.ethertype, iface.name
                );
                RouterStats::bump(&self.stats.dropped);
                Ok(())
            }
        }
    }

    // =========================================================================
    // IPv4 path
    // =========================================================================

    fn handle_ipv4(&self, ingress: &Interface, raw: &[u8]) -> Result<(), ProcessError> {
        let ip_bytes = &raw[ETH_HEADER_LEN..];
        let Some(ip) = Ipv4Header::parse(ip_bytes) else {
            debug!("ipv4: truncated datagram on {}", ingress.name);
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        };

        // Header validation; failures are silent drops.
        if ip.version != 4 {
            debug!("ipv4: bad version {}", ip.version);
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        }
        let ihl = ip.header_len();
        if ihl < IPV4_HEADER_LEN || ip_bytes.len() < ihl {
            debug!("ipv4: bad IHL {} (datagram len {})", ihl, ip_bytes.len());
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        }
        let total_len = ip.total_len as usize;
        if total_len < ihl || total_len > ip_bytes.len() {
            debug!(
                "ipv4: total length {} out of range (datagram len {})",
                total_len,
                ip_bytes.len()
            );
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        }
        if frame::internet_checksum(&ip_bytes[..ihl]) != 0 {
            debug!("ipv4: bad header checksum from {}", ip.src);
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        }
        if ip.ttl == 0 {
            debug!("ipv4: TTL 0 from {}", ip.src);
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        }

        if ip.dst == ingress.ip {
            self.deliver_local(ingress, &ip, raw, ihl, total_len)
        } else if self.owns_ip(ip.dst) {
            // Addressed to another interface of this router.
            self.send_icmp(
                icmp::TYPE_DEST_UNREACHABLE,
                icmp::CODE_HOST_UNREACHABLE,
                raw,
                ingress,
            )
        } else {
            self.forward(ingress, &ip, raw)
        }
    }

    /// The frame is addressed to the ingress interface itself.
    fn deliver_local(
        &self,
        ingress: &Interface,
        ip: &Ipv4Header,
        raw: &[u8],
        ihl: usize,
        total_len: usize,
    ) -> Result<(), ProcessError> {
        let proto = IpProtocol::from_u8(ip.protocol);

        // No listener behind any port: TCP and UDP are always unreachable.
        if matches!(proto, Some(IpProtocol::Tcp) | Some(IpProtocol::Udp)) {
            return self.send_icmp(
                icmp::TYPE_DEST_UNREACHABLE,
                icmp::CODE_PORT_UNREACHABLE,
                raw,
                ingress,
            );
        }

        // Echo requests are answered before the TTL test: the datagram
        // terminates here, so its TTL is not decremented.
        if proto == Some(IpProtocol::Icmp) {
            let msg = &raw[ETH_HEADER_LEN + ihl..ETH_HEADER_LEN + total_len];
            if let Some(hdr) = icmp::IcmpHeader::parse(msg) {
                if hdr.icmp_type == icmp::TYPE_ECHO_REQUEST {
                    return self.send_icmp(icmp::TYPE_ECHO_REPLY, 0, raw, ingress);
                }
            }
        }

        if ip.ttl == 1 {
            return self.send_icmp(icmp::TYPE_TIME_EXCEEDED, 0, raw, ingress);
        }

        if proto == Some(IpProtocol::Icmp) {
            // Echo replies and diagnostics aimed at us need no answer.
            debug!("ipv4: ICMP message from {} ignored", ip.src);
            return Ok(());
        }

        self.send_icmp(
            icmp::TYPE_DEST_UNREACHABLE,
            icmp::CODE_PROTOCOL_UNREACHABLE,
            raw,
            ingress,
        )
    }

    // =========================================================================
    // Forwarding path
    // =========================================================================

    fn forward(
        &self,
        ingress: &Interface,
        ip: &Ipv4Header,
        raw: &[u8],
    ) -> Result<(), ProcessError> {
        let Some(route) = self.routes.lookup(ip.dst) else {
            debug!("forward: no route to {}", ip.dst);
            return self.send_icmp(
                icmp::TYPE_DEST_UNREACHABLE,
                icmp::CODE_NET_UNREACHABLE,
                raw,
                ingress,
            );
        };
        let next_hop = route.next_hop(ip.dst);
        let Some(egress) = self.interface(route.iface) else {
            debug!("forward: route {} names a missing interface", route);
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        };

        let now = self.clock.now();
        if let Some(mac) = self.neighbors.lookup(next_hop, now) {
            if ip.ttl == 1 {
                return self.send_icmp(icmp::TYPE_TIME_EXCEEDED, 0, raw, ingress);
            }
            return self.forward_datagram(raw, mac, egress);
        }

        // Next hop unresolved: withhold a deep copy and resolve via ARP.
        let Some(copy) = FrameBuf::copy_of(raw) else {
            debug!("forward: frame exceeds buffer bound, dropping");
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        };
        let held = Withheld {
            ingress: ingress.index,
            frame: copy,
        };
        match self.neighbors.park(next_hop, route.iface, held, now) {
            Ok(ParkOutcome::Created) => {
                RouterStats::bump(&self.stats.parked);
                // The entry counts this first request as sent.
                self.send_arp_request(egress, next_hop)
            }
            Ok(ParkOutcome::Appended) => {
                RouterStats::bump(&self.stats.parked);
                Ok(())
            }
            Ok(ParkOutcome::QueueFull) => {
                RouterStats::bump(&self.stats.dropped);
                Ok(())
            }
            Err(e) => Err(ProcessError::Fatal(e)),
        }
    }

    /// Re-emit `raw` toward `dst_mac` on `egress`: new link header, TTL
    /// decremented, IP checksum recomputed, payload untouched.
    pub(crate) fn forward_datagram(
        &self,
        raw: &[u8],
        dst_mac: MacAddr,
        egress: &Interface,
    ) -> Result<(), ProcessError> {
        let Some(mut out) = FrameBuf::copy_of(raw) else {
            debug!("forward: frame exceeds buffer bound, dropping");
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        };
        let buf = out.as_mut_slice();
        if buf.len() < ETH_HEADER_LEN + IPV4_HEADER_LEN {
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        }

        buf[0..ETH_ADDR_LEN].copy_from_slice(&dst_mac.0);
        buf[ETH_ADDR_LEN..ETH_ADDR_LEN * 2].copy_from_slice(&egress.mac.0);
        buf[ETH_ADDR_LEN * 2..ETH_HEADER_LEN].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        let ihl = ((buf[ETH_HEADER_LEN] & 0x0F) as usize) * 4;
        let ip_end = ETH_HEADER_LEN + ihl;
        if ihl < IPV4_HEADER_LEN || buf.len() < ip_end {
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        }

        buf[ETH_HEADER_LEN + 8] -= 1;
        let ck = frame::ipv4_header_checksum(&buf[ETH_HEADER_LEN..ip_end]);
        buf[ETH_HEADER_LEN + 10..ETH_HEADER_LEN + 12].copy_from_slice(&ck.to_be_bytes());

        self.emit(egress, out.as_slice())
            .map_err(ProcessError::Recoverable)?;
        RouterStats::bump(&self.stats.forwarded);
        Ok(())
    }
}
