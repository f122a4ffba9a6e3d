//! ARP packet parse/emit and the router's ARP ingress path.
//!
//! Implements RFC 826 ARP for Ethernet/IPv4.  An inbound ARP frame is only
//! acted on when its target protocol address is the ingress interface's own
//! IP:
//!
//! - **Reply** (`oper=2`): records the resolution in the
//!   [`NeighborTable`](crate::neighbor::NeighborTable) and drains the frames
//!   that were withheld for it.
//! - **Request** (`oper=1`): answers with a unicast ARP reply.
//! - Anything else is ignored.

use log::debug;

use crate::ethernet::EthHeader;
use crate::frame::FrameBuf;
use crate::iface::{Clock, Interface, Transport};
use crate::router::{Router, RouterStats};
use crate::types::{Ipv4Addr, MacAddr, NetError, ProcessError};
use crate::{
    ARP_HLEN_ETHERNET, ARP_HTYPE_ETHERNET, ARP_OPER_REPLY, ARP_OPER_REQUEST, ARP_PACKET_LEN,
    ARP_PLEN_IPV4, ARP_PTYPE_IPV4, ETH_HEADER_LEN, ETHERTYPE_ARP, IPV4_HEADER_LEN,
};

// =============================================================================
// ArpPacket
// =============================================================================

/// Parsed fixed 28-byte ARP packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpPacket {
    pub htype: u16,
    pub ptype: u16,
    pub hlen: u8,
    pub plen: u8,
    pub oper: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Parse the fixed 28-byte layout.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ARP_PACKET_LEN {
            return None;
        }
        Some(Self {
            htype: u16::from_be_bytes([data[0], data[1]]),
            ptype: u16::from_be_bytes([data[2], data[3]]),
            hlen: data[4],
            plen: data[5],
            oper: u16::from_be_bytes([data[6], data[7]]),
            sender_mac: MacAddr([data[8], data[9], data[10], data[11], data[12], data[13]]),
            sender_ip: Ipv4Addr([data[14], data[15], data[16], data[17]]),
            target_mac: MacAddr([data[18], data[19], data[20], data[21], data[22], data[23]]),
            target_ip: Ipv4Addr([data[24], data[25], data[26], data[27]]),
        })
    }

    /// `true` for the only form this router speaks: Ethernet hardware
    /// addresses carrying IPv4 protocol addresses.
    #[inline]
    pub fn is_ethernet_ipv4(&self) -> bool {
        self.htype == ARP_HTYPE_ETHERNET
            && self.ptype == ARP_PTYPE_IPV4
            && self.hlen == ARP_HLEN_ETHERNET
            && self.plen == ARP_PLEN_IPV4
    }

    /// Build a request: who-has `target_ip`, tell `sender`.
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            htype: ARP_HTYPE_ETHERNET,
            ptype: ARP_PTYPE_IPV4,
            hlen: ARP_HLEN_ETHERNET,
            plen: ARP_PLEN_IPV4,
            oper: ARP_OPER_REQUEST,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    /// Build a reply: `sender_ip` is-at `sender_mac`.
    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            htype: ARP_HTYPE_ETHERNET,
            ptype: ARP_PTYPE_IPV4,
            hlen: ARP_HLEN_ETHERNET,
            plen: ARP_PLEN_IPV4,
            oper: ARP_OPER_REPLY,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Serialize back to wire format.
    pub fn to_bytes(&self) -> [u8; ARP_PACKET_LEN] {
        let mut out = [0u8; ARP_PACKET_LEN];
        out[0..2].copy_from_slice(&self.htype.to_be_bytes());
        out[2..4].copy_from_slice(&self.ptype.to_be_bytes());
        out[4] = self.hlen;
        out[5] = self.plen;
        out[6..8].copy_from_slice(&self.oper.to_be_bytes());
        out[8..14].copy_from_slice(&self.sender_mac.0);
        out[14..18].copy_from_slice(&self.sender_ip.0);
        out[18..24].copy_from_slice(&self.target_mac.0);
        out[24..28].copy_from_slice(&self.target_ip.0);
        out
    }
}

// =============================================================================
// Router ARP path
// =============================================================================

impl<T: Transport, C: Clock> Router<T, C> {
    /// Handle an inbound ARP frame (link header still attached).
    pub(crate) fn handle_arp(
        &self,
        ingress: &Interface,
        raw: &[u8],
    ) -> Result<(), ProcessError> {
        let Some(arp) = ArpPacket::parse(&raw[ETH_HEADER_LEN..]) else {
            debug!("arp: frame too short on {}", ingress.name);
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        };
        if !arp.is_ethernet_ipv4() {
            debug!(
                "arp: unsupported form (htype={}, ptype={:#06x}) on {}",
                arp.htype, arp.ptype, ingress.name
            );
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        }

        // Only ARP aimed at this interface's address concerns us.
        if arp.target_ip != ingress.ip {
            return Ok(());
        }

        match arp.oper {
            ARP_OPER_REPLY => self.handle_arp_reply(arp),
            ARP_OPER_REQUEST => {
                debug!(
                    "arp: request for {} from {} ({}), replying",
                    arp.target_ip, arp.sender_ip, arp.sender_mac
                );
                self.send_arp_reply(ingress, arp.sender_mac, arp.sender_ip)
            }
            other => {
                debug!("arp: unknown opcode {} from {}", other, arp.sender_ip);
                Ok(())
            }
        }
    }

    /// Record a resolution and flush the frames that waited for it.
    fn handle_arp_reply(&self, arp: ArpPacket) -> Result<(), ProcessError> {
        debug!("arp: reply {} is-at {}", arp.sender_ip, arp.sender_mac);
        let now = self.clock.now();
        let withheld = self
            .neighbors
            .on_reply(arp.sender_ip, arp.sender_mac, now)
            .map_err(ProcessError::Fatal)?;

        for held in withheld {
            let frame = held.frame.as_slice();
            if frame.len() < ETH_HEADER_LEN + IPV4_HEADER_LEN {
                continue;
            }
            let ttl = frame[ETH_HEADER_LEN + 8];
            if ttl == 1 {
                let Some(ingress) = self.interface(held.ingress) else {
                    continue;
                };
                if let Err(e) = self.send_icmp(
                    crate::icmp::TYPE_TIME_EXCEEDED,
                    0,
                    frame,
                    ingress,
                ) {
                    debug!("arp: time-exceeded for withheld frame failed: {e}");
                }
                continue;
            }
            // The routing decision is re-made at drain time.
            let dst = Ipv4Addr([
                frame[ETH_HEADER_LEN + 16],
                frame[ETH_HEADER_LEN + 17],
                frame[ETH_HEADER_LEN + 18],
                frame[ETH_HEADER_LEN + 19],
            ]);
            let Some(route) = self.routes.lookup(dst) else {
                debug!("arp: route for withheld frame to {} vanished", dst);
                continue;
            };
            let Some(egress) = self.interface(route.iface) else {
                continue;
            };
            if let Err(e) = self.forward_datagram(frame, arp.sender_mac, egress) {
                debug!("arp: forwarding withheld frame to {} failed: {e}", dst);
            }
        }
        Ok(())
    }

    /// Broadcast a request for `target` out of `egress`.
    pub(crate) fn send_arp_request(
        &self,
        egress: &Interface,
        target: Ipv4Addr,
    ) -> Result<(), ProcessError> {
        debug!("arp: who-has {} on {}", target, egress.name);
        let eth = EthHeader {
            dst: MacAddr::BROADCAST,
            src: egress.mac,
            ethertype: ETHERTYPE_ARP,
        };
        let packet = ArpPacket::request(egress.mac, egress.ip, target);
        self.emit_arp(egress, eth, packet)
    }

    /// Unicast a reply to `target_mac`/`target_ip` out of `iface`.
    fn send_arp_reply(
        &self,
        iface: &Interface,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Result<(), ProcessError> {
        let eth = EthHeader {
            dst: target_mac,
            src: iface.mac,
            ethertype: ETHERTYPE_ARP,
        };
        let packet = ArpPacket::reply(iface.mac, iface.ip, target_mac, target_ip);
        self.emit_arp(iface, eth, packet)
    }

    fn emit_arp(
        &self,
        iface: &Interface,
        eth: EthHeader,
        packet: ArpPacket,
    ) -> Result<(), ProcessError> {
        let mut out = FrameBuf::new();
        let built = out
            .append(&eth.to_bytes())
            .and_then(|()| out.append(&packet.to_bytes()));
        if built.is_err() {
            // ETH_HEADER_LEN + ARP_PACKET_LEN is far below the frame bound.
            return Err(ProcessError::Recoverable(NetError::NoBufferSpace));
        }
        self.emit(iface, out.as_slice())
            .map_err(ProcessError::Recoverable)?;
        RouterStats::bump(&self.stats.arp_sent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_emit_round_trip() {
        let packet = ArpPacket::request(
            MacAddr([0xaa, 0, 0, 0, 0, 1]),
            Ipv4Addr([10, 0, 0, 1]),
            Ipv4Addr([10, 0, 0, 9]),
        );
        let bytes = packet.to_bytes();
        assert_eq!(ArpPacket::parse(&bytes), Some(packet));
    }

    #[test]
    fn request_and_reply_shapes() {
        let req = ArpPacket::request(
            MacAddr([0xaa, 0, 0, 0, 0, 1]),
            Ipv4Addr([10, 0, 0, 1]),
            Ipv4Addr([10, 0, 0, 9]),
        );
        assert!(req.is_ethernet_ipv4());
        assert_eq!(req.oper, ARP_OPER_REQUEST);
        assert_eq!(req.target_mac, MacAddr::ZERO);

        let rep = ArpPacket::reply(
            MacAddr([0xcc, 0, 0, 0, 0, 9]),
            Ipv4Addr([10, 0, 0, 9]),
            MacAddr([0xaa, 0, 0, 0, 0, 1]),
            Ipv4Addr([10, 0, 0, 1]),
        );
        assert!(rep.is_ethernet_ipv4());
        assert_eq!(rep.oper, ARP_OPER_REPLY);
    }

    #[test]
    fn truncated_packet_rejected() {
        assert!(ArpPacket::parse(&[0u8; ARP_PACKET_LEN - 1]).is_none());
    }
}
