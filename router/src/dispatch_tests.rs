//! End-to-end dispatch scenarios against a recording transport.
//!
//! Each test drives [`Router::process_frame`] / [`Router::arp_sweep`] with
//! hand-built frames and asserts on the frames the router emits.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::arp::ArpPacket;
use crate::ethernet::EthHeader;
use crate::frame::{icmp_checksum, internet_checksum, ipv4_header_checksum};
use crate::icmp::{self, IcmpHeader};
use crate::iface::{Clock, Interface, Transport};
use crate::ipv4::Ipv4Header;
use crate::route::{RouteEntry, RouteTable};
use crate::router::Router;
use crate::types::{IfaceIndex, Ipv4Addr, MacAddr, NetError, ProcessError};
use crate::{
    ARP_OPER_REPLY, ARP_OPER_REQUEST, ETH_HEADER_LEN, ETHERTYPE_ARP, ETHERTYPE_IPV4,
    ICMP_HEADER_LEN, IPV4_HEADER_LEN,
};

// =============================================================================
// Harness doubles
// =============================================================================

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(IfaceIndex, Vec<u8>)>>,
}

impl Transport for RecordingTransport {
    fn send(&self, iface: &Interface, frame: &[u8]) -> Result<(), NetError> {
        self.sent.lock().push((iface.index, frame.to_vec()));
        Ok(())
    }
}

impl RecordingTransport {
    fn take(&self) -> Vec<(IfaceIndex, Vec<u8>)> {
        core::mem::take(&mut *self.sent.lock())
    }

    fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

struct FailingTransport;

impl Transport for FailingTransport {
    fn send(&self, _iface: &Interface, _frame: &[u8]) -> Result<(), NetError> {
        Err(NetError::SendFailed)
    }
}

struct FakeClock(AtomicU64);

impl Clock for FakeClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl FakeClock {
    fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

// =============================================================================
// Fixture
// =============================================================================

const MAC_A: MacAddr = MacAddr([0xaa, 0, 0, 0, 0, 0x01]);
const MAC_B: MacAddr = MacAddr([0xaa, 0, 0, 0, 0, 0x02]);
const IP_A: Ipv4Addr = Ipv4Addr([10, 0, 0, 1]);
const IP_B: Ipv4Addr = Ipv4Addr([10, 1, 0, 1]);

const HOST_MAC: MacAddr = MacAddr([0xbb, 0, 0, 0, 0, 0x02]);
const HOST_IP: Ipv4Addr = Ipv4Addr([10, 0, 0, 2]);

const GW_MAC: MacAddr = MacAddr([0xcc, 0, 0, 0, 0, 0x09]);
const GW_IP: Ipv4Addr = Ipv4Addr([10, 0, 0, 9]);

const FAR_HOST: Ipv4Addr = Ipv4Addr([20, 0, 0, 5]);
const B_SIDE_MAC: MacAddr = MacAddr([0xbb, 0, 0, 0, 0, 0x05]);
const B_SIDE_IP: Ipv4Addr = Ipv4Addr([10, 1, 0, 5]);

const IFACE_A: IfaceIndex = IfaceIndex(0);
const IFACE_B: IfaceIndex = IfaceIndex(1);

fn routes() -> RouteTable {
    RouteTable::new(vec![
        RouteEntry {
            dest: Ipv4Addr([10, 0, 0, 0]),
            mask: Ipv4Addr([255, 0, 0, 0]),
            gateway: Ipv4Addr::UNSPECIFIED,
            iface: IFACE_A,
        },
        RouteEntry {
            dest: Ipv4Addr([20, 0, 0, 0]),
            mask: Ipv4Addr([255, 0, 0, 0]),
            gateway: GW_IP,
            iface: IFACE_A,
        },
    ])
}

fn router() -> Router<RecordingTransport, FakeClock> {
    let interfaces = vec![
        Interface::new("eth0".into(), MAC_A, IP_A),
        Interface::new("eth1".into(), MAC_B, IP_B),
    ];
    Router::new(
        interfaces,
        routes(),
        RecordingTransport::default(),
        FakeClock(AtomicU64::new(1_000)),
    )
}

// =============================================================================
// Frame builders
// =============================================================================

fn ip_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    ttl: u8,
    protocol: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        &EthHeader {
            dst: dst_mac,
            src: src_mac,
            ethertype: ETHERTYPE_IPV4,
        }
        .to_bytes(),
    );
    let ip = Ipv4Header {
        version: 4,
        ihl: 5,
        tos: 0,
        total_len: (IPV4_HEADER_LEN + payload.len()) as u16,
        ident: 0x1c46,
        flags_frag: 0x4000,
        ttl,
        protocol,
        checksum: 0,
        src: src_ip,
        dst: dst_ip,
    };
    let mut header = ip.to_bytes();
    let ck = ipv4_header_checksum(&header);
    header[10..12].copy_from_slice(&ck.to_be_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    out
}

fn echo_request(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    ttl: u8,
    ident: u16,
    seq: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut msg = IcmpHeader {
        icmp_type: icmp::TYPE_ECHO_REQUEST,
        code: 0,
        checksum: 0,
        ident,
        seq,
    }
    .to_bytes()
    .to_vec();
    msg.extend_from_slice(payload);
    let ck = icmp_checksum(&msg);
    msg[2..4].copy_from_slice(&ck.to_be_bytes());
    ip_frame(src_mac, dst_mac, src_ip, dst_ip, ttl, 1, &msg)
}

fn arp_frame(packet: ArpPacket, eth_dst: MacAddr) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        &EthHeader {
            dst: eth_dst,
            src: packet.sender_mac,
            ethertype: ETHERTYPE_ARP,
        }
        .to_bytes(),
    );
    out.extend_from_slice(&packet.to_bytes());
    out
}

fn gateway_arp_reply() -> Vec<u8> {
    arp_frame(ArpPacket::reply(GW_MAC, GW_IP, MAC_A, IP_A), MAC_A)
}

/// A frame that needs forwarding through the gateway: `10.1.0.5 -> 20.0.0.5`
/// arriving on `eth1`.
fn transit_frame(ttl: u8) -> Vec<u8> {
    ip_frame(
        B_SIDE_MAC,
        MAC_B,
        B_SIDE_IP,
        FAR_HOST,
        ttl,
        17,
        &[1, 2, 3, 4, 5, 6, 7, 8],
    )
}

fn parse_ip(frame: &[u8]) -> Ipv4Header {
    Ipv4Header::parse(&frame[ETH_HEADER_LEN..]).unwrap()
}

fn icmp_message(frame: &[u8]) -> &[u8] {
    let ip = parse_ip(frame);
    &frame[ETH_HEADER_LEN + ip.header_len()..ETH_HEADER_LEN + ip.total_len as usize]
}

// =============================================================================
// Local delivery
// =============================================================================

#[test]
fn echo_to_router_interface_yields_reply() {
    let router = router();
    let request = echo_request(HOST_MAC, MAC_A, HOST_IP, IP_A, 64, 1, 1, b"abcd");
    router.process_frame(IFACE_A, &request).unwrap();

    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    let (iface, frame) = &sent[0];
    assert_eq!(*iface, IFACE_A);

    let eth = EthHeader::parse(frame).unwrap();
    assert_eq!(eth.dst, HOST_MAC);
    assert_eq!(eth.src, MAC_A);

    let ip = parse_ip(frame);
    assert_eq!(ip.src, IP_A);
    assert_eq!(ip.dst, HOST_IP);
    assert_eq!(
        internet_checksum(&frame[ETH_HEADER_LEN..ETH_HEADER_LEN + IPV4_HEADER_LEN]),
        0
    );

    let msg = icmp_message(frame);
    let hdr = IcmpHeader::parse(msg).unwrap();
    assert_eq!(hdr.icmp_type, icmp::TYPE_ECHO_REPLY);
    assert_eq!(hdr.code, 0);
    assert_eq!(hdr.ident, 1);
    assert_eq!(hdr.seq, 1);
    assert_eq!(&msg[ICMP_HEADER_LEN..], b"abcd");
    assert_eq!(internet_checksum(msg), 0);
}

#[test]
fn echo_request_with_ttl_one_still_answered() {
    let router = router();
    let request = echo_request(HOST_MAC, MAC_A, HOST_IP, IP_A, 1, 9, 2, b"x");
    router.process_frame(IFACE_A, &request).unwrap();

    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    let hdr = IcmpHeader::parse(icmp_message(&sent[0].1)).unwrap();
    assert_eq!(hdr.icmp_type, icmp::TYPE_ECHO_REPLY);
    assert_eq!(hdr.ident, 9);
}

#[test]
fn tcp_and_udp_to_router_are_port_unreachable() {
    for proto in [6u8, 17] {
        let router = router();
        let frame = ip_frame(HOST_MAC, MAC_A, HOST_IP, IP_A, 64, proto, &[0u8; 16]);
        router.process_frame(IFACE_A, &frame).unwrap();

        let sent = router.transport().take();
        assert_eq!(sent.len(), 1);
        let msg = icmp_message(&sent[0].1);
        assert_eq!(msg[0], icmp::TYPE_DEST_UNREACHABLE);
        assert_eq!(msg[1], icmp::CODE_PORT_UNREACHABLE);
        assert_eq!(internet_checksum(msg), 0);
    }
}

#[test]
fn unknown_protocol_to_router_is_protocol_unreachable() {
    let router = router();
    let frame = ip_frame(HOST_MAC, MAC_A, HOST_IP, IP_A, 64, 99, &[0u8; 16]);
    router.process_frame(IFACE_A, &frame).unwrap();

    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    let msg = icmp_message(&sent[0].1);
    assert_eq!(msg[0], icmp::TYPE_DEST_UNREACHABLE);
    assert_eq!(msg[1], icmp::CODE_PROTOCOL_UNREACHABLE);
    // Error body: trigger IP header plus eight payload bytes.
    assert_eq!(msg.len(), ICMP_HEADER_LEN + IPV4_HEADER_LEN + 8);
}

#[test]
fn non_echo_icmp_to_router_is_ignored() {
    let router = router();
    let mut msg = IcmpHeader {
        icmp_type: icmp::TYPE_ECHO_REPLY,
        code: 0,
        checksum: 0,
        ident: 1,
        seq: 1,
    }
    .to_bytes()
    .to_vec();
    let ck = icmp_checksum(&msg);
    msg[2..4].copy_from_slice(&ck.to_be_bytes());
    let frame = ip_frame(HOST_MAC, MAC_A, HOST_IP, IP_A, 64, 1, &msg);

    router.process_frame(IFACE_A, &frame).unwrap();
    assert_eq!(router.transport().count(), 0);
}

#[test]
fn other_interface_address_is_host_unreachable() {
    let router = router();
    // 10.1.0.1 is eth1's address; a route for 10.0.0.0/8 would also match it.
    let frame = ip_frame(HOST_MAC, MAC_A, HOST_IP, IP_B, 64, 17, &[0u8; 8]);
    router.process_frame(IFACE_A, &frame).unwrap();

    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, IFACE_A);
    let msg = icmp_message(&sent[0].1);
    assert_eq!(msg[0], icmp::TYPE_DEST_UNREACHABLE);
    assert_eq!(msg[1], icmp::CODE_HOST_UNREACHABLE);
}

// =============================================================================
// Forwarding
// =============================================================================

#[test]
fn forwards_with_cache_hit() {
    let router = router();
    router.process_frame(IFACE_A, &gateway_arp_reply()).unwrap();
    assert_eq!(router.transport().count(), 0);

    let inbound = transit_frame(64);
    router.process_frame(IFACE_B, &inbound).unwrap();

    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    let (iface, frame) = &sent[0];
    assert_eq!(*iface, IFACE_A);

    let eth = EthHeader::parse(frame).unwrap();
    assert_eq!(eth.dst, GW_MAC);
    assert_eq!(eth.src, MAC_A);

    let ip = parse_ip(frame);
    assert_eq!(ip.ttl, 63);
    assert_eq!(ip.src, B_SIDE_IP);
    assert_eq!(ip.dst, FAR_HOST);
    assert_eq!(
        internet_checksum(&frame[ETH_HEADER_LEN..ETH_HEADER_LEN + IPV4_HEADER_LEN]),
        0
    );
    // Payload beyond the IP header is untouched.
    assert_eq!(
        &frame[ETH_HEADER_LEN + IPV4_HEADER_LEN..],
        &inbound[ETH_HEADER_LEN + IPV4_HEADER_LEN..]
    );
    assert_eq!(router.stats().forwarded, 1);
}

#[test]
fn transit_ttl_one_is_time_exceeded() {
    let router = router();
    router.process_frame(IFACE_A, &gateway_arp_reply()).unwrap();

    router.process_frame(IFACE_B, &transit_frame(1)).unwrap();
    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    // Diagnostic goes back where the frame came from, not toward the next hop.
    assert_eq!(sent[0].0, IFACE_B);
    let msg = icmp_message(&sent[0].1);
    assert_eq!(msg[0], icmp::TYPE_TIME_EXCEEDED);
    assert_eq!(msg[1], 0);
    let ip = parse_ip(&sent[0].1);
    assert_eq!(ip.dst, B_SIDE_IP);
    assert_eq!(ip.src, IP_B);
}

#[test]
fn no_route_is_net_unreachable() {
    let router = router();
    let frame = ip_frame(
        B_SIDE_MAC,
        MAC_B,
        B_SIDE_IP,
        Ipv4Addr([172, 16, 1, 1]),
        64,
        17,
        &[0u8; 8],
    );
    router.process_frame(IFACE_B, &frame).unwrap();

    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, IFACE_B);
    let msg = icmp_message(&sent[0].1);
    assert_eq!(msg[0], icmp::TYPE_DEST_UNREACHABLE);
    assert_eq!(msg[1], icmp::CODE_NET_UNREACHABLE);
}

// =============================================================================
// ARP resolution
// =============================================================================

#[test]
fn cache_miss_parks_frame_and_requests_resolution() {
    let router = router();
    router.process_frame(IFACE_B, &transit_frame(64)).unwrap();

    // One ARP request out of the route's interface; the frame is withheld.
    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    let (iface, frame) = &sent[0];
    assert_eq!(*iface, IFACE_A);
    let eth = EthHeader::parse(frame).unwrap();
    assert!(eth.dst.is_broadcast());
    let arp = ArpPacket::parse(&frame[ETH_HEADER_LEN..]).unwrap();
    assert_eq!(arp.oper, ARP_OPER_REQUEST);
    assert_eq!(arp.target_ip, GW_IP);
    assert_eq!(arp.sender_ip, IP_A);
    assert_eq!(arp.sender_mac, MAC_A);
    assert_eq!(router.neighbors().pending_state(GW_IP), Some((1, 1)));

    // A second frame for the same next hop joins the queue silently.
    router.process_frame(IFACE_B, &transit_frame(64)).unwrap();
    assert_eq!(router.transport().count(), 0);
    assert_eq!(router.neighbors().pending_state(GW_IP), Some((1, 2)));

    // The reply drains both frames and dissolves the pending entry.
    router.process_frame(IFACE_A, &gateway_arp_reply()).unwrap();
    let sent = router.transport().take();
    assert_eq!(sent.len(), 2);
    for (iface, frame) in &sent {
        assert_eq!(*iface, IFACE_A);
        let eth = EthHeader::parse(frame).unwrap();
        assert_eq!(eth.dst, GW_MAC);
        assert_eq!(parse_ip(frame).ttl, 63);
    }
    assert_eq!(router.neighbors().pending_len(), 0);
    assert!(router.neighbors().lookup(GW_IP, 1_000).is_some());
}

#[test]
fn withheld_ttl_one_frame_expires_instead_of_forwarding() {
    let router = router();
    router.process_frame(IFACE_B, &transit_frame(1)).unwrap();
    router.transport().take(); // the ARP request

    router.process_frame(IFACE_A, &gateway_arp_reply()).unwrap();
    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, IFACE_B);
    let msg = icmp_message(&sent[0].1);
    assert_eq!(msg[0], icmp::TYPE_TIME_EXCEEDED);
    assert_eq!(parse_ip(&sent[0].1).dst, B_SIDE_IP);
}

#[test]
fn retry_exhaustion_reports_host_unreachable() {
    let router = router();
    router.process_frame(IFACE_B, &transit_frame(64)).unwrap();

    // Initial request, then one retransmit per due sweep.
    let mut arp_requests = router.transport().take().len();
    for _ in 0..4 {
        router.clock().advance(1);
        router.arp_sweep();
        let sent = router.transport().take();
        for (_, frame) in &sent {
            let arp = ArpPacket::parse(&frame[ETH_HEADER_LEN..]).unwrap();
            assert_eq!(arp.oper, ARP_OPER_REQUEST);
            assert_eq!(arp.target_ip, GW_IP);
        }
        arp_requests += sent.len();
    }
    assert_eq!(arp_requests, 5);

    // The next due sweep gives up and answers the withheld frame's source.
    router.clock().advance(1);
    router.arp_sweep();
    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    let (iface, frame) = &sent[0];
    assert_eq!(*iface, IFACE_B);
    let eth = EthHeader::parse(frame).unwrap();
    assert_eq!(eth.dst, B_SIDE_MAC);
    let ip = parse_ip(frame);
    assert_eq!(ip.dst, B_SIDE_IP);
    assert_eq!(ip.src, IP_B);
    let msg = icmp_message(frame);
    assert_eq!(msg[0], icmp::TYPE_DEST_UNREACHABLE);
    assert_eq!(msg[1], icmp::CODE_HOST_UNREACHABLE);
    assert_eq!(internet_checksum(msg), 0);

    assert_eq!(router.neighbors().pending_len(), 0);
    assert_eq!(router.stats().expired, 1);
}

#[test]
fn arp_request_for_our_address_gets_reply() {
    let router = router();
    let frame = arp_frame(
        ArpPacket::request(HOST_MAC, HOST_IP, IP_A),
        MacAddr::BROADCAST,
    );
    router.process_frame(IFACE_A, &frame).unwrap();

    let sent = router.transport().take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, IFACE_A);
    let eth = EthHeader::parse(&sent[0].1).unwrap();
    assert_eq!(eth.dst, HOST_MAC);
    assert_eq!(eth.src, MAC_A);
    let arp = ArpPacket::parse(&sent[0].1[ETH_HEADER_LEN..]).unwrap();
    assert_eq!(arp.oper, ARP_OPER_REPLY);
    assert_eq!(arp.sender_mac, MAC_A);
    assert_eq!(arp.sender_ip, IP_A);
    assert_eq!(arp.target_mac, HOST_MAC);
    assert_eq!(arp.target_ip, HOST_IP);
}

#[test]
fn arp_for_other_targets_is_ignored() {
    let router = router();
    let frame = arp_frame(
        ArpPacket::request(HOST_MAC, HOST_IP, Ipv4Addr([10, 0, 0, 77])),
        MacAddr::BROADCAST,
    );
    router.process_frame(IFACE_A, &frame).unwrap();
    assert_eq!(router.transport().count(), 0);
    assert_eq!(router.neighbors().pending_len(), 0);
}

// =============================================================================
// Drops and errors
// =============================================================================

#[test]
fn malformed_frames_drop_silently() {
    let router = router();

    // Runt frame.
    router.process_frame(IFACE_A, &[0u8; 10]).unwrap();
    // Truncated IP datagram.
    let mut truncated = transit_frame(64);
    truncated.truncate(ETH_HEADER_LEN + 12);
    router.process_frame(IFACE_B, &truncated).unwrap();
    // Corrupted header checksum.
    let mut corrupt = transit_frame(64);
    corrupt[ETH_HEADER_LEN + 10] ^= 0xFF;
    router.process_frame(IFACE_B, &corrupt).unwrap();
    // IPv6 is recognised but not routed.
    let mut v6 = transit_frame(64);
    v6[12..14].copy_from_slice(&crate::ETHERTYPE_IPV6.to_be_bytes());
    router.process_frame(IFACE_B, &v6).unwrap();
    // Unknown EtherType.
    let mut unknown = transit_frame(64);
    unknown[12..14].copy_from_slice(&0x88B5u16.to_be_bytes());
    router.process_frame(IFACE_B, &unknown).unwrap();

    assert_eq!(router.transport().count(), 0);
    assert_eq!(router.stats().dropped, 5);
}

#[test]
fn unknown_ingress_interface_is_recoverable() {
    let router = router();
    let err = router
        .process_frame(IfaceIndex(9), &transit_frame(64))
        .unwrap_err();
    assert_eq!(err, ProcessError::Recoverable(NetError::UnknownInterface));
    assert_eq!(err.code(), 1);
}

#[test]
fn transport_failure_is_recoverable() {
    let interfaces = vec![Interface::new("eth0".into(), MAC_A, IP_A)];
    let router = Router::new(
        interfaces,
        routes(),
        FailingTransport,
        FakeClock(AtomicU64::new(0)),
    );
    let request = echo_request(HOST_MAC, MAC_A, HOST_IP, IP_A, 64, 1, 1, b"abcd");
    let err = router.process_frame(IFACE_A, &request).unwrap_err();
    assert_eq!(err, ProcessError::Recoverable(NetError::SendFailed));
}
