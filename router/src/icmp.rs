//! ICMP header parse/emit and the ICMP responder.
//!
//! The responder builds the reply from the frame that triggered it: the new
//! frame goes back out the ingress interface, addressed to the trigger's
//! source at both layers.
//!
//! Payload rules:
//!
//! - **Echo reply** (and the rarely-sent echo request): identifier, sequence
//!   number, and payload are copied verbatim from the trigger's ICMP message;
//!   the IP total length equals the trigger frame length minus the link
//!   header.
//! - **Destination unreachable / time exceeded**: the body is the trigger's
//!   IP header plus the first 8 bytes following it, 28 bytes total,
//!   zero-padded if the trigger is shorter.

use log::debug;

use crate::ethernet::EthHeader;
use crate::frame::{self, FrameBuf};
use crate::iface::{Clock, Interface, Transport};
use crate::ipv4::Ipv4Header;
use crate::router::{Router, RouterStats};
use crate::types::{IpProtocol, ProcessError};
use crate::{DEFAULT_TTL, ETH_HEADER_LEN, ETHERTYPE_IPV4, ICMP_HEADER_LEN, IPV4_HEADER_LEN};

// =============================================================================
// Types and codes
// =============================================================================

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;

pub const CODE_NET_UNREACHABLE: u8 = 0;
pub const CODE_HOST_UNREACHABLE: u8 = 1;
pub const CODE_PROTOCOL_UNREACHABLE: u8 = 2;
pub const CODE_PORT_UNREACHABLE: u8 = 3;

/// Bytes of the trigger datagram echoed back in an error message: the IP
/// header plus the first 8 bytes of its payload.
pub const ERROR_BODY_LEN: usize = IPV4_HEADER_LEN + 8;

// =============================================================================
// IcmpHeader
// =============================================================================

/// Parsed 8-byte ICMP header.
///
/// `ident`/`seq` carry the echo identifier and sequence number; for error
/// messages the same four bytes are unused and zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub ident: u16,
    pub seq: u16,
}

impl IcmpHeader {
    /// Parse the header from the start of an ICMP message.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ICMP_HEADER_LEN {
            return None;
        }
        Some(Self {
            icmp_type: data[0],
            code: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
            ident: u16::from_be_bytes([data[4], data[5]]),
            seq: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Serialize back to wire format.
    pub fn to_bytes(&self) -> [u8; ICMP_HEADER_LEN] {
        let mut out = [0u8; ICMP_HEADER_LEN];
        out[0] = self.icmp_type;
        out[1] = self.code;
        out[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        out[4..6].copy_from_slice(&self.ident.to_be_bytes());
        out[6..8].copy_from_slice(&self.seq.to_be_bytes());
        out
    }
}

// =============================================================================
// Response construction
// =============================================================================

/// Build the complete response frame for `icmp_type`/`code` triggered by
/// `trigger` (a full frame, link header included) that arrived on `ingress`.
///
/// Returns `None` when the trigger is too mangled to answer or the response
/// would exceed the frame bound; the caller drops silently in both cases.
pub(crate) fn build_response(
    icmp_type: u8,
    code: u8,
    trigger: &[u8],
    ingress: &Interface,
) -> Option<FrameBuf> {
    let eth = EthHeader::parse(trigger)?;
    let ip_bytes = &trigger[ETH_HEADER_LEN..];
    let ip = Ipv4Header::parse(ip_bytes)?;
    let ihl = ip.header_len();
    if ihl < IPV4_HEADER_LEN || ip_bytes.len() < ihl {
        return None;
    }

    let echo = icmp_type == TYPE_ECHO_REPLY || icmp_type == TYPE_ECHO_REQUEST;

    let mut out = FrameBuf::new();
    out.append(
        &EthHeader {
            dst: eth.src,
            src: ingress.mac,
            ethertype: ETHERTYPE_IPV4,
        }
        .to_bytes(),
    )
    .ok()?;

    // IP total length: echo mirrors the trigger frame, errors are fixed-size.
    let total_len = if echo {
        trigger.len().checked_sub(ETH_HEADER_LEN)?
    } else {
        IPV4_HEADER_LEN + ICMP_HEADER_LEN + ERROR_BODY_LEN
    };

    let mut reply_ip = Ipv4Header {
        version: 4,
        ihl: 5,
        tos: 0,
        total_len: u16::try_from(total_len).ok()?,
        ident: 0,
        flags_frag: 0,
        ttl: DEFAULT_TTL,
        protocol: IpProtocol::Icmp.as_u8(),
        checksum: 0,
        src: ingress.ip,
        dst: ip.src,
    };
    let mut ip_out = reply_ip.to_bytes();
    reply_ip.checksum = frame::ipv4_header_checksum(&ip_out);
    ip_out[10..12].copy_from_slice(&reply_ip.checksum.to_be_bytes());
    out.append(&ip_out).ok()?;

    let icmp_start = out.len();
    if echo {
        // Copy identifier, sequence, and payload verbatim.
        let total = (ip.total_len as usize).min(ip_bytes.len());
        let msg = ip_bytes.get(ihl..total)?;
        let src = IcmpHeader::parse(msg)?;
        out.append(
            &IcmpHeader {
                icmp_type,
                code,
                checksum: 0,
                ident: src.ident,
                seq: src.seq,
            }
            .to_bytes(),
        )
        .ok()?;
        out.append(&msg[ICMP_HEADER_LEN..]).ok()?;
    } else {
        out.append(
            &IcmpHeader {
                icmp_type,
                code,
                checksum: 0,
                ident: 0,
                seq: 0,
            }
            .to_bytes(),
        )
        .ok()?;
        // Trigger IP header + 8 payload bytes, zero-padded when short.
        let mut body = [0u8; ERROR_BODY_LEN];
        let avail = ip_bytes.len().min(ERROR_BODY_LEN);
        body[..avail].copy_from_slice(&ip_bytes[..avail]);
        out.append(&body).ok()?;
    }

    let ck = frame::icmp_checksum(&out.as_slice()[icmp_start..]);
    out.as_mut_slice()[icmp_start + 2..icmp_start + 4].copy_from_slice(&ck.to_be_bytes());
    Some(out)
}

// =============================================================================
// Router ICMP responder
// =============================================================================

impl<T: Transport, C: Clock> Router<T, C> {
    /// Construct and emit an ICMP message triggered by `trigger` (full frame,
    /// link header included) back out of `ingress`.
    pub(crate) fn send_icmp(
        &self,
        icmp_type: u8,
        code: u8,
        trigger: &[u8],
        ingress: &Interface,
    ) -> Result<(), ProcessError> {
        let Some(out) = build_response(icmp_type, code, trigger, ingress) else {
            debug!(
                "icmp: cannot answer type {} code {} on {}",
                icmp_type, code, ingress.name
            );
            RouterStats::bump(&self.stats.dropped);
            return Ok(());
        };
        self.emit(ingress, out.as_slice())
            .map_err(ProcessError::Recoverable)?;
        RouterStats::bump(&self.stats.icmp_sent);
        Ok(())
    }
}
