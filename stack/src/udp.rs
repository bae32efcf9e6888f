//! UDP datagram input/output and the bound-socket control block.
//!
//! There is no payload delivery surface yet, so input stops at the lookup:
//! a matching socket consumes the datagram, anything else is dropped.

use alloc::sync::Arc;

use log::{debug, trace};
use packnet_pktio::{NifId, Packet};

use crate::checksum::Checksum;
use crate::ipv4::ipv4_output;
use crate::ipv6::ipv6_output;
use crate::nif::Offload;
use crate::socket_table::{SocketBase, SocketKey, TableEntry};
use crate::stack::Stack;
use crate::types::{NetAddr, Verdict, ip_proto};
use crate::wire::ipv4::{IPV4_HLEN, Ipv4Header};
use crate::wire::ipv6::{IPV6_HLEN, Ipv6Header};
use crate::wire::udp::{UDP_HLEN, UdpHeader};

/// A bound UDP endpoint.  Wildcard binds use zeroed key fields, matching
/// the table's fallback tiers.
pub struct UdpSocket {
    base: SocketBase,
}

impl UdpSocket {
    pub fn bind(key: SocketKey) -> Arc<Self> {
        Arc::new(Self {
            base: SocketBase::new(key),
        })
    }

    pub fn key(&self) -> &SocketKey {
        self.base.key()
    }
}

impl TableEntry for UdpSocket {
    fn base(&self) -> &SocketBase {
        &self.base
    }
}

/// Process one inbound UDP datagram (the L4 region is the datagram).
pub fn udp_input(stack: &Stack, pkt: Packet) -> Verdict {
    let offload = match stack.nif(pkt.nif()) {
        Some(nif) => nif.offload,
        None => return Verdict::Dropped,
    };

    let l3_rel = (pkt.l3_offset() - pkt.head()) as usize;
    let l4_rel = (pkt.l4_offset() - pkt.head()) as usize;
    let payload = pkt.payload();
    if l4_rel > payload.len() {
        return Verdict::Dropped;
    }
    let l4 = &payload[l4_rel..];

    let hdr = match UdpHeader::parse(l4) {
        Ok(h) => h,
        Err(e) => {
            debug!("udp: {}, dropped", e);
            return Verdict::Dropped;
        }
    };
    if l4.len() < hdr.length as usize {
        debug!("udp: length exceeds datagram, dropped");
        return Verdict::Dropped;
    }
    let l4 = &l4[..hdr.length as usize];

    let version = payload[l3_rel] >> 4;
    let (src_addr, dst_addr) = match version {
        4 => {
            let ip = match Ipv4Header::parse(&payload[l3_rel..]) {
                Ok(h) => h,
                Err(_) => return Verdict::Dropped,
            };
            // A zero checksum means the sender didn't compute one.
            if hdr.checksum != 0 && !offload.contains(Offload::L4_RX_CKSUM) {
                let mut ck =
                    Checksum::ipv4_pseudo(ip.src, ip.dst, ip_proto::UDP, hdr.length);
                ck.add(l4);
                if ck.finish() != 0 {
                    debug!("udp: checksum mismatch, dropped");
                    return Verdict::Dropped;
                }
            }
            (NetAddr::from_v4(ip.src), NetAddr::from_v4(ip.dst))
        }
        6 => {
            let ip = match Ipv6Header::parse(&payload[l3_rel..]) {
                Ok(h) => h,
                Err(_) => return Verdict::Dropped,
            };
            if !offload.contains(Offload::L4_RX_CKSUM) {
                let mut ck = Checksum::ipv6_pseudo(
                    ip.src,
                    ip.dst,
                    ip_proto::UDP,
                    u32::from(hdr.length),
                );
                ck.add(l4);
                if ck.finish() != 0 {
                    debug!("udp: checksum mismatch, dropped");
                    return Verdict::Dropped;
                }
            }
            (NetAddr::from_v6(ip.src), NetAddr::from_v6(ip.dst))
        }
        _ => return Verdict::Dropped,
    };

    let key = SocketKey {
        nif: pkt.nif(),
        src_addr,
        dst_addr,
        src_port: hdr.src_port,
        dst_port: hdr.dst_port,
        ip_version: version,
        protocol: ip_proto::UDP,
    };
    match stack.udp_sockets().lookup(&key) {
        Some(sock) => {
            trace!("udp: datagram for port {} delivered", sock.key().dst_port);
            Verdict::Consumed
        }
        None => {
            debug!("udp: no socket on port {}, dropped", hdr.dst_port);
            Verdict::Dropped
        }
    }
}

/// Build and send one UDP datagram.
#[allow(clippy::too_many_arguments)]
pub fn udp_output(
    stack: &Stack,
    nif_id: NifId,
    src: NetAddr,
    dst: NetAddr,
    ip_version: u8,
    src_port: u16,
    dst_port: u16,
    data: &[u8],
) -> Verdict {
    let Some(nif) = stack.nif(nif_id) else {
        return Verdict::Dropped;
    };
    let offload = nif.offload;

    let length = (UDP_HLEN + data.len()) as u16;
    let hdr = UdpHeader {
        src_port,
        dst_port,
        length,
        checksum: 0,
    };

    let Some(mut pkt) = Packet::alloc(stack.pool(), nif_id) else {
        return Verdict::Dropped;
    };
    match pkt.push_header(UDP_HLEN) {
        Ok(buf) => hdr.emit(buf),
        Err(_) => return Verdict::Dropped,
    }
    if pkt.append(data).is_err() {
        return Verdict::Dropped;
    }

    match ip_version {
        4 => {
            let v4 = match nif.ipv4 {
                Some(v4) => v4,
                None => return Verdict::Dropped,
            };
            // Source must be settled before the pseudo-header sum.
            let src = if src.is_zero() {
                v4.address
            } else {
                src.to_v4()
            };
            let dst = dst.to_v4();
            if !offload.contains(Offload::L4_TX_CKSUM) {
                let mut ck = Checksum::ipv4_pseudo(src, dst, ip_proto::UDP, length);
                ck.add(pkt.payload());
                let sum = match ck.finish() {
                    // All-zeros means "no checksum" on the wire.
                    0 => 0xFFFF,
                    s => s,
                };
                pkt.payload_mut()[6..8].copy_from_slice(&sum.to_be_bytes());
            }
            match pkt.push_header(IPV4_HLEN) {
                Ok(buf) => Ipv4Header::emit_basic(buf, src, dst, ip_proto::UDP, length),
                Err(_) => return Verdict::Dropped,
            }
            pkt.set_l3(pkt.head());
            pkt.set_l4(pkt.head() + IPV4_HLEN as u16);
            ipv4_output(stack, pkt, None)
        }
        6 => {
            let v6 = match nif.ipv6.clone() {
                Some(v6) => v6,
                None => return Verdict::Dropped,
            };
            let dst6 = dst.to_v6();
            let src6 = if src.is_zero() {
                match v6.source_for(&dst6) {
                    Some(a) => a,
                    None => return Verdict::Dropped,
                }
            } else {
                src.to_v6()
            };
            if !offload.contains(Offload::L4_TX_CKSUM) {
                let mut ck =
                    Checksum::ipv6_pseudo(src6, dst6, ip_proto::UDP, u32::from(length));
                ck.add(pkt.payload());
                let sum = match ck.finish() {
                    0 => 0xFFFF,
                    s => s,
                };
                pkt.payload_mut()[6..8].copy_from_slice(&sum.to_be_bytes());
            }
            match pkt.push_header(IPV6_HLEN) {
                Ok(buf) => Ipv6Header::emit_basic(
                    buf,
                    src6,
                    dst6,
                    ip_proto::UDP,
                    length,
                    v6.hop_limit,
                ),
                Err(_) => return Verdict::Dropped,
            }
            pkt.set_l3(pkt.head());
            pkt.set_l4(pkt.head() + IPV6_HLEN as u16);
            ipv6_output(stack, pkt)
        }
        _ => Verdict::Dropped,
    }
}
