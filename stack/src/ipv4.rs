//! IPv4 input validation and output pipeline.
//!
//! Input checks the header, trims link padding off the tail and hands the
//! datagram to the protocol dispatcher.  Output expects the active region
//! to start at the IP header (L3/L4 offsets recorded), picks the next hop,
//! resolves it through the ARP cache and pushes the Ethernet header.

use log::{debug, trace};
use packnet_pktio::Packet;

use crate::arp;
use crate::arp_cache::ArpLookup;
use crate::checksum::ipv4_header_checksum;
use crate::nif::Offload;
use crate::stack::Stack;
use crate::types::{Ipv4Addr, Verdict, ethertype};
use crate::wire::ipv4::{IPV4_HLEN, Ipv4Header};

/// Validate and dispatch one inbound IPv4 datagram.
pub fn ipv4_input(stack: &Stack, mut pkt: Packet) -> Verdict {
    let (offload, v4) = match stack.nif(pkt.nif()) {
        Some(nif) => match nif.ipv4 {
            Some(v4) => (nif.offload, v4),
            None => return Verdict::Dropped,
        },
        None => return Verdict::Dropped,
    };

    let l3_rel = (pkt.l3_offset() - pkt.head()) as usize;
    let hdr = {
        let payload = pkt.payload();
        if l3_rel > payload.len() {
            return Verdict::Dropped;
        }
        let l3 = &payload[l3_rel..];
        let hdr = match Ipv4Header::parse(l3) {
            Ok(h) => h,
            Err(e) => {
                debug!("ipv4: {}, dropped", e);
                return Verdict::Dropped;
            }
        };
        if !offload.contains(Offload::IPV4_RX_CKSUM)
            && ipv4_header_checksum(&l3[..hdr.header_len as usize]) != 0
        {
            debug!("ipv4: header checksum mismatch, dropped");
            return Verdict::Dropped;
        }
        hdr
    };

    if !v4.is_for_me(hdr.dst) {
        trace!("ipv4: {} not for us, dropped", hdr.dst);
        return Verdict::Dropped;
    }
    if pkt.len() < l3_rel + hdr.total_len as usize {
        debug!("ipv4: total length exceeds frame, dropped");
        return Verdict::Dropped;
    }
    // Link-layer padding past the IP total length goes away here so L4
    // checksums cover the right bytes.
    if pkt.trim_to(l3_rel + hdr.total_len as usize).is_err() {
        return Verdict::Dropped;
    }
    if hdr.is_fragment() {
        // Reassembly is out of scope.
        debug!("ipv4: fragment from {}, dropped", hdr.src);
        return Verdict::Dropped;
    }
    pkt.set_l4(pkt.l3_offset() + u16::from(hdr.header_len));
    stack.registry().dispatch4(stack, hdr.protocol, pkt)
}

/// Send an IPv4 datagram.  The active region must start at the IP header;
/// `next_hop` overrides route selection when the caller already knows it.
///
/// An unspecified source address is filled from the egress interface, and
/// the header checksum is computed here, so parked/released packets are
/// wire-ready the moment resolution finishes.
pub fn ipv4_output(stack: &Stack, mut pkt: Packet, next_hop: Option<Ipv4Addr>) -> Verdict {
    let nif_id = pkt.nif();
    let (our_mac, offload, v4) = match stack.nif(nif_id) {
        Some(nif) => match nif.ipv4 {
            Some(v4) => (nif.mac, nif.offload, v4),
            None => return Verdict::Dropped,
        },
        None => return Verdict::Dropped,
    };

    let dst = {
        let b = pkt.payload_mut();
        if b.len() < IPV4_HLEN {
            return Verdict::Dropped;
        }
        let src = Ipv4Addr::from_bytes([b[12], b[13], b[14], b[15]]);
        if src == Ipv4Addr::UNSPECIFIED {
            b[12..16].copy_from_slice(&v4.address.octets());
        }
        Ipv4Addr::from_bytes([b[16], b[17], b[18], b[19]])
    };

    let gateway = match next_hop {
        Some(nh) => nh,
        None => {
            if dst.is_multicast() || v4.is_broadcast(dst) || v4.on_link(dst) {
                dst
            } else if let Some(gw) = v4.gateway {
                gw
            } else {
                debug!("ipv4: no route to {}, dropped", dst);
                return Verdict::Dropped;
            }
        }
    };

    if !offload.contains(Offload::IPV4_TX_CKSUM) {
        let b = pkt.payload_mut();
        let hlen = ((b[0] & 0x0F) * 4) as usize;
        b[10..12].copy_from_slice(&[0, 0]);
        let sum = ipv4_header_checksum(&b[..hlen]);
        b[10..12].copy_from_slice(&sum.to_be_bytes());
    }

    if v4.is_self(dst) {
        return stack.loopback_eth(pkt, our_mac, our_mac, ethertype::IPV4);
    }

    let dst_mac = if dst.is_multicast() {
        dst.multicast_mac()
    } else if v4.is_broadcast(dst) {
        crate::types::MacAddr::BROADCAST
    } else {
        match stack.arp().lookup_or_create(nif_id, gateway, pkt, stack.now()) {
            ArpLookup::Dropped => return Verdict::Dropped,
            ArpLookup::Queued => {
                let _ = arp::send_request(stack, nif_id, gateway);
                return Verdict::Consumed;
            }
            ArpLookup::Resolved { mac, refresh, pkt: p } => {
                if refresh {
                    let _ = arp::send_request(stack, nif_id, gateway);
                }
                pkt = p;
                mac
            }
        }
    };

    stack.transmit_eth(pkt, our_mac, dst_mac, ethertype::IPV4)
}
