//! IPv6 input validation, extension-header walk and output pipeline.

use log::{debug, trace};
use packnet_pktio::Packet;

use crate::dispatch::Ipv6Walk;
use crate::icmpv6;
use crate::nd6_cache::NdLookup;
use crate::stack::Stack;
use crate::types::{Ipv6Addr, Verdict, ethertype};
use crate::wire::ipv6::{IPV6_HLEN, Ipv6Header, ext_header_len};

/// Validate one inbound IPv6 datagram and walk its header chain.
pub fn ipv6_input(stack: &Stack, mut pkt: Packet) -> Verdict {
    let v6 = match stack.nif(pkt.nif()).and_then(|n| n.ipv6.clone()) {
        Some(v6) => v6,
        None => return Verdict::Dropped,
    };

    let l3_rel = (pkt.l3_offset() - pkt.head()) as usize;
    let hdr = {
        let payload = pkt.payload();
        if l3_rel > payload.len() {
            return Verdict::Dropped;
        }
        match Ipv6Header::parse(&payload[l3_rel..]) {
            Ok(h) => h,
            Err(e) => {
                debug!("ipv6: {}, dropped", e);
                return Verdict::Dropped;
            }
        }
    };

    if hdr.src.is_multicast() {
        debug!("ipv6: multicast source, dropped");
        return Verdict::Dropped;
    }
    if !v6.is_for_me(&hdr.dst) {
        trace!("ipv6: {} not for us, dropped", hdr.dst);
        return Verdict::Dropped;
    }

    let have = pkt.len() - l3_rel - IPV6_HLEN;
    let should = hdr.payload_len as usize;
    if have < should {
        debug!("ipv6: payload length exceeds frame, dropped");
        return Verdict::Dropped;
    }
    if have > should && pkt.trim_to(l3_rel + IPV6_HLEN + should).is_err() {
        return Verdict::Dropped;
    }

    let l4_abs = pkt.l3_offset() + IPV6_HLEN as u16;
    pkt.set_l4(l4_abs);
    let mut walk = Ipv6Walk {
        next_header: hdr.next_header,
        hdr_offset: l4_abs,
    };
    let mut pkt = pkt;
    loop {
        if walk.next_header == crate::types::ip_proto::NONE {
            return Verdict::Dropped;
        }
        match stack.registry().dispatch6(stack, pkt, &mut walk) {
            Verdict::Continue(p) => pkt = p,
            terminal => return terminal,
        }
    }
}

/// Skip over a hop-by-hop / destination-options / routing header and keep
/// walking the chain.
pub fn ext_header_skip(_stack: &Stack, mut pkt: Packet, walk: &mut Ipv6Walk) -> Verdict {
    let rel = match walk.hdr_offset.checked_sub(pkt.head()) {
        Some(r) => r as usize,
        None => return Verdict::Dropped,
    };
    let (next, len) = {
        let payload = pkt.payload();
        if rel + 2 > payload.len() {
            return Verdict::Dropped;
        }
        let len = ext_header_len(payload[rel + 1]);
        if rel + len > payload.len() {
            debug!("ipv6: truncated extension header, dropped");
            return Verdict::Dropped;
        }
        (payload[rel], len)
    };
    walk.next_header = next;
    walk.hdr_offset += len as u16;
    pkt.set_l4(walk.hdr_offset);
    Verdict::Continue(pkt)
}

/// Fragment headers end processing: reassembly is out of scope.
pub fn fragment_stub(_stack: &Stack, _pkt: Packet, _walk: &mut Ipv6Walk) -> Verdict {
    debug!("ipv6: fragment, dropped");
    Verdict::Dropped
}

/// Send an IPv6 datagram.  The active region must start at the IP header.
///
/// Next-hop selection is link-local/on-link direct, otherwise the first
/// default router for the interface (falling back to direct when the
/// router list is empty).
pub fn ipv6_output(stack: &Stack, mut pkt: Packet) -> Verdict {
    let nif_id = pkt.nif();
    let (our_mac, v6) = match stack.nif(nif_id) {
        Some(nif) => match nif.ipv6.clone() {
            Some(v6) => (nif.mac, v6),
            None => return Verdict::Dropped,
        },
        None => return Verdict::Dropped,
    };

    let dst = {
        let b = pkt.payload_mut();
        if b.len() < IPV6_HLEN {
            return Verdict::Dropped;
        }
        let mut src = [0u8; 16];
        src.copy_from_slice(&b[8..24]);
        let mut dst = [0u8; 16];
        dst.copy_from_slice(&b[24..40]);
        let dst = Ipv6Addr(dst);
        if Ipv6Addr(src).is_unspecified() {
            if let Some(chosen) = v6.source_for(&dst) {
                b[8..24].copy_from_slice(&chosen.0);
            }
        }
        dst
    };

    if v6.is_self(&dst) {
        return stack.loopback_eth(pkt, our_mac, our_mac, ethertype::IPV6);
    }

    let dst_mac = if dst.is_multicast() {
        dst.multicast_mac()
    } else {
        let next_hop = if dst.is_link_local() {
            dst
        } else {
            stack.nd6().first_router(nif_id).unwrap_or(dst)
        };
        match stack.nd6().lookup(nif_id, &next_hop, pkt, stack.now()) {
            NdLookup::Dropped => return Verdict::Dropped,
            NdLookup::Queued => {
                let _ = icmpv6::send_neighbor_solicitation(stack, nif_id, &next_hop);
                return Verdict::Consumed;
            }
            NdLookup::Resolved { mac, probe, pkt: p } => {
                if probe {
                    let _ = icmpv6::send_neighbor_solicitation(stack, nif_id, &next_hop);
                }
                pkt = p;
                mac
            }
        }
    };

    stack.transmit_eth(pkt, our_mac, dst_mac, ethertype::IPV6)
}
