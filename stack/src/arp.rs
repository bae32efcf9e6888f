//! ARP input handling and request emission.
//!
//! Inbound frames feed the resolution cache; requests for one of our
//! addresses are answered by rewriting the inbound frame in place, so the
//! reply path allocates nothing.

use log::{debug, trace};
use packnet_pktio::{NifId, Packet, PacketChain};

use crate::stack::Stack;
use crate::types::{Ipv4Addr, MacAddr, Verdict, ethertype};
use crate::wire::arp::{ARP_PLEN, ArpPacket, OP_REPLY, OP_REQUEST};

/// Process one inbound ARP frame.
pub fn arp_input(stack: &Stack, mut pkt: Packet) -> Verdict {
    let (our_mac, v4) = match stack.nif(pkt.nif()) {
        Some(nif) => match nif.ipv4 {
            Some(v4) => (nif.mac, v4),
            None => return Verdict::Dropped,
        },
        None => return Verdict::Dropped,
    };

    let l3_rel = (pkt.l3_offset() - pkt.head()) as usize;
    let arp = {
        let payload = pkt.payload();
        if l3_rel > payload.len() {
            return Verdict::Dropped;
        }
        match ArpPacket::parse(&payload[l3_rel..]) {
            Ok(arp) => arp,
            Err(e) => {
                debug!("arp: {}, frame dropped", e);
                return Verdict::Dropped;
            }
        }
    };

    // RFC 826 merge: refresh a known sender unconditionally, create an
    // entry only when the frame targets us.
    if arp.sender_ip != v4.address && !arp.sender_mac.is_multicast() {
        let chain = if arp.target_ip == v4.address {
            stack
                .arp()
                .put(pkt.nif(), arp.sender_ip, arp.sender_mac, stack.now())
        } else {
            stack
                .arp()
                .update(pkt.nif(), arp.sender_ip, arp.sender_mac, stack.now())
        };
        flush_chain(stack, chain, our_mac, arp.sender_mac, ethertype::IPV4);
    }

    if arp.op != OP_REQUEST || arp.target_ip != v4.address {
        return Verdict::Dropped;
    }

    // Answer in place: rewrite the ARP body, re-point the buffer at it and
    // send it back to the asker.
    trace!("arp: answering request for {} from {}", arp.target_ip, arp.sender_ip);
    let reply = ArpPacket {
        op: OP_REPLY,
        sender_mac: our_mac,
        sender_ip: v4.address,
        target_mac: arp.sender_mac,
        target_ip: arp.sender_ip,
    };
    reply.emit(&mut pkt.payload_mut()[l3_rel..l3_rel + ARP_PLEN]);
    if pkt.pull_header(l3_rel).is_err() || pkt.trim_to(ARP_PLEN).is_err() {
        return Verdict::Dropped;
    }
    pkt.set_l3(pkt.head());
    stack.transmit_eth(pkt, our_mac, arp.sender_mac, ethertype::ARP)
}

/// Broadcast a request for `target` on `nif`.
pub fn send_request(stack: &Stack, nif_id: NifId, target: Ipv4Addr) -> Verdict {
    let (our_mac, v4) = match stack.nif(nif_id) {
        Some(nif) => match nif.ipv4 {
            Some(v4) => (nif.mac, v4),
            None => return Verdict::Dropped,
        },
        None => return Verdict::Dropped,
    };
    let Some(mut pkt) = Packet::alloc(stack.pool(), nif_id) else {
        return Verdict::Dropped;
    };
    let request = ArpPacket {
        op: OP_REQUEST,
        sender_mac: our_mac,
        sender_ip: v4.address,
        target_mac: MacAddr::ZERO,
        target_ip: target,
    };
    match pkt.push_header(ARP_PLEN) {
        Ok(buf) => request.emit(buf),
        Err(_) => return Verdict::Dropped,
    }
    pkt.set_l3(pkt.head());
    trace!("arp: requesting {} on nif {}", target, nif_id);
    stack.transmit_eth(pkt, our_mac, MacAddr::BROADCAST, ethertype::ARP)
}

/// Transmit every packet a resolution released, oldest queuing order
/// preserved by the chain itself.
pub(crate) fn flush_chain(
    stack: &Stack,
    chain: PacketChain,
    src: MacAddr,
    dst: MacAddr,
    ethertype: u16,
) {
    for pkt in chain {
        let _ = stack.transmit_eth(pkt, src, dst, ethertype);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arp_cache::ArpLookup;
    use crate::testutil::{NIF, OUR_MAC, OUR_V4, TestHarness};
    use crate::wire::eth::ETH_HLEN;
    use std::vec::Vec;

    const PEER_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 9]);
    const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);

    fn arp_frame(op: u16, target_mac: MacAddr, target_ip: Ipv4Addr) -> Vec<u8> {
        let mut body = [0u8; ARP_PLEN];
        ArpPacket {
            op,
            sender_mac: PEER_MAC,
            sender_ip: PEER_IP,
            target_mac,
            target_ip,
        }
        .emit(&mut body);
        let mut frame = Vec::new();
        frame.extend_from_slice(&MacAddr::BROADCAST.0);
        frame.extend_from_slice(&PEER_MAC.0);
        frame.extend_from_slice(&ethertype::ARP.to_be_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    #[test]
    fn request_for_us_is_answered_in_place() {
        let h = TestHarness::new();
        let verdict = h.inject(&arp_frame(OP_REQUEST, MacAddr::ZERO, OUR_V4));
        assert_eq!(verdict, Verdict::Consumed);

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let frame = &sent[0].1;
        assert_eq!(&frame[0..6], &PEER_MAC.0, "reply goes back to the asker");
        assert_eq!(&frame[6..12], &OUR_MAC.0);

        let reply = ArpPacket::parse(&frame[ETH_HLEN..]).unwrap();
        assert_eq!(reply.op, OP_REPLY);
        assert_eq!(reply.sender_mac, OUR_MAC);
        assert_eq!(reply.sender_ip, OUR_V4);
        assert_eq!(reply.target_mac, PEER_MAC);
        assert_eq!(reply.target_ip, PEER_IP);

        assert_eq!(h.stack.arp().len(), 1, "request for us created an entry");
    }

    #[test]
    fn overheard_traffic_never_creates_an_entry() {
        let h = TestHarness::new();
        let other = Ipv4Addr::new(10, 0, 0, 7);
        let verdict = h.inject(&arp_frame(OP_REQUEST, MacAddr::ZERO, other));
        assert_eq!(verdict, Verdict::Dropped);
        assert!(h.sent().is_empty(), "not our question to answer");
        assert_eq!(h.stack.arp().len(), 0);
    }

    #[test]
    fn reply_releases_parked_packets() {
        let h = TestHarness::new();
        let mut pkt = Packet::alloc(h.stack.pool(), NIF).unwrap();
        pkt.append(&[0xAB; 40]).unwrap();
        assert!(matches!(
            h.stack
                .arp()
                .lookup_or_create(NIF, PEER_IP, pkt, h.stack.now()),
            ArpLookup::Queued
        ));

        let verdict = h.inject(&arp_frame(OP_REPLY, OUR_MAC, OUR_V4));
        assert_eq!(verdict, Verdict::Dropped, "a reply itself needs no answer");

        let sent = h.sent();
        assert_eq!(sent.len(), 1, "parked packet flushed on resolution");
        let frame = &sent[0].1;
        assert_eq!(&frame[0..6], &PEER_MAC.0);
        assert_eq!(
            u16::from_be_bytes([frame[12], frame[13]]),
            ethertype::IPV4,
            "released packets are IP datagrams"
        );
    }

    #[test]
    fn request_broadcast_layout() {
        let h = TestHarness::new();
        assert_eq!(send_request(&h.stack, NIF, PEER_IP), Verdict::Consumed);

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let frame = &sent[0].1;
        assert_eq!(&frame[0..6], &MacAddr::BROADCAST.0);
        let req = ArpPacket::parse(&frame[ETH_HLEN..]).unwrap();
        assert_eq!(req.op, OP_REQUEST);
        assert_eq!(req.sender_ip, OUR_V4);
        assert_eq!(req.target_mac, MacAddr::ZERO);
        assert_eq!(req.target_ip, PEER_IP);
    }
}
