//! ICMPv6 input (RFC 4443) and Neighbor Discovery handling (RFC 4861).
//!
//! ND messages feed the neighbor cache and the Default Router List;
//! solicitations for one of our addresses are answered with a solicited
//! advertisement.  Echo requests are answered in place.  ND validity rules
//! (hop limit 255, code 0, option well-formedness) drop the message
//! without further processing.

use log::{debug, trace};
use packnet_pktio::{NifId, Packet};

use crate::arp::flush_chain;
use crate::checksum::Checksum;
use crate::dispatch::Ipv6Walk;
use crate::ipv6::ipv6_output;
use crate::nd6_cache::NadvFlags;
use crate::stack::Stack;
use crate::types::{Ipv6Addr, MacAddr, Verdict, ethertype, ip_proto};
use crate::wire::icmpv6::{
    Icmpv6Header, NADV_OVERRIDE, NADV_ROUTER, NADV_SOLICITED, ND_NEIGHBOR_MLEN, NeighborMessage,
    RouterAdvert, TYPE_ECHO_REPLY, TYPE_ECHO_REQUEST, TYPE_NEIGHBOR_ADVERT, TYPE_NEIGHBOR_SOLICIT,
    TYPE_ROUTER_ADVERT, OPT_SOURCE_LLA, OPT_TARGET_LLA, find_lla_option,
};
use crate::wire::ipv6::{IPV6_HLEN, Ipv6Header};

/// What an inbound message asks of us, copied out of the buffer.
enum Msg {
    NeighborSolicit {
        target: Ipv6Addr,
        slla: Option<MacAddr>,
    },
    NeighborAdvert {
        target: Ipv6Addr,
        tlla: MacAddr,
        flags: NadvFlags,
    },
    RouterAdvert {
        slla: Option<MacAddr>,
        lifetime_s: u16,
    },
    EchoRequest,
}

/// Process one inbound ICMPv6 message.  Terminal: ends the header chain.
pub fn icmpv6_input(stack: &Stack, pkt: Packet, walk: &mut Ipv6Walk) -> Verdict {
    let nif_id = pkt.nif();
    let (our_mac, v6) = match stack.nif(nif_id) {
        Some(nif) => match nif.ipv6.clone() {
            Some(v6) => (nif.mac, v6),
            None => return Verdict::Dropped,
        },
        None => return Verdict::Dropped,
    };

    let l3_rel = (pkt.l3_offset() - pkt.head()) as usize;
    let msg_rel = match walk.hdr_offset.checked_sub(pkt.head()) {
        Some(r) => r as usize,
        None => return Verdict::Dropped,
    };

    let (ip, msg) = {
        let payload = pkt.payload();
        if msg_rel >= payload.len() {
            return Verdict::Dropped;
        }
        let ip = match Ipv6Header::parse(&payload[l3_rel..]) {
            Ok(h) => h,
            Err(_) => return Verdict::Dropped,
        };
        let region = &payload[msg_rel..];

        let mut ck = Checksum::ipv6_pseudo(ip.src, ip.dst, ip_proto::ICMPV6, region.len() as u32);
        ck.add(region);
        if ck.finish() != 0 {
            debug!("icmpv6: checksum mismatch, dropped");
            return Verdict::Dropped;
        }

        let msg = match parse_message(&ip, region) {
            Some(m) => m,
            None => return Verdict::Dropped,
        };
        (ip, msg)
    };

    match msg {
        Msg::NeighborSolicit { target, slla } => {
            // An unspecified source is duplicate address detection; there
            // is nothing to record and nobody to answer directly.
            if ip.src.is_unspecified() {
                return Verdict::Dropped;
            }
            if let Some(mac) = slla {
                let chain = stack
                    .nd6()
                    .record_solicitation(nif_id, &ip.src, mac, stack.now());
                flush_chain(stack, chain, our_mac, mac, ethertype::IPV6);
            }
            if v6.is_self(&target) {
                trace!("nd6: answering solicitation for {} from {}", target, ip.src);
                let _ = send_neighbor_advertisement(stack, nif_id, &target, &ip.src, slla, true);
            }
            Verdict::Dropped
        }
        Msg::NeighborAdvert { target, tlla, flags } => {
            let chain = stack
                .nd6()
                .record_advertisement(nif_id, &target, tlla, flags, stack.now());
            flush_chain(stack, chain, our_mac, tlla, ethertype::IPV6);
            Verdict::Dropped
        }
        Msg::RouterAdvert { slla, lifetime_s } => {
            let chain = stack.nd6().record_router_advertisement(
                nif_id,
                &ip.src,
                slla,
                lifetime_s,
                stack.now(),
            );
            if let Some(mac) = slla {
                flush_chain(stack, chain, our_mac, mac, ethertype::IPV6);
            }
            Verdict::Dropped
        }
        Msg::EchoRequest => echo_reply(stack, pkt, msg_rel, &ip, &v6),
    }
}

/// Classify and validate the message; `None` drops it.
fn parse_message(ip: &Ipv6Header, region: &[u8]) -> Option<Msg> {
    // A runt region can still checksum to zero; length-gate before
    // touching type and code.
    let head = Icmpv6Header::parse(region).ok()?;
    let (msg_type, code) = (head.msg_type, head.code);
    match msg_type {
        TYPE_NEIGHBOR_SOLICIT => {
            if ip.hop_limit != 255 || code != 0 {
                return None;
            }
            let ns = NeighborMessage::parse(region).ok()?;
            let slla = find_lla_option(&region[ns.options_at..], OPT_SOURCE_LLA).ok()?;
            // DAD solicitations must not carry a source address option.
            if ip.src.is_unspecified() && slla.is_some() {
                return None;
            }
            Some(Msg::NeighborSolicit {
                target: ns.target,
                slla: slla.map(MacAddr),
            })
        }
        TYPE_NEIGHBOR_ADVERT => {
            if ip.hop_limit != 255 || code != 0 {
                return None;
            }
            let na = NeighborMessage::parse(region).ok()?;
            if ip.dst.is_multicast() && na.flags & NADV_SOLICITED != 0 {
                return None;
            }
            let tlla = find_lla_option(&region[na.options_at..], OPT_TARGET_LLA).ok()??;
            Some(Msg::NeighborAdvert {
                target: na.target,
                tlla: MacAddr(tlla),
                flags: NadvFlags {
                    router: na.flags & NADV_ROUTER != 0,
                    solicited: na.flags & NADV_SOLICITED != 0,
                    override_lla: na.flags & NADV_OVERRIDE != 0,
                },
            })
        }
        TYPE_ROUTER_ADVERT => {
            if ip.hop_limit != 255 || code != 0 || !ip.src.is_link_local() {
                return None;
            }
            let ra = RouterAdvert::parse(region).ok()?;
            let slla = find_lla_option(&region[ra.options_at..], OPT_SOURCE_LLA).ok()?;
            Some(Msg::RouterAdvert {
                slla: slla.map(MacAddr),
                lifetime_s: ra.router_lifetime,
            })
        }
        TYPE_ECHO_REQUEST => {
            if code != 0 {
                return None;
            }
            Some(Msg::EchoRequest)
        }
        _ => None,
    }
}

/// Turn the echo request into the reply in place and route it back.
fn echo_reply(
    stack: &Stack,
    mut pkt: Packet,
    msg_rel: usize,
    ip: &Ipv6Header,
    v6: &crate::nif::NifIpv6,
) -> Verdict {
    let reply_src = if v6.is_self(&ip.dst) {
        ip.dst
    } else {
        match v6.source_for(&ip.src) {
            Some(a) => a,
            None => return Verdict::Dropped,
        }
    };

    if pkt.pull_header(msg_rel).is_err() {
        return Verdict::Dropped;
    }
    let msg_len = pkt.len();
    {
        let b = pkt.payload_mut();
        b[0] = TYPE_ECHO_REPLY;
        b[2..4].copy_from_slice(&[0, 0]);
        let mut ck =
            Checksum::ipv6_pseudo(reply_src, ip.src, ip_proto::ICMPV6, msg_len as u32);
        ck.add(b);
        let sum = ck.finish();
        b[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    match pkt.push_header(IPV6_HLEN) {
        Ok(buf) => Ipv6Header::emit_basic(
            buf,
            reply_src,
            ip.src,
            ip_proto::ICMPV6,
            msg_len as u16,
            v6.hop_limit,
        ),
        Err(_) => return Verdict::Dropped,
    }
    pkt.set_l3(pkt.head());
    pkt.set_l4(pkt.head() + IPV6_HLEN as u16);
    ipv6_output(stack, pkt)
}

/// Solicit `target` at its solicited-node multicast group, carrying our
/// link-layer address.
pub fn send_neighbor_solicitation(stack: &Stack, nif_id: NifId, target: &Ipv6Addr) -> Verdict {
    let (our_mac, v6) = match stack.nif(nif_id) {
        Some(nif) => match nif.ipv6.clone() {
            Some(v6) => (nif.mac, v6),
            None => return Verdict::Dropped,
        },
        None => return Verdict::Dropped,
    };
    let Some(src) = v6.source_for(target) else {
        return Verdict::Dropped;
    };
    let dst = target.solicited_node();

    let mut msg = [0u8; ND_NEIGHBOR_MLEN + 8];
    msg[0] = TYPE_NEIGHBOR_SOLICIT;
    msg[8..24].copy_from_slice(&target.0);
    msg[24] = OPT_SOURCE_LLA;
    msg[25] = 1;
    msg[26..32].copy_from_slice(&our_mac.0);
    patch_checksum(&mut msg, &src, &dst);

    trace!("nd6: soliciting {} on nif {}", target, nif_id);
    emit_nd(stack, nif_id, &msg, &src, &dst, Some(dst.multicast_mac()), our_mac)
}

/// Advertise `target` (one of our addresses) to `dst`.  When the
/// requester's link-layer address is known the frame goes out directly,
/// otherwise it takes the normal output path.
pub fn send_neighbor_advertisement(
    stack: &Stack,
    nif_id: NifId,
    target: &Ipv6Addr,
    dst: &Ipv6Addr,
    dst_mac: Option<MacAddr>,
    solicited: bool,
) -> Verdict {
    let our_mac = match stack.nif(nif_id) {
        Some(nif) => nif.mac,
        None => return Verdict::Dropped,
    };

    let mut msg = [0u8; ND_NEIGHBOR_MLEN + 8];
    msg[0] = TYPE_NEIGHBOR_ADVERT;
    msg[4] = NADV_OVERRIDE | if solicited { NADV_SOLICITED } else { 0 };
    msg[8..24].copy_from_slice(&target.0);
    msg[24] = OPT_TARGET_LLA;
    msg[25] = 1;
    msg[26..32].copy_from_slice(&our_mac.0);
    patch_checksum(&mut msg, target, dst);

    emit_nd(stack, nif_id, &msg, target, dst, dst_mac, our_mac)
}

fn patch_checksum(msg: &mut [u8], src: &Ipv6Addr, dst: &Ipv6Addr) {
    let mut ck = Checksum::ipv6_pseudo(*src, *dst, ip_proto::ICMPV6, msg.len() as u32);
    ck.add(msg);
    let sum = ck.finish();
    msg[2..4].copy_from_slice(&sum.to_be_bytes());
}

/// Wrap an ND message in an IPv6 header (hop limit 255) and send it.
fn emit_nd(
    stack: &Stack,
    nif_id: NifId,
    msg: &[u8],
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    dst_mac: Option<MacAddr>,
    our_mac: MacAddr,
) -> Verdict {
    let Some(mut pkt) = Packet::alloc(stack.pool(), nif_id) else {
        return Verdict::Dropped;
    };
    match pkt.push_header(msg.len()) {
        Ok(buf) => buf.copy_from_slice(msg),
        Err(_) => return Verdict::Dropped,
    }
    match pkt.push_header(IPV6_HLEN) {
        Ok(buf) => {
            Ipv6Header::emit_basic(buf, *src, *dst, ip_proto::ICMPV6, msg.len() as u16, 255)
        }
        Err(_) => return Verdict::Dropped,
    }
    pkt.set_l3(pkt.head());
    pkt.set_l4(pkt.head() + IPV6_HLEN as u16);
    match dst_mac {
        Some(mac) => stack.transmit_eth(pkt, our_mac, mac, ethertype::IPV6),
        None => ipv6_output(stack, pkt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{NIF, OUR_MAC, TestHarness, our_global, our_link_local};
    use crate::wire::eth::ETH_HLEN;
    use packnet_pktio::Packet;
    use std::vec::Vec;

    const PEER_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 9]);

    fn peer_ll() -> Ipv6Addr {
        let mut a = [0u8; 16];
        a[0] = 0xFE;
        a[1] = 0x80;
        a[15] = 9;
        Ipv6Addr(a)
    }

    /// Wrap `msg` (checksum patched in) in IPv6 + Ethernet from the peer.
    fn frame(src: Ipv6Addr, dst: Ipv6Addr, hop_limit: u8, msg: &[u8]) -> Vec<u8> {
        let mut msg = msg.to_vec();
        msg[2..4].copy_from_slice(&[0, 0]);
        let mut ck = Checksum::ipv6_pseudo(src, dst, ip_proto::ICMPV6, msg.len() as u32);
        ck.add(&msg);
        let sum = ck.finish();
        msg[2..4].copy_from_slice(&sum.to_be_bytes());

        let mut ip = std::vec![0u8; IPV6_HLEN];
        Ipv6Header::emit_basic(&mut ip, src, dst, ip_proto::ICMPV6, msg.len() as u16, hop_limit);

        let mut out = Vec::new();
        out.extend_from_slice(&OUR_MAC.0);
        out.extend_from_slice(&PEER_MAC.0);
        out.extend_from_slice(&ethertype::IPV6.to_be_bytes());
        out.extend_from_slice(&ip);
        out.extend_from_slice(&msg);
        out
    }

    fn ns_message(target: Ipv6Addr) -> Vec<u8> {
        let mut msg = std::vec![0u8; ND_NEIGHBOR_MLEN + 8];
        msg[0] = TYPE_NEIGHBOR_SOLICIT;
        msg[8..24].copy_from_slice(&target.0);
        msg[24] = OPT_SOURCE_LLA;
        msg[25] = 1;
        msg[26..32].copy_from_slice(&PEER_MAC.0);
        msg
    }

    fn na_message(target: Ipv6Addr, flags: u8) -> Vec<u8> {
        let mut msg = std::vec![0u8; ND_NEIGHBOR_MLEN + 8];
        msg[0] = TYPE_NEIGHBOR_ADVERT;
        msg[4] = flags;
        msg[8..24].copy_from_slice(&target.0);
        msg[24] = OPT_TARGET_LLA;
        msg[25] = 1;
        msg[26..32].copy_from_slice(&PEER_MAC.0);
        msg
    }

    fn ra_message(lifetime_s: u16) -> Vec<u8> {
        let mut msg = std::vec![0u8; 16 + 8];
        msg[0] = TYPE_ROUTER_ADVERT;
        msg[4] = 64; // cur hop limit
        msg[6..8].copy_from_slice(&lifetime_s.to_be_bytes());
        msg[16] = OPT_SOURCE_LLA;
        msg[17] = 1;
        msg[18..24].copy_from_slice(&PEER_MAC.0);
        msg
    }

    #[test]
    fn solicitation_for_us_is_answered() {
        let h = TestHarness::new();
        let verdict = h.inject(&frame(
            peer_ll(),
            our_link_local(),
            255,
            &ns_message(our_link_local()),
        ));
        assert_eq!(verdict, Verdict::Dropped);
        assert_eq!(h.stack.nd6().len(), 1, "sender recorded from SLLA");

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let out = &sent[0].1;
        assert_eq!(&out[0..6], &PEER_MAC.0, "advertised directly to the asker");
        let ip = Ipv6Header::parse(&out[ETH_HLEN..]).unwrap();
        assert_eq!(ip.src, our_link_local());
        assert_eq!(ip.dst, peer_ll());
        assert_eq!(ip.hop_limit, 255);

        let na = &out[ETH_HLEN + IPV6_HLEN..];
        assert_eq!(na[0], TYPE_NEIGHBOR_ADVERT);
        assert_eq!(na[4], NADV_SOLICITED | NADV_OVERRIDE);
        assert_eq!(&na[8..24], &our_link_local().0);
        assert_eq!(&na[26..32], &OUR_MAC.0, "target link-layer option is ours");

        let mut ck =
            Checksum::ipv6_pseudo(ip.src, ip.dst, ip_proto::ICMPV6, na.len() as u32);
        ck.add(na);
        assert_eq!(ck.finish(), 0, "advertisement checksum verifies");
    }

    #[test]
    fn runt_message_is_dropped() {
        let h = TestHarness::new();
        // One byte of message, with the source address's last word chosen
        // so the checksum still verifies.
        let mut src = peer_ll();
        src.0[14..16].copy_from_slice(&[0, 0]);
        let mut ck = Checksum::ipv6_pseudo(src, our_link_local(), ip_proto::ICMPV6, 1);
        ck.add(&[TYPE_ECHO_REQUEST]);
        src.0[14..16].copy_from_slice(&ck.finish().to_be_bytes());

        let mut ip = std::vec![0u8; IPV6_HLEN];
        Ipv6Header::emit_basic(&mut ip, src, our_link_local(), ip_proto::ICMPV6, 1, 64);
        let mut out = Vec::new();
        out.extend_from_slice(&OUR_MAC.0);
        out.extend_from_slice(&PEER_MAC.0);
        out.extend_from_slice(&ethertype::IPV6.to_be_bytes());
        out.extend_from_slice(&ip);
        out.push(TYPE_ECHO_REQUEST);

        assert_eq!(h.inject(&out), Verdict::Dropped);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn hop_limit_gate_rejects_off_link_nd() {
        let h = TestHarness::new();
        let verdict = h.inject(&frame(
            peer_ll(),
            our_link_local(),
            64,
            &ns_message(our_link_local()),
        ));
        assert_eq!(verdict, Verdict::Dropped);
        assert!(h.sent().is_empty());
        assert_eq!(h.stack.nd6().len(), 0, "nothing recorded");
    }

    #[test]
    fn advertisement_releases_parked_packets() {
        let h = TestHarness::new();
        let mut parked = Packet::alloc(h.stack.pool(), NIF).unwrap();
        parked.append(&[0xCD; 48]).unwrap();
        assert!(matches!(
            h.stack
                .nd6()
                .lookup(NIF, &peer_ll(), parked, h.stack.now()),
            crate::nd6_cache::NdLookup::Queued
        ));

        let verdict = h.inject(&frame(
            peer_ll(),
            our_link_local(),
            255,
            &na_message(peer_ll(), NADV_SOLICITED | NADV_OVERRIDE),
        ));
        assert_eq!(verdict, Verdict::Dropped);

        let sent = h.sent();
        assert_eq!(sent.len(), 1, "parked packet flushed on resolution");
        let out = &sent[0].1;
        assert_eq!(&out[0..6], &PEER_MAC.0);
        assert_eq!(u16::from_be_bytes([out[12], out[13]]), ethertype::IPV6);
    }

    #[test]
    fn advertisement_without_target_option_is_ignored() {
        let h = TestHarness::new();
        let mut parked = Packet::alloc(h.stack.pool(), NIF).unwrap();
        parked.append(&[0xCD; 48]).unwrap();
        drop(h.stack.nd6().lookup(NIF, &peer_ll(), parked, h.stack.now()));

        let mut msg = na_message(peer_ll(), NADV_SOLICITED | NADV_OVERRIDE);
        msg.truncate(ND_NEIGHBOR_MLEN);
        let verdict = h.inject(&frame(peer_ll(), our_link_local(), 255, &msg));
        assert_eq!(verdict, Verdict::Dropped);
        assert!(h.sent().is_empty(), "nothing released");
    }

    #[test]
    fn router_advertisement_populates_default_router_list() {
        let h = TestHarness::new();
        let verdict = h.inject(&frame(
            peer_ll(),
            Ipv6Addr::ALL_NODES,
            255,
            &ra_message(1800),
        ));
        assert_eq!(verdict, Verdict::Dropped);
        assert_eq!(h.stack.nd6().router_count(), 1);
        assert_eq!(h.stack.nd6().first_router(NIF), Some(peer_ll()));

        // Lifetime zero withdraws the router but keeps the neighbor.
        let verdict = h.inject(&frame(
            peer_ll(),
            Ipv6Addr::ALL_NODES,
            255,
            &ra_message(0),
        ));
        assert_eq!(verdict, Verdict::Dropped);
        assert_eq!(h.stack.nd6().router_count(), 0);
        assert_eq!(h.stack.nd6().len(), 1);
    }

    #[test]
    fn router_advertisement_from_global_source_is_rejected() {
        let h = TestHarness::new();
        let mut global = [0u8; 16];
        global[0] = 0x20;
        global[1] = 0x01;
        global[15] = 9;
        let verdict = h.inject(&frame(
            Ipv6Addr(global),
            Ipv6Addr::ALL_NODES,
            255,
            &ra_message(1800),
        ));
        assert_eq!(verdict, Verdict::Dropped);
        assert_eq!(h.stack.nd6().router_count(), 0);
    }

    #[test]
    fn echo_request_is_answered() {
        let h = TestHarness::new();
        drop(
            h.stack
                .nd6()
                .record_solicitation(NIF, &peer_ll(), PEER_MAC, h.stack.now()),
        );

        let mut echo = std::vec![TYPE_ECHO_REQUEST, 0, 0, 0, 0, 0x42, 0, 7];
        echo.extend_from_slice(b"ping6");
        let verdict = h.inject(&frame(peer_ll(), our_global(), 64, &echo));
        assert_eq!(verdict, Verdict::Consumed);

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let out = &sent[0].1;
        let ip = Ipv6Header::parse(&out[ETH_HLEN..]).unwrap();
        assert_eq!(ip.src, our_global(), "addresses swapped");
        assert_eq!(ip.dst, peer_ll());

        let reply = &out[ETH_HLEN + IPV6_HLEN..];
        assert_eq!(reply[0], TYPE_ECHO_REPLY);
        assert_eq!(&reply[8..], b"ping6");
        let mut ck =
            Checksum::ipv6_pseudo(ip.src, ip.dst, ip_proto::ICMPV6, reply.len() as u32);
        ck.add(reply);
        assert_eq!(ck.finish(), 0, "reply checksum verifies");
    }

    #[test]
    fn solicitation_builder_round_trips() {
        let h = TestHarness::new();
        assert_eq!(
            send_neighbor_solicitation(&h.stack, NIF, &peer_ll()),
            Verdict::Consumed
        );
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let out = &sent[0].1;
        assert_eq!(
            &out[0..6],
            &peer_ll().solicited_node().multicast_mac().0,
            "multicast to the solicited-node group"
        );
        let ip = Ipv6Header::parse(&out[ETH_HLEN..]).unwrap();
        assert_eq!(ip.hop_limit, 255);
        assert_eq!(ip.dst, peer_ll().solicited_node());

        let ns = &out[ETH_HLEN + IPV6_HLEN..];
        assert_eq!(ns[0], TYPE_NEIGHBOR_SOLICIT);
        assert_eq!(&ns[8..24], &peer_ll().0);
        let mut ck = Checksum::ipv6_pseudo(ip.src, ip.dst, ip_proto::ICMPV6, ns.len() as u32);
        ck.add(ns);
        assert_eq!(ck.finish(), 0);
    }
}
