//! ICMPv4 input: echo answered in place, error messages decoded and
//! logged.  There is no socket notification surface to deliver errors to.

use log::debug;
use packnet_pktio::Packet;

use crate::checksum::checksum;
use crate::ipv4::ipv4_output;
use crate::stack::Stack;
use crate::types::{Ipv4Addr, Verdict, ip_proto};
use crate::wire::icmpv4::{
    Icmpv4Header, TYPE_ECHO, TYPE_ECHO_REPLY, TYPE_PARAM_PROBLEM, TYPE_SOURCE_QUENCH,
    TYPE_TIME_EXCEEDED, TYPE_UNREACHABLE, timxceed_code, unreach_code,
};
use crate::wire::ipv4::{IPV4_HLEN, Ipv4Header};

/// Process one inbound ICMPv4 message (the L4 region is the message).
pub fn icmpv4_input(stack: &Stack, pkt: Packet) -> Verdict {
    let v4 = match stack.nif(pkt.nif()).and_then(|n| n.ipv4) {
        Some(v4) => v4,
        None => return Verdict::Dropped,
    };

    let l3_rel = (pkt.l3_offset() - pkt.head()) as usize;
    let l4_rel = (pkt.l4_offset() - pkt.head()) as usize;
    let (ip, icmp) = {
        let payload = pkt.payload();
        if l4_rel > payload.len() {
            return Verdict::Dropped;
        }
        let ip = match Ipv4Header::parse(&payload[l3_rel..]) {
            Ok(h) => h,
            Err(_) => return Verdict::Dropped,
        };
        // An ICMP message from a broadcast source is nonsense.
        if v4.is_broadcast(ip.src) || ip.src.is_multicast() {
            return Verdict::Dropped;
        }
        let l4 = &payload[l4_rel..];
        if checksum(l4) != 0 {
            debug!("icmpv4: checksum mismatch, dropped");
            return Verdict::Dropped;
        }
        let icmp = match Icmpv4Header::parse(l4) {
            Ok(h) => h,
            Err(e) => {
                debug!("icmpv4: {}, dropped", e);
                return Verdict::Dropped;
            }
        };
        (ip, icmp)
    };

    match icmp.msg_type {
        TYPE_ECHO => {
            // Never answer an echo aimed at a broadcast/multicast address.
            if v4.is_broadcast(ip.dst) || ip.dst.is_multicast() {
                return Verdict::Dropped;
            }
            echo_reply(stack, pkt, l4_rel, ip.src, ip.dst)
        }
        TYPE_UNREACHABLE => {
            debug!(
                "icmpv4: destination unreachable from {} ({})",
                ip.src,
                unreach_reason(icmp.code)
            );
            Verdict::Dropped
        }
        TYPE_TIME_EXCEEDED => {
            debug!(
                "icmpv4: time exceeded from {} ({})",
                ip.src,
                match icmp.code {
                    timxceed_code::IN_TRANSIT => "ttl expired in transit",
                    timxceed_code::REASSEMBLY => "fragment reassembly",
                    _ => "unknown",
                }
            );
            Verdict::Dropped
        }
        TYPE_PARAM_PROBLEM => {
            debug!("icmpv4: parameter problem from {}", ip.src);
            Verdict::Dropped
        }
        TYPE_SOURCE_QUENCH => {
            debug!("icmpv4: source quench from {}", ip.src);
            Verdict::Dropped
        }
        _ => Verdict::Dropped,
    }
}

/// Turn the request into the reply in place: flip the type, refresh the
/// ICMP checksum, swap the addresses onto a fresh IP header and send.
fn echo_reply(
    stack: &Stack,
    mut pkt: Packet,
    l4_rel: usize,
    req_src: Ipv4Addr,
    req_dst: Ipv4Addr,
) -> Verdict {
    {
        let b = pkt.payload_mut();
        b[l4_rel] = TYPE_ECHO_REPLY;
        b[l4_rel + 2..l4_rel + 4].copy_from_slice(&[0, 0]);
        let sum = checksum(&b[l4_rel..]);
        b[l4_rel + 2..l4_rel + 4].copy_from_slice(&sum.to_be_bytes());
    }
    if pkt.pull_header(l4_rel).is_err() {
        return Verdict::Dropped;
    }
    let icmp_len = pkt.len() as u16;
    match pkt.push_header(IPV4_HLEN) {
        Ok(buf) => Ipv4Header::emit_basic(buf, req_dst, req_src, ip_proto::ICMP, icmp_len),
        Err(_) => return Verdict::Dropped,
    }
    pkt.set_l3(pkt.head());
    pkt.set_l4(pkt.head() + IPV4_HLEN as u16);
    ipv4_output(stack, pkt, None)
}

fn unreach_reason(code: u8) -> &'static str {
    match code {
        unreach_code::NET | unreach_code::NET_UNKNOWN | unreach_code::NET_PROHIB => {
            "network unreachable"
        }
        unreach_code::HOST | unreach_code::HOST_UNKNOWN | unreach_code::HOST_PROHIB => {
            "host unreachable"
        }
        unreach_code::PROTOCOL => "protocol unreachable",
        unreach_code::PORT => "port unreachable",
        unreach_code::NEEDFRAG => "fragmentation needed",
        unreach_code::SRCFAIL => "source route failed",
        unreach_code::ISOLATED => "host isolated",
        unreach_code::TOSNET | unreach_code::TOSHOST => "type of service",
        _ => "unknown code",
    }
}
