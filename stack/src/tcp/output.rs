//! Flag-segment emission (SYN+ACK, bare ACK, RST, FIN+ACK).
//!
//! Replies reuse the inbound buffer in place when the caller still owns
//! it — the active region is re-pointed at the L3 offset and trimmed to
//! the reply headers — otherwise a fresh buffer is allocated.  The header
//! image comes from the PCB's template when the caller has one, else it
//! is built from the connection key.

use packnet_pktio::Packet;

use crate::checksum::Checksum;
use crate::nif::Offload;
use crate::socket_table::SocketKey;
use crate::stack::Stack;
use crate::tcp::pcb::build_reply_headers;
use crate::types::{Verdict, ip_proto};
use crate::wire::ipv4::IPV4_HLEN;
use crate::wire::ipv6::IPV6_HLEN;
use crate::wire::tcp::{TCP_HLEN, TcpFlags};
use crate::{ipv4, ipv6};

/// Build and send a data-less segment on the reply direction of `key`
/// (the key's `src` fields name the remote peer).
///
/// `inbound` is reused in place when given; `template` is the PCB's
/// prebuilt header image, if fresh.
pub fn send_flags(
    stack: &Stack,
    key: &SocketKey,
    inbound: Option<Packet>,
    template: Option<&[u8]>,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    window: u16,
) -> Verdict {
    let ip_hlen = if key.ip_version == 6 { IPV6_HLEN } else { IPV4_HLEN };
    let total = ip_hlen + TCP_HLEN;

    let mut pkt = match inbound {
        Some(mut pkt) => {
            // Re-point the active region at the IP header and shrink it to
            // the reply size.  The inbound segment is at least as large.
            let l3_rel = (pkt.l3_offset() - pkt.head()) as usize;
            if pkt.pull_header(l3_rel).is_err() || pkt.len() < total {
                return Verdict::Dropped;
            }
            if pkt.trim_to(total).is_err() {
                return Verdict::Dropped;
            }
            pkt
        }
        None => {
            let Some(mut pkt) = Packet::alloc(stack.pool(), key.nif) else {
                return Verdict::Dropped;
            };
            if pkt.push_header(total).is_err() {
                return Verdict::Dropped;
            }
            pkt
        }
    };
    pkt.set_nif(key.nif);
    pkt.set_l3(pkt.head());
    pkt.set_l4(pkt.head() + ip_hlen as u16);

    {
        let bytes = &mut pkt.payload_mut()[..total];
        match template {
            Some(t) => bytes.copy_from_slice(t),
            None => bytes.copy_from_slice(&build_reply_headers(key)),
        }
        let tcp = &mut bytes[ip_hlen..];
        tcp[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp[8..12].copy_from_slice(&ack.to_be_bytes());
        tcp[13] = flags.bits();
        tcp[14..16].copy_from_slice(&window.to_be_bytes());
        tcp[16..18].copy_from_slice(&0u16.to_be_bytes());
    }

    let offload = stack
        .nif(key.nif)
        .map(|n| n.offload.contains(Offload::L4_TX_CKSUM))
        .unwrap_or(false);
    if !offload {
        let mut ck = if key.ip_version == 6 {
            Checksum::ipv6_pseudo(
                key.dst_addr.to_v6(),
                key.src_addr.to_v6(),
                ip_proto::TCP,
                TCP_HLEN as u32,
            )
        } else {
            Checksum::ipv4_pseudo(
                key.dst_addr.to_v4(),
                key.src_addr.to_v4(),
                ip_proto::TCP,
                TCP_HLEN as u16,
            )
        };
        ck.add(&pkt.payload()[ip_hlen..total]);
        let sum = ck.finish();
        pkt.payload_mut()[ip_hlen + 16..ip_hlen + 18].copy_from_slice(&sum.to_be_bytes());
    }

    if key.ip_version == 6 {
        ipv6::ipv6_output(stack, pkt)
    } else {
        ipv4::ipv4_output(stack, pkt, None)
    }
}
