//! TCP segment processing.
//!
//! One entry point, [`tcp_input`], fed by the protocol dispatcher with the
//! L4 region already delimited.  Segment state is copied out of the buffer
//! first; the PCB ticket lock is then held only over pure state-machine
//! work, producing an [`Outcome`] that is acted on (table removal, reply
//! emission) after the lock is released.  Replies reuse the inbound
//! buffer.

use alloc::vec::Vec;

use log::debug;
use packnet_pktio::{Packet, Timestamp};

use crate::checksum::Checksum;
use crate::nif::Offload;
use crate::socket_table::SocketKey;
use crate::stack::Stack;
use crate::tcp::output::send_flags;
use crate::tcp::pcb::{TcpConnState, TcpPcb, TcpSignal, TcpState};
use crate::tcp::seq::{segment_acceptable, seq_gt, seq_le, seq_lt};
use crate::types::{NetAddr, Verdict, ip_proto};
use crate::wire::ipv4::Ipv4Header;
use crate::wire::ipv6::Ipv6Header;
use crate::wire::tcp::{TcpFlags, TcpHeader};

/// Fields of the inbound segment that survive past the buffer borrow.
struct Segment {
    hdr: TcpHeader,
    /// Payload bytes (header excluded, SYN/FIN not counted).
    len: u32,
}

impl Segment {
    /// Sequence space the segment occupies, SYN and FIN included.
    fn seq_space(&self) -> u32 {
        let mut n = self.len;
        if self.hdr.flags.contains(TcpFlags::SYN) {
            n = n.wrapping_add(1);
        }
        if self.hdr.flags.contains(TcpFlags::FIN) {
            n = n.wrapping_add(1);
        }
        n
    }
}

/// What to do once the PCB lock is dropped.
enum Action {
    Drop,
    Reply {
        seq: u32,
        ack: u32,
        flags: TcpFlags,
        window: u16,
        template: Option<Vec<u8>>,
    },
}

struct Outcome {
    action: Action,
    remove: bool,
}

impl Outcome {
    fn drop() -> Self {
        Self {
            action: Action::Drop,
            remove: false,
        }
    }

    fn reply(seq: u32, ack: u32, flags: TcpFlags, window: u16, template: Option<Vec<u8>>) -> Self {
        Self {
            action: Action::Reply {
                seq,
                ack,
                flags,
                window,
                template,
            },
            remove: false,
        }
    }
}

/// Process one inbound TCP segment.
pub fn tcp_input(stack: &Stack, pkt: Packet) -> Verdict {
    let Some((key, seg)) = parse_segment(stack, &pkt) else {
        return Verdict::Dropped;
    };

    let Some(pcb) = stack.tcp_sockets().lookup(&key) else {
        return refuse(stack, &key, &seg, pkt);
    };

    let now = stack.now();
    let lifetime = stack.config().tcp_template_lifetime_ms;
    let outcome = {
        let mut st = pcb.lock();
        match st.conn {
            TcpConnState::Listen => {
                // Handshake spawns a fresh PCB; the listener itself is
                // never mutated.
                let parent_wnd = st.rcv.wnd;
                drop(st);
                return listen_input(stack, &key, parent_wnd, &seg, pkt);
            }
            TcpConnState::Closed => Outcome::drop(),
            TcpConnState::SynSent => syn_sent_input(&mut st, &seg),
            _ => segment_input(&mut st, &key, &seg, now, lifetime),
        }
    };

    if outcome.remove {
        stack.tcp_sockets().remove(&pcb);
    }
    match outcome.action {
        Action::Drop => Verdict::Dropped,
        Action::Reply {
            seq,
            ack,
            flags,
            window,
            template,
        } => send_flags(
            stack,
            &key,
            Some(pkt),
            template.as_deref(),
            seq,
            ack,
            flags,
            window,
        ),
    }
}

/// Extract addresses, verify the checksum and parse the TCP header.
fn parse_segment(stack: &Stack, pkt: &Packet) -> Option<(SocketKey, Segment)> {
    let head = pkt.head() as usize;
    let l3_rel = (pkt.l3_offset() as usize).checked_sub(head)?;
    let l4_rel = (pkt.l4_offset() as usize).checked_sub(head)?;
    let payload = pkt.payload();
    if l3_rel >= payload.len() || l4_rel > payload.len() {
        return None;
    }
    let l3 = &payload[l3_rel..];
    let l4 = &payload[l4_rel..];

    let version = l3[0] >> 4;
    let (src, dst, mut ck) = match version {
        4 => {
            let ip = Ipv4Header::parse(l3).ok()?;
            (
                NetAddr::from_v4(ip.src),
                NetAddr::from_v4(ip.dst),
                Checksum::ipv4_pseudo(ip.src, ip.dst, ip_proto::TCP, l4.len() as u16),
            )
        }
        6 => {
            let ip = Ipv6Header::parse(l3).ok()?;
            (
                NetAddr::from_v6(ip.src),
                NetAddr::from_v6(ip.dst),
                Checksum::ipv6_pseudo(ip.src, ip.dst, ip_proto::TCP, l4.len() as u32),
            )
        }
        _ => return None,
    };

    let offloaded = stack
        .nif(pkt.nif())
        .map(|n| n.offload.contains(Offload::L4_RX_CKSUM))
        .unwrap_or(false);
    if !offloaded {
        ck.add(l4);
        if ck.finish() != 0 {
            debug!("tcp: checksum mismatch, segment dropped");
            return None;
        }
    }

    let hdr = TcpHeader::parse(l4).ok()?;
    let len = (l4.len() - hdr.header_len as usize) as u32;
    let key = SocketKey {
        nif: pkt.nif(),
        src_addr: src,
        dst_addr: dst,
        src_port: hdr.src_port,
        dst_port: hdr.dst_port,
        ip_version: version,
        protocol: ip_proto::TCP,
    };
    Some((key, Segment { hdr, len }))
}

/// RFC 793 CLOSED handling: no socket wants the segment, answer with a
/// reset unless it carries one.
fn refuse(stack: &Stack, key: &SocketKey, seg: &Segment, pkt: Packet) -> Verdict {
    if seg.hdr.flags.contains(TcpFlags::RST) {
        return Verdict::Dropped;
    }
    debug!(
        "tcp: no socket for port {} (proto v{}), refusing",
        key.dst_port, key.ip_version
    );
    if seg.hdr.flags.contains(TcpFlags::ACK) {
        send_flags(stack, key, Some(pkt), None, seg.hdr.ack, 0, TcpFlags::RST, 0)
    } else {
        let ack = seg.hdr.seq.wrapping_add(seg.seq_space());
        send_flags(
            stack,
            key,
            Some(pkt),
            None,
            0,
            ack,
            TcpFlags::RST | TcpFlags::ACK,
            0,
        )
    }
}

/// Passive open: a SYN at a listener spawns a SYN_RECEIVED PCB and answers
/// SYN+ACK.  Anything else at a listener is refused.
fn listen_input(
    stack: &Stack,
    key: &SocketKey,
    parent_wnd: u32,
    seg: &Segment,
    pkt: Packet,
) -> Verdict {
    const HANDSHAKE_MASK: TcpFlags = TcpFlags::RST
        .union(TcpFlags::SYN)
        .union(TcpFlags::ACK);

    if seg.hdr.flags.intersection(HANDSHAKE_MASK) != TcpFlags::SYN {
        if seg.hdr.flags.contains(TcpFlags::RST) {
            return Verdict::Dropped;
        }
        return send_flags(stack, key, Some(pkt), None, seg.hdr.ack, 0, TcpFlags::RST, 0);
    }

    let iss = stack.next_iss();
    let pcb = TcpPcb::accept(*key, parent_wnd, iss, seg.hdr.seq);
    let rcv_wnd = {
        let mut st = pcb.lock();
        st.snd.wnd = u32::from(seg.hdr.window);
        st.snd.wl1 = seg.hdr.seq;
        st.snd.wl2 = iss;
        st.rcv.wnd
    };
    stack.tcp_sockets().insert(&pcb);
    debug!(
        "tcp: passive open on port {}, iss {:#x}",
        key.dst_port, iss
    );
    send_flags(
        stack,
        key,
        Some(pkt),
        None,
        iss,
        seg.hdr.seq.wrapping_add(1),
        TcpFlags::SYN | TcpFlags::ACK,
        clamp_window(rcv_wnd),
    )
}

/// SYN_SENT handling (RFC 793 active-open reply processing).
fn syn_sent_input(st: &mut TcpState, seg: &Segment) -> Outcome {
    let hdr = &seg.hdr;

    let ack_ok = if hdr.flags.contains(TcpFlags::ACK) {
        if seq_le(hdr.ack, st.iss) || seq_gt(hdr.ack, st.snd.nxt) {
            if hdr.flags.contains(TcpFlags::RST) {
                return Outcome::drop();
            }
            return Outcome::reply(hdr.ack, 0, TcpFlags::RST, 0, None);
        }
        true
    } else {
        false
    };

    if hdr.flags.contains(TcpFlags::RST) {
        if ack_ok {
            st.signal(TcpSignal::Refused);
            st.conn = TcpConnState::Closed;
            return Outcome {
                action: Action::Drop,
                remove: true,
            };
        }
        return Outcome::drop();
    }

    if !hdr.flags.contains(TcpFlags::SYN) {
        return Outcome::drop();
    }

    st.irs = hdr.seq;
    st.rcv.nxt = hdr.seq.wrapping_add(1);
    st.snd.wnd = u32::from(hdr.window);
    st.snd.wl1 = hdr.seq;
    st.snd.wl2 = hdr.ack;
    if ack_ok {
        st.snd.una = hdr.ack;
        st.conn = TcpConnState::Established;
        Outcome::reply(
            st.snd.nxt,
            st.rcv.nxt,
            TcpFlags::ACK,
            clamp_window(st.rcv.wnd),
            None,
        )
    } else {
        // Simultaneous open.
        st.conn = TcpConnState::SynReceived;
        Outcome::reply(
            st.iss,
            st.rcv.nxt,
            TcpFlags::SYN | TcpFlags::ACK,
            clamp_window(st.rcv.wnd),
            None,
        )
    }
}

/// Segment processing for every synchronized state (SYN_RECEIVED through
/// TIME_WAIT), in RFC 793 order: sequence check, RST, SYN, ACK, FIN.
fn segment_input(
    st: &mut TcpState,
    key: &SocketKey,
    seg: &Segment,
    now: Timestamp,
    template_lifetime_ms: u64,
) -> Outcome {
    let hdr = &seg.hdr;

    if !segment_acceptable(st.rcv.nxt, st.rcv.wnd, hdr.seq, seg.seq_space()) {
        if hdr.flags.contains(TcpFlags::RST) {
            return Outcome::drop();
        }
        // Out-of-window segment: re-state our position.
        let t = st.template_bytes(key, now, template_lifetime_ms).to_vec();
        return Outcome::reply(
            st.snd.nxt,
            st.rcv.nxt,
            TcpFlags::ACK,
            clamp_window(st.rcv.wnd),
            Some(t),
        );
    }

    if hdr.flags.contains(TcpFlags::RST) {
        let sig = match st.conn {
            TcpConnState::SynReceived => TcpSignal::Refused,
            TcpConnState::Established
            | TcpConnState::FinWait1
            | TcpConnState::FinWait2
            | TcpConnState::CloseWait => TcpSignal::Reset,
            _ => TcpSignal::Interrupt,
        };
        st.signal(sig);
        st.conn = TcpConnState::Closed;
        return Outcome {
            action: Action::Drop,
            remove: true,
        };
    }

    if hdr.flags.contains(TcpFlags::SYN) {
        // A SYN inside the window means the connections have desynced.
        st.signal(TcpSignal::Reset);
        st.conn = TcpConnState::Closed;
        return Outcome {
            action: Action::Drop,
            remove: true,
        };
    }

    if hdr.flags.contains(TcpFlags::ACK) {
        match st.conn {
            TcpConnState::SynReceived => {
                if seq_lt(hdr.ack, st.snd.una) || seq_gt(hdr.ack, st.snd.nxt) {
                    return Outcome::reply(hdr.ack, 0, TcpFlags::RST, 0, None);
                }
                st.snd.una = hdr.ack;
                st.snd.wnd = u32::from(hdr.window);
                st.snd.wl1 = hdr.seq;
                st.snd.wl2 = hdr.ack;
                st.conn = TcpConnState::Established;
            }
            _ => {
                if seq_gt(hdr.ack, st.snd.nxt) {
                    // Acks data we never sent.
                    let t = st.template_bytes(key, now, template_lifetime_ms).to_vec();
                    return Outcome::reply(
                        st.snd.nxt,
                        st.rcv.nxt,
                        TcpFlags::ACK,
                        clamp_window(st.rcv.wnd),
                        Some(t),
                    );
                }
                if !seq_lt(hdr.ack, st.snd.una) {
                    st.snd.una = hdr.ack;
                }
                if seq_lt(st.snd.wl1, hdr.seq)
                    || (st.snd.wl1 == hdr.seq && seq_le(st.snd.wl2, hdr.ack))
                {
                    st.snd.wnd = u32::from(hdr.window);
                    st.snd.wl1 = hdr.seq;
                    st.snd.wl2 = hdr.ack;
                }
                let fin_acked = hdr.ack == st.snd.nxt;
                match st.conn {
                    TcpConnState::FinWait1 if fin_acked => st.conn = TcpConnState::FinWait2,
                    TcpConnState::Closing if fin_acked => st.conn = TcpConnState::TimeWait,
                    TcpConnState::LastAck if fin_acked => {
                        // The PCB stays in the table until its owner drops
                        // it; further segments hit the CLOSED arm.
                        st.conn = TcpConnState::Closed;
                        return Outcome::drop();
                    }
                    _ => {}
                }
            }
        }
    } else if !hdr.flags.contains(TcpFlags::FIN) {
        return Outcome::drop();
    }

    if hdr.flags.contains(TcpFlags::FIN) {
        st.rcv.nxt = hdr.seq.wrapping_add(seg.len).wrapping_add(1);
        st.signal(TcpSignal::Closing);
        match st.conn {
            TcpConnState::SynReceived | TcpConnState::Established => {
                st.conn = TcpConnState::CloseWait;
            }
            // A FIN that also acked ours already moved us to FIN_WAIT_2
            // above, so this lands in TIME_WAIT through the arm below.
            TcpConnState::FinWait1 => st.conn = TcpConnState::Closing,
            TcpConnState::FinWait2 => st.conn = TcpConnState::TimeWait,
            // CLOSE_WAIT and later: retransmitted FIN, state holds.
            _ => {}
        }
        let t = st.template_bytes(key, now, template_lifetime_ms).to_vec();
        return Outcome::reply(
            st.snd.nxt,
            st.rcv.nxt,
            TcpFlags::FIN | TcpFlags::ACK,
            clamp_window(st.rcv.wnd),
            Some(t),
        );
    }

    Outcome::drop()
}

#[inline]
fn clamp_window(wnd: u32) -> u16 {
    wnd.min(u32::from(u16::MAX)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestHarness, tcp4_frame};
    use crate::types::{Ipv4Addr, MacAddr};
    use packnet_pktio::NifId;
    use std::vec::Vec as StdVec;

    const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);
    const PEER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x09]);
    const OUR_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const PEER_PORT: u16 = 40000;
    const LOCAL_PORT: u16 = 80;

    fn exact_key() -> SocketKey {
        SocketKey {
            nif: NifId(1),
            src_addr: NetAddr::from_v4(PEER_IP),
            dst_addr: NetAddr::from_v4(OUR_IP),
            src_port: PEER_PORT,
            dst_port: LOCAL_PORT,
            ip_version: 4,
            protocol: ip_proto::TCP,
        }
    }

    fn harness() -> TestHarness {
        let h = TestHarness::new();
        // Pre-resolve the peer so replies transmit instead of parking
        // behind an ARP request.
        h.stack
            .arp()
            .put(NifId(1), PEER_IP, PEER_MAC, h.stack.now());
        h
    }

    fn inject(h: &TestHarness, seq: u32, ack: u32, flags: TcpFlags, payload: &[u8]) -> Verdict {
        let frame = tcp4_frame(
            PEER_MAC, PEER_IP, OUR_IP, PEER_PORT, LOCAL_PORT, seq, ack, flags, 4096, payload,
        );
        h.inject(&frame)
    }

    /// Parse (ip, tcp) out of a captured reply frame.
    fn sent_tcp(frame: &[u8]) -> (Ipv4Header, TcpHeader) {
        let ip = Ipv4Header::parse(&frame[14..]).unwrap();
        let tcp = TcpHeader::parse(&frame[14 + ip.header_len as usize..]).unwrap();
        (ip, tcp)
    }

    fn established(h: &TestHarness, una: u32, nxt: u32, rcv_nxt: u32) -> alloc::sync::Arc<TcpPcb> {
        let pcb = TcpPcb::accept(exact_key(), 8192, una, rcv_nxt.wrapping_sub(1));
        {
            let mut st = pcb.lock();
            st.conn = TcpConnState::Established;
            st.snd.una = una;
            st.snd.nxt = nxt;
            st.snd.wnd = 4096;
            st.rcv.nxt = rcv_nxt;
        }
        h.stack.tcp_sockets().insert(&pcb);
        pcb
    }

    #[test]
    fn listener_syn_spawns_pcb_and_syn_ack() {
        let h = harness();
        let listener = TcpPcb::listen(exact_key().wildcard_src(), 8192);
        h.stack.tcp_sockets().insert(&listener);

        assert_eq!(inject(&h, 100, 0, TcpFlags::SYN, &[]), Verdict::Consumed);

        let pcb = h.stack.tcp_sockets().lookup(&exact_key()).unwrap();
        assert!(
            !alloc::sync::Arc::ptr_eq(&pcb, &listener),
            "exact lookup finds the spawned PCB, not the listener"
        );
        let st = pcb.lock();
        assert_eq!(st.conn, TcpConnState::SynReceived);
        assert_eq!(st.irs, 100);
        assert_eq!(st.rcv.nxt, 101);
        assert_eq!(st.snd.nxt, st.iss.wrapping_add(1));
        assert_eq!(st.snd.wnd, 4096);

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let (ip, tcp) = sent_tcp(&sent[0].1);
        assert_eq!(ip.src, OUR_IP);
        assert_eq!(ip.dst, PEER_IP);
        assert_eq!(tcp.flags, TcpFlags::SYN | TcpFlags::ACK);
        assert_eq!(tcp.seq, st.iss);
        assert_eq!(tcp.ack, 101);
        assert_eq!(tcp.src_port, LOCAL_PORT);
        assert_eq!(tcp.dst_port, PEER_PORT);
    }

    #[test]
    fn established_ack_advances_una() {
        let h = harness();
        let pcb = established(&h, 500, 700, 1000);

        assert_eq!(inject(&h, 1000, 550, TcpFlags::ACK, &[]), Verdict::Dropped);
        assert_eq!(pcb.lock().snd.una, 550);

        // An ack beyond SND.NXT answers with our current position and
        // leaves UNA alone.
        assert_eq!(inject(&h, 1000, 800, TcpFlags::ACK, &[]), Verdict::Consumed);
        assert_eq!(pcb.lock().snd.una, 550);
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let (_, tcp) = sent_tcp(&sent[0].1);
        assert_eq!(tcp.flags, TcpFlags::ACK);
        assert_eq!(tcp.seq, 700);
        assert_eq!(tcp.ack, 1000);
    }

    #[test]
    fn fin_wait_1_fin_ack_reaches_time_wait() {
        let h = harness();
        let pcb = established(&h, 599, 600, 2000);
        pcb.lock().conn = TcpConnState::FinWait1;

        // Peer acks our FIN and sends its own in one segment.
        assert_eq!(
            inject(&h, 2000, 600, TcpFlags::FIN | TcpFlags::ACK, &[]),
            Verdict::Consumed
        );

        let st = pcb.lock();
        assert_eq!(st.conn, TcpConnState::TimeWait);
        assert_eq!(st.rcv.nxt, 2001);
        assert_eq!(st.last_signal, Some(TcpSignal::Closing));
        drop(st);

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let (_, tcp) = sent_tcp(&sent[0].1);
        assert_eq!(tcp.flags, TcpFlags::FIN | TcpFlags::ACK);
        assert_eq!(tcp.seq, 600);
        assert_eq!(tcp.ack, 2001);
    }

    #[test]
    fn established_rst_closes_and_removes() {
        let h = harness();
        let pcb = established(&h, 500, 700, 1000);

        assert_eq!(inject(&h, 1000, 0, TcpFlags::RST, &[]), Verdict::Dropped);

        let st = pcb.lock();
        assert_eq!(st.conn, TcpConnState::Closed);
        assert_eq!(st.last_signal, Some(TcpSignal::Reset));
        drop(st);
        assert!(
            h.stack.tcp_sockets().lookup(&exact_key()).is_none(),
            "reset removes the PCB from the table"
        );
        assert!(h.sent().is_empty(), "a reset is never answered");
    }

    #[test]
    fn established_fin_enters_close_wait() {
        let h = harness();
        let pcb = established(&h, 700, 700, 1000);

        assert_eq!(
            inject(&h, 1000, 700, TcpFlags::FIN | TcpFlags::ACK, &[]),
            Verdict::Consumed
        );

        let st = pcb.lock();
        assert_eq!(st.conn, TcpConnState::CloseWait);
        assert_eq!(st.rcv.nxt, 1001);
        assert_eq!(st.snd.nxt, 700, "send sequence space untouched");
        assert_eq!(st.last_signal, Some(TcpSignal::Closing));
        drop(st);

        let sent = h.sent();
        let (_, tcp) = sent_tcp(&sent[0].1);
        assert_eq!(tcp.flags, TcpFlags::FIN | TcpFlags::ACK);
        assert_eq!(tcp.seq, 700);
        assert_eq!(tcp.ack, 1001);

        // Further acks leave the half-closed connection alone.
        assert_eq!(inject(&h, 1001, 700, TcpFlags::ACK, &[]), Verdict::Dropped);
        assert_eq!(pcb.lock().conn, TcpConnState::CloseWait);
    }

    #[test]
    fn no_socket_gets_rst() {
        let h = harness();
        assert_eq!(inject(&h, 55, 0, TcpFlags::SYN, &[]), Verdict::Consumed);
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let (_, tcp) = sent_tcp(&sent[0].1);
        assert_eq!(tcp.flags, TcpFlags::RST | TcpFlags::ACK);
        assert_eq!(tcp.seq, 0);
        assert_eq!(tcp.ack, 56, "SYN occupies one sequence number");

        // A stray RST is never answered.
        assert_eq!(inject(&h, 55, 0, TcpFlags::RST, &[]), Verdict::Dropped);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn out_of_window_segment_is_challenged() {
        let h = harness();
        let pcb = established(&h, 500, 700, 1000);
        pcb.lock().rcv.wnd = 100;

        assert_eq!(
            inject(&h, 5000, 550, TcpFlags::ACK, b"xx"),
            Verdict::Consumed
        );
        assert_eq!(pcb.lock().snd.una, 500, "out-of-window data is not processed");
        let sent = h.sent();
        let (_, tcp) = sent_tcp(&sent[0].1);
        assert_eq!(tcp.flags, TcpFlags::ACK);
        assert_eq!(tcp.ack, 1000);
    }

    #[test]
    fn bad_checksum_is_dropped_before_lookup() {
        let h = harness();
        let _pcb = established(&h, 500, 700, 1000);
        let mut frame = tcp4_frame(
            PEER_MAC,
            PEER_IP,
            OUR_IP,
            PEER_PORT,
            LOCAL_PORT,
            1000,
            550,
            TcpFlags::ACK,
            4096,
            &[],
        );
        let n = frame.len();
        frame[n - 1] ^= 0xFF;
        assert_eq!(h.inject(&frame), Verdict::Dropped);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn syn_sent_syn_ack_completes_active_open() {
        let h = harness();
        let pcb = TcpPcb::accept(exact_key(), 8192, 3000, 0);
        {
            let mut st = pcb.lock();
            st.conn = TcpConnState::SynSent;
            st.iss = 3000;
            st.snd.una = 3000;
            st.snd.nxt = 3001;
            st.irs = 0;
            st.rcv.nxt = 0;
        }
        h.stack.tcp_sockets().insert(&pcb);

        assert_eq!(
            inject(&h, 9000, 3001, TcpFlags::SYN | TcpFlags::ACK, &[]),
            Verdict::Consumed
        );
        let st = pcb.lock();
        assert_eq!(st.conn, TcpConnState::Established);
        assert_eq!(st.irs, 9000);
        assert_eq!(st.rcv.nxt, 9001);
        assert_eq!(st.snd.una, 3001);
        drop(st);

        let sent = h.sent();
        let (_, tcp) = sent_tcp(&sent[0].1);
        assert_eq!(tcp.flags, TcpFlags::ACK);
        assert_eq!(tcp.seq, 3001);
        assert_eq!(tcp.ack, 9001);
    }

    #[test]
    fn reply_checksums_verify() {
        let h = harness();
        let listener = TcpPcb::listen(exact_key().wildcard_src(), 8192);
        h.stack.tcp_sockets().insert(&listener);
        inject(&h, 100, 0, TcpFlags::SYN, &[]);

        let sent: StdVec<_> = h.sent();
        let frame = &sent[0].1;
        let ip_bytes = &frame[14..34];
        assert_eq!(crate::checksum::checksum(ip_bytes), 0, "IP header sums to zero");

        let ip = Ipv4Header::parse(&frame[14..]).unwrap();
        let l4 = &frame[14 + ip.header_len as usize..];
        let mut ck = Checksum::ipv4_pseudo(ip.src, ip.dst, ip_proto::TCP, l4.len() as u16);
        ck.add(l4);
        assert_eq!(ck.finish(), 0, "TCP checksum verifies against the pseudo header");
    }
}
