//! TCP protocol control block.
//!
//! A PCB embeds the generic socket header ([`SocketBase`]) and guards its
//! mutable state with a fair ticket lock: segment processing for one
//! connection serializes, while the socket table's shard locks stay
//! narrow (bucket manipulation only).  PCB state is never mutated while a
//! table shard lock is held.

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::debug;
use packnet_pktio::Timestamp;
use spin::mutex::TicketMutex;

use crate::socket_table::{SocketBase, SocketKey, TableEntry};
use crate::wire::ipv4::Ipv4Header;
use crate::wire::ipv6::Ipv6Header;
use crate::wire::tcp::{TcpFlags, TcpHeader};
use crate::wire::{ipv4::IPV4_HLEN, ipv6::IPV6_HLEN, tcp::TCP_HLEN};

/// RFC 793 connection states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpConnState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Connection events that a socket layer would deliver to the user.  This
/// stack has no user API, so signals are recorded on the PCB and logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpSignal {
    /// Passive/active open rejected (RST during handshake).
    Refused,
    /// Established-like connection torn down by a peer RST or stray SYN.
    Reset,
    /// Orderly close in progress (peer FIN).
    Closing,
    /// RST in a closing state (CLOSING / LAST_ACK / TIME_WAIT).
    Interrupt,
}

/// RFC 793 send-sequence variables.
#[derive(Clone, Copy, Debug, Default)]
pub struct SendSeq {
    /// Oldest unacknowledged sequence number.
    pub una: u32,
    /// Next sequence number to send.
    pub nxt: u32,
    /// Send window.
    pub wnd: u32,
    /// Urgent pointer.
    pub up: u32,
    /// Segment sequence of the last window update.
    pub wl1: u32,
    /// Segment ack of the last window update.
    pub wl2: u32,
}

/// RFC 793 receive-sequence variables.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecvSeq {
    /// Next expected sequence number.
    pub nxt: u32,
    /// Receive window.
    pub wnd: u32,
    /// Urgent pointer.
    pub up: u32,
}

/// Prebuilt IP+TCP header image for fast segment emission, with a build
/// timestamp bounding its liveness.
pub struct HeaderTemplate {
    pub bytes: Vec<u8>,
    pub built_at: Timestamp,
}

/// Lock-guarded mutable state of a connection.
pub struct TcpState {
    pub conn: TcpConnState,
    pub snd: SendSeq,
    pub rcv: RecvSeq,
    /// Initial send sequence number.
    pub iss: u32,
    /// Initial receive sequence number.
    pub irs: u32,
    pub template: Option<HeaderTemplate>,
    pub last_signal: Option<TcpSignal>,
}

impl TcpState {
    fn new(conn: TcpConnState) -> Self {
        Self {
            conn,
            snd: SendSeq::default(),
            rcv: RecvSeq::default(),
            iss: 0,
            irs: 0,
            template: None,
            last_signal: None,
        }
    }

    /// Record a connection event (the delivery surface a socket API would
    /// have).
    pub fn signal(&mut self, sig: TcpSignal) {
        debug!("tcp: signal {:?} in state {:?}", sig, self.conn);
        self.last_signal = Some(sig);
    }

    /// Header-template bytes for replies on this connection, rebuilt when
    /// missing or older than `lifetime_ms`.
    ///
    /// The image is the reply-direction IP header plus a flagless TCP
    /// header (ports filled, seq/ack/flags/window/checksum zero); emission
    /// patches those fields and the checksums.
    pub fn template_bytes(
        &mut self,
        key: &SocketKey,
        now: Timestamp,
        lifetime_ms: u64,
    ) -> &[u8] {
        let stale = match &self.template {
            Some(t) => now.millis_since(t.built_at) >= lifetime_ms,
            None => true,
        };
        if stale {
            self.template = Some(HeaderTemplate {
                bytes: build_reply_headers(key),
                built_at: now,
            });
        }
        // The option was just filled on the stale path.
        match &self.template {
            Some(t) => &t.bytes,
            None => unreachable!(),
        }
    }
}

/// Reply-direction header image for `key` (`src`/`dst` swapped: the key
/// stores the remote peer in its `src` fields).
pub fn build_reply_headers(key: &SocketKey) -> Vec<u8> {
    let ip_hlen = if key.ip_version == 6 { IPV6_HLEN } else { IPV4_HLEN };
    let mut bytes = alloc::vec![0u8; ip_hlen + TCP_HLEN];
    if key.ip_version == 6 {
        Ipv6Header::emit_basic(
            &mut bytes,
            key.dst_addr.to_v6(),
            key.src_addr.to_v6(),
            crate::types::ip_proto::TCP,
            TCP_HLEN as u16,
            crate::wire::ipv6::DEFAULT_HOP_LIMIT,
        );
    } else {
        Ipv4Header::emit_basic(
            &mut bytes,
            key.dst_addr.to_v4(),
            key.src_addr.to_v4(),
            crate::types::ip_proto::TCP,
            TCP_HLEN as u16,
        );
    }
    TcpHeader::emit_basic(
        &mut bytes[ip_hlen..],
        key.dst_port,
        key.src_port,
        0,
        0,
        TcpFlags::empty(),
        0,
    );
    bytes
}

/// A TCP connection control block.
pub struct TcpPcb {
    base: SocketBase,
    state: TicketMutex<TcpState>,
}

impl TcpPcb {
    /// Listening PCB: typically keyed with wildcard source fields so the
    /// table's fallback tiers find it.
    pub fn listen(key: SocketKey, rcv_wnd: u32) -> Arc<Self> {
        let mut state = TcpState::new(TcpConnState::Listen);
        state.rcv.wnd = rcv_wnd;
        Arc::new(Self {
            base: SocketBase::new(key),
            state: TicketMutex::new(state),
        })
    }

    /// Connection PCB derived from a listener on an inbound SYN
    /// (RFC 793 passive open).
    pub fn accept(key: SocketKey, parent_rcv_wnd: u32, iss: u32, seg_seq: u32) -> Arc<Self> {
        let mut state = TcpState::new(TcpConnState::SynReceived);
        state.irs = seg_seq;
        state.rcv.nxt = seg_seq.wrapping_add(1);
        state.rcv.wnd = parent_rcv_wnd;
        state.iss = iss;
        state.snd.una = iss;
        state.snd.nxt = iss.wrapping_add(1);
        Arc::new(Self {
            base: SocketBase::new(key),
            state: TicketMutex::new(state),
        })
    }

    /// Lock and return the connection state (fair ticket order).
    pub fn lock(&self) -> spin::mutex::TicketMutexGuard<'_, TcpState> {
        self.state.lock()
    }

    pub fn key(&self) -> &SocketKey {
        self.base.key()
    }
}

impl TableEntry for TcpPcb {
    fn base(&self) -> &SocketBase {
        &self.base
    }
}
