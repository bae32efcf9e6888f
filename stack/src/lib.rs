//! User-space TCP/IP stack core over the packnet packet-I/O substrate.
//!
//! The host opens interfaces, pulls receive batches and feeds frames in
//! one at a time through [`Stack::process`]; everything the stack emits
//! (replies, resolution traffic, parked packets released by a resolution)
//! leaves through the [`FrameIo`](packnet_pktio::FrameIo) hook it was
//! built with.  No thread is spawned and no timer fires on its own: all
//! state advances from inbound frames and output calls, stamped by the
//! host-supplied [`Clock`](packnet_pktio::Clock).
//!
//! Layering follows the wire: [`wire`] holds the header codecs, the
//! per-protocol modules ([`arp`], [`ipv4`], [`ipv6`], [`icmpv4`],
//! [`icmpv6`], [`tcp`], [`udp`]) the behavior, [`stack`] ties them to the
//! interface table, the resolution caches and the socket tables.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod arp;
pub mod arp_cache;
pub mod checksum;
pub mod config;
pub mod dispatch;
pub mod hash;
pub mod icmpv4;
pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;
pub mod nd6_cache;
pub mod nif;
pub mod socket_table;
pub mod stack;
pub mod tcp;
pub mod types;
pub mod udp;
pub mod wire;

pub use arp_cache::{ArpCache, ArpLookup};
pub use config::StackConfig;
pub use nd6_cache::{NadvFlags, Nd6Cache, NdLookup};
pub use nif::{Nif, NifIpv4, NifIpv6, NifTable, Offload};
pub use socket_table::{SocketKey, SocketTable, TableEntry};
pub use stack::Stack;
pub use types::{Ipv4Addr, Ipv6Addr, MacAddr, NetAddr, NetError, Verdict};

/// Shared test fixtures: a one-interface stack over a recording
/// [`FrameIo`](packnet_pktio::FrameIo) and a manual clock.
#[cfg(test)]
pub(crate) mod testutil {
    use alloc::sync::Arc;
    use std::vec::Vec;

    use packnet_pktio::{FrameIo, ManualClock, NifId, Packet, PacketPool};
    use spin::Mutex;

    use crate::checksum::{Checksum, ipv4_header_checksum};
    use crate::config::StackConfig;
    use crate::nif::{Nif, NifIpv4, NifIpv6, Offload};
    use crate::stack::Stack;
    use crate::types::{Ipv4Addr, Ipv6Addr, MacAddr, Verdict, ethertype, ip_proto};
    use crate::wire::ipv4::{IPV4_HLEN, Ipv4Header};
    use crate::wire::tcp::{TCP_HLEN, TcpFlags, TcpHeader};

    /// Records every frame the stack hands to the driver.
    pub struct MockIo {
        pub transmitted: Mutex<Vec<(NifId, Vec<u8>)>>,
        pub looped: Mutex<Vec<(NifId, Vec<u8>)>>,
    }

    impl MockIo {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                transmitted: Mutex::new(Vec::new()),
                looped: Mutex::new(Vec::new()),
            })
        }
    }

    impl FrameIo for MockIo {
        fn transmit(&self, nif: NifId, pkt: Packet) -> Result<(), Packet> {
            self.transmitted.lock().push((nif, pkt.payload().to_vec()));
            Ok(())
        }

        fn loopback(&self, nif: NifId, pkt: Packet) -> Result<(), Packet> {
            self.looped.lock().push((nif, pkt.payload().to_vec()));
            Ok(())
        }
    }

    pub const NIF: NifId = NifId(1);
    pub const OUR_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 1]);
    pub const OUR_V4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    pub fn our_link_local() -> Ipv6Addr {
        let mut a = [0u8; 16];
        a[0] = 0xFE;
        a[1] = 0x80;
        a[15] = 1;
        Ipv6Addr(a)
    }

    pub fn our_global() -> Ipv6Addr {
        let mut a = [0u8; 16];
        a[0] = 0x20;
        a[1] = 0x01;
        a[2] = 0x0D;
        a[3] = 0xB8;
        a[15] = 1;
        Ipv6Addr(a)
    }

    pub struct TestHarness {
        pub stack: Stack,
        pub io: Arc<MockIo>,
        pub clock: Arc<ManualClock>,
    }

    impl TestHarness {
        pub fn new() -> Self {
            let pool = PacketPool::new(64, 2048);
            let clock = Arc::new(ManualClock::new(1_000));
            let io = MockIo::new();
            let nif = Nif {
                id: NIF,
                mac: OUR_MAC,
                offload: Offload::empty(),
                queues: 1,
                ipv4: Some(NifIpv4 {
                    address: OUR_V4,
                    subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
                    gateway: None,
                    mtu: 1500,
                }),
                ipv6: Some(NifIpv6 {
                    addresses: alloc::vec![our_link_local(), our_global()],
                    hop_limit: 64,
                    mtu: 1500,
                    reachable_ms: 30_000,
                    retrans_ms: 1_000,
                }),
            };
            let stack = Stack::new(
                StackConfig::default(),
                alloc::vec![nif],
                pool,
                Arc::clone(&clock) as Arc<dyn packnet_pktio::Clock>,
                Arc::clone(&io) as Arc<dyn FrameIo>,
            );
            Self { stack, io, clock }
        }

        /// Feed one raw frame through the stack.
        pub fn inject(&self, frame: &[u8]) -> Verdict {
            let pkt = Packet::from_frame(self.stack.pool(), NIF, frame)
                .expect("pool exhausted in test");
            self.stack.process(pkt)
        }

        /// Drain and return everything transmitted so far.
        pub fn sent(&self) -> Vec<(NifId, Vec<u8>)> {
            core::mem::take(&mut *self.io.transmitted.lock())
        }

        /// Drain and return everything looped back so far.
        pub fn looped(&self) -> Vec<(NifId, Vec<u8>)> {
            core::mem::take(&mut *self.io.looped.lock())
        }
    }

    /// Build a complete Ethernet+IPv4+TCP frame addressed to the harness
    /// interface, checksums valid.
    #[allow(clippy::too_many_arguments)]
    pub fn tcp4_frame(
        src_mac: MacAddr,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
        window: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let tcp_len = TCP_HLEN + payload.len();
        let mut tcp = std::vec![0u8; TCP_HLEN];
        TcpHeader::emit_basic(&mut tcp, src_port, dst_port, seq, ack, flags, window);
        tcp.extend_from_slice(payload);
        let mut ck = Checksum::ipv4_pseudo(src_ip, dst_ip, ip_proto::TCP, tcp_len as u16);
        ck.add(&tcp);
        let sum = ck.finish();
        tcp[16..18].copy_from_slice(&sum.to_be_bytes());

        let mut ip = std::vec![0u8; IPV4_HLEN];
        Ipv4Header::emit_basic(&mut ip, src_ip, dst_ip, ip_proto::TCP, tcp_len as u16);
        let hsum = ipv4_header_checksum(&ip);
        ip[10..12].copy_from_slice(&hsum.to_be_bytes());

        let mut frame = Vec::new();
        frame.extend_from_slice(&OUR_MAC.0);
        frame.extend_from_slice(&src_mac.0);
        frame.extend_from_slice(&ethertype::IPV4.to_be_bytes());
        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&tcp);
        frame
    }
}
