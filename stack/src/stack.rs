//! The stack instance: interfaces, caches, socket tables and the frame
//! entry point.
//!
//! One [`Stack`] owns everything a set of interfaces shares.  Hosts hand
//! inbound frames to [`Stack::process`] and get a [`Verdict`] describing
//! what became of the buffer; everything else (replies, resolution
//! traffic, parked packets) flows out through the [`FrameIo`] the stack
//! was built with.

use core::sync::atomic::{AtomicU32, Ordering};

use alloc::sync::Arc;

use log::{debug, trace};
use packnet_pktio::{Clock, FrameIo, NifId, Packet, PacketPool, Timestamp};

use crate::arp;
use crate::arp_cache::ArpCache;
use crate::config::StackConfig;
use crate::dispatch::{Ipv6Walk, ProtocolRegistry, RegistryBuilder};
use crate::icmpv4;
use crate::icmpv6;
use crate::ipv4;
use crate::ipv6;
use crate::nd6_cache::Nd6Cache;
use crate::nif::{Nif, NifTable};
use crate::socket_table::SocketTable;
use crate::tcp::{self, TcpPcb};
use crate::types::{MacAddr, Verdict, ethertype, ip_proto};
use crate::udp::{self, UdpSocket};
use crate::wire::eth::{ETH_HLEN, EthHeader};

/// Spacing between consecutive initial send sequences.  Odd, so the
/// counter walks the full 32-bit space before repeating.
const ISS_STRIDE: u32 = 0x0001_F3D5;

fn drop4(_stack: &Stack, _pkt: Packet) -> Verdict {
    debug!("dispatch: unhandled protocol, dropped");
    Verdict::Dropped
}

fn drop6(_stack: &Stack, _pkt: Packet, _walk: &mut Ipv6Walk) -> Verdict {
    debug!("dispatch: unhandled protocol, dropped");
    Verdict::Dropped
}

pub struct Stack {
    config: StackConfig,
    nifs: NifTable,
    pool: Arc<PacketPool>,
    clock: Arc<dyn Clock>,
    io: Arc<dyn FrameIo>,
    registry: ProtocolRegistry,
    arp: ArpCache,
    nd6: Nd6Cache,
    tcp_sockets: SocketTable<TcpPcb>,
    udp_sockets: SocketTable<UdpSocket>,
    iss: AtomicU32,
}

impl Stack {
    pub fn new(
        config: StackConfig,
        nifs: alloc::vec::Vec<Nif>,
        pool: Arc<PacketPool>,
        clock: Arc<dyn Clock>,
        io: Arc<dyn FrameIo>,
    ) -> Self {
        let registry = RegistryBuilder::new()
            .protocol4(ip_proto::ICMP, icmpv4::icmpv4_input)
            .transport(ip_proto::TCP, tcp::tcp_input)
            .transport(ip_proto::UDP, udp::udp_input)
            .protocol6(ip_proto::ICMPV6, icmpv6::icmpv6_input)
            .protocol6(ip_proto::HOPOPTS, ipv6::ext_header_skip)
            .protocol6(ip_proto::DSTOPTS, ipv6::ext_header_skip)
            .protocol6(ip_proto::ROUTING, ipv6::ext_header_skip)
            .protocol6(ip_proto::FRAGMENT, ipv6::fragment_stub)
            .default4(drop4)
            .default6(drop6)
            .build();

        let arp = ArpCache::new(
            Arc::clone(&pool),
            config.arp_hard_timeout_ms,
            config.arp_soft_timeout_ms,
            config.arp_max_entries,
        );
        let nd6 = Nd6Cache::new(
            Arc::clone(&pool),
            config.nd6_hard_timeout_ms,
            config.nd6_soft_timeout_ms,
            config.nd6_reachable_ms,
            config.nd6_delay_probe_ms,
            config.nd6_max_entries,
        );
        let iss = AtomicU32::new(config.iss_seed);

        Self {
            config,
            nifs: NifTable::new(nifs),
            pool,
            clock,
            io,
            registry,
            arp,
            nd6,
            tcp_sockets: SocketTable::new(),
            udp_sockets: SocketTable::new(),
            iss,
        }
    }

    /// Process one inbound frame.  The packet's active region must be the
    /// whole Ethernet frame.
    pub fn process(&self, mut pkt: Packet) -> Verdict {
        let eth = match EthHeader::parse(pkt.payload()) {
            Ok(h) => h,
            Err(e) => {
                debug!("eth: {}, frame dropped", e);
                return Verdict::Dropped;
            }
        };
        pkt.set_l2(pkt.head());
        pkt.set_l3(pkt.head() + ETH_HLEN as u16);
        trace!(
            "rx nif {} {} -> {} type {:#06x}",
            pkt.nif(),
            eth.src,
            eth.dst,
            eth.ethertype
        );
        match eth.ethertype {
            ethertype::IPV4 => ipv4::ipv4_input(self, pkt),
            ethertype::ARP => arp::arp_input(self, pkt),
            ethertype::IPV6 => ipv6::ipv6_input(self, pkt),
            other => {
                trace!("eth: unhandled ethertype {:#06x}, dropped", other);
                Verdict::Dropped
            }
        }
    }

    pub fn nif(&self, id: NifId) -> Option<&Nif> {
        self.nifs.get(id)
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn arp(&self) -> &ArpCache {
        &self.arp
    }

    pub fn nd6(&self) -> &Nd6Cache {
        &self.nd6
    }

    pub fn tcp_sockets(&self) -> &SocketTable<TcpPcb> {
        &self.tcp_sockets
    }

    pub fn udp_sockets(&self) -> &SocketTable<UdpSocket> {
        &self.udp_sockets
    }

    pub(crate) fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Next initial send sequence for an opening connection.
    pub fn next_iss(&self) -> u32 {
        self.iss.fetch_add(ISS_STRIDE, Ordering::Relaxed)
    }

    /// Push the Ethernet header onto `pkt` and hand it to the driver.
    pub(crate) fn transmit_eth(
        &self,
        mut pkt: Packet,
        src: MacAddr,
        dst: MacAddr,
        ethertype: u16,
    ) -> Verdict {
        match pkt.push_header(ETH_HLEN) {
            Ok(buf) => EthHeader { dst, src, ethertype }.emit(buf),
            Err(_) => return Verdict::Dropped,
        }
        pkt.set_l2(pkt.head());
        let nif = pkt.nif();
        match self.io.transmit(nif, pkt) {
            Ok(()) => Verdict::Consumed,
            Err(_) => {
                debug!("tx nif {} rejected frame, dropped", nif);
                Verdict::Dropped
            }
        }
    }

    /// Same as [`Stack::transmit_eth`] but through the loopback queue, for
    /// datagrams addressed to ourselves.
    pub(crate) fn loopback_eth(
        &self,
        mut pkt: Packet,
        src: MacAddr,
        dst: MacAddr,
        ethertype: u16,
    ) -> Verdict {
        match pkt.push_header(ETH_HLEN) {
            Ok(buf) => EthHeader { dst, src, ethertype }.emit(buf),
            Err(_) => return Verdict::Dropped,
        }
        pkt.set_l2(pkt.head());
        let nif = pkt.nif();
        match self.io.loopback(nif, pkt) {
            Ok(()) => Verdict::Consumed,
            Err(_) => {
                debug!("loopback nif {} rejected frame, dropped", nif);
                Verdict::Dropped
            }
        }
    }
}
