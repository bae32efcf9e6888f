//! Network interface descriptors and the interface table.
//!
//! NIFs are immutable after table build: workers read them lock-free while
//! processing packets.  The host constructs one [`Nif`] per opened
//! interface and hands the finished [`NifTable`] to the stack.

use alloc::vec::Vec;

use bitflags::bitflags;
use packnet_pktio::NifId;

use crate::types::{Ipv4Addr, Ipv6Addr, MacAddr};

bitflags! {
    /// Hardware checksum-offload capabilities of an interface.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Offload: u32 {
        /// IPv4 header checksum verified on receive.
        const IPV4_RX_CKSUM = 1 << 0;
        /// IPv4 header checksum inserted on transmit.
        const IPV4_TX_CKSUM = 1 << 1;
        /// TCP/UDP checksum verified on receive.
        const L4_RX_CKSUM = 1 << 2;
        /// TCP/UDP checksum inserted on transmit.
        const L4_TX_CKSUM = 1 << 3;
    }
}

/// IPv4 configuration block of an interface.
#[derive(Clone, Copy, Debug)]
pub struct NifIpv4 {
    pub address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub mtu: u16,
}

impl NifIpv4 {
    /// Network prefix (address & mask).
    #[inline]
    pub fn subnet(&self) -> Ipv4Addr {
        Ipv4Addr(self.address.0 & self.subnet_mask.0)
    }

    /// Directed broadcast address of the subnet.
    #[inline]
    pub fn subnet_broadcast(&self) -> Ipv4Addr {
        Ipv4Addr(self.subnet().0 | !self.subnet_mask.0)
    }

    /// `addr` is our configured unicast address.
    #[inline]
    pub fn is_self(&self, addr: Ipv4Addr) -> bool {
        addr == self.address
    }

    /// `addr` is a broadcast form we must accept (limited, link-local,
    /// subnet and all-zero network forms).
    pub fn is_broadcast(&self, addr: Ipv4Addr) -> bool {
        addr == Ipv4Addr::BROADCAST
            || addr == Ipv4Addr::UNSPECIFIED
            || addr == Ipv4Addr::LINK_LOCAL_BROADCAST
            || addr == self.subnet_broadcast()
            || addr == self.subnet()
    }

    /// Destination filter for inbound datagrams.
    #[inline]
    pub fn is_for_me(&self, addr: Ipv4Addr) -> bool {
        self.is_self(addr) || self.is_broadcast(addr)
    }

    /// `addr` is reachable without a gateway: same subnet, or in the
    /// 169.254/16 prefix which RFC 3927 mandates stays on-link.
    pub fn on_link(&self, addr: Ipv4Addr) -> bool {
        (addr.0 & self.subnet_mask.0) == self.subnet().0 || addr.is_link_local()
    }
}

/// IPv6 configuration block of an interface.
#[derive(Clone, Debug)]
pub struct NifIpv6 {
    /// Configured unicast addresses (link-local first by convention).
    pub addresses: Vec<Ipv6Addr>,
    pub hop_limit: u8,
    pub mtu: u16,
    /// RFC 4861 BaseReachableTime, milliseconds.
    pub reachable_ms: u32,
    /// RFC 4861 RetransTimer, milliseconds.
    pub retrans_ms: u32,
}

impl NifIpv6 {
    /// Destination filter: our unicast addresses, their solicited-node
    /// multicast groups, and all-nodes.
    pub fn is_for_me(&self, addr: &Ipv6Addr) -> bool {
        if *addr == Ipv6Addr::ALL_NODES {
            return true;
        }
        self.addresses
            .iter()
            .any(|a| a == addr || a.solicited_node() == *addr)
    }

    /// `addr` is one of our configured unicast addresses.
    pub fn is_self(&self, addr: &Ipv6Addr) -> bool {
        self.addresses.iter().any(|a| a == addr)
    }

    /// Source address for outbound packets to `dst` (link-local for
    /// link-local destinations, else the first global address).
    pub fn source_for(&self, dst: &Ipv6Addr) -> Option<Ipv6Addr> {
        if dst.is_link_local() || dst.is_multicast() {
            if let Some(ll) = self.addresses.iter().find(|a| a.is_link_local()) {
                return Some(*ll);
            }
        }
        self.addresses
            .iter()
            .find(|a| !a.is_link_local())
            .or_else(|| self.addresses.first())
            .copied()
    }
}

/// One network interface as the stack sees it.
#[derive(Clone, Debug)]
pub struct Nif {
    pub id: NifId,
    pub mac: MacAddr,
    pub offload: Offload,
    /// Receive/transmit queue pairs the host opened on this interface.
    pub queues: u16,
    pub ipv4: Option<NifIpv4>,
    pub ipv6: Option<NifIpv6>,
}

/// Immutable interface table, indexed by [`NifId`].
pub struct NifTable {
    nifs: Vec<Nif>,
}

impl NifTable {
    pub fn new(nifs: Vec<Nif>) -> Self {
        Self { nifs }
    }

    pub fn get(&self, id: NifId) -> Option<&Nif> {
        self.nifs.iter().find(|n| n.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Nif> {
        self.nifs.iter()
    }
}
