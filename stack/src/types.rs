//! Address types, protocol constants and the packet-path verdict.
//!
//! Addresses are plain fixed-size byte/integer newtypes with explicit
//! big-endian conversion at the wire boundary; nothing in here aliases
//! struct layouts onto raw buffers.

use core::fmt;

use packnet_pktio::Packet;

// =============================================================================
// Link-layer address
// =============================================================================

/// 48-bit Ethernet MAC address.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xFF; 6]);
    pub const ZERO: Self = Self([0; 6]);

    /// Pack into a `u64` with the top 16 bits zero (cache storage form).
    #[inline]
    pub const fn to_u64(self) -> u64 {
        let b = self.0;
        (b[0] as u64)
            | (b[1] as u64) << 8
            | (b[2] as u64) << 16
            | (b[3] as u64) << 24
            | (b[4] as u64) << 32
            | (b[5] as u64) << 40
    }

    #[inline]
    pub const fn from_u64(v: u64) -> Self {
        Self([
            v as u8,
            (v >> 8) as u8,
            (v >> 16) as u8,
            (v >> 24) as u8,
            (v >> 32) as u8,
            (v >> 40) as u8,
        ])
    }

    /// Group bit of the first octet.
    #[inline]
    pub const fn is_multicast(self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

// =============================================================================
// IPv4 address
// =============================================================================

/// IPv4 address in host integer form (decoded from wire big-endian).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Addr(pub u32);

impl Ipv4Addr {
    pub const UNSPECIFIED: Self = Self(0);
    /// Limited broadcast, 255.255.255.255.
    pub const BROADCAST: Self = Self(0xFFFF_FFFF);
    /// Link-local broadcast per RFC 3927, 169.254.255.255.
    pub const LINK_LOCAL_BROADCAST: Self = Self(0xA9FE_FFFF);

    #[inline]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(u32::from_be_bytes([a, b, c, d]))
    }

    #[inline]
    pub const fn from_bytes(b: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(b))
    }

    #[inline]
    pub const fn octets(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// 224.0.0.0/4.
    #[inline]
    pub const fn is_multicast(self) -> bool {
        self.0 & 0xF000_0000 == 0xE000_0000
    }

    /// 169.254.0.0/16 (RFC 3927).
    #[inline]
    pub const fn is_link_local(self) -> bool {
        self.0 & 0xFFFF_0000 == 0xA9FE_0000
    }

    /// Multicast MAC mapping: 01:00:5e + low 23 bits.
    pub const fn multicast_mac(self) -> MacAddr {
        let o = self.octets();
        MacAddr([0x01, 0x00, 0x5E, o[1] & 0x7F, o[2], o[3]])
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(f, "{}.{}.{}.{}", o[0], o[1], o[2], o[3])
    }
}

// =============================================================================
// IPv6 address
// =============================================================================

/// IPv6 address as 16 raw wire-order bytes.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv6Addr(pub [u8; 16]);

impl Ipv6Addr {
    pub const UNSPECIFIED: Self = Self([0; 16]);
    /// ff02::1, all-nodes link-local multicast.
    pub const ALL_NODES: Self = Self([0xFF, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);

    #[inline]
    pub const fn is_unspecified(self) -> bool {
        let mut i = 0;
        while i < 16 {
            if self.0[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    /// ff00::/8.
    #[inline]
    pub const fn is_multicast(self) -> bool {
        self.0[0] == 0xFF
    }

    /// fe80::/10.
    #[inline]
    pub const fn is_link_local(self) -> bool {
        self.0[0] == 0xFE && self.0[1] & 0xC0 == 0x80
    }

    /// ff02::1:ffXX:XXXX for this address (RFC 4291 §2.7.1).
    pub const fn solicited_node(self) -> Self {
        let mut a = [0u8; 16];
        a[0] = 0xFF;
        a[1] = 0x02;
        a[11] = 0x01;
        a[12] = 0xFF;
        a[13] = self.0[13];
        a[14] = self.0[14];
        a[15] = self.0[15];
        Self(a)
    }

    /// Multicast MAC mapping: 33:33 + low 32 bits.
    pub const fn multicast_mac(self) -> MacAddr {
        MacAddr([0x33, 0x33, self.0[12], self.0[13], self.0[14], self.0[15]])
    }
}

impl fmt::Debug for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pair) in self.0.chunks(2).enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:x}", u16::from_be_bytes([pair[0], pair[1]]))?;
        }
        Ok(())
    }
}

// =============================================================================
// Unified address (socket keys)
// =============================================================================

/// Family-agnostic address storage for socket keys: 16 bytes, with an IPv4
/// address occupying the trailing 4 bytes and the rest zero.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetAddr(pub [u8; 16]);

impl NetAddr {
    pub const ZERO: Self = Self([0; 16]);

    pub const fn from_v4(addr: Ipv4Addr) -> Self {
        let mut b = [0u8; 16];
        let o = addr.octets();
        b[12] = o[0];
        b[13] = o[1];
        b[14] = o[2];
        b[15] = o[3];
        Self(b)
    }

    pub const fn from_v6(addr: Ipv6Addr) -> Self {
        Self(addr.0)
    }

    pub const fn to_v4(self) -> Ipv4Addr {
        Ipv4Addr::from_bytes([self.0[12], self.0[13], self.0[14], self.0[15]])
    }

    pub const fn to_v6(self) -> Ipv6Addr {
        Ipv6Addr(self.0)
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        Ipv6Addr(self.0).is_unspecified()
    }
}

impl fmt::Debug for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetAddr({})", Ipv6Addr(self.0))
    }
}

// =============================================================================
// Protocol numbers and EtherTypes
// =============================================================================

/// EtherType values this stack classifies.
pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const IPV6: u16 = 0x86DD;
}

/// IP protocol / IPv6 next-header numbers.
pub mod ip_proto {
    pub const HOPOPTS: u8 = 0;
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ROUTING: u8 = 43;
    pub const FRAGMENT: u8 = 44;
    pub const ICMPV6: u8 = 58;
    /// IPv6 "no next header" terminal sentinel.
    pub const NONE: u8 = 59;
    pub const DSTOPTS: u8 = 60;
}

// =============================================================================
// Errors and verdicts
// =============================================================================

/// Parse/validation failures inside wire decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    /// Buffer shorter than the header demands.
    Truncated,
    /// Version nibble or fixed field does not match the protocol.
    BadFormat,
    /// Checksum verification failed.
    BadChecksum,
    /// Address disallowed by policy (e.g. multicast source).
    BadAddress,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated header"),
            Self::BadFormat => write!(f, "malformed header"),
            Self::BadChecksum => write!(f, "bad checksum"),
            Self::BadAddress => write!(f, "disallowed address"),
        }
    }
}

/// Outcome of a packet-path step.
///
/// `Dropped` means the packet was freed with no reply.  `Consumed` means its
/// ownership moved into a structure (pending chain) or to the transport.
/// `Continue` hands the packet to the next processing layer.
pub enum Verdict {
    Dropped,
    Consumed,
    Continue(Packet),
}

impl fmt::Debug for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dropped => "Dropped",
            Self::Consumed => "Consumed",
            Self::Continue(_) => "Continue(..)",
        })
    }
}

impl Verdict {
    /// `true` for the two terminal outcomes.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue(_))
    }
}

/// Variant-level equality; the packet inside `Continue` is not compared.
impl PartialEq for Verdict {
    fn eq(&self, other: &Self) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }
}

impl Eq for Verdict {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_u64_round_trip() {
        let mac = MacAddr([0x02, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]);
        let v = mac.to_u64();
        assert_eq!(v >> 48, 0, "top 16 bits stay zero");
        assert_eq!(MacAddr::from_u64(v), mac);
    }

    #[test]
    fn ipv4_classification() {
        assert!(Ipv4Addr::new(224, 0, 0, 1).is_multicast());
        assert!(!Ipv4Addr::new(10, 0, 0, 1).is_multicast());
        assert!(Ipv4Addr::new(169, 254, 12, 7).is_link_local());
        assert_eq!(
            Ipv4Addr::new(224, 129, 1, 2).multicast_mac(),
            MacAddr([0x01, 0x00, 0x5E, 0x01, 1, 2]),
            "high multicast bit masked out of the MAC map"
        );
    }

    #[test]
    fn ipv6_solicited_node() {
        let mut a = [0u8; 16];
        a[0] = 0xFE;
        a[1] = 0x80;
        a[13] = 0xAB;
        a[14] = 0xCD;
        a[15] = 0xEF;
        let sn = Ipv6Addr(a).solicited_node();
        assert!(sn.is_multicast());
        assert_eq!(&sn.0[11..], &[0x01, 0xFF, 0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn netaddr_v4_in_trailing_bytes() {
        let na = NetAddr::from_v4(Ipv4Addr::new(192, 168, 1, 5));
        assert_eq!(&na.0[..12], &[0u8; 12]);
        assert_eq!(na.to_v4(), Ipv4Addr::new(192, 168, 1, 5));
        assert!(NetAddr::ZERO.is_zero());
    }
}
