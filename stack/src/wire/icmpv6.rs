//! ICMPv6 (RFC 4443) and Neighbor Discovery messages (RFC 4861).
//!
//! ND options are the generic (type, length-in-8-octet-units) TLV form;
//! [`NdOptions`] walks them with the zero-length-option validity rule.

use crate::types::{Ipv6Addr, NetError};

pub const ICMPV6_HLEN: usize = 4;

pub const TYPE_ECHO_REQUEST: u8 = 128;
pub const TYPE_ECHO_REPLY: u8 = 129;
pub const TYPE_ROUTER_SOLICIT: u8 = 133;
pub const TYPE_ROUTER_ADVERT: u8 = 134;
pub const TYPE_NEIGHBOR_SOLICIT: u8 = 135;
pub const TYPE_NEIGHBOR_ADVERT: u8 = 136;

pub const OPT_SOURCE_LLA: u8 = 1;
pub const OPT_TARGET_LLA: u8 = 2;
pub const OPT_PREFIX_INFO: u8 = 3;
pub const OPT_REDIRECTED_HDR: u8 = 4;
pub const OPT_MTU: u8 = 5;

/// Neighbor Advertisement flag bits (first flags byte).
pub const NADV_ROUTER: u8 = 0x80;
pub const NADV_SOLICITED: u8 = 0x40;
pub const NADV_OVERRIDE: u8 = 0x20;

/// NS and NA share this size: 4 ICMP + 4 reserved/flags + 16 target.
pub const ND_NEIGHBOR_MLEN: usize = 24;
/// RA fixed part: 4 ICMP + hop limit, flags, lifetime, reachable, retrans.
pub const ND_ROUTER_ADVERT_MLEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Icmpv6Header {
    pub msg_type: u8,
    pub code: u8,
    pub checksum: u16,
}

impl Icmpv6Header {
    pub fn parse(buf: &[u8]) -> Result<Self, NetError> {
        if buf.len() < ICMPV6_HLEN {
            return Err(NetError::Truncated);
        }
        Ok(Self {
            msg_type: buf[0],
            code: buf[1],
            checksum: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }
}

/// Neighbor Solicitation / Advertisement body (past the 4-byte ICMP head).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborMessage {
    /// NA flag byte; always zero for NS.
    pub flags: u8,
    pub target: Ipv6Addr,
    /// Offset of the first option from the start of the ICMP message.
    pub options_at: usize,
}

impl NeighborMessage {
    /// Parse from the full ICMP message (type/code/checksum included).
    /// Enforces the RFC 4861 minimum length and non-multicast target.
    pub fn parse(msg: &[u8]) -> Result<Self, NetError> {
        if msg.len() < ND_NEIGHBOR_MLEN {
            return Err(NetError::Truncated);
        }
        let mut target = [0u8; 16];
        target.copy_from_slice(&msg[8..24]);
        let target = Ipv6Addr(target);
        if target.is_multicast() {
            return Err(NetError::BadAddress);
        }
        Ok(Self {
            flags: msg[4],
            target,
            options_at: ND_NEIGHBOR_MLEN,
        })
    }
}

/// Router Advertisement fixed body.
#[derive(Clone, Copy, Debug)]
pub struct RouterAdvert {
    pub cur_hop_limit: u8,
    pub flags: u8,
    /// Default-router lifetime in seconds; zero means "not a default
    /// router".
    pub router_lifetime: u16,
    pub reachable_ms: u32,
    pub retrans_ms: u32,
    pub options_at: usize,
}

impl RouterAdvert {
    pub fn parse(msg: &[u8]) -> Result<Self, NetError> {
        if msg.len() < ND_ROUTER_ADVERT_MLEN {
            return Err(NetError::Truncated);
        }
        Ok(Self {
            cur_hop_limit: msg[4],
            flags: msg[5],
            router_lifetime: u16::from_be_bytes([msg[6], msg[7]]),
            reachable_ms: u32::from_be_bytes([msg[8], msg[9], msg[10], msg[11]]),
            retrans_ms: u32::from_be_bytes([msg[12], msg[13], msg[14], msg[15]]),
            options_at: ND_ROUTER_ADVERT_MLEN,
        })
    }
}

/// Iterator over ND TLV options: yields `(type, body)` where `body` excludes
/// the two-byte option header.  A zero length or a truncated option
/// invalidates the whole message (RFC 4861 §7.1), surfaced as an `Err` item.
pub struct NdOptions<'a> {
    rest: &'a [u8],
}

impl<'a> NdOptions<'a> {
    pub fn new(options: &'a [u8]) -> Self {
        Self { rest: options }
    }
}

impl<'a> Iterator for NdOptions<'a> {
    type Item = Result<(u8, &'a [u8]), NetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < 2 {
            self.rest = &[];
            return Some(Err(NetError::Truncated));
        }
        let opt_type = self.rest[0];
        let opt_len = self.rest[1] as usize * 8;
        if opt_len == 0 || opt_len > self.rest.len() {
            self.rest = &[];
            return Some(Err(NetError::BadFormat));
        }
        let body = &self.rest[2..opt_len];
        self.rest = &self.rest[opt_len..];
        Some(Ok((opt_type, body)))
    }
}

/// Scan options for a link-layer address option of the given type.
pub fn find_lla_option(options: &[u8], opt_type: u8) -> Result<Option<[u8; 6]>, NetError> {
    for opt in NdOptions::new(options) {
        let (t, body) = opt?;
        if t == opt_type {
            if body.len() < 6 {
                return Err(NetError::Truncated);
            }
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&body[..6]);
            return Ok(Some(mac));
        }
    }
    Ok(None)
}
