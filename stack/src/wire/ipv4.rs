//! IPv4 header (RFC 791).

use crate::types::{Ipv4Addr, NetError};

pub const IPV4_HLEN: usize = 20;

/// Don't-fragment flag bit within `flags_frag`.
pub const FLAG_DF: u16 = 0x4000;
/// More-fragments flag bit.
pub const FLAG_MF: u16 = 0x2000;
/// 13-bit fragment offset mask.
pub const FRAG_OFFSET_MASK: u16 = 0x1FFF;

pub const DEFAULT_TTL: u8 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes (IHL * 4, >= 20).
    pub header_len: u8,
    pub dscp_ecn: u8,
    pub total_len: u16,
    pub ident: u16,
    /// DF/MF flags and 13-bit fragment offset, packed as on the wire.
    pub flags_frag: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub fn parse(buf: &[u8]) -> Result<Self, NetError> {
        if buf.len() < IPV4_HLEN {
            return Err(NetError::Truncated);
        }
        if buf[0] >> 4 != 4 {
            return Err(NetError::BadFormat);
        }
        let header_len = (buf[0] & 0x0F) * 4;
        if (header_len as usize) < IPV4_HLEN || (header_len as usize) > buf.len() {
            return Err(NetError::BadFormat);
        }
        let total_len = u16::from_be_bytes([buf[2], buf[3]]);
        if (total_len as usize) < header_len as usize {
            return Err(NetError::BadFormat);
        }
        Ok(Self {
            header_len,
            dscp_ecn: buf[1],
            total_len,
            ident: u16::from_be_bytes([buf[4], buf[5]]),
            flags_frag: u16::from_be_bytes([buf[6], buf[7]]),
            ttl: buf[8],
            protocol: buf[9],
            checksum: u16::from_be_bytes([buf[10], buf[11]]),
            src: Ipv4Addr::from_bytes([buf[12], buf[13], buf[14], buf[15]]),
            dst: Ipv4Addr::from_bytes([buf[16], buf[17], buf[18], buf[19]]),
        })
    }

    /// `true` if this datagram is a fragment (offset != 0 or MF set).
    #[inline]
    pub fn is_fragment(&self) -> bool {
        self.flags_frag & (FLAG_MF | FRAG_OFFSET_MASK) != 0
    }

    /// Write a plain 20-byte header (IHL=5, no options) with the checksum
    /// field zeroed; the caller patches bytes 10..12 after summing.
    pub fn emit_basic(buf: &mut [u8], src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, payload_len: u16) {
        buf[0] = 0x45;
        buf[1] = 0;
        buf[2..4].copy_from_slice(&(payload_len + IPV4_HLEN as u16).to_be_bytes());
        buf[4..6].copy_from_slice(&0u16.to_be_bytes());
        buf[6..8].copy_from_slice(&0u16.to_be_bytes());
        buf[8] = DEFAULT_TTL;
        buf[9] = protocol;
        buf[10..12].copy_from_slice(&0u16.to_be_bytes());
        buf[12..16].copy_from_slice(&src.octets());
        buf[16..20].copy_from_slice(&dst.octets());
    }
}
