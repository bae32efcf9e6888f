//! IPv6 fixed header (RFC 8200) and extension-header length rules.

use crate::types::{Ipv6Addr, NetError};

pub const IPV6_HLEN: usize = 40;

pub const DEFAULT_HOP_LIMIT: u8 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub payload_len: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    pub fn parse(buf: &[u8]) -> Result<Self, NetError> {
        if buf.len() < IPV6_HLEN {
            return Err(NetError::Truncated);
        }
        let vtf = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if vtf >> 28 != 6 {
            return Err(NetError::BadFormat);
        }
        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        src.copy_from_slice(&buf[8..24]);
        dst.copy_from_slice(&buf[24..40]);
        Ok(Self {
            traffic_class: ((vtf >> 20) & 0xFF) as u8,
            flow_label: vtf & 0x000F_FFFF,
            payload_len: u16::from_be_bytes([buf[4], buf[5]]),
            next_header: buf[6],
            hop_limit: buf[7],
            src: Ipv6Addr(src),
            dst: Ipv6Addr(dst),
        })
    }

    /// Write the 40-byte fixed header with zero traffic class / flow label.
    pub fn emit_basic(
        buf: &mut [u8],
        src: Ipv6Addr,
        dst: Ipv6Addr,
        next_header: u8,
        payload_len: u16,
        hop_limit: u8,
    ) {
        buf[0..4].copy_from_slice(&(6u32 << 28).to_be_bytes());
        buf[4..6].copy_from_slice(&payload_len.to_be_bytes());
        buf[6] = next_header;
        buf[7] = hop_limit;
        buf[8..24].copy_from_slice(&src.0);
        buf[24..40].copy_from_slice(&dst.0);
    }
}

/// Byte length of a generic extension header given its second byte
/// (length in 8-octet units, not counting the first 8).
#[inline]
pub const fn ext_header_len(hdr_ext_len: u8) -> usize {
    (hdr_ext_len as usize + 1) * 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ip_proto;

    #[test]
    fn parse_emit() {
        let src = Ipv6Addr({
            let mut a = [0u8; 16];
            a[0] = 0xFE;
            a[1] = 0x80;
            a[15] = 1;
            a
        });
        let mut buf = [0u8; IPV6_HLEN];
        Ipv6Header::emit_basic(&mut buf, src, Ipv6Addr::ALL_NODES, ip_proto::ICMPV6, 24, 255);
        let hdr = Ipv6Header::parse(&buf).unwrap();
        assert_eq!(hdr.src, src);
        assert_eq!(hdr.dst, Ipv6Addr::ALL_NODES);
        assert_eq!(hdr.next_header, ip_proto::ICMPV6);
        assert_eq!(hdr.payload_len, 24);
        assert_eq!(hdr.hop_limit, 255);
    }

    #[test]
    fn rejects_wrong_version() {
        let buf = [0x45u8; IPV6_HLEN];
        assert_eq!(Ipv6Header::parse(&buf), Err(NetError::BadFormat));
    }

    #[test]
    fn ext_header_units() {
        assert_eq!(ext_header_len(0), 8);
        assert_eq!(ext_header_len(2), 24);
    }
}
