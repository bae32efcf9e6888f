//! Ethernet II header.

use crate::types::{MacAddr, NetError};

pub const ETH_HLEN: usize = 14;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, NetError> {
        if buf.len() < ETH_HLEN {
            return Err(NetError::Truncated);
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&buf[0..6]);
        src.copy_from_slice(&buf[6..12]);
        Ok(Self {
            dst: MacAddr(dst),
            src: MacAddr(src),
            ethertype: u16::from_be_bytes([buf[12], buf[13]]),
        })
    }

    pub fn emit(&self, buf: &mut [u8]) {
        buf[0..6].copy_from_slice(&self.dst.0);
        buf[6..12].copy_from_slice(&self.src.0);
        buf[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ethertype;

    #[test]
    fn parse_emit() {
        let mut buf = [0u8; ETH_HLEN];
        let hdr = EthHeader {
            dst: MacAddr::BROADCAST,
            src: MacAddr([2, 0, 0, 0, 0, 1]),
            ethertype: ethertype::ARP,
        };
        hdr.emit(&mut buf);
        assert_eq!(EthHeader::parse(&buf).unwrap(), hdr);
        assert_eq!(EthHeader::parse(&buf[..13]), Err(NetError::Truncated));
    }
}
