//! ARP for IPv4 over Ethernet (RFC 826): fixed 28-byte layout.

use crate::types::{Ipv4Addr, MacAddr, NetError};

pub const ARP_PLEN: usize = 28;

pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpPacket {
    pub op: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Parse and validate the fixed Ethernet/IPv4 binding.
    pub fn parse(buf: &[u8]) -> Result<Self, NetError> {
        if buf.len() < ARP_PLEN {
            return Err(NetError::Truncated);
        }
        let htype = u16::from_be_bytes([buf[0], buf[1]]);
        let ptype = u16::from_be_bytes([buf[2], buf[3]]);
        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || buf[4] != 6 || buf[5] != 4 {
            return Err(NetError::BadFormat);
        }
        let mut sender_mac = [0u8; 6];
        let mut target_mac = [0u8; 6];
        sender_mac.copy_from_slice(&buf[8..14]);
        target_mac.copy_from_slice(&buf[18..24]);
        Ok(Self {
            op: u16::from_be_bytes([buf[6], buf[7]]),
            sender_mac: MacAddr(sender_mac),
            sender_ip: Ipv4Addr::from_bytes([buf[14], buf[15], buf[16], buf[17]]),
            target_mac: MacAddr(target_mac),
            target_ip: Ipv4Addr::from_bytes([buf[24], buf[25], buf[26], buf[27]]),
        })
    }

    pub fn emit(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        buf[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
        buf[4] = 6;
        buf[5] = 4;
        buf[6..8].copy_from_slice(&self.op.to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
    }
}
