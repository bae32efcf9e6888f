//! ICMPv4 (RFC 792): type/code/checksum plus type-specific bodies.

use crate::types::NetError;

pub const ICMPV4_HLEN: usize = 4;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_UNREACHABLE: u8 = 3;
pub const TYPE_SOURCE_QUENCH: u8 = 4;
pub const TYPE_ECHO: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;
pub const TYPE_PARAM_PROBLEM: u8 = 12;

pub mod unreach_code {
    pub const NET: u8 = 0;
    pub const HOST: u8 = 1;
    pub const PROTOCOL: u8 = 2;
    pub const PORT: u8 = 3;
    pub const NEEDFRAG: u8 = 4;
    pub const SRCFAIL: u8 = 5;
    pub const NET_UNKNOWN: u8 = 6;
    pub const HOST_UNKNOWN: u8 = 7;
    pub const ISOLATED: u8 = 8;
    pub const NET_PROHIB: u8 = 9;
    pub const HOST_PROHIB: u8 = 10;
    pub const TOSNET: u8 = 11;
    pub const TOSHOST: u8 = 12;
}

pub mod timxceed_code {
    pub const IN_TRANSIT: u8 = 0;
    pub const REASSEMBLY: u8 = 1;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Icmpv4Header {
    pub msg_type: u8,
    pub code: u8,
    pub checksum: u16,
}

impl Icmpv4Header {
    pub fn parse(buf: &[u8]) -> Result<Self, NetError> {
        if buf.len() < ICMPV4_HLEN {
            return Err(NetError::Truncated);
        }
        Ok(Self {
            msg_type: buf[0],
            code: buf[1],
            checksum: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }
}
