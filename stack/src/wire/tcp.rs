//! TCP header (RFC 793): 20 fixed bytes, data offset packed into the high
//! nibble of the 16-bit field shared with the flags.

use bitflags::bitflags;

use crate::types::NetError;

pub const TCP_HLEN: usize = 20;

bitflags! {
    /// TCP control flags (low byte of the offset/flags word).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// Header length in bytes (data offset * 4, >= 20).
    pub header_len: u8,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
}

impl TcpHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, NetError> {
        if buf.len() < TCP_HLEN {
            return Err(NetError::Truncated);
        }
        let header_len = (buf[12] >> 4) * 4;
        if (header_len as usize) < TCP_HLEN || (header_len as usize) > buf.len() {
            return Err(NetError::BadFormat);
        }
        Ok(Self {
            src_port: u16::from_be_bytes([buf[0], buf[1]]),
            dst_port: u16::from_be_bytes([buf[2], buf[3]]),
            seq: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ack: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            header_len,
            flags: TcpFlags::from_bits_truncate(buf[13]),
            window: u16::from_be_bytes([buf[14], buf[15]]),
            checksum: u16::from_be_bytes([buf[16], buf[17]]),
            urgent: u16::from_be_bytes([buf[18], buf[19]]),
        })
    }

    /// Write an option-less 20-byte header with the checksum zeroed.
    pub fn emit_basic(
        buf: &mut [u8],
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
        window: u16,
    ) {
        buf[0..2].copy_from_slice(&src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&seq.to_be_bytes());
        buf[8..12].copy_from_slice(&ack.to_be_bytes());
        buf[12] = (TCP_HLEN as u8 / 4) << 4;
        buf[13] = flags.bits();
        buf[14..16].copy_from_slice(&window.to_be_bytes());
        buf[16..18].copy_from_slice(&0u16.to_be_bytes());
        buf[18..20].copy_from_slice(&0u16.to_be_bytes());
    }
}
