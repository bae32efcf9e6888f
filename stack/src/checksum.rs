//! Internet checksum engine (RFC 1071).
//!
//! Ones'-complement 16-bit word sum with end-around carry and a final
//! complement.  The accumulator accepts byte ranges incrementally and
//! carries an odd trailing byte across calls, so a checksum spanning
//! discontiguous packet segments sums identically to one over the
//! concatenated bytes.
//!
//! Transport checksums seed the accumulator with the IPv4 or IPv6
//! pseudo-header before adding the segment bytes.

use crate::types::{Ipv4Addr, Ipv6Addr};

/// Incremental Internet-checksum accumulator.
#[derive(Clone, Copy, Default)]
pub struct Checksum {
    sum: u32,
    /// Odd trailing byte from the previous `add`, the high half of the next
    /// 16-bit word.
    pending: Option<u8>,
}

impl Checksum {
    #[inline]
    pub const fn new() -> Self {
        Self {
            sum: 0,
            pending: None,
        }
    }

    /// Accumulator pre-seeded with the IPv4 TCP/UDP pseudo-header
    /// (src, dst, zero, protocol, transport length).
    pub fn ipv4_pseudo(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, len: u16) -> Self {
        let mut ck = Self::new();
        ck.add(&src.octets());
        ck.add(&dst.octets());
        ck.add_u16(proto as u16);
        ck.add_u16(len);
        ck
    }

    /// Accumulator pre-seeded with the IPv6 pseudo-header (RFC 8200 §8.1).
    pub fn ipv6_pseudo(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, len: u32) -> Self {
        let mut ck = Self::new();
        ck.add(&src.0);
        ck.add(&dst.0);
        ck.add(&len.to_be_bytes());
        ck.add_u16(next_header as u16);
        ck
    }

    /// Add a byte range.  Ranges may be any length; an odd tail is held and
    /// joined with the first byte of the next call.
    pub fn add(&mut self, mut data: &[u8]) {
        if let Some(hi) = self.pending.take() {
            match data.split_first() {
                Some((&lo, rest)) => {
                    self.sum += u32::from(u16::from_be_bytes([hi, lo]));
                    data = rest;
                }
                None => {
                    self.pending = Some(hi);
                    return;
                }
            }
        }
        let mut words = data.chunks_exact(2);
        for w in &mut words {
            self.sum += u32::from(u16::from_be_bytes([w[0], w[1]]));
        }
        if let [tail] = words.remainder() {
            self.pending = Some(*tail);
        }
    }

    /// Add a single aligned 16-bit word.
    #[inline]
    pub fn add_u16(&mut self, word: u16) {
        self.add(&word.to_be_bytes());
    }

    /// Fold carries and complement.  The result is the value to store in the
    /// header's checksum field (written big-endian); verifying a range that
    /// includes a correct checksum field yields zero.
    pub fn finish(mut self) -> u16 {
        if let Some(hi) = self.pending.take() {
            // Odd total length: the last byte pads with a zero low byte.
            self.sum += u32::from(u16::from_be_bytes([hi, 0]));
        }
        let mut s = self.sum;
        s = (s & 0xFFFF) + (s >> 16);
        s = (s & 0xFFFF) + (s >> 16);
        !(s as u16)
    }
}

/// Checksum of a contiguous byte range with no pseudo-header.
pub fn checksum(data: &[u8]) -> u16 {
    let mut ck = Checksum::new();
    ck.add(data);
    ck.finish()
}

/// IPv4 header checksum over the full header (IHL * 4 bytes).
///
/// For verification pass the header as received (checksum field included):
/// the result is zero iff the stored checksum is correct.  For generation
/// zero the checksum field first.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    checksum(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 1071 §3 worked example.
    const SAMPLE: [u8; 8] = [0x00, 0x01, 0xF2, 0x03, 0xF4, 0xF5, 0xF6, 0xF7];

    #[test]
    fn rfc1071_example() {
        assert_eq!(checksum(&SAMPLE), !0xDDF2);
    }

    #[test]
    fn round_trip_is_zero() {
        // Compute, patch into the buffer, reverify: sum must come out zero.
        let mut buf = [
            0x45, 0x00, 0x00, 0x3C, 0x1C, 0x46, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0xAC, 0x10,
            0x0A, 0x63, 0xAC, 0x10, 0x0A, 0x0C,
        ];
        let ck = ipv4_header_checksum(&buf);
        buf[10..12].copy_from_slice(&ck.to_be_bytes());
        assert_eq!(ipv4_header_checksum(&buf), 0);
    }

    #[test]
    fn discontiguous_segments_sum_identically() {
        let whole = checksum(&SAMPLE);
        // Every split point, including odd ones that exercise the carried
        // trailing byte.
        for cut in 0..=SAMPLE.len() {
            let mut ck = Checksum::new();
            ck.add(&SAMPLE[..cut]);
            ck.add(&SAMPLE[cut..]);
            assert_eq!(ck.finish(), whole, "split at {}", cut);
        }
        // Byte-at-a-time.
        let mut ck = Checksum::new();
        for b in SAMPLE {
            ck.add(&[b]);
        }
        assert_eq!(ck.finish(), whole);
    }

    #[test]
    fn odd_length_pads_with_zero() {
        let mut ck = Checksum::new();
        ck.add(&[0xAB]);
        assert_eq!(ck.finish(), !0xAB00);
    }

    #[test]
    fn pseudo_header_seeding() {
        let src = Ipv4Addr::new(192, 168, 0, 1);
        let dst = Ipv4Addr::new(192, 168, 0, 2);
        let mut seeded = Checksum::ipv4_pseudo(src, dst, 6, 4);
        let payload = [0x12, 0x34, 0x56, 0x78];
        seeded.add(&payload);

        let mut manual = Checksum::new();
        manual.add(&src.octets());
        manual.add(&dst.octets());
        manual.add(&[0x00, 0x06, 0x00, 0x04]);
        manual.add(&payload);
        assert_eq!(seeded.finish(), manual.finish());
    }
}
