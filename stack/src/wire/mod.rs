//! Wire-format codecs: explicit big-endian decode/encode, no struct
//! aliasing.
//!
//! Each codec exposes a plain struct with `parse` (bounds-checked, returns
//! [`NetError`](crate::types::NetError) on malformed input) and an `emit`
//! that writes the fixed header into a caller-provided slice.

pub mod arp;
pub mod eth;
pub mod icmpv4;
pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;
pub mod udp;
