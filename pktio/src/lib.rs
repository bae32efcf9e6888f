//! Packet-I/O substrate surface for the packnet stack.
//!
//! This crate owns the buffer currency and the two traits the protocol stack
//! consumes from its host: a monotonic [`Clock`](time::Clock) and a
//! [`FrameIo`](io::FrameIo) transmit hook.  It deliberately contains no
//! device code — opening interfaces, configuring queues, and pulling receive
//! batches are host concerns; the host feeds received frames into the stack
//! one [`Packet`](packet::Packet) at a time.
//!
//! # Ownership model
//!
//! [`Packet`](packet::Packet) is move-only and pool-backed.  Dropping it
//! returns the slot; parking it in a [`PacketChain`](packet::PacketChain)
//! transfers ownership into the chain via a per-slot side-channel link, so a
//! packet can sit in at most one chain at a time by construction.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod io;
pub mod packet;
pub mod pool;
pub mod time;

pub use io::{FrameIo, NifId};
pub use packet::{BufError, HEADROOM, Packet, PacketChain};
pub use pool::PacketPool;
pub use time::{Clock, ManualClock, Timestamp};
