//! Host-facing frame I/O contract.

use core::fmt;

use crate::packet::Packet;

/// Index of a network interface in the host's interface table.
///
/// Packets are tagged with their origin NIF by the receiving host; output
/// paths name the egress NIF the same way.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NifId(pub u16);

impl fmt::Debug for NifId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NifId({})", self.0)
    }
}

impl fmt::Display for NifId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frame transmission hooks implemented by the host.
///
/// Both methods take ownership of the packet.  On failure the packet comes
/// back in the `Err` so the caller frees it exactly once (usually by just
/// dropping it); on success the host owns it.
pub trait FrameIo: Send + Sync {
    /// Enqueue a fully built frame for transmission on `nif`.
    ///
    /// Queue selection (per-worker output queues, `thread % num_queues`
    /// style) is the host's business.
    fn transmit(&self, nif: NifId, pkt: Packet) -> Result<(), Packet>;

    /// Feed a frame addressed to ourselves back into the receive side.
    fn loopback(&self, nif: NifId, pkt: Packet) -> Result<(), Packet>;
}
