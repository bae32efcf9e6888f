//! Pool-backed packet buffer with zero-copy header push/pull and layer
//! tracking.
//!
//! `Packet` is the single currency exchanged between the host's receive
//! loop and the protocol stack.  It carries the raw frame plus metadata
//! (layer offsets, head/tail pointers) so each protocol layer can reach its
//! headers without reparsing from scratch.
//!
//! # Ownership
//!
//! `Packet` is **move-only** — it deliberately does not implement `Clone`.
//! Dropping a packet returns its slot to the owning
//! [`PacketPool`](super::pool::PacketPool).  Parking a packet in a
//! [`PacketChain`] spills its metadata into the slot's parked record and
//! consumes the handle, so chain membership is exclusive by construction.
//!
//! # Layout
//!
//! ```text
//! |<-- headroom -->|<-- active data (head..tail) -->|<-- tailroom -->|
//! 0            head                              tail          buf_size
//! ```
//!
//! * TX path: [`Packet::alloc`] starts with `head = tail = HEADROOM`;
//!   headers are prepended via [`push_header`](Packet::push_header),
//!   payload appended via [`append`](Packet::append).
//! * RX path: [`Packet::from_frame`] starts with `head = 0`,
//!   `tail = frame.len()` so layer offsets match wire positions.

use core::fmt;
use core::mem::ManuallyDrop;

use alloc::sync::Arc;

use crate::io::NifId;
use crate::pool::{FREELIST_EMPTY, PacketPool, ParkedMeta};

/// Reserved headroom in each TX-allocated buffer (bytes).
///
/// Covers Ethernet (14) + IPv6 (40) + TCP max (60) with room to spare.
pub const HEADROOM: u16 = 128;

/// Buffer-space errors from the push/pull/append primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufError {
    /// Not enough headroom or tailroom for the requested bytes.
    NoSpace,
    /// Requested range exceeds the active data region.
    OutOfBounds,
}

impl fmt::Display for BufError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => write!(f, "no buffer space"),
            Self::OutOfBounds => write!(f, "range outside active data"),
        }
    }
}

// =============================================================================
// Packet
// =============================================================================

/// A pooled network packet with layer-offset tracking.
///
/// See [module documentation](self) for layout and ownership semantics.
pub struct Packet {
    pool: Arc<PacketPool>,
    slot: u16,
    /// Start of the active data region within the backing buffer.
    head: u16,
    /// End of the active data region (exclusive).
    tail: u16,
    /// Byte offset of the L2 (Ethernet) header.
    l2: u16,
    /// Byte offset of the L3 (IPv4/IPv6/ARP) header.
    l3: u16,
    /// Byte offset of the L4 (TCP/UDP/ICMP) header.
    l4: u16,
    /// Origin (RX) or egress (TX) interface.
    nif: NifId,
}

impl Drop for Packet {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet {{ slot={}, head={}, tail={}, len={}, l2={}, l3={}, l4={}, nif={} }}",
            self.slot,
            self.head,
            self.tail,
            self.len(),
            self.l2,
            self.l3,
            self.l4,
            self.nif
        )
    }
}

// -- Constructors -------------------------------------------------------------

impl Packet {
    /// Allocate an empty buffer with [`HEADROOM`] reserved (TX path).
    ///
    /// Returns `None` if the pool is exhausted.
    pub fn alloc(pool: &Arc<PacketPool>, nif: NifId) -> Option<Self> {
        let slot = pool.alloc()?;
        Some(Self {
            pool: Arc::clone(pool),
            slot,
            head: HEADROOM,
            tail: HEADROOM,
            l2: 0,
            l3: 0,
            l4: 0,
            nif,
        })
    }

    /// Allocate a buffer and copy a received frame into it (RX path).
    ///
    /// The frame starts at offset 0 so layer offsets match raw wire
    /// positions.  Returns `None` if the pool is exhausted or the frame
    /// does not fit a slot.
    pub fn from_frame(pool: &Arc<PacketPool>, nif: NifId, frame: &[u8]) -> Option<Self> {
        if frame.len() > pool.buf_size() {
            return None;
        }
        let slot = pool.alloc()?;
        // SAFETY: We own this slot exclusively after alloc().
        unsafe {
            core::ptr::copy_nonoverlapping(frame.as_ptr(), pool.slot_data(slot), frame.len());
        }
        Some(Self {
            pool: Arc::clone(pool),
            slot,
            head: 0,
            tail: frame.len() as u16,
            l2: 0,
            l3: 0,
            l4: 0,
            nif,
        })
    }
}

// -- Internal buffer access ---------------------------------------------------

impl Packet {
    /// Total capacity of the backing slot.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.buf_size()
    }

    /// Pool this packet belongs to.
    #[inline]
    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }

    #[inline]
    fn data(&self) -> &[u8] {
        // SAFETY: We own this slot — exclusive access is guaranteed by
        // move-only semantics (no Clone).
        unsafe { core::slice::from_raw_parts(self.pool.slot_data(self.slot), self.capacity()) }
    }

    #[inline]
    fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: We own this slot and hold &mut self — exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.pool.slot_data(self.slot), self.capacity()) }
    }
}

// -- Header push/pull and payload access --------------------------------------

impl Packet {
    /// Number of active bytes (`tail - head`).
    #[inline]
    pub fn len(&self) -> usize {
        (self.tail - self.head) as usize
    }

    /// `true` if the active region is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Active data region `data[head..tail]`.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data()[self.head as usize..self.tail as usize]
    }

    /// Mutable active data region `data[head..tail]`.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let h = self.head as usize;
        let t = self.tail as usize;
        &mut self.data_mut()[h..t]
    }

    /// Prepend `len` bytes of header space by extending `head` backward.
    ///
    /// Returns a mutable slice over the newly exposed bytes for the caller
    /// to fill in.
    pub fn push_header(&mut self, len: usize) -> Result<&mut [u8], BufError> {
        let len16 = len as u16;
        if self.head < len16 {
            return Err(BufError::NoSpace);
        }
        self.head -= len16;
        let h = self.head as usize;
        Ok(&mut self.data_mut()[h..h + len])
    }

    /// Consume `len` bytes from the front of the active region.
    pub fn pull_header(&mut self, len: usize) -> Result<&[u8], BufError> {
        if len > self.len() {
            return Err(BufError::OutOfBounds);
        }
        let old_head = self.head as usize;
        self.head += len as u16;
        Ok(&self.data()[old_head..old_head + len])
    }

    /// Append `src` at the tail end of the active region.
    pub fn append(&mut self, src: &[u8]) -> Result<(), BufError> {
        let new_tail = self.tail as usize + src.len();
        if new_tail > self.capacity() {
            return Err(BufError::NoSpace);
        }
        let t = self.tail as usize;
        self.data_mut()[t..new_tail].copy_from_slice(src);
        self.tail = new_tail as u16;
        Ok(())
    }

    /// Shrink the active region to `len` bytes by moving `tail` backward.
    ///
    /// Used to trim link-layer padding once the IP total length is known.
    /// Growing is not supported.
    pub fn trim_to(&mut self, len: usize) -> Result<(), BufError> {
        if len > self.len() {
            return Err(BufError::OutOfBounds);
        }
        self.tail = self.head + len as u16;
        Ok(())
    }
}

// -- Layer offsets and interface tag ------------------------------------------

impl Packet {
    /// Record the byte offset of the L2 (Ethernet) header.
    #[inline]
    pub fn set_l2(&mut self, offset: u16) {
        self.l2 = offset;
    }

    /// Record the byte offset of the L3 header.
    #[inline]
    pub fn set_l3(&mut self, offset: u16) {
        self.l3 = offset;
    }

    /// Record the byte offset of the L4 header.
    #[inline]
    pub fn set_l4(&mut self, offset: u16) {
        self.l4 = offset;
    }

    /// Raw L2 offset value.
    #[inline]
    pub fn l2_offset(&self) -> u16 {
        self.l2
    }

    /// Raw L3 offset value.
    #[inline]
    pub fn l3_offset(&self) -> u16 {
        self.l3
    }

    /// Raw L4 offset value.
    #[inline]
    pub fn l4_offset(&self) -> u16 {
        self.l4
    }

    /// L2 header bytes: `data[l2..l3]`, or `&[]` if the L3 offset is unset.
    pub fn l2_header(&self) -> &[u8] {
        let start = self.l2 as usize;
        let end = self.l3 as usize;
        if end <= start {
            return &[];
        }
        &self.data()[start..end.min(self.tail as usize)]
    }

    /// L3 header region: `data[l3..l4]`, or `&[]` if either offset is unset.
    pub fn l3_header(&self) -> &[u8] {
        let start = self.l3 as usize;
        let end = self.l4 as usize;
        if end <= start {
            return &[];
        }
        &self.data()[start..end.min(self.tail as usize)]
    }

    /// Mutable L3 header region.
    pub fn l3_header_mut(&mut self) -> &mut [u8] {
        let start = self.l3 as usize;
        let end = (self.l4 as usize).min(self.tail as usize);
        if end <= start {
            return &mut [];
        }
        &mut self.data_mut()[start..end]
    }

    /// L4 region (header + payload): `data[l4..tail]`.
    pub fn l4_region(&self) -> &[u8] {
        let start = self.l4 as usize;
        let end = self.tail as usize;
        if start == 0 || end <= start {
            return &[];
        }
        &self.data()[start..end]
    }

    /// Mutable L4 region.
    pub fn l4_region_mut(&mut self) -> &mut [u8] {
        let start = self.l4 as usize;
        let end = self.tail as usize;
        if start == 0 || end <= start {
            return &mut [];
        }
        &mut self.data_mut()[start..end]
    }

    /// Raw `head` value (useful when recording layer offsets).
    #[inline]
    pub fn head(&self) -> u16 {
        self.head
    }

    /// Raw `tail` value.
    #[inline]
    pub fn tail(&self) -> u16 {
        self.tail
    }

    /// Interface this packet is tagged with.
    #[inline]
    pub fn nif(&self) -> NifId {
        self.nif
    }

    /// Re-tag the packet with an egress interface.
    #[inline]
    pub fn set_nif(&mut self, nif: NifId) {
        self.nif = nif;
    }
}

// -- Parking (chain membership) -----------------------------------------------

impl Packet {
    /// Spill metadata into the slot's parked record and consume the handle.
    ///
    /// Returns the slot index, now owned by the chain.
    fn park(self, link: u16) -> u16 {
        let mut this = ManuallyDrop::new(self);
        let slot = this.slot;
        let meta = ParkedMeta {
            head: this.head,
            tail: this.tail,
            l2: this.l2,
            l3: this.l3,
            l4: this.l4,
            nif: this.nif.0,
            link,
        };
        // SAFETY: We own the slot; the parked record is dead storage while a
        // live handle exists.  The handle's Drop is suppressed (ManuallyDrop)
        // so the slot is not released; only the Arc field is dropped here.
        unsafe {
            *this.pool.parked_meta(slot) = meta;
            core::ptr::drop_in_place(&mut this.pool);
        }
        slot
    }

    /// Rebuild a handle from a parked slot.  Returns the packet and the next
    /// slot in the chain.
    fn unpark(pool: &Arc<PacketPool>, slot: u16) -> (Self, u16) {
        // SAFETY: The chain owns the parked slot exclusively.
        let meta = unsafe { *pool.parked_meta(slot) };
        let pkt = Self {
            pool: Arc::clone(pool),
            slot,
            head: meta.head,
            tail: meta.tail,
            l2: meta.l2,
            l3: meta.l3,
            l4: meta.l4,
            nif: NifId(meta.nif),
        };
        (pkt, meta.link)
    }
}

// =============================================================================
// PacketChain
// =============================================================================

/// A singly linked list of parked packets awaiting address resolution.
///
/// Links live in the pool's per-slot parked records, so chain membership
/// needs no allocation and a packet can belong to at most one chain.
/// Dropping a chain frees every member.
pub struct PacketChain {
    pool: Arc<PacketPool>,
    head: u16,
}

impl PacketChain {
    /// Create an empty chain over `pool`.
    pub fn new(pool: Arc<PacketPool>) -> Self {
        Self {
            pool,
            head: FREELIST_EMPTY,
        }
    }

    /// `true` if the chain holds no packets.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == FREELIST_EMPTY
    }

    /// Number of parked packets (walks the chain).
    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut slot = self.head;
        while slot != FREELIST_EMPTY {
            n += 1;
            // SAFETY: The chain owns its parked slots exclusively.
            slot = unsafe { (*self.pool.parked_meta(slot)).link };
        }
        n
    }

    /// Park `pkt` at the front of the chain.
    ///
    /// The packet must come from the same pool as the chain.
    pub fn push_front(&mut self, pkt: Packet) {
        debug_assert!(Arc::ptr_eq(&self.pool, &pkt.pool));
        self.head = pkt.park(self.head);
    }

    /// Unpark and return the front packet.
    pub fn pop_front(&mut self) -> Option<Packet> {
        if self.head == FREELIST_EMPTY {
            return None;
        }
        let (pkt, next) = Packet::unpark(&self.pool, self.head);
        self.head = next;
        Some(pkt)
    }

    /// Detach the whole chain, leaving `self` empty.
    pub fn take(&mut self) -> PacketChain {
        let head = self.head;
        self.head = FREELIST_EMPTY;
        Self {
            pool: Arc::clone(&self.pool),
            head,
        }
    }
}

impl Iterator for PacketChain {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        self.pop_front()
    }
}

impl Drop for PacketChain {
    fn drop(&mut self) {
        while let Some(pkt) = self.pop_front() {
            drop(pkt);
        }
    }
}

impl fmt::Debug for PacketChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketChain {{ len={} }}", self.len())
    }
}
