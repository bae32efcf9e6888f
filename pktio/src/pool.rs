//! Pre-allocated packet buffer pool with lock-free allocation.
//!
//! Provides O(1) alloc/release from any worker thread via a Treiber stack
//! with ABA-safe tagged pointers.  Slot count and buffer size are chosen by
//! the host at pool construction; the backing storage is one contiguous
//! heap allocation so slots stay cache-friendly.
//!
//! Besides raw bytes, every slot carries a small parked-metadata record.
//! While a packet is owned by a [`Packet`](super::packet::Packet) handle the
//! record is dead storage; when the packet is parked in a pending-resolution
//! [`PacketChain`](super::packet::PacketChain) the handle's fields are
//! spilled there, including the chain link — so queuing a packet behind an
//! unresolved neighbor costs no extra allocation.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU16, AtomicU32, AtomicUsize, Ordering};

use alloc::boxed::Box;
use alloc::sync::Arc;

/// Sentinel value: end of freelist / pool exhausted / empty chain.
pub(crate) const FREELIST_EMPTY: u16 = u16::MAX;

/// Per-slot metadata spilled while a packet is parked in a chain.
///
/// Only ever read or written by the single owner of the slot (the `Packet`
/// handle, or the `PacketChain` that parked it).
#[derive(Clone, Copy, Default)]
pub(crate) struct ParkedMeta {
    pub head: u16,
    pub tail: u16,
    pub l2: u16,
    pub l3: u16,
    pub l4: u16,
    pub nif: u16,
    /// Next slot in the chain, or [`FREELIST_EMPTY`].
    pub link: u16,
}

/// Lock-free packet buffer pool.
///
/// Uses a Treiber stack (atomic CAS on a tagged head pointer) for O(1)
/// allocation and deallocation from any thread.
///
/// The head is a packed `u32`: bits `[15:0]` = slot index (or
/// [`FREELIST_EMPTY`]), bits `[31:16]` = version counter (ABA prevention).
pub struct PacketPool {
    /// Bytes per slot.
    buf_size: usize,
    /// Contiguous backing storage, `num_slots * buf_size` bytes.
    storage: Box<[UnsafeCell<u8>]>,
    /// Per-slot parked metadata.
    parked: Box<[UnsafeCell<ParkedMeta>]>,
    /// Per-slot next-free pointer, forming the intrusive freelist.
    next: Box<[AtomicU16]>,
    /// Tagged head pointer: `(version << 16) | index`.
    head: AtomicU32,
    /// Number of currently available (free) slots.
    count: AtomicUsize,
}

// SAFETY: The UnsafeCell regions (storage, parked) are accessed exclusively
// through the slot's single owner — a move-only Packet handle or the chain
// that parked it.  Freelist state is all atomics.
unsafe impl Send for PacketPool {}
unsafe impl Sync for PacketPool {}

impl PacketPool {
    /// Create a pool with `num_slots` buffers of `buf_size` bytes each.
    ///
    /// The freelist is fully built before the `Arc` is handed out, so no
    /// separate init step exists.
    ///
    /// # Panics
    ///
    /// Panics if `num_slots` is zero or does not fit the 16-bit slot index
    /// space, or if `buf_size` is zero.
    pub fn new(num_slots: usize, buf_size: usize) -> Arc<Self> {
        assert!(num_slots > 0 && num_slots < FREELIST_EMPTY as usize);
        assert!(buf_size > 0);

        let storage = (0..num_slots * buf_size)
            .map(|_| UnsafeCell::new(0u8))
            .collect::<Box<[_]>>();
        let parked = (0..num_slots)
            .map(|_| UnsafeCell::new(ParkedMeta::default()))
            .collect::<Box<[_]>>();

        // Freelist: each slot points to the next; the last points to EMPTY.
        let next = (0..num_slots)
            .map(|i| {
                let n = if i + 1 < num_slots {
                    (i + 1) as u16
                } else {
                    FREELIST_EMPTY
                };
                AtomicU16::new(n)
            })
            .collect::<Box<[_]>>();

        Arc::new(Self {
            buf_size,
            storage,
            parked,
            next,
            head: AtomicU32::new(0),
            count: AtomicUsize::new(num_slots),
        })
    }

    /// Bytes per slot.
    #[inline]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// Total number of slots.
    #[inline]
    pub fn num_slots(&self) -> usize {
        self.next.len()
    }

    /// Allocate a buffer slot.
    ///
    /// Returns `Some(slot_index)` on success, `None` if the pool is
    /// exhausted.  O(1) amortized, lock-free CAS loop.
    pub(crate) fn alloc(&self) -> Option<u16> {
        loop {
            let old = self.head.load(Ordering::Acquire);
            let idx = (old & 0xFFFF) as u16;
            if idx == FREELIST_EMPTY {
                return None;
            }
            let ver = old >> 16;
            let next_idx = self.next[idx as usize].load(Ordering::Relaxed);
            let new = (ver.wrapping_add(1) << 16) | (next_idx as u32);
            if self
                .head
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.count.fetch_sub(1, Ordering::Relaxed);
                return Some(idx);
            }
            core::hint::spin_loop();
        }
    }

    /// Return a buffer slot to the pool.
    ///
    /// The slot must have been previously allocated from this pool, and the
    /// caller must not touch its data afterwards.  O(1), lock-free.
    pub(crate) fn release(&self, slot: u16) {
        debug_assert!(
            (slot as usize) < self.num_slots(),
            "release: slot index {} out of bounds",
            slot
        );
        loop {
            let old = self.head.load(Ordering::Acquire);
            let old_idx = (old & 0xFFFF) as u16;
            let ver = old >> 16;
            self.next[slot as usize].store(old_idx, Ordering::Relaxed);
            let new = (ver.wrapping_add(1) << 16) | (slot as u32);
            if self
                .head
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.count.fetch_add(1, Ordering::Relaxed);
                return;
            }
            core::hint::spin_loop();
        }
    }

    /// Number of free buffer slots (diagnostic, racy under concurrency).
    #[inline]
    pub fn available(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Raw pointer to the first byte of slot `slot`.
    ///
    /// Valid for `buf_size` bytes.  The caller must own the slot and ensure
    /// no aliasing mutable references exist before dereferencing.
    #[inline]
    pub(crate) fn slot_data(&self, slot: u16) -> *mut u8 {
        debug_assert!((slot as usize) < self.num_slots());
        self.storage[slot as usize * self.buf_size].get()
    }

    /// Raw pointer to the parked-metadata record of slot `slot`.
    ///
    /// Same ownership rules as [`slot_data`](Self::slot_data).
    #[inline]
    pub(crate) fn parked_meta(&self, slot: u16) -> *mut ParkedMeta {
        debug_assert!((slot as usize) < self.num_slots());
        self.parked[slot as usize].get()
    }
}
