//! Concurrent socket lookup table with wildcard fallback.
//!
//! Maps a 5-tuple-like key to a reference-counted control-block handle.
//! Lookup runs a 3-tier fallback: exact key, then wildcard source
//! (listening socket on a specific local port), then wildcard source and
//! destination (a global default listener on the port).  Each tier is an
//! independent hash computation and shard-locked bucket scan.
//!
//! Entries embed a [`SocketBase`] and live behind `Arc`; the table holds
//! one reference while an entry is inserted, and lookups clone another for
//! the caller.  An entry's finalizer is its `Drop` impl, run when the last
//! reference goes away.

use core::sync::atomic::{AtomicBool, Ordering};

use alloc::sync::Arc;
use alloc::vec::Vec;

use packnet_pktio::NifId;
use spin::Mutex;

use crate::hash::Fnv1a;
use crate::types::NetAddr;

/// Number of shard locks (low 6 hash bits).
pub const SHARDS: usize = 64;
/// Buckets per shard (next 8 hash bits).
pub const BUCKETS_PER_SHARD: usize = 256;

/// Connection/listener key.  `src` names the remote peer as seen on
/// inbound packets; `dst` the local side.  Equality is exact; wildcarding
/// happens by zeroing fields and re-looking-up, never by fuzzy matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketKey {
    pub nif: NifId,
    pub src_addr: NetAddr,
    pub dst_addr: NetAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// 4 or 6; zeroed in the final wildcard tier.
    pub ip_version: u8,
    pub protocol: u8,
}

impl SocketKey {
    pub fn hash(&self) -> u32 {
        let mut h = Fnv1a::new();
        h.write(&self.nif.0.to_le_bytes());
        h.write(&self.src_addr.0);
        h.write(&self.dst_addr.0);
        h.write(&self.src_port.to_le_bytes());
        h.write(&self.dst_port.to_le_bytes());
        h.write(&[self.ip_version, self.protocol]);
        h.finish()
    }

    /// Tier-2 form: any remote address/port, specific local binding.
    pub fn wildcard_src(&self) -> Self {
        Self {
            src_addr: NetAddr::ZERO,
            src_port: 0,
            ..*self
        }
    }

    /// Tier-3 form: also any local address and any IP version — a default
    /// listener bound only to (port, protocol).
    pub fn wildcard_all(&self) -> Self {
        Self {
            src_addr: NetAddr::ZERO,
            src_port: 0,
            dst_addr: NetAddr::ZERO,
            ip_version: 0,
            ..*self
        }
    }
}

/// Generic socket header embedded in every table entry.
pub struct SocketBase {
    key: SocketKey,
    /// Key hash, cached at construction.
    hash: u32,
    in_table: AtomicBool,
}

impl SocketBase {
    pub fn new(key: SocketKey) -> Self {
        Self {
            hash: key.hash(),
            key,
            in_table: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn key(&self) -> &SocketKey {
        &self.key
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        self.hash
    }
}

/// Implemented by control blocks stored in a [`SocketTable`].
pub trait TableEntry: Send + Sync {
    fn base(&self) -> &SocketBase;
}

struct Shard<T> {
    buckets: Vec<Vec<Arc<T>>>,
}

pub struct SocketTable<T: TableEntry> {
    shards: Vec<Mutex<Shard<T>>>,
}

impl<T: TableEntry> SocketTable<T> {
    pub fn new() -> Self {
        let shards = (0..SHARDS)
            .map(|_| {
                Mutex::new(Shard {
                    buckets: (0..BUCKETS_PER_SHARD).map(|_| Vec::new()).collect(),
                })
            })
            .collect();
        Self { shards }
    }

    fn shard_and_bucket(hash: u32) -> (usize, usize) {
        (
            hash as usize & (SHARDS - 1),
            (hash as usize >> 6) & (BUCKETS_PER_SHARD - 1),
        )
    }

    /// Insert `entry`, taking a table reference.  Idempotent: inserting an
    /// already-inserted entry is a no-op.
    pub fn insert(&self, entry: &Arc<T>) {
        let base = entry.base();
        let (s, b) = Self::shard_and_bucket(base.hash());
        let mut shard = self.shards[s].lock();
        if base.in_table.swap(true, Ordering::AcqRel) {
            return;
        }
        shard.buckets[b].push(Arc::clone(entry));
    }

    /// Remove `entry`, releasing the table's reference.  Idempotent.
    pub fn remove(&self, entry: &Arc<T>) {
        let base = entry.base();
        let (s, b) = Self::shard_and_bucket(base.hash());
        let mut shard = self.shards[s].lock();
        if !base.in_table.swap(false, Ordering::AcqRel) {
            return;
        }
        shard.buckets[b].retain(|e| !Arc::ptr_eq(e, entry));
    }

    fn lookup_exact(&self, key: &SocketKey, hash: u32) -> Option<Arc<T>> {
        let (s, b) = Self::shard_and_bucket(hash);
        let shard = self.shards[s].lock();
        shard.buckets[b]
            .iter()
            .find(|e| e.base().key() == key)
            .cloned()
    }

    /// 3-tier fallback lookup.  The returned clone is the caller's
    /// reference.
    pub fn lookup(&self, key: &SocketKey) -> Option<Arc<T>> {
        if let Some(found) = self.lookup_exact(key, key.hash()) {
            return Some(found);
        }
        let tier2 = key.wildcard_src();
        if let Some(found) = self.lookup_exact(&tier2, tier2.hash()) {
            return Some(found);
        }
        let tier3 = key.wildcard_all();
        self.lookup_exact(&tier3, tier3.hash())
    }
}

impl<T: TableEntry> Default for SocketTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ipv4Addr, ip_proto};
    use std::thread;
    use std::vec::Vec as StdVec;

    struct Dummy {
        base: SocketBase,
        tag: u32,
    }

    impl Dummy {
        fn new(key: SocketKey, tag: u32) -> Arc<Self> {
            Arc::new(Self {
                base: SocketBase::new(key),
                tag,
            })
        }
    }

    impl TableEntry for Dummy {
        fn base(&self) -> &SocketBase {
            &self.base
        }
    }

    fn key(src_last: u8, src_port: u16) -> SocketKey {
        SocketKey {
            nif: NifId(0),
            src_addr: NetAddr::from_v4(Ipv4Addr::new(10, 0, 0, src_last)),
            dst_addr: NetAddr::from_v4(Ipv4Addr::new(192, 168, 1, 1)),
            src_port,
            dst_port: 80,
            ip_version: 4,
            protocol: ip_proto::TCP,
        }
    }

    #[test]
    fn exact_beats_wildcard() {
        let table: SocketTable<Dummy> = SocketTable::new();
        let exact = Dummy::new(key(5, 40000), 1);
        let listener = Dummy::new(key(5, 40000).wildcard_src(), 2);
        table.insert(&exact);
        table.insert(&listener);

        assert_eq!(table.lookup(&key(5, 40000)).unwrap().tag, 1);
        assert_eq!(
            table.lookup(&key(6, 40001)).unwrap().tag,
            2,
            "no exact match falls back to the listener"
        );
    }

    #[test]
    fn wildcard_all_is_the_last_resort() {
        let table: SocketTable<Dummy> = SocketTable::new();
        let global = Dummy::new(key(0, 0).wildcard_all(), 7);
        table.insert(&global);

        assert_eq!(table.lookup(&key(9, 1234)).unwrap().tag, 7);

        let mut other = key(9, 1234);
        other.dst_port = 81;
        assert!(
            table.lookup(&other).is_none(),
            "default listener is still port-bound"
        );
    }

    #[test]
    fn insert_remove_idempotent() {
        let table: SocketTable<Dummy> = SocketTable::new();
        let entry = Dummy::new(key(1, 1000), 1);
        table.insert(&entry);
        table.insert(&entry);
        assert!(table.lookup(&key(1, 1000)).is_some());

        table.remove(&entry);
        assert!(table.lookup(&key(1, 1000)).is_none());
        table.remove(&entry); // second remove is a no-op

        // Reinsertion works after removal.
        table.insert(&entry);
        assert!(table.lookup(&key(1, 1000)).is_some());
    }

    #[test]
    fn refcount_reaches_zero_after_removal() {
        let table: SocketTable<Dummy> = SocketTable::new();
        let entry = Dummy::new(key(2, 2000), 1);
        table.insert(&entry);
        assert_eq!(Arc::strong_count(&entry), 2, "table holds one reference");

        let looked = table.lookup(&key(2, 2000)).unwrap();
        assert_eq!(Arc::strong_count(&entry), 3);
        drop(looked);

        table.remove(&entry);
        assert_eq!(Arc::strong_count(&entry), 1, "only the caller's is left");
    }

    #[test]
    fn concurrent_insert_remove_keeps_table_consistent() {
        let table: Arc<SocketTable<Dummy>> = Arc::new(SocketTable::new());
        let handles: StdVec<_> = (0..8u16)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let entry = Dummy::new(key(10, 50000 + t), u32::from(t));
                    for _ in 0..200 {
                        table.insert(&entry);
                        assert!(table.lookup(entry.base().key()).is_some());
                        table.remove(&entry);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for t in 0..8u16 {
            assert!(table.lookup(&key(10, 50000 + t)).is_none());
        }
    }
}
