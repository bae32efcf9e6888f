//! IPv4 address-resolution cache.
//!
//! Sharded concurrent hash table mapping `(interface, IPv4 address)` to a
//! link-layer address.  Unresolved entries hold a chain of packets awaiting
//! resolution; resolving hands the whole chain back to the caller exactly
//! once.
//!
//! # Sharding
//!
//! One FNV-1a hash of the key drives both index spaces: the low 4 bits pick
//! one of [`SHARDS`] spinlocks, the next 8 bits pick a bucket inside the
//! shard.  Lock contention is therefore decoupled from bucket collision.
//!
//! # Expiry
//!
//! No sweep thread.  Any bucket traversal evicts entries older than the
//! hard timeout as a side effect; evicted pending chains are freed after
//! the shard lock is released.  An idle entry in an untouched bucket can
//! outlive its timeout, a known and accepted imprecision.

use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::trace;
use packnet_pktio::{NifId, Packet, PacketChain, PacketPool, Timestamp};
use spin::Mutex;

use crate::hash::Fnv1a;
use crate::types::{Ipv4Addr, MacAddr};

/// Number of shard locks (low 4 hash bits).
pub const SHARDS: usize = 16;
/// Buckets per shard (next 8 hash bits).
pub const BUCKETS_PER_SHARD: usize = 256;

/// Resolution state: a pending chain exists exactly while no link-layer
/// address is known.
enum MacState {
    Pending(PacketChain),
    Resolved(MacAddr),
}

struct ArpEntry {
    nif: NifId,
    addr: Ipv4Addr,
    /// Last update time; drives both hard expiry and soft refresh.
    tstamp: Timestamp,
    state: MacState,
}

struct Shard {
    buckets: Vec<Vec<ArpEntry>>,
}

/// Outcome of [`ArpCache::lookup_or_create`].
pub enum ArpLookup {
    /// Capacity bound hit; the packet was freed.
    Dropped,
    /// Packet parked on a pending entry; the caller should emit an ARP
    /// request for the address (at least for a fresh entry).
    Queued,
    /// Address known; the packet comes back to the caller untouched.
    /// `refresh` asks the caller to emit a refresh request (soft timeout).
    Resolved {
        mac: MacAddr,
        refresh: bool,
        pkt: Packet,
    },
}

pub struct ArpCache {
    pool: Arc<PacketPool>,
    shards: Vec<Mutex<Shard>>,
    hard_timeout_ms: u64,
    soft_timeout_ms: Option<u64>,
    max_entries: usize,
    count: AtomicUsize,
}

impl ArpCache {
    pub fn new(
        pool: Arc<PacketPool>,
        hard_timeout_ms: u64,
        soft_timeout_ms: Option<u64>,
        max_entries: usize,
    ) -> Self {
        let shards = (0..SHARDS)
            .map(|_| {
                Mutex::new(Shard {
                    buckets: (0..BUCKETS_PER_SHARD).map(|_| Vec::new()).collect(),
                })
            })
            .collect();
        Self {
            pool,
            shards,
            hard_timeout_ms,
            soft_timeout_ms,
            max_entries,
            count: AtomicUsize::new(0),
        }
    }

    fn key_hash(nif: NifId, addr: Ipv4Addr) -> u32 {
        let mut h = Fnv1a::new();
        h.write(&nif.0.to_le_bytes());
        h.write(&addr.octets());
        h.finish()
    }

    /// Look up `addr`; on a miss, create a pending entry and park `pkt` on
    /// it.  See [`ArpLookup`] for the contract on packet ownership.
    pub fn lookup_or_create(
        &self,
        nif: NifId,
        addr: Ipv4Addr,
        pkt: Packet,
        now: Timestamp,
    ) -> ArpLookup {
        let hash = Self::key_hash(nif, addr);
        let mut evicted = Vec::new();
        let result;
        {
            let mut shard = self.shards[(hash as usize) & (SHARDS - 1)].lock();
            let bucket = &mut shard.buckets[(hash as usize >> 4) & (BUCKETS_PER_SHARD - 1)];
            self.expire_bucket(bucket, now, &mut evicted);

            if let Some(entry) = bucket.iter_mut().find(|e| e.nif == nif && e.addr == addr) {
                result = match &mut entry.state {
                    MacState::Resolved(mac) => {
                        let refresh = self
                            .soft_timeout_ms
                            .map(|soft| now.millis_since(entry.tstamp) >= soft)
                            .unwrap_or(false);
                        ArpLookup::Resolved {
                            mac: *mac,
                            refresh,
                            pkt,
                        }
                    }
                    MacState::Pending(chain) => {
                        chain.push_front(pkt);
                        ArpLookup::Queued
                    }
                };
            } else if self.count.load(Ordering::Relaxed) >= self.max_entries {
                drop(pkt);
                result = ArpLookup::Dropped;
            } else {
                let mut chain = PacketChain::new(Arc::clone(&self.pool));
                chain.push_front(pkt);
                bucket.push(ArpEntry {
                    nif,
                    addr,
                    tstamp: now,
                    state: MacState::Pending(chain),
                });
                self.count.fetch_add(1, Ordering::Relaxed);
                trace!("arp: pending entry for {} on nif {}", addr, nif);
                result = ArpLookup::Queued;
            }
        }
        drop(evicted);
        result
    }

    /// Record a resolved address (from an ARP reply or overheard request).
    ///
    /// Returns the pending chain that was waiting on the entry; the caller
    /// must transmit its packets in order and owns any that fail.  A second
    /// call returns an empty chain.
    pub fn put(&self, nif: NifId, addr: Ipv4Addr, mac: MacAddr, now: Timestamp) -> PacketChain {
        let hash = Self::key_hash(nif, addr);
        let mut evicted = Vec::new();
        let released;
        {
            let mut shard = self.shards[(hash as usize) & (SHARDS - 1)].lock();
            let bucket = &mut shard.buckets[(hash as usize >> 4) & (BUCKETS_PER_SHARD - 1)];
            self.expire_bucket(bucket, now, &mut evicted);

            if let Some(entry) = bucket.iter_mut().find(|e| e.nif == nif && e.addr == addr) {
                entry.tstamp = now;
                released = match &mut entry.state {
                    MacState::Pending(chain) => {
                        let chain = chain.take();
                        entry.state = MacState::Resolved(mac);
                        trace!("arp: {} resolved to {}, releasing {} queued", addr, mac, chain.len());
                        chain
                    }
                    MacState::Resolved(old) => {
                        *old = mac;
                        PacketChain::new(Arc::clone(&self.pool))
                    }
                };
            } else if self.count.load(Ordering::Relaxed) < self.max_entries {
                bucket.push(ArpEntry {
                    nif,
                    addr,
                    tstamp: now,
                    state: MacState::Resolved(mac),
                });
                self.count.fetch_add(1, Ordering::Relaxed);
                released = PacketChain::new(Arc::clone(&self.pool));
            } else {
                released = PacketChain::new(Arc::clone(&self.pool));
            }
        }
        drop(evicted);
        released
    }

    /// Merge-only variant of [`Self::put`]: refresh an existing entry but
    /// never create one (RFC 826 merge rule for frames not targeting us).
    pub fn update(&self, nif: NifId, addr: Ipv4Addr, mac: MacAddr, now: Timestamp) -> PacketChain {
        let hash = Self::key_hash(nif, addr);
        let mut evicted = Vec::new();
        let mut released = PacketChain::new(Arc::clone(&self.pool));
        {
            let mut shard = self.shards[(hash as usize) & (SHARDS - 1)].lock();
            let bucket = &mut shard.buckets[(hash as usize >> 4) & (BUCKETS_PER_SHARD - 1)];
            self.expire_bucket(bucket, now, &mut evicted);

            if let Some(entry) = bucket.iter_mut().find(|e| e.nif == nif && e.addr == addr) {
                entry.tstamp = now;
                match &mut entry.state {
                    MacState::Pending(chain) => {
                        released = chain.take();
                        entry.state = MacState::Resolved(mac);
                    }
                    MacState::Resolved(old) => *old = mac,
                }
            }
        }
        drop(evicted);
        released
    }

    /// Unlink entries past the hard timeout.  Chains are only collected
    /// here; the caller drops them once the shard lock is gone.
    fn expire_bucket(
        &self,
        bucket: &mut Vec<ArpEntry>,
        now: Timestamp,
        evicted: &mut Vec<PacketChain>,
    ) {
        let hard = self.hard_timeout_ms;
        bucket.retain_mut(|entry| {
            if now.millis_since(entry.tstamp) < hard {
                return true;
            }
            if let MacState::Pending(chain) = &mut entry.state {
                evicted.push(chain.take());
            }
            self.count.fetch_sub(1, Ordering::Relaxed);
            false
        });
    }

    /// Number of live entries (racy, diagnostics and tests only).
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::vec::Vec as StdVec;

    const HARD: u64 = 128_000;
    const SOFT: u64 = 125_000;

    fn cache(pool: &Arc<PacketPool>) -> ArpCache {
        ArpCache::new(Arc::clone(pool), HARD, Some(SOFT), 64)
    }

    fn pkt(pool: &Arc<PacketPool>) -> Packet {
        Packet::from_frame(pool, NifId(0), &[0u8; 60]).unwrap()
    }

    const ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);
    const MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 0x42]);

    #[test]
    fn queue_then_resolve_hands_chain_once() {
        let pool = PacketPool::new(8, 256);
        let cache = cache(&pool);
        let now = Timestamp(1_000);

        assert!(matches!(
            cache.lookup_or_create(NifId(0), ADDR, pkt(&pool), now),
            ArpLookup::Queued
        ));
        assert!(matches!(
            cache.lookup_or_create(NifId(0), ADDR, pkt(&pool), now),
            ArpLookup::Queued
        ));

        let chain = cache.put(NifId(0), ADDR, MAC, now);
        assert_eq!(chain.len(), 2, "entire chain handed off");
        let again = cache.put(NifId(0), ADDR, MAC, now);
        assert!(again.is_empty(), "second resolution sees no chain");
        drop(chain);

        // Entry is now resolved: lookups return the address and the packet.
        match cache.lookup_or_create(NifId(0), ADDR, pkt(&pool), now) {
            ArpLookup::Resolved { mac, refresh, pkt } => {
                assert_eq!(mac, MAC);
                assert!(!refresh);
                drop(pkt);
            }
            _ => panic!("expected resolved entry"),
        }
    }

    #[test]
    fn soft_timeout_requests_refresh() {
        let pool = PacketPool::new(4, 256);
        let cache = cache(&pool);
        drop(cache.put(NifId(0), ADDR, MAC, Timestamp(0)));

        match cache.lookup_or_create(NifId(0), ADDR, pkt(&pool), Timestamp(SOFT)) {
            ArpLookup::Resolved { refresh, .. } => assert!(refresh),
            _ => panic!("expected resolved entry"),
        }
    }

    #[test]
    fn hard_timeout_evicts_and_frees_chain() {
        let pool = PacketPool::new(4, 256);
        let cache = cache(&pool);
        let free_before = pool.available();

        assert!(matches!(
            cache.lookup_or_create(NifId(0), ADDR, pkt(&pool), Timestamp(0)),
            ArpLookup::Queued
        ));
        assert_eq!(pool.available(), free_before - 1);
        assert_eq!(cache.len(), 1);

        // Next traversal of the bucket evicts the expired entry; its queued
        // packet returns to the pool, and the new lookup re-creates fresh.
        assert!(matches!(
            cache.lookup_or_create(NifId(0), ADDR, pkt(&pool), Timestamp(HARD)),
            ArpLookup::Queued
        ));
        assert_eq!(cache.len(), 1);
        assert_eq!(pool.available(), free_before - 1, "old chain freed");
    }

    #[test]
    fn capacity_bound_drops() {
        let pool = PacketPool::new(8, 256);
        let cache = ArpCache::new(Arc::clone(&pool), HARD, None, 2);
        let now = Timestamp(0);
        for i in 0..2 {
            let a = Ipv4Addr::new(10, 0, 0, i);
            assert!(matches!(
                cache.lookup_or_create(NifId(0), a, pkt(&pool), now),
                ArpLookup::Queued
            ));
        }
        let free = pool.available();
        assert!(matches!(
            cache.lookup_or_create(NifId(0), Ipv4Addr::new(10, 0, 0, 9), pkt(&pool), now),
            ArpLookup::Dropped
        ));
        assert_eq!(pool.available(), free, "dropped packet returned to pool");
    }

    #[test]
    fn concurrent_put_converges_to_one_entry_per_key() {
        let pool = PacketPool::new(64, 256);
        let cache = Arc::new(ArpCache::new(Arc::clone(&pool), HARD, None, 1024));
        let threads = 8;
        let keys = 16;

        let handles: StdVec<_> = (0..threads)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for round in 0..50u64 {
                        for k in 0..keys {
                            let addr = Ipv4Addr::new(10, 0, 1, k as u8);
                            let mac = MacAddr([2, 0, 0, 0, t as u8, k as u8]);
                            drop(cache.put(NifId(3), addr, mac, Timestamp(round)));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), keys as usize, "one entry per distinct key");
    }
}
