//! IPv6 Neighbor Discovery cache and Default Router List (RFC 4861).
//!
//! Same sharded-table shape as the ARP cache, with two additions:
//!
//! * Resolved entries carry a reachability state (REACHABLE / STALE /
//!   DELAY / PROBE); INCOMPLETE is the pending-chain variant.  Transitions
//!   are evaluated lazily during lookups, never by a timer.
//! * Entries can simultaneously belong to the hash table and to the
//!   Default Router List.  The two memberships are independent flags torn
//!   down independently: clearing IsRouter leaves the cache entry alone.
//!
//! # Locking
//!
//! Entries are shared (`Arc`) between the table and the router list, so
//! payload mutation cannot hide behind the shard lock.  Instead a fixed
//! pool of instance locks, indexed by the entry's key hash, guards the
//! payload; callers find-and-clone under the shard lock, release it, then
//! mutate under the instance lock.  The two locks are never nested.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::trace;
use packnet_pktio::{NifId, Packet, PacketChain, PacketPool, Timestamp};
use spin::Mutex;

use crate::hash::Fnv1a;
use crate::types::{Ipv6Addr, MacAddr};

pub const SHARDS: usize = 16;
pub const BUCKETS_PER_SHARD: usize = 256;
/// Instance-lock pool size; indexed by key hash.
const INSTANCE_LOCKS: usize = 64;

/// RFC 4861 reachability states of a resolved neighbor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReachState {
    Reachable,
    Stale,
    Delay,
    Probe,
}

/// Link-layer resolution state.  INCOMPLETE is the `Incomplete` variant;
/// the pending chain exists exactly while no address is known.
pub enum NdLink {
    Incomplete(PacketChain),
    Resolved {
        mac: MacAddr,
        reach: ReachState,
        /// When the current reachability state was entered.
        since: Timestamp,
    },
}

/// Lock-guarded mutable part of an entry.
pub struct NdPayload {
    pub link: NdLink,
    pub is_router: bool,
}

/// One neighbor entry, shared between the hash table and (optionally) the
/// Default Router List.
pub struct Nd6Entry {
    nif: NifId,
    addr: Ipv6Addr,
    hash: u32,
    /// Last update time (hard expiry / soft refresh), milliseconds.
    tstamp: AtomicU64,
    in_hashtab: AtomicBool,
    in_router: AtomicBool,
    payload: UnsafeCell<NdPayload>,
}

// SAFETY: `payload` is only ever reached through Nd6Cache::with_payload,
// which holds the instance lock for this entry's hash.  Everything else in
// the struct is immutable or atomic.
unsafe impl Send for Nd6Entry {}
unsafe impl Sync for Nd6Entry {}

impl Nd6Entry {
    pub fn addr(&self) -> Ipv6Addr {
        self.addr
    }

    pub fn nif(&self) -> NifId {
        self.nif
    }
}

struct Shard {
    buckets: Vec<Vec<Arc<Nd6Entry>>>,
}

/// Outcome of [`Nd6Cache::lookup`].
pub enum NdLookup {
    /// Capacity bound hit; the packet was freed.
    Dropped,
    /// Packet parked; the caller should emit a Neighbor Solicitation (at
    /// least for a fresh entry).
    Queued,
    /// Address known.  `probe` asks the caller to emit a solicitation
    /// (DELAY elapsed, or soft-timeout refresh policy).
    Resolved {
        mac: MacAddr,
        probe: bool,
        pkt: Packet,
    },
}

/// Flag set of an inbound Neighbor Advertisement.
#[derive(Clone, Copy, Debug, Default)]
pub struct NadvFlags {
    pub router: bool,
    pub solicited: bool,
    pub override_lla: bool,
}

pub struct Nd6Cache {
    pool: Arc<PacketPool>,
    shards: Vec<Mutex<Shard>>,
    instance_locks: Vec<Mutex<()>>,
    router_list: Mutex<Vec<Arc<Nd6Entry>>>,
    hard_timeout_ms: u64,
    soft_timeout_ms: Option<u64>,
    reachable_ms: u64,
    delay_probe_ms: u64,
    max_entries: usize,
    count: AtomicUsize,
}

impl Nd6Cache {
    pub fn new(
        pool: Arc<PacketPool>,
        hard_timeout_ms: u64,
        soft_timeout_ms: Option<u64>,
        reachable_ms: u64,
        delay_probe_ms: u64,
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
            instance_locks: (0..INSTANCE_LOCKS).map(|_| Mutex::new(())).collect(),
            router_list: Mutex::new(Vec::new()),
            hard_timeout_ms,
            soft_timeout_ms,
            reachable_ms,
            delay_probe_ms,
            max_entries,
            count: AtomicUsize::new(0),
        }
    }

    fn key_hash(nif: NifId, addr: &Ipv6Addr) -> u32 {
        let mut h = Fnv1a::new();
        h.write(&nif.0.to_le_bytes());
        h.write(&addr.0);
        h.finish()
    }

    /// Run `f` on the entry's payload under its instance lock.
    fn with_payload<R>(&self, entry: &Nd6Entry, f: impl FnOnce(&mut NdPayload) -> R) -> R {
        let _guard = self.instance_locks[(entry.hash as usize) % INSTANCE_LOCKS].lock();
        // SAFETY: The instance lock for this hash is held; it is the sole
        // gate to the payload (see Nd6Entry Send/Sync note).
        f(unsafe { &mut *entry.payload.get() })
    }

    // =========================================================================
    // Table internals
    // =========================================================================

    /// Find a live entry, evicting expired ones along the way.  Collected
    /// eviction work is finished by [`Self::finish_evictions`] after the
    /// shard lock is gone.
    fn find(
        &self,
        nif: NifId,
        addr: &Ipv6Addr,
        now: Timestamp,
        evicted: &mut Vec<Arc<Nd6Entry>>,
    ) -> Option<Arc<Nd6Entry>> {
        let hash = Self::key_hash(nif, addr);
        let mut shard = self.shards[(hash as usize) & (SHARDS - 1)].lock();
        let bucket = &mut shard.buckets[(hash as usize >> 4) & (BUCKETS_PER_SHARD - 1)];
        self.expire_bucket(bucket, now, evicted);
        bucket
            .iter()
            .find(|e| e.nif == nif && e.addr == *addr)
            .cloned()
    }

    /// Find or insert under the shard lock.  The inserted entry starts with
    /// the payload produced by `init`.
    fn find_or_create(
        &self,
        nif: NifId,
        addr: &Ipv6Addr,
        now: Timestamp,
        evicted: &mut Vec<Arc<Nd6Entry>>,
        init: impl FnOnce() -> NdPayload,
    ) -> Option<Arc<Nd6Entry>> {
        let hash = Self::key_hash(nif, addr);
        let mut shard = self.shards[(hash as usize) & (SHARDS - 1)].lock();
        let bucket = &mut shard.buckets[(hash as usize >> 4) & (BUCKETS_PER_SHARD - 1)];
        self.expire_bucket(bucket, now, evicted);

        if let Some(entry) = bucket.iter().find(|e| e.nif == nif && e.addr == *addr) {
            return Some(Arc::clone(entry));
        }
        if self.count.load(Ordering::Relaxed) >= self.max_entries {
            return None;
        }
        let entry = Arc::new(Nd6Entry {
            nif,
            addr: *addr,
            hash,
            tstamp: AtomicU64::new(now.0),
            in_hashtab: AtomicBool::new(true),
            in_router: AtomicBool::new(false),
            payload: UnsafeCell::new(init()),
        });
        bucket.push(Arc::clone(&entry));
        self.count.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    fn expire_bucket(
        &self,
        bucket: &mut Vec<Arc<Nd6Entry>>,
        now: Timestamp,
        evicted: &mut Vec<Arc<Nd6Entry>>,
    ) {
        let hard = self.hard_timeout_ms;
        bucket.retain(|entry| {
            if now.millis_since(Timestamp(entry.tstamp.load(Ordering::Relaxed))) < hard {
                return true;
            }
            entry.in_hashtab.store(false, Ordering::Relaxed);
            evicted.push(Arc::clone(entry));
            self.count.fetch_sub(1, Ordering::Relaxed);
            false
        });
    }

    /// Free evicted entries' chains and drop router-list membership.  Must
    /// run without any shard lock held.
    fn finish_evictions(&self, evicted: Vec<Arc<Nd6Entry>>) {
        for entry in evicted {
            let chain = self.with_payload(&entry, |p| match &mut p.link {
                NdLink::Incomplete(chain) => Some(chain.take()),
                NdLink::Resolved { .. } => None,
            });
            drop(chain);
            self.rl_leave(&entry);
            trace!("nd6: evicted {} on nif {}", entry.addr, entry.nif);
        }
    }

    // =========================================================================
    // Default Router List
    // =========================================================================

    /// Idempotent router-list insertion, guarded by the list lock and the
    /// entry's `in_router` flag.
    fn rl_enter(&self, entry: &Arc<Nd6Entry>) {
        let mut list = self.router_list.lock();
        if entry.in_router.load(Ordering::Relaxed) {
            return;
        }
        entry.in_router.store(true, Ordering::Relaxed);
        list.push(Arc::clone(entry));
    }

    /// Idempotent router-list removal.
    fn rl_leave(&self, entry: &Arc<Nd6Entry>) {
        let mut list = self.router_list.lock();
        if !entry.in_router.load(Ordering::Relaxed) {
            return;
        }
        entry.in_router.store(false, Ordering::Relaxed);
        list.retain(|e| !Arc::ptr_eq(e, entry));
    }

    /// First default router configured for `nif`, if any.
    pub fn first_router(&self, nif: NifId) -> Option<Ipv6Addr> {
        let list = self.router_list.lock();
        list.iter().find(|e| e.nif == nif).map(|e| e.addr)
    }

    /// Number of Default Router List members (tests/diagnostics).
    pub fn router_count(&self) -> usize {
        self.router_list.lock().len()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Resolve `addr`, parking `pkt` if unresolved.  Reachability
    /// transitions (RFC 4861 §7.3, reduced) happen here, lazily:
    /// REACHABLE past ReachableTime demotes to STALE; using a STALE entry
    /// moves it to DELAY; DELAY past the first-probe delay moves to PROBE
    /// and asks the caller to solicit.
    pub fn lookup(&self, nif: NifId, addr: &Ipv6Addr, pkt: Packet, now: Timestamp) -> NdLookup {
        let mut evicted = Vec::new();
        let created = self.find_or_create(nif, addr, now, &mut evicted, || NdPayload {
            link: NdLink::Incomplete(PacketChain::new(Arc::clone(&self.pool))),
            is_router: false,
        });
        let entry = match created {
            Some(e) => e,
            None => {
                drop(pkt);
                self.finish_evictions(evicted);
                return NdLookup::Dropped;
            }
        };

        let soft_probe = self
            .soft_timeout_ms
            .map(|soft| {
                now.millis_since(Timestamp(entry.tstamp.load(Ordering::Relaxed))) >= soft
            })
            .unwrap_or(false);

        let result = self.with_payload(&entry, |p| match &mut p.link {
            NdLink::Incomplete(chain) => {
                chain.push_front(pkt);
                NdLookup::Queued
            }
            NdLink::Resolved { mac, reach, since } => {
                let mut probe = soft_probe;
                match *reach {
                    ReachState::Reachable => {
                        if now.millis_since(*since) >= self.reachable_ms {
                            *reach = ReachState::Stale;
                            *since = now;
                        }
                    }
                    ReachState::Stale => {
                        *reach = ReachState::Delay;
                        *since = now;
                    }
                    ReachState::Delay => {
                        if now.millis_since(*since) >= self.delay_probe_ms {
                            *reach = ReachState::Probe;
                            *since = now;
                            probe = true;
                        }
                    }
                    ReachState::Probe => {}
                }
                NdLookup::Resolved {
                    mac: *mac,
                    probe,
                    pkt,
                }
            }
        });
        self.finish_evictions(evicted);
        result
    }

    /// RFC 4861 §7.2.3: a Neighbor Solicitation carrying a source
    /// link-layer address creates or refreshes the sender's entry at STALE.
    /// IsRouter is preserved.  Returns the pending chain if the entry was
    /// INCOMPLETE (now sendable to `mac`).
    pub fn record_solicitation(
        &self,
        nif: NifId,
        addr: &Ipv6Addr,
        mac: MacAddr,
        now: Timestamp,
    ) -> PacketChain {
        let mut evicted = Vec::new();
        let created = self.find_or_create(nif, addr, now, &mut evicted, || NdPayload {
            link: NdLink::Resolved {
                mac,
                reach: ReachState::Stale,
                since: now,
            },
            is_router: false,
        });
        let chain = match created {
            Some(entry) => {
                entry.tstamp.store(now.0, Ordering::Relaxed);
                self.with_payload(&entry, |p| match &mut p.link {
                    NdLink::Incomplete(pending) => {
                        let pending = pending.take();
                        p.link = NdLink::Resolved {
                            mac,
                            reach: ReachState::Stale,
                            since: now,
                        };
                        pending
                    }
                    NdLink::Resolved {
                        mac: old, reach, since,
                    } => {
                        if *old != mac {
                            *old = mac;
                            *reach = ReachState::Stale;
                            *since = now;
                        }
                        PacketChain::new(Arc::clone(&self.pool))
                    }
                })
            }
            None => PacketChain::new(Arc::clone(&self.pool)),
        };
        self.finish_evictions(evicted);
        chain
    }

    /// RFC 4861 §7.2.5: Neighbor Advertisement processing.  Never creates
    /// an entry.  Returns the pending chain when an INCOMPLETE entry
    /// resolves.
    ///
    /// Override semantics: with Override clear, a differing address only
    /// demotes a REACHABLE entry to STALE (address kept) and is ignored in
    /// every other state; with Override set the address is adopted and the
    /// state follows the Solicited flag.
    pub fn record_advertisement(
        &self,
        nif: NifId,
        target: &Ipv6Addr,
        mac: MacAddr,
        flags: NadvFlags,
        now: Timestamp,
    ) -> PacketChain {
        let mut evicted = Vec::new();
        let found = self.find(nif, target, now, &mut evicted);
        let entry = match found {
            Some(e) => e,
            None => {
                self.finish_evictions(evicted);
                return PacketChain::new(Arc::clone(&self.pool));
            }
        };

        let mut router_leave = false;
        let chain = self.with_payload(&entry, |p| match &mut p.link {
            NdLink::Incomplete(pending) => {
                let pending = pending.take();
                p.link = NdLink::Resolved {
                    mac,
                    reach: if flags.solicited {
                        ReachState::Reachable
                    } else {
                        ReachState::Stale
                    },
                    since: now,
                };
                router_leave = p.is_router && !flags.router;
                p.is_router = flags.router;
                entry.tstamp.store(now.0, Ordering::Relaxed);
                pending
            }
            NdLink::Resolved {
                mac: old,
                reach,
                since,
            } => {
                let differs = *old != mac;
                if !flags.override_lla && differs {
                    // Address not adopted.  Only a REACHABLE entry reacts,
                    // by demotion; otherwise the advertisement is ignored
                    // entirely (IsRouter untouched).
                    if *reach == ReachState::Reachable {
                        *reach = ReachState::Stale;
                        *since = now;
                    }
                    return PacketChain::new(Arc::clone(&self.pool));
                }
                if flags.override_lla && differs {
                    *old = mac;
                    if flags.solicited {
                        *reach = ReachState::Reachable;
                    } else {
                        *reach = ReachState::Stale;
                    }
                    *since = now;
                } else if flags.solicited {
                    *reach = ReachState::Reachable;
                    *since = now;
                }
                router_leave = p.is_router && !flags.router;
                p.is_router = flags.router;
                entry.tstamp.store(now.0, Ordering::Relaxed);
                PacketChain::new(Arc::clone(&self.pool))
            }
        });
        // Losing IsRouter removes only the router-list membership; the
        // cache entry stays.
        if router_leave {
            self.rl_leave(&entry);
        }
        self.finish_evictions(evicted);
        chain
    }

    /// RFC 4861 §6.3.4 (reduced): a Router Advertisement with a source
    /// link-layer address creates or refreshes the sender at STALE and
    /// marks it a router; the router lifetime toggles Default Router List
    /// membership.  Returns any pending chain released by resolution.
    pub fn record_router_advertisement(
        &self,
        nif: NifId,
        src: &Ipv6Addr,
        slla: Option<MacAddr>,
        router_lifetime_s: u16,
        now: Timestamp,
    ) -> PacketChain {
        let mut chain = match slla {
            Some(mac) => self.record_solicitation(nif, src, mac, now),
            None => PacketChain::new(Arc::clone(&self.pool)),
        };

        let mut evicted = Vec::new();
        if let Some(entry) = self.find(nif, src, now, &mut evicted) {
            self.with_payload(&entry, |p| p.is_router = true);
            if router_lifetime_s > 0 {
                self.rl_enter(&entry);
            } else {
                self.rl_leave(&entry);
            }
        } else {
            // No SLLA and no existing entry: nothing to attach the router
            // state to.
            chain = PacketChain::new(Arc::clone(&self.pool));
        }
        self.finish_evictions(evicted);
        chain
    }

    /// Number of live entries (racy, diagnostics and tests only).
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
