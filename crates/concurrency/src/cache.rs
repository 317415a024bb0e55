//! The Timestamp Cache.
//!
//! A concurrent mapping from user key to a stable [`TimestampWord`]
//! address. Built on `dashmap::DashMap` the way `strata-concurrency`
//! leans on `DashMap` for its commit-lock table in `manager.rs`: the
//! map's own internal sharding gives us lock-free concurrent readers of
//! an existing slot for free, so the `tid` parameter on lookup is
//! accepted and threaded through for interface compatibility but is not
//! itself used to pick a shard.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tictoc_core::CacheMode;

use crate::timestamp::TimestampWord;

/// One cache slot: the timestamp word for a single key, plus the
/// refcount of transactions currently holding a reference to it.
#[derive(Debug)]
pub struct Slot {
    /// The packed timestamp word for this key.
    pub word: TimestampWord,
    refcount: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        Slot {
            word: TimestampWord::new(),
            refcount: AtomicUsize::new(0),
        }
    }

    /// Current refcount, for diagnostics and tests.
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }
}

/// Concurrent key -> [`Slot`] map.
///
/// Insertion is linearizable: concurrent `insert_and_get` calls for the
/// same key are guaranteed to observe and share the same slot, never
/// allocate duplicates.
pub struct TimestampCache {
    map: DashMap<Box<[u8]>, Arc<Slot>>,
    mode: CacheMode,
    shard_count: usize,
}

/// `dashmap`'s shard count must be a power of two; spec's
/// `tscache_log_slots` (default 29) names a slot-array size meant for a
/// backend's on-disk hash table, not an in-process shard count. We use
/// it only to pick how many concurrent-access shards `DashMap` gets,
/// clamped to a sane range, rather than literally allocating `2^29`
/// shards.
const MIN_SHARD_LOG: u32 = 2;
const MAX_SHARD_LOG: u32 = 10;

fn shard_amount_from_log_slots(log_slots: u32) -> usize {
    let clamped = log_slots.clamp(MIN_SHARD_LOG, MAX_SHARD_LOG);
    1usize << clamped
}

impl TimestampCache {
    /// Build a cache sized from `tscache_log_slots` (see
    /// [`shard_amount_from_log_slots`]) in the given mode.
    pub fn new(tscache_log_slots: u32, mode: CacheMode) -> Self {
        let shard_count = shard_amount_from_log_slots(tscache_log_slots);
        TimestampCache {
            map: DashMap::with_shard_amount(shard_count),
            mode,
            shard_count,
        }
    }

    /// The reclamation mode this cache was built with.
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Number of concurrent-access shards this cache was built with.
    /// Diagnostic only; see `shard_amount_from_log_slots`.
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Number of live slots. Diagnostic only.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache currently holds no slots.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Insert-or-get: returns the slot for `key`, incrementing its
    /// refcount, and whether this call created the slot. Concurrent
    /// callers for the same key are guaranteed to share one slot.
    ///
    /// `tid` is accepted for interface parity with the spec's
    /// tid-parameterized lookup contract; see the module docs.
    pub fn insert_and_get(&self, key: &[u8], _tid: u64) -> (Arc<Slot>, bool) {
        if let Some(existing) = self.map.get(key) {
            existing.refcount.fetch_add(1, Ordering::AcqRel);
            return (Arc::clone(existing.value()), false);
        }
        match self.map.entry(key.to_vec().into_boxed_slice()) {
            Entry::Occupied(occupied) => {
                occupied.get().refcount.fetch_add(1, Ordering::AcqRel);
                (Arc::clone(occupied.get()), false)
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Slot::new());
                slot.refcount.store(1, Ordering::Release);
                vacant.insert(Arc::clone(&slot));
                (slot, true)
            }
        }
    }

    /// Retain-all variant of `insert_and_get` that does not increment
    /// the refcount.
    ///
    /// Intended for callers in retain-all mode that want a stable
    /// pointer without participating in reclamation bookkeeping, since
    /// retain-all slots are never reclaimed regardless of refcount.
    pub fn insert_and_get_no_ref(&self, key: &[u8], _tid: u64) -> (Arc<Slot>, bool) {
        if let Some(existing) = self.map.get(key) {
            return (Arc::clone(existing.value()), false);
        }
        match self.map.entry(key.to_vec().into_boxed_slice()) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Slot::new());
                vacant.insert(Arc::clone(&slot));
                (slot, true)
            }
        }
    }

    /// Bind a stable slot pointer for `key`, picking `insert_and_get` or
    /// `insert_and_get_no_ref` according to this cache's mode.
    ///
    /// The mode is fixed for the whole life of the cache (spec Section
    /// 3), so which variant a given bind takes is determined once here
    /// rather than tracked per call site or per `RwEntry`.
    pub fn bind(&self, key: &[u8], tid: u64) -> Arc<Slot> {
        match self.mode {
            CacheMode::Ephemeral => self.insert_and_get(key, tid).0,
            CacheMode::RetainAll => self.insert_and_get_no_ref(key, tid).0,
        }
    }

    /// Release a transaction's reference to `key`'s slot, decrementing
    /// its refcount. In `Ephemeral` mode, physically reclaims the slot
    /// once the refcount returns to zero. Returns the slot if it was
    /// found (whether or not it was reclaimed).
    pub fn get_and_remove(&self, key: &[u8]) -> Option<Arc<Slot>> {
        let slot = Arc::clone(self.map.get(key)?.value());
        let prev = slot.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "refcount underflow releasing slot");
        if prev == 1 && self.mode == CacheMode::Ephemeral {
            // Re-check under the shard lock: another thread may have
            // re-acquired a reference (insert_and_get) between our
            // fetch_sub above and this remove_if.
            self.map.remove_if(key, |_, s| {
                Arc::ptr_eq(s, &slot) && s.refcount.load(Ordering::Acquire) == 0
            });
        }
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_count_is_clamped_into_range() {
        assert_eq!(TimestampCache::new(0, CacheMode::Ephemeral).shard_count(), 1 << MIN_SHARD_LOG);
        assert_eq!(TimestampCache::new(29, CacheMode::Ephemeral).shard_count(), 1 << MAX_SHARD_LOG);
        assert_eq!(TimestampCache::new(6, CacheMode::Ephemeral).shard_count(), 1 << 6);
    }

    #[test]
    fn insert_and_get_shares_slot_for_same_key() {
        let cache = TimestampCache::new(4, CacheMode::Ephemeral);
        let (s1, created1) = cache.insert_and_get(b"k", 0);
        let (s2, created2) = cache.insert_and_get(b"k", 0);
        assert!(created1);
        assert!(!created2);
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(s1.refcount(), 2);
    }

    #[test]
    fn ephemeral_mode_reclaims_on_zero_refcount() {
        let cache = TimestampCache::new(4, CacheMode::Ephemeral);
        let (_slot, _) = cache.insert_and_get(b"k", 0);
        assert_eq!(cache.len(), 1);
        cache.get_and_remove(b"k");
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn retain_all_mode_keeps_slot_after_refcount_hits_zero() {
        let cache = TimestampCache::new(4, CacheMode::RetainAll);
        cache.insert_and_get(b"k", 0);
        cache.get_and_remove(b"k");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn no_ref_variant_does_not_bump_refcount() {
        let cache = TimestampCache::new(4, CacheMode::RetainAll);
        let (slot, _) = cache.insert_and_get_no_ref(b"k", 0);
        assert_eq!(slot.refcount(), 0);
    }

    #[test]
    fn concurrent_inserts_for_same_key_yield_one_slot() {
        use std::thread;

        let cache = Arc::new(TimestampCache::new(4, CacheMode::Ephemeral));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                let (slot, _) = cache.insert_and_get(b"shared", 0);
                slot
            }));
        }
        let slots: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &slots[1..] {
            assert!(Arc::ptr_eq(&slots[0], s));
        }
        assert_eq!(slots[0].refcount(), 16);
    }

    #[test]
    fn bind_increments_refcount_in_ephemeral_mode_but_not_in_retain_all() {
        let ephemeral = TimestampCache::new(4, CacheMode::Ephemeral);
        let slot = ephemeral.bind(b"k", 0);
        assert_eq!(slot.refcount(), 1);

        let retain_all = TimestampCache::new(4, CacheMode::RetainAll);
        let slot = retain_all.bind(b"k", 0);
        assert_eq!(slot.refcount(), 0);
    }
}
