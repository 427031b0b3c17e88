//! Sharded LRU cache with reference-counted handles.
//!
//! Core idea: an entry the caller is actively using must never be evicted
//! out from under them. Every [`insert`](ShardedLruCache::insert) and
//! [`lookup`](ShardedLruCache::lookup) hands back a [`CacheHandle`] that
//! pins the entry. Only entries with no outstanding handles sit on the LRU
//! list and are eligible for eviction, so a cache full of pinned entries
//! can sit over capacity until callers let go.
//!
//! Each entry is in one of three states:
//!
//! ```text
//!                  lookup / last handle drop
//!   +-----------+ <-----------------------> +------------+
//!   | on LRU    |                           | referenced |
//!   | refs == 0 |                           | refs > 0   |
//!   +-----------+                           +------------+
//!         |                                       |
//!         | evict / erase                         | erase / replace
//!         v                                       v
//!     destroyed                           detached from table,
//!                                         freed on last drop
//! ```
//!
//! The key space is split across `2^shard_bits` independent shards, each
//! behind its own mutex, so concurrent readers do not serialize on a
//! single lock. Shard selection uses the top bits of an xxh3 hash of the
//! key.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

const DEFAULT_SHARD_BITS: u32 = 4;

/// Sentinel slot index for "no slot".
const NIL: usize = usize::MAX;

/// An immutable cache entry. Shared between the shard's slot and every
/// outstanding handle, so the value outlives eviction for as long as a
/// handle holds it.
struct Entry<T> {
    key: Box<[u8]>,
    value: T,
    charge: usize,
}

/// One slab slot. `prev`/`next` link the slot into the shard's LRU list
/// while `refs == 0 && in_table`; otherwise both are `NIL`.
struct Slot<T> {
    entry: Option<Arc<Entry<T>>>,
    refs: usize,
    in_table: bool,
    prev: usize,
    next: usize,
}

/// One shard: a hash table over a slab of slots plus an intrusive LRU
/// list of the slots that are evictable. The list head is the most
/// recently released entry, the tail is the next eviction victim.
///
/// Shard methods never drop an entry in place: whatever they detach is
/// handed back, and the callers in [`ShardedLruCache`] let it fall only
/// after the shard mutex is released. Value destructors therefore run
/// without the lock held and may themselves use the cache.
struct LruShard<T> {
    capacity: usize,
    usage: usize,
    table: HashMap<Box<[u8]>, usize>,
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    lru_head: usize,
    lru_tail: usize,
}

impl<T> LruShard<T> {
    fn new(capacity: usize) -> LruShard<T> {
        LruShard {
            capacity,
            usage: 0,
            table: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            lru_head: NIL,
            lru_tail: NIL,
        }
    }

    fn acquire_slot(&mut self) -> usize {
        match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot {
                    entry: None,
                    refs: 0,
                    in_table: false,
                    prev: NIL,
                    next: NIL,
                });
                self.slots.len() - 1
            }
        }
    }

    fn entry_arc(&self, slot: usize) -> Arc<Entry<T>> {
        match &self.slots[slot].entry {
            Some(entry) => Arc::clone(entry),
            None => unreachable!("live slot without an entry"),
        }
    }

    fn lru_unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        if prev == NIL {
            self.lru_head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.lru_tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
        self.slots[slot].prev = NIL;
        self.slots[slot].next = NIL;
    }

    fn lru_push_front(&mut self, slot: usize) {
        self.slots[slot].prev = NIL;
        self.slots[slot].next = self.lru_head;
        if self.lru_head == NIL {
            self.lru_tail = slot;
        } else {
            self.slots[self.lru_head].prev = slot;
        }
        self.lru_head = slot;
    }

    fn insert(
        &mut self,
        key: &[u8],
        value: T,
        charge: usize,
        detached: &mut Vec<Arc<Entry<T>>>,
    ) -> (usize, Arc<Entry<T>>) {
        let slot = self.acquire_slot();
        let entry = Arc::new(Entry {
            key: key.into(),
            value,
            charge,
        });
        self.slots[slot].entry = Some(Arc::clone(&entry));
        self.slots[slot].refs = 1;
        self.slots[slot].in_table = true;
        self.usage += charge;
        if let Some(old) = self.table.insert(key.into(), slot) {
            detached.extend(self.detach(old));
        }
        self.evict_to_fit(detached);
        (slot, entry)
    }

    fn lookup(&mut self, key: &[u8]) -> Option<(usize, Arc<Entry<T>>)> {
        let slot = *self.table.get(key)?;
        if self.slots[slot].refs == 0 {
            self.lru_unlink(slot);
        }
        self.slots[slot].refs += 1;
        Some((slot, self.entry_arc(slot)))
    }

    fn erase(&mut self, key: &[u8]) -> Option<Arc<Entry<T>>> {
        let slot = self.table.remove(key)?;
        self.detach(slot)
    }

    /// Drops one handle's reference. When the last reference goes and the
    /// entry is no longer in the table, the slot is recycled and the
    /// entry handed back.
    fn unref(&mut self, slot: usize) -> Option<Arc<Entry<T>>> {
        debug_assert!(self.slots[slot].refs > 0);
        self.slots[slot].refs -= 1;
        if self.slots[slot].refs == 0 {
            if self.slots[slot].in_table {
                self.lru_push_front(slot);
            } else {
                return self.destroy(slot);
            }
        }
        None
    }

    /// Undoes the bookkeeping that went with a table mapping the caller
    /// has already removed or replaced. The entry stops counting toward
    /// `usage` immediately; if unreferenced it comes back for the caller
    /// to drop outside the lock.
    fn detach(&mut self, slot: usize) -> Option<Arc<Entry<T>>> {
        debug_assert!(self.slots[slot].in_table);
        self.slots[slot].in_table = false;
        if let Some(entry) = &self.slots[slot].entry {
            self.usage -= entry.charge;
        }
        if self.slots[slot].refs == 0 {
            self.lru_unlink(slot);
            return self.destroy(slot);
        }
        None
    }

    /// Recycles the slot and hands the entry back instead of dropping it,
    /// so no value destructor runs while the shard is locked.
    fn destroy(&mut self, slot: usize) -> Option<Arc<Entry<T>>> {
        debug_assert_eq!(self.slots[slot].refs, 0);
        self.free.push(slot);
        self.slots[slot].entry.take()
    }

    /// Removes the current eviction victim. Caller checked `lru_tail`.
    fn evict_tail(&mut self) -> Option<Arc<Entry<T>>> {
        let victim = self.lru_tail;
        let key = match &self.slots[victim].entry {
            Some(entry) => entry.key.clone(),
            None => unreachable!("lru list points at an empty slot"),
        };
        self.table.remove(&key);
        self.detach(victim)
    }

    fn evict_to_fit(&mut self, detached: &mut Vec<Arc<Entry<T>>>) {
        while self.usage > self.capacity && self.lru_tail != NIL {
            detached.extend(self.evict_tail());
        }
    }

    fn prune(&mut self, detached: &mut Vec<Arc<Entry<T>>>) {
        while self.lru_tail != NIL {
            detached.extend(self.evict_tail());
        }
    }
}

/// A pinned reference to a cached value. Dereferences to the value and
/// releases the pin on drop. The value stays alive, and the handle stays
/// valid, even if the entry is erased or replaced in the meantime.
pub struct CacheHandle<T> {
    shard: Arc<Mutex<LruShard<T>>>,
    slot: usize,
    entry: Arc<Entry<T>>,
}

impl<T> Deref for CacheHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entry.value
    }
}

impl<T> Drop for CacheHandle<T> {
    fn drop(&mut self) {
        // The binding keeps any detached entry alive past the guard, so
        // its destructor runs with the shard unlocked.
        let detached = self.shard.lock().unref(self.slot);
        drop(detached);
    }
}

/// A fixed-capacity cache of `key -> T` entries with LRU eviction among
/// the entries nobody currently holds a handle to.
///
/// Capacity is measured in caller-supplied `charge` units, not entry
/// counts, so a cache of blocks can budget in bytes.
pub struct ShardedLruCache<T> {
    shards: Vec<Arc<Mutex<LruShard<T>>>>,
    shard_bits: u32,
    next_id: AtomicU64,
}

impl<T> ShardedLruCache<T> {
    /// Creates a cache with the default shard count.
    pub fn new(capacity: usize) -> ShardedLruCache<T> {
        ShardedLruCache::with_shard_bits(capacity, DEFAULT_SHARD_BITS)
    }

    /// Creates a cache with `2^shard_bits` shards. Zero shard bits gives a
    /// single shard, which makes eviction order fully deterministic.
    pub fn with_shard_bits(capacity: usize, shard_bits: u32) -> ShardedLruCache<T> {
        assert!(shard_bits <= 16, "shard_bits out of range");
        let num_shards = 1usize << shard_bits;
        let per_shard = capacity.div_ceil(num_shards);
        let shards = (0..num_shards)
            .map(|_| Arc::new(Mutex::new(LruShard::new(per_shard))))
            .collect();
        ShardedLruCache {
            shards,
            shard_bits,
            next_id: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, key: &[u8]) -> usize {
        if self.shard_bits == 0 {
            return 0;
        }
        (xxh3_64(key) >> (64 - self.shard_bits)) as usize
    }

    /// Inserts a mapping from `key` to `value`, charging `charge` units
    /// against the capacity, and returns a handle pinning the new entry.
    /// An existing entry under the same key is detached; handles to it
    /// remain valid but new lookups see only the new value.
    pub fn insert(&self, key: &[u8], value: T, charge: usize) -> CacheHandle<T> {
        let shard = &self.shards[self.shard_for(key)];
        let mut detached = Vec::new();
        let (slot, entry) = shard.lock().insert(key, value, charge, &mut detached);
        // Evicted and replaced values fall here, after the shard unlocks.
        drop(detached);
        CacheHandle {
            shard: Arc::clone(shard),
            slot,
            entry,
        }
    }

    /// Returns a handle pinning the entry under `key`, or `None`.
    pub fn lookup(&self, key: &[u8]) -> Option<CacheHandle<T>> {
        let shard = &self.shards[self.shard_for(key)];
        let (slot, entry) = shard.lock().lookup(key)?;
        Some(CacheHandle {
            shard: Arc::clone(shard),
            slot,
            entry,
        })
    }

    /// Removes the entry under `key`, if any. Outstanding handles keep
    /// the underlying value alive until they drop.
    pub fn erase(&self, key: &[u8]) {
        let detached = self.shards[self.shard_for(key)].lock().erase(key);
        drop(detached);
    }

    /// Evicts everything that is not pinned by a handle.
    pub fn prune(&self) {
        for shard in &self.shards {
            let mut detached = Vec::new();
            shard.lock().prune(&mut detached);
            drop(detached);
        }
    }

    /// Combined charge of all entries currently counted against the
    /// capacity, including pinned ones.
    pub fn total_charge(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().usage).sum()
    }

    /// Returns a new numeric id. Callers that share one cache prefix
    /// their keys with an id to partition the key space.
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}
