//! The public, sharded cache.
//!
//! ```
//! use sharded_lru_cache::{Cache, CacheConfig};
//!
//! let cache = Cache::new(CacheConfig::new(1000));
//!
//! let h = cache.insert(b"key", 42, 1, Box::new(|_key, _value| {}));
//! assert_eq!(*cache.value(&h), 42);
//! cache.release(h); // equivalent to `drop(h)`
//!
//! let h = cache.lookup(b"key").expect("still cached");
//! assert_eq!(*cache.value(&h), 42);
//! ```
//!
//! ```text
//!               key
//!                |
//!                v
//!         hash32(key, 0)            <- one 32-bit digest, two uses
//!          /            \
//!   low bits            high 4 bits
//!   (in-shard bucket)   (hash >> 28, picks one of 16 shards)
//!          |                    |
//!          v                    v
//!   HandleTable<V> lookup   Shard<V> { Mutex<ShardInner<V>> }
//! ```
//!
//! The two uses of the digest are kept uncorrelated on purpose (§4.3 of the
//! design this follows): the bottom bits already drive in-shard bucket
//! selection, so reusing them for shard selection would skew load across
//! shards in lockstep with skew across buckets. Reading the opposite end of
//! the same digest avoids that correlation without a second hash pass.

use crate::config::CacheConfig;
use crate::handle::{Deleter, Handle};
use crate::hash::hash32;
use crate::shard::Shard;
use parking_lot::Mutex;
use std::fmt;
use std::ptr::NonNull;

const NUM_SHARD_BITS: u32 = 4;
const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;

fn shard_index(hash: u32) -> usize {
    (hash >> (32 - NUM_SHARD_BITS)) as usize
}

/// A fixed, 16-way sharded, reference-counted LRU cache.
///
/// Every public operation hashes its key once and routes to exactly one of
/// sixteen independent [`Shard`]s; see the module-level diagram. There is no
/// cross-shard coordination beyond that routing and the independent `NewId`
/// counter.
pub struct Cache<V> {
    shards: [Shard<V>; NUM_SHARDS],
    next_id: Mutex<u64>,
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("num_shards", &NUM_SHARDS)
            .field("total_charge", &self.total_charge())
            .finish()
    }
}

impl<V> Cache<V> {
    /// Builds a cache from `config`, splitting its capacity as evenly as
    /// possible across the sixteen shards (`capacity.div_ceil(16)` each;
    /// the last shards may end up with slightly less total capacity than
    /// the others when `capacity` isn't a multiple of 16 — an accepted
    /// rounding artifact, not a bug).
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let per_shard = config.capacity().div_ceil(NUM_SHARDS);
        Cache {
            shards: std::array::from_fn(|_| Shard::new(per_shard)),
            next_id: Mutex::new(0),
        }
    }

    fn shard_for(&self, hash: u32) -> &Shard<V> {
        &self.shards[shard_index(hash)]
    }

    /// Inserts `value` under `key` with the given `charge`, returning a
    /// handle holding one external reference. `deleter` runs exactly once,
    /// with the key bytes and the value, when the handle's last reference
    /// (cache-internal or external) drops.
    ///
    /// If an entry is already cached under `key`, it is displaced; its
    /// deleter does not run until every external holder of it has released
    /// their reference (see [`crate::handle`]'s state-machine docs).
    pub fn insert(&self, key: &[u8], value: V, charge: usize, deleter: Deleter<V>) -> CacheHandle<'_, V> {
        let hash = hash32(key, 0);
        let ptr = self.shard_for(hash).insert(key, hash, value, charge, deleter);
        // SAFETY: `Shard::insert` always returns a non-null pointer holding
        // one external reference.
        CacheHandle::new(unsafe { NonNull::new_unchecked(ptr) }, self)
    }

    /// Looks up `key`. Returns `None` on a miss; on a hit, returns a handle
    /// holding one external reference.
    pub fn lookup(&self, key: &[u8]) -> Option<CacheHandle<'_, V>> {
        let hash = hash32(key, 0);
        let ptr = self.shard_for(hash).lookup(hash, key);
        NonNull::new(ptr).map(|ptr| CacheHandle::new(ptr, self))
    }

    /// Reads the value behind a live handle without acquiring any lock —
    /// sound because holding the handle guarantees the entry has not been
    /// finalized.
    #[must_use]
    pub fn value<'a>(&self, handle: &'a CacheHandle<'_, V>) -> &'a V {
        // SAFETY: `handle` holds a live reference to a non-sigil entry for
        // as long as the borrow `'a` lasts.
        unsafe { handle.ptr.as_ref().value_ref() }
    }

    /// Drops one reference from `handle`. Equivalent to `drop(handle)`;
    /// provided as a named counterpart to `insert`/`lookup` for callers who
    /// want the release point to read explicitly rather than fall out of
    /// scope.
    pub fn release(&self, handle: CacheHandle<'_, V>) {
        drop(handle);
    }

    /// Removes the entry for `key`, if present. External holders keep their
    /// reference; the deleter does not run until they release it.
    pub fn erase(&self, key: &[u8]) {
        let hash = hash32(key, 0);
        self.shard_for(hash).erase(hash, key);
    }

    /// Returns a fresh, strictly increasing 64-bit id. Serialized by a
    /// dedicated mutex, independent of every shard's lock, so `NewId` never
    /// contends with cache traffic.
    pub fn new_id(&self) -> u64 {
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;
        id
    }

    /// Removes every idle (unpinned) entry from every shard.
    pub fn prune(&self) {
        for shard in &self.shards {
            shard.prune();
        }
    }

    /// Sum of `charge` over every cached entry, across all sixteen shards.
    ///
    /// Under concurrent mutation this is a lower-bound snapshot, not a
    /// transactional total — shards are summed one at a time, each under its
    /// own lock, never all sixteen at once.
    #[must_use]
    pub fn total_charge(&self) -> usize {
        self.shards.iter().map(Shard::total_charge).sum()
    }
}

/// An owned reference to one cached entry.
///
/// Dropping a `CacheHandle` releases its reference, which may run the
/// entry's deleter if this was the last one outstanding. [`Cache::release`]
/// is a named equivalent to `drop` for callers who want the release point to
/// read explicitly. There is no way to double-release or to read
/// [`Cache::value`] past a release: both would require a `CacheHandle` value
/// that, by ordinary Rust ownership, no longer exists.
pub struct CacheHandle<'a, V> {
    ptr: NonNull<Handle<V>>,
    cache: &'a Cache<V>,
}

impl<'a, V> CacheHandle<'a, V> {
    fn new(ptr: NonNull<Handle<V>>, cache: &'a Cache<V>) -> Self {
        CacheHandle { ptr, cache }
    }

    /// Reads the stored value. Shorthand for `cache.value(&handle)`.
    #[must_use]
    pub fn value(&self) -> &V {
        self.cache.value(self)
    }
}

impl<V> Drop for CacheHandle<'_, V> {
    fn drop(&mut self) {
        // SAFETY: a live `CacheHandle` always points at a handle that was
        // inserted with this hash; recovering the shard from the high bits
        // of the stored hash (rather than re-hashing the key) is the same
        // trick `insert`/`lookup` use to pick a shard in the first place.
        let hash = unsafe { self.ptr.as_ref().hash };
        self.cache.shard_for(hash).release(self.ptr.as_ptr());
    }
}

// SAFETY: a `CacheHandle` only ever touches its entry through the owning
// shard's lock (via `Cache::release`) or through `value_ref`, which is sound
// to call from any thread holding a live reference. Moving the handle to
// another thread and dropping it there is therefore safe whenever `V: Send`.
unsafe impl<V: Send> Send for CacheHandle<'_, V> {}

impl<V: fmt::Debug> fmt::Debug for CacheHandle<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle").field("value", self.value()).finish()
    }
}
