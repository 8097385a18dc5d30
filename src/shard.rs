//! A single independent cache: one hash table, two intrusive lists, one
//! capacity budget, one lock.
//!
//! A [`Shard`] is oblivious to sharding — it does not know its own index, or
//! that it's one of sixteen. That's entirely [`crate::cache::Cache`]'s
//! concern: routing a key to a shard by the high bits of its hash, and
//! recovering a handle's owning shard the same way on release.

use crate::handle::{Deleter, Handle};
use crate::list;
use crate::table::HandleTable;
use parking_lot::Mutex;
use std::boxed::Box;

struct ShardInner<V> {
    capacity: usize,
    usage: usize,
    table: HandleTable<V>,
    /// Sentinel of the circular list of `in_cache = true, refs == 1` entries,
    /// ordered oldest (`lru.next`) to newest (`lru.prev`).
    lru: *mut Handle<V>,
    /// Sentinel of the circular list of `in_cache = true, refs >= 2` entries.
    in_use: *mut Handle<V>,
}

// SAFETY: a `ShardInner` is only ever reached through a `Mutex`, which
// guarantees exclusive access to all of its raw pointers (the table's
// buckets and both lists) from one thread at a time.
unsafe impl<V: Send> Send for ShardInner<V> {}

impl<V> ShardInner<V> {
    fn new(capacity: usize) -> Self {
        let lru = Box::into_raw(Handle::new_sigil());
        let in_use = Box::into_raw(Handle::new_sigil());
        // SAFETY: both pointers were just allocated and are not yet aliased.
        unsafe {
            list::init_sigil(lru);
            list::init_sigil(in_use);
        }
        ShardInner {
            capacity,
            usage: 0,
            table: HandleTable::new(),
            lru,
            in_use,
        }
    }

    /// Adds one reference to `e`. If it was idle (`refs == 1 && in_cache`),
    /// promotes it from `lru` to `in_use`.
    ///
    /// # Safety
    ///
    /// `e` must be a valid, live handle owned by this shard.
    unsafe fn ref_(&mut self, e: *mut Handle<V>) {
        unsafe {
            if (*e).refs == 1 && (*e).in_cache {
                list::detach(e);
                list::attach(self.in_use, e);
            }
            (*e).refs += 1;
        }
    }

    /// Removes one reference from `e`. Frees it (running its deleter) at
    /// zero; demotes it from `in_use` to `lru` if it drops to exactly one
    /// remaining (cache-held) reference.
    ///
    /// # Safety
    ///
    /// `e` must be a valid, live handle owned by this shard, with
    /// `refs >= 1`.
    unsafe fn unref(&mut self, e: *mut Handle<V>) {
        unsafe {
            debug_assert!((*e).refs > 0, "unref of a handle with no references");
            (*e).refs -= 1;
            if (*e).refs == 0 {
                debug_assert!(!(*e).in_cache, "a freed handle must already be out of cache");
                Handle::finalize(Box::from_raw(e));
            } else if (*e).in_cache && (*e).refs == 1 {
                list::detach(e);
                list::attach(self.lru, e);
            }
        }
    }

    /// Finishes erasing a handle already unlinked from the table: detaches
    /// it from its list, marks it not-cached, accounts its charge, and
    /// drops the cache's own reference. Returns `true` if `e` was non-null.
    ///
    /// # Safety
    ///
    /// `e` must be null, or a valid, live handle owned by this shard that is
    /// currently `in_cache = true`.
    unsafe fn finish_erase(&mut self, e: *mut Handle<V>) -> bool {
        if e.is_null() {
            return false;
        }
        unsafe {
            debug_assert!((*e).in_cache);
            list::detach(e);
            (*e).in_cache = false;
            self.usage -= (*e).charge;
            self.unref(e);
        }
        true
    }
}

impl<V> Drop for ShardInner<V> {
    fn drop(&mut self) {
        unsafe {
            debug_assert!(
                list::is_empty(self.in_use),
                "shard dropped with outstanding pinned handles"
            );
            let mut cur = (*self.lru).next;
            while cur != self.lru {
                let next = (*cur).next;
                (*cur).in_cache = false;
                self.unref(cur);
                cur = next;
            }
            drop(Box::from_raw(self.in_use));
            drop(Box::from_raw(self.lru));
        }
    }
}

/// One of the sixteen independent caches that make up a [`crate::cache::Cache`].
pub(crate) struct Shard<V> {
    inner: Mutex<ShardInner<V>>,
}

impl<V> Shard<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Shard {
            inner: Mutex::new(ShardInner::new(capacity)),
        }
    }

    /// Looks up `key` (already hashed to `hash`); on a hit, adds one
    /// reference and returns the handle. Returns null on a miss.
    pub(crate) fn lookup(&self, hash: u32, key: &[u8]) -> *mut Handle<V> {
        let mut inner = self.inner.lock();
        unsafe {
            let e = inner.table.lookup(hash, key);
            if !e.is_null() {
                inner.ref_(e);
            }
            e
        }
    }

    /// Inserts a new entry, evicting idle entries until `usage <= capacity`
    /// or the `lru` list is empty. Returns the new entry, holding exactly
    /// one external reference.
    pub(crate) fn insert(&self, key: &[u8], hash: u32, value: V, charge: usize, deleter: Deleter<V>) -> *mut Handle<V> {
        let mut inner = self.inner.lock();
        let e = Box::into_raw(Handle::new(key, hash, value, charge, deleter));
        unsafe {
            (*e).refs = 1; // the handle this call returns

            if inner.capacity > 0 {
                (*e).refs += 1; // the cache's own reference
                (*e).in_cache = true;
                list::attach(inner.in_use, e);
                inner.usage += charge;
                let displaced = inner.table.insert(e);
                inner.finish_erase(displaced);
            }

            while inner.usage > inner.capacity && !list::is_empty(inner.lru) {
                let old = (*inner.lru).next;
                debug_assert_eq!((*old).refs, 1, "lru entries must be unpinned");
                let old_hash = (*old).hash;
                tracing::trace!(
                    evicted_charge = (*old).charge,
                    triggering_hash = hash,
                    "evicting idle entry to satisfy capacity"
                );
                let removed = inner.table.remove(old_hash, (*old).key().data());
                debug_assert_eq!(removed, old);
                let erased = inner.finish_erase(removed);
                debug_assert!(erased);
            }
        }
        e
    }

    /// Drops one reference from `e`.
    pub(crate) fn release(&self, e: *mut Handle<V>) {
        let mut inner = self.inner.lock();
        unsafe { inner.unref(e) };
    }

    /// Removes the entry for `key` from the cache, if present. Any external
    /// holders keep their reference; the entry's deleter does not run until
    /// they release it.
    pub(crate) fn erase(&self, hash: u32, key: &[u8]) {
        let mut inner = self.inner.lock();
        unsafe {
            let e = inner.table.remove(hash, key);
            inner.finish_erase(e);
        }
    }

    /// Removes every idle (unpinned) entry.
    pub(crate) fn prune(&self) {
        let mut inner = self.inner.lock();
        unsafe {
            while !list::is_empty(inner.lru) {
                let e = (*inner.lru).next;
                debug_assert_eq!((*e).refs, 1);
                let hash = (*e).hash;
                let removed = inner.table.remove(hash, (*e).key().data());
                inner.finish_erase(removed);
            }
        }
    }

    /// Sum of `charge` over every entry currently in the cache.
    pub(crate) fn total_charge(&self) -> usize {
        self.inner.lock().usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn noop_deleter<V>() -> Deleter<V> {
        Box::new(|_, _| {})
    }

    fn counting_deleter(counter: Arc<AtomicUsize>) -> Deleter<i32> {
        Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    unsafe fn value_of(e: *mut Handle<i32>) -> i32 {
        unsafe { *(*e).value_ref() }
    }

    #[test]
    fn insert_then_lookup_hits() {
        let shard = Shard::new(1000);
        let h = shard.insert(b"k", 1, 101, 1, noop_deleter());
        shard.release(h);

        let found = shard.lookup(1, b"k");
        assert!(!found.is_null());
        assert_eq!(unsafe { value_of(found) }, 101);
        shard.release(found);
    }

    #[test]
    fn lookup_miss_returns_null() {
        let shard: Shard<i32> = Shard::new(1000);
        assert!(shard.lookup(1, b"nope").is_null());
    }

    #[test]
    fn reinsert_evicts_prior_value_and_runs_its_deleter_once_released() {
        let shard = Shard::new(1000);
        let calls = Arc::new(AtomicUsize::new(0));

        let h1 = shard.insert(b"k", 1, 101, 1, counting_deleter(calls.clone()));
        shard.release(h1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let h2 = shard.insert(b"k", 1, 102, 1, noop_deleter());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "old entry's deleter should fire on reinsert");
        shard.release(h2);

        let found = shard.lookup(1, b"k");
        assert_eq!(unsafe { value_of(found) }, 102);
        shard.release(found);
    }

    #[test]
    fn erase_does_not_run_deleter_while_a_handle_is_held() {
        let shard = Shard::new(1000);
        let calls = Arc::new(AtomicUsize::new(0));

        let h1 = shard.insert(b"k", 1, 101, 1, counting_deleter(calls.clone()));
        let h2 = shard.lookup(1, b"k");
        shard.release(h1);

        shard.erase(1, b"k");
        assert!(shard.lookup(1, b"k").is_null());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "deleter must wait for the held handle");

        shard.release(h2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_capacity_runs_deleter_on_release_without_ever_being_found() {
        let shard = Shard::new(0);
        let calls = Arc::new(AtomicUsize::new(0));

        let h = shard.insert(b"k", 1, 101, 1, counting_deleter(calls.clone()));
        assert!(shard.lookup(1, b"k").is_null());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        shard.release(h);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eviction_respects_pinned_entries() {
        let shard = Shard::new(2);
        let calls = Arc::new(AtomicUsize::new(0));

        let pinned = shard.insert(b"pinned", 1, 1, 1, counting_deleter(calls.clone()));
        let a = shard.insert(b"a", 2, 2, 1, counting_deleter(calls.clone()));
        shard.release(a);
        // usage is now 2, at capacity. Inserting one more idle entry must
        // evict `a` (the only idle entry) rather than touch `pinned`.
        let b = shard.insert(b"b", 3, 3, 1, counting_deleter(calls.clone()));
        shard.release(b);

        assert!(shard.lookup(2, b"a").is_null(), "idle entry should have been evicted");
        assert!(!shard.lookup(3, b"b").is_null());
        shard.release(shard.lookup(3, b"b"));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "only the idle entry's deleter should have fired");

        shard.release(pinned);
    }

    #[test]
    fn prune_removes_only_idle_entries() {
        let shard = Shard::new(1000);
        shard.release(shard.insert(b"1", 1, 100, 1, noop_deleter()));
        let h = shard.lookup(1, b"1");
        shard.release(shard.insert(b"2", 2, 200, 1, noop_deleter()));

        shard.prune();

        assert!(!shard.lookup(1, b"1").is_null());
        shard.release(shard.lookup(1, b"1"));
        assert!(shard.lookup(2, b"2").is_null());
        shard.release(h);
    }

    #[test]
    fn total_charge_tracks_cached_usage() {
        let shard = Shard::new(1000);
        assert_eq!(shard.total_charge(), 0);
        shard.release(shard.insert(b"1", 1, 100, 7, noop_deleter()));
        assert_eq!(shard.total_charge(), 7);
        shard.erase(1, b"1");
        assert_eq!(shard.total_charge(), 0);
    }

    #[test]
    fn drop_runs_deleters_for_every_remaining_idle_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let shard = Shard::new(1000);
            shard.release(shard.insert(b"1", 1, 100, 1, counting_deleter(calls.clone())));
            shard.release(shard.insert(b"2", 2, 200, 1, counting_deleter(calls.clone())));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
