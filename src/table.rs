//! A resizable, open-chaining hash index from `(hash, key)` to [`Handle`].
//!
//! This exists instead of a general-purpose map because the shard needs to
//! hand back the *displaced* entry on insert (so the caller can run
//! `FinishErase` on it) and to participate in the same raw-pointer ownership
//! scheme as the two intrusive lists in [`crate::list`] — a `HashMap` would
//! own its entries outright, which conflicts with a `Handle` living
//! simultaneously in a list.
//!
//! The table never synchronizes itself; every call happens under the owning
//! shard's mutex (see [`crate::shard::Shard`]).
//!
//! Chain walks compare keys through [`crate::slice::ByteView`] rather than
//! raw `&[u8]` equality — the non-owning pointer-pair view this crate uses
//! wherever the source's `Slice` would otherwise appear.

use crate::handle::Handle;
use crate::slice::ByteView;
use std::ptr;

const INITIAL_LENGTH: usize = 4;

/// An open-chaining hash index over `*mut Handle<V>` nodes the table does
/// not own.
pub(crate) struct HandleTable<V> {
    /// Power-of-two bucket array; each slot is the head of a singly-linked
    /// chain via `Handle::next_hash`, or null if the bucket is empty.
    buckets: Vec<*mut Handle<V>>,
    /// Number of entries currently linked into the table.
    elems: usize,
}

impl<V> HandleTable<V> {
    pub(crate) fn new() -> Self {
        HandleTable {
            buckets: vec![ptr::null_mut(); INITIAL_LENGTH],
            elems: 0,
        }
    }

    /// Number of entries currently in the table.
    pub(crate) fn len(&self) -> usize {
        self.elems
    }

    /// Finds the slot (either a bucket head, or some entry's `next_hash`
    /// field) that holds — or that a new entry matching `(hash, key)` would
    /// need to be written into.
    ///
    /// # Safety
    ///
    /// Every `next_hash` pointer reachable from `self.buckets` must be
    /// either null or a valid, live `Handle<V>` pointer.
    unsafe fn find_slot(&mut self, hash: u32, key: &[u8]) -> *mut *mut Handle<V> {
        let idx = (hash as usize) & (self.buckets.len() - 1);
        let mut slot: *mut *mut Handle<V> = &mut self.buckets[idx];
        let key = ByteView::new(key);
        unsafe {
            while !(*slot).is_null() && ((*(*slot)).hash != hash || (*(*slot)).key() != key) {
                slot = &mut (*(*slot)).next_hash as *mut *mut Handle<V>;
            }
        }
        slot
    }

    /// Returns the entry matching `(hash, key)`, or null if absent.
    ///
    /// # Safety
    ///
    /// See [`HandleTable::find_slot`].
    pub(crate) unsafe fn lookup(&mut self, hash: u32, key: &[u8]) -> *mut Handle<V> {
        unsafe { *self.find_slot(hash, key) }
    }

    /// Links `entry` into the table, replacing (and returning) any prior
    /// entry with the same `(hash, key)`. Resizes if the table is now
    /// overloaded.
    ///
    /// # Safety
    ///
    /// `entry` must be a valid, live pointer not already linked into this
    /// table's chains; `entry`'s `hash` and key bytes must not change for as
    /// long as it stays linked.
    pub(crate) unsafe fn insert(&mut self, entry: *mut Handle<V>) -> *mut Handle<V> {
        let old = unsafe {
            let hash = (*entry).hash;
            let slot = self.find_slot(hash, (*entry).key().data());
            let old = *slot;
            (*entry).next_hash = if old.is_null() { ptr::null_mut() } else { (*old).next_hash };
            *slot = entry;
            if old.is_null() {
                self.elems += 1;
                if self.elems > self.buckets.len() {
                    self.resize();
                }
            }
            old
        };
        #[cfg(feature = "strict_assertions")]
        // SAFETY: every bucket chain is well-formed after the link above.
        unsafe {
            self.assert_elems_matches_chain_lengths();
        }
        old
    }

    /// Unlinks and returns the entry matching `(hash, key)`, or null if
    /// absent.
    ///
    /// # Safety
    ///
    /// See [`HandleTable::find_slot`].
    pub(crate) unsafe fn remove(&mut self, hash: u32, key: &[u8]) -> *mut Handle<V> {
        let result = unsafe {
            let slot = self.find_slot(hash, key);
            let result = *slot;
            if !result.is_null() {
                *slot = (*result).next_hash;
                self.elems -= 1;
            }
            result
        };
        #[cfg(feature = "strict_assertions")]
        // SAFETY: every bucket chain is still well-formed after the unlink above.
        unsafe {
            self.assert_elems_matches_chain_lengths();
        }
        result
    }

    /// Doubles the bucket array and rehashes every entry into it. Chain
    /// order within a bucket is not preserved.
    ///
    /// # Safety
    ///
    /// Every entry currently linked into `self.buckets` must be a valid,
    /// live pointer.
    unsafe fn resize(&mut self) {
        let new_len = self.buckets.len() * 2;
        let mut new_buckets = vec![ptr::null_mut(); new_len];
        let mut moved = 0usize;
        for &head in &self.buckets {
            let mut cur = head;
            while !cur.is_null() {
                unsafe {
                    let next = (*cur).next_hash;
                    let idx = ((*cur).hash as usize) & (new_len - 1);
                    (*cur).next_hash = new_buckets[idx];
                    new_buckets[idx] = cur;
                    cur = next;
                }
                moved += 1;
            }
        }
        debug_assert_eq!(moved, self.elems, "resize must preserve every entry");
        tracing::debug!(new_length = new_len, elems = self.elems, "handle table resized");
        self.buckets = new_buckets;
    }

    /// Walks every bucket chain and checks the total matches `self.elems`.
    /// O(n) in the table size; only ever compiled in under
    /// `strict_assertions`, since running it after every insert/remove would
    /// make those operations linear instead of amortized constant.
    ///
    /// # Safety
    ///
    /// Every entry reachable from `self.buckets` must be a valid, live
    /// pointer.
    #[cfg(feature = "strict_assertions")]
    unsafe fn assert_elems_matches_chain_lengths(&self) {
        let mut counted = 0usize;
        for &head in &self.buckets {
            let mut cur = head;
            while !cur.is_null() {
                counted += 1;
                // SAFETY: upheld by the caller.
                cur = unsafe { (*cur).next_hash };
            }
        }
        debug_assert_eq!(counted, self.elems, "bucket chains do not match the tracked element count");
    }
}
