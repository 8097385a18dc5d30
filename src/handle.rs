//! The reference-counted cache entry.
//!
//! A `Handle<V>` is the node type shared by a shard's hash chain and by
//! whichever of the two intrusive lists (`lru` or `in_use`) currently holds
//! it. Unlike a typical arena-backed entry, a `Handle<V>` is never present in
//! both at once: `next_hash` links it into the table's bucket chain
//! regardless of list membership, while `prev`/`next` link it into at most
//! one of `lru`/`in_use` (see [`crate::list`]).
//!
//! # States
//!
//! A handle's lifecycle is a state machine over `(in_cache, refs)`:
//!
//! - **Cached-idle** — `in_cache = true, refs == 1`. On the `lru` list,
//!   eligible for eviction.
//! - **Cached-pinned** — `in_cache = true, refs >= 2`. On the `in_use` list,
//!   not eligible for eviction.
//! - **Evicted-but-pinned** — `in_cache = false, refs > 0`. Off both lists
//!   and the table; a caller still holds it; the deleter has not run.
//! - **Dead** — `refs == 0`. Terminal: the deleter has run and the node is
//!   freed.

use crate::slice::ByteView;
use std::mem;
use std::ptr;

/// A caller-supplied callback invoked exactly once, with the entry's key
/// bytes and its value, when the entry's last reference drops.
pub type Deleter<V> = Box<dyn FnOnce(&[u8], V) + Send + 'static>;

/// One cached entry.
///
/// Never constructed directly by callers; produced by [`Handle::new`] (a
/// live entry) or [`Handle::new_sigil`] (an uninitialized list sentinel) and
/// managed exclusively by the owning [`crate::shard::Shard`].
pub(crate) struct Handle<V> {
    /// The stored value. Left uninitialized for sigil nodes; never read or
    /// dropped through this field directly — see [`Handle::finalize`].
    value: mem::MaybeUninit<V>,
    /// Consumed exactly once, by [`Handle::finalize`]. `None` for sigils and,
    /// transiently, for any handle whose value has already been finalized.
    deleter: Option<Deleter<V>>,
    /// The key, owned inline. Empty for sigils.
    key: Box<[u8]>,
    /// Cached 32-bit digest of `key`, reused for chain lookups, resizing, and
    /// (by the sharded cache) to recover the owning shard on release.
    pub(crate) hash: u32,
    /// Units counted against the owning shard's capacity.
    pub(crate) charge: usize,
    /// Reference count. See the state machine above.
    pub(crate) refs: usize,
    /// True iff this handle is currently reachable from the shard's table
    /// and from one of its two lists.
    pub(crate) in_cache: bool,
    /// Next node in the owning table bucket's collision chain.
    pub(crate) next_hash: *mut Handle<V>,
    /// Previous node in whichever of `lru`/`in_use` holds this handle.
    pub(crate) prev: *mut Handle<V>,
    /// Next node in whichever of `lru`/`in_use` holds this handle.
    pub(crate) next: *mut Handle<V>,
}

impl<V> Handle<V> {
    /// Allocates a new, live handle. Starts with `refs = 0` and
    /// `in_cache = false`; the caller (always [`crate::shard::Shard::insert`])
    /// sets both before the handle becomes reachable.
    pub(crate) fn new(key: &[u8], hash: u32, value: V, charge: usize, deleter: Deleter<V>) -> Box<Self> {
        Box::new(Handle {
            value: mem::MaybeUninit::new(value),
            deleter: Some(deleter),
            key: key.into(),
            hash,
            charge,
            refs: 0,
            in_cache: false,
            next_hash: ptr::null_mut(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        })
    }

    /// Allocates a sentinel node for an intrusive list. Its `value`/`deleter`
    /// are never touched; its `prev`/`next` are self-loops once
    /// [`crate::list::init_sigil`] runs.
    pub(crate) fn new_sigil() -> Box<Self> {
        Box::new(Handle {
            value: mem::MaybeUninit::uninit(),
            deleter: None,
            key: Box::new([]),
            hash: 0,
            charge: 0,
            refs: 0,
            in_cache: false,
            next_hash: ptr::null_mut(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        })
    }

    /// Returns a view over the entry's key bytes, for the equality and
    /// lookup comparisons [`crate::table::HandleTable`] performs.
    pub(crate) fn key(&self) -> ByteView<'_> {
        ByteView::new(&self.key)
    }

    /// Borrows the stored value.
    ///
    /// # Safety
    ///
    /// Must only be called on a live (non-sigil) handle that has not yet
    /// been finalized, i.e. one with `refs >= 1` reachable from outside
    /// [`Handle::finalize`].
    pub(crate) unsafe fn value_ref(&self) -> &V {
        // SAFETY: upheld by the caller.
        unsafe { self.value.assume_init_ref() }
    }

    /// Consumes a handle whose reference count has just reached zero: runs
    /// its deleter with the key and value, then drops the allocation.
    ///
    /// # Safety
    ///
    /// `handle` must be a live (non-sigil) handle, reachable from nowhere
    /// else (not on a list, not in a table, not aliased by any pointer this
    /// call doesn't own), with `refs == 0`.
    pub(crate) unsafe fn finalize(mut handle: Box<Self>) {
        // SAFETY: a live handle's value is initialized until this, its only
        // extraction point, runs; the caller guarantees this runs at most
        // once per handle (refs == 0 is a terminal state).
        let value = unsafe { handle.value.assume_init_read() };
        if let Some(deleter) = handle.deleter.take() {
            deleter(&handle.key, value);
        } else {
            drop(value);
        }
        // `handle` drops here: frees `key` and the `Handle<V>` allocation.
        // `value`'s slot is `MaybeUninit` and never auto-drops.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn finalize_runs_deleter_exactly_once_with_key_and_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen_key = Arc::new(std::cell::RefCell::new(Vec::new()));
        let seen_value = Arc::new(std::cell::RefCell::new(0));

        let calls2 = calls.clone();
        let seen_key2 = seen_key.clone();
        let seen_value2 = seen_value.clone();
        let mut handle = Handle::new(
            b"k",
            1,
            42,
            1,
            Box::new(move |k: &[u8], v: i32| {
                calls2.fetch_add(1, Ordering::SeqCst);
                *seen_key2.borrow_mut() = k.to_vec();
                *seen_value2.borrow_mut() = v;
            }),
        );
        handle.refs = 1;
        handle.in_cache = false;

        unsafe { Handle::finalize(handle) };

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(&*seen_key.borrow(), b"k");
        assert_eq!(*seen_value.borrow(), 42);
    }

    #[test]
    fn key_is_stored_inline() {
        let handle = Handle::new(b"hello", 7, (), 0, Box::new(|_, _| {}));
        assert_eq!(handle.key(), ByteView::new(b"hello"));
        unsafe { Handle::finalize(handle) };
    }
}
