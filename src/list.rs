//! Intrusive circular list operations over [`Handle`] nodes.
//!
//! Each shard owns two such lists, `lru` and `in_use` (see
//! [`crate::shard::Shard`]), both built from the same sentinel convention: the
//! sentinel is a full `Handle` allocation whose `prev`/`next` point at itself
//! when the list is empty (`head.next == head.prev == &head`). Appending
//! inserts immediately before the sentinel, so `head.prev` is always the most
//! recently used entry and `head.next` is always the oldest — eviction always
//! pops from `head.next`.
//!
//! Unlike a self-contained linked list type, these functions do not own the
//! nodes they link: a `Handle` is simultaneously reachable from a shard's
//! hash table (via `next_hash`) independent of which of the two lists its
//! `prev`/`next` currently describes. Ownership and deallocation timing are
//! decided by refcounting in [`crate::shard`], not by list membership.

use crate::handle::Handle;

/// Turns a freshly allocated sentinel into an empty circular list by making
/// it point at itself.
///
/// # Safety
///
/// `sigil` must be a valid, uniquely-owned pointer (typically just obtained
/// via `Box::into_raw`) that nothing else yet references.
pub(crate) unsafe fn init_sigil<V>(sigil: *mut Handle<V>) {
    // SAFETY: caller guarantees `sigil` is a valid, exclusive pointer.
    unsafe {
        (*sigil).prev = sigil;
        (*sigil).next = sigil;
    }
}

/// Returns `true` if the list whose sentinel is `sigil` has no entries.
///
/// # Safety
///
/// `sigil` must point at an initialized sentinel (see [`init_sigil`]).
pub(crate) unsafe fn is_empty<V>(sigil: *mut Handle<V>) -> bool {
    // SAFETY: caller guarantees `sigil` is initialized.
    unsafe { (*sigil).next == sigil }
}

/// Appends `entry` immediately before `sigil` — the most-recently-used end
/// of the list.
///
/// # Safety
///
/// `sigil` must point at an initialized sentinel; `entry` must not already
/// be linked into any list.
pub(crate) unsafe fn attach<V>(sigil: *mut Handle<V>, entry: *mut Handle<V>) {
    // SAFETY: caller guarantees `sigil` is initialized and `entry` is
    // unlinked; inserting immediately before `sigil` preserves the circular
    // invariant for both of `entry`'s new neighbors.
    unsafe {
        let prev = (*sigil).prev;
        (*entry).next = sigil;
        (*entry).prev = prev;
        (*prev).next = entry;
        (*sigil).prev = entry;
    }
}

/// Unlinks `entry` from whichever list currently holds it.
///
/// # Safety
///
/// `entry` must currently be linked into some list built from these
/// functions (its `prev`/`next` must be valid pointers into that list).
pub(crate) unsafe fn detach<V>(entry: *mut Handle<V>) {
    // SAFETY: caller guarantees `entry` is linked into a valid list.
    unsafe {
        let prev = (*entry).prev;
        let next = (*entry).next;
        (*prev).next = next;
        (*next).prev = prev;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;
    use std::boxed::Box;

    fn new_sigil() -> *mut Handle<i32> {
        let raw = Box::into_raw(Handle::new_sigil());
        unsafe { init_sigil(raw) };
        raw
    }

    fn new_entry() -> *mut Handle<i32> {
        Box::into_raw(Handle::new(b"k", 0, 0, 0, Box::new(|_, _| {})))
    }

    unsafe fn free_chain(sigil: *mut Handle<i32>) {
        unsafe {
            let mut cur = (*sigil).next;
            while cur != sigil {
                let next = (*cur).next;
                drop(Box::from_raw(cur));
                cur = next;
            }
            drop(Box::from_raw(sigil));
        }
    }

    #[test]
    fn empty_list_self_loops() {
        let sigil = new_sigil();
        unsafe {
            assert!(is_empty(sigil));
            assert_eq!((*sigil).next, sigil);
            assert_eq!((*sigil).prev, sigil);
            free_chain(sigil);
        }
    }

    #[test]
    fn attach_appends_at_mru_end() {
        unsafe {
            let sigil = new_sigil();
            let a = new_entry();
            let b = new_entry();
            attach(sigil, a);
            attach(sigil, b);

            // oldest (head.next) is `a`, newest (head.prev) is `b`.
            assert_eq!((*sigil).next, a);
            assert_eq!((*sigil).prev, b);
            assert_eq!((*a).next, b);
            assert_eq!((*b).prev, a);
            assert!(!is_empty(sigil));

            free_chain(sigil);
        }
    }

    #[test]
    fn detach_removes_from_the_middle() {
        unsafe {
            let sigil = new_sigil();
            let a = new_entry();
            let b = new_entry();
            let c = new_entry();
            attach(sigil, a);
            attach(sigil, b);
            attach(sigil, c);

            detach(b);
            assert_eq!((*a).next, c);
            assert_eq!((*c).prev, a);

            drop(Box::from_raw(b));
            free_chain(sigil);
        }
    }

    #[test]
    fn detach_last_entry_restores_empty_self_loop() {
        unsafe {
            let sigil = new_sigil();
            let a = new_entry();
            attach(sigil, a);
            detach(a);
            assert!(is_empty(sigil));
            assert_eq!((*sigil).next, sigil);
            assert_eq!((*sigil).prev, sigil);

            drop(Box::from_raw(a));
            free_chain(sigil);
        }
    }
}
