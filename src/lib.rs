//! A fixed-shard, reference-counted LRU cache.
//!
//! This crate is a Rust port of the cache at the heart of a well-known
//! storage engine: sixteen independent, mutex-guarded LRU shards, a
//! caller-chosen "charge" unit standing in for memory/size/weight, and
//! pinned handles that keep an entry alive past eviction until every holder
//! releases it.
//!
//! ```
//! use sharded_lru_cache::{Cache, CacheConfig};
//!
//! let cache: Cache<&str> = Cache::new(CacheConfig::new(100));
//!
//! let h = cache.insert(b"a", "apple", 1, Box::new(|_, _| {}));
//! assert_eq!(*h.value(), "apple");
//! cache.release(h);
//!
//! assert_eq!(cache.lookup(b"a").map(|h| *h.value()), Some("apple"));
//! assert_eq!(cache.lookup(b"missing").map(|h| *h.value()), None);
//! ```
//!
//! # Why sharded
//!
//! A single mutex around one LRU would serialize every thread touching the
//! cache. Splitting into sixteen independent shards, each guarding its own
//! table and lists, lets unrelated keys proceed concurrently:
//!
//! ```text
//!  thread A ──▶ hash32(key_a) ──▶ shard 0x3 ──▶ Mutex<ShardInner> (locked)
//!  thread B ──▶ hash32(key_b) ──▶ shard 0xc ──▶ Mutex<ShardInner> (locked)
//!  thread C ──▶ hash32(key_c) ──▶ shard 0x3 ──▶ Mutex<ShardInner> (blocked on A)
//! ```
//!
//! Threads A and B never contend; C contends with A only because `key_a` and
//! `key_c` happen to land in the same shard. See [`cache`] for the routing
//! details and why shard selection reads the opposite end of the hash from
//! in-shard bucket selection.
//!
//! # Pinning and the deleter contract
//!
//! `insert` and `lookup` both return a [`CacheHandle`] holding one reference.
//! While any handle to an entry is outstanding, that entry cannot be evicted
//! — it may be logically erased (removed from lookups) while still pinned,
//! in which case it lives on, unreachable, until the last handle is dropped.
//! The `deleter` passed to `insert` runs exactly once, on whichever thread
//! drops that last reference. See [`handle`] for the full state machine.
//!
//! # Capacity
//!
//! Capacity is expressed in charge units the caller defines — bytes, entry
//! count, or anything else consistent across calls. A zero-capacity cache is
//! a valid configuration: `insert` still returns a working handle, and its
//! deleter runs as soon as that handle is released, but nothing is ever kept
//! around for `lookup` to find.

mod coding;
mod hash;
mod list;
mod shard;
mod table;

pub mod cache;
pub mod config;
pub mod handle;
pub mod slice;

pub use cache::{Cache, CacheHandle};
pub use config::CacheConfig;
pub use hash::hash32;
pub use handle::Deleter;
pub use slice::ByteView;
