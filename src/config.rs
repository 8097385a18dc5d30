//! Configuration for [`crate::cache::Cache`].

use std::fmt;

/// Configuration for a [`crate::cache::Cache`].
///
/// There is only one knob: total capacity, in the caller's charge units,
/// split evenly across the cache's sixteen shards. Unlike the multi-variant
/// config types this crate's ambient styling is drawn from, there is no
/// segment-count field to set — the shard count is architectural (see
/// `src/cache.rs`'s `NUM_SHARDS`), not a tunable.
///
/// # Examples
///
/// ```
/// use sharded_lru_cache::CacheConfig;
///
/// let config = CacheConfig::new(1_000_000);
/// assert_eq!(config.capacity(), 1_000_000);
/// ```
#[derive(Clone, Copy)]
pub struct CacheConfig {
    capacity: usize,
}

impl CacheConfig {
    /// Creates a configuration with the given total capacity, in
    /// caller-chosen charge units. A capacity of `0` is valid: it configures
    /// every shard to the zero-capacity special case (see
    /// [`crate::shard::Shard::insert`]'s docs), turning caching off while
    /// preserving the insert/release/deleter protocol.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        CacheConfig { capacity }
    }

    /// Returns the configured total capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig").field("capacity", &self.capacity).finish()
    }
}
