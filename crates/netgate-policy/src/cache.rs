//! Optional verdict cache in front of the index

use moka::sync::Cache;
use netgate_common::{ConnectionTuple, GenerationId, Verdict};
use std::time::Duration;

/// Verdict cache keyed by tuple
///
/// Entries remember the generation that produced them and are only served
/// for that generation, so a publish makes every older entry a miss.
pub struct VerdictCache {
    cache: Cache<ConnectionTuple, Verdict>,
    capacity: u64,
}

impl VerdictCache {
    /// Create cache with capacity and entry lifetime
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self { cache, capacity }
    }

    /// Get cached verdict if it was computed against `generation`
    #[inline]
    pub fn get(&self, tuple: &ConnectionTuple, generation: GenerationId) -> Option<Verdict> {
        self.cache
            .get(tuple)
            .filter(|verdict| verdict.generation == generation)
    }

    /// Insert verdict
    #[inline]
    pub fn insert(&self, tuple: ConnectionTuple, verdict: Verdict) {
        self.cache.insert(tuple, verdict);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Configured capacity
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Approximate number of entries
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.cache.entry_count() == 0
    }
}

impl std::fmt::Debug for VerdictCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}
