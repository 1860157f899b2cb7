//! Bounded memoization cache with insertion-order eviction.
//!
//! When the number of entries exceeds the capacity, the oldest fraction of
//! entries (by insertion time, not by access) is dropped in one sweep. Reads
//! never reorder entries.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Default number of entries kept before eviction.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Default share of entries dropped on eviction.
pub const DEFAULT_EVICT_FRACTION: f32 = 0.5;

/// Hit/miss counters for a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded map that evicts its oldest entries once over capacity.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
    evict_fraction: f32,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// `evict_fraction` is clamped to (0, 1]; at least one entry is always
    /// evicted when the bound is exceeded.
    #[must_use]
    pub fn new(capacity: usize, evict_fraction: f32) -> Self {
        let evict_fraction = if evict_fraction.is_finite() && evict_fraction > 0.0 {
            evict_fraction.min(1.0)
        } else {
            DEFAULT_EVICT_FRACTION
        };
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            evict_fraction,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Returns a clone of the cached value, recording a hit or a miss.
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces a value. Replacing keeps the original insertion slot.
    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }

    fn evict_oldest(&mut self) {
        let len = self.entries.len();
        let count = ((len as f32 * self.evict_fraction).ceil() as usize).clamp(1, len);
        for _ in 0..count {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.evictions += count as u64;
        debug!(evicted = count, remaining = self.entries.len(), "cache eviction");
    }
}

/// Hex SHA-256 digest of `content`, used as a cache key.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_records_hits_and_misses() {
        let mut cache = BoundedCache::new(4, 0.5);
        cache.insert("a".to_string(), 1);

        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_evicts_oldest_half_when_over_capacity() {
        let mut cache = BoundedCache::new(4, 0.5);
        for i in 0..4 {
            cache.insert(i, i * 10);
        }
        assert_eq!(cache.len(), 4);

        // Fifth entry pushes the cache over its bound: 5 * 0.5 -> 3 evicted
        cache.insert(4, 40);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&3), Some(30));
        assert_eq!(cache.get(&4), Some(40));
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn test_reads_do_not_refresh_position() {
        let mut cache = BoundedCache::new(2, 0.5);
        cache.insert("old", 1);
        cache.insert("new", 2);
        // Reading "old" does not protect it, unlike LRU
        assert_eq!(cache.get(&"old"), Some(1));

        cache.insert("newest", 3);
        assert_eq!(cache.get(&"old"), None);
        assert_eq!(cache.get(&"newest"), Some(3));
    }

    #[test]
    fn test_replace_keeps_insertion_slot() {
        // 3 * 0.3 rounds up to a single eviction
        let mut cache = BoundedCache::new(2, 0.3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.len(), 2);

        cache.insert("c", 3);
        // "a" is still the oldest entry
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_clear() {
        let mut cache = BoundedCache::new(8, 0.5);
        cache.insert(1, 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("hello "));
        assert_eq!(content_hash("").len(), 64);
    }
}
