//! # Bounded TTL Cache
//!
//! The evaluator's read-through cache: bounded capacity with
//! least-recently-used eviction, per-entry TTL, and explicit invalidation.
//! Never authoritative; a miss just means a store read.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use warden_types::TimestampMs;

struct Slot<V> {
    value: V,
    inserted_ms: TimestampMs,
    last_used: u64,
}

struct Inner<K, V> {
    map: HashMap<K, Slot<V>>,
    use_counter: u64,
}

/// Bounded LRU cache with TTL expiry.
pub struct LruTtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    ttl_ms: i64,
}

impl<K: Eq + Hash + Clone, V: Clone> LruTtlCache<K, V> {
    /// Create a cache holding at most `capacity` entries, each valid for
    /// `ttl_ms` after insertion.
    #[must_use]
    pub fn new(capacity: usize, ttl_ms: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                use_counter: 0,
            }),
            capacity: capacity.max(1),
            ttl_ms,
        }
    }

    /// Fetch a live entry, refreshing its LRU position. Expired entries
    /// are dropped on access.
    #[must_use]
    pub fn get(&self, key: &K, now_ms: TimestampMs) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.map.get(key) {
            Some(slot) => now_ms - slot.inserted_ms >= self.ttl_ms,
            None => return None,
        };
        if expired {
            inner.map.remove(key);
            return None;
        }
        inner.use_counter += 1;
        let counter = inner.use_counter;
        let slot = inner.map.get_mut(key)?;
        slot.last_used = counter;
        Some(slot.value.clone())
    }

    /// Insert or replace, evicting the least-recently-used entry when at
    /// capacity.
    pub fn insert(&self, key: K, value: V, now_ms: TimestampMs) {
        let mut inner = self.inner.lock();
        inner.use_counter += 1;
        let counter = inner.use_counter;

        if !inner.map.contains_key(&key) && inner.map.len() >= self.capacity {
            if let Some(lru_key) = inner
                .map
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&lru_key);
            }
        }
        inner.map.insert(
            key,
            Slot {
                value,
                inserted_ms: now_ms,
                last_used: counter,
            },
        );
    }

    /// Drop one entry.
    pub fn invalidate(&self, key: &K) {
        self.inner.lock().map.remove(key);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.inner.lock().map.clear();
    }

    /// Live entry count (expired entries may still be counted until
    /// touched).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }
}
