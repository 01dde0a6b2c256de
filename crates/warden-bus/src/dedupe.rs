//! # Producer Dedupe Cache
//!
//! At-least-once delivery means handlers see redelivered messages. Handlers
//! whose effects are not naturally idempotent screen arrivals through this
//! time-bounded `(producer, sequence)` cache. Entries are garbage-collected
//! after the validity window so memory stays bounded.

use std::collections::HashMap;
use thiserror::Error;
use warden_types::TimestampMs;

/// Errors from dedupe checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DedupeError {
    /// The `(producer, seq)` pair was already processed inside the window.
    #[error("Duplicate delivery: {producer} seq {seq}")]
    Duplicate { producer: String, seq: u64 },
}

/// Time-bounded cache of processed `(producer_id, producer_seq)` pairs.
pub struct ProducerDedupeCache {
    seen: HashMap<(String, u64), TimestampMs>,
    /// How long a pair is remembered.
    window_ms: i64,
    /// How often expired entries are swept.
    gc_interval_ms: i64,
    last_gc_ms: TimestampMs,
}

impl ProducerDedupeCache {
    /// Default memory window: one hour, far beyond any redelivery horizon.
    pub const DEFAULT_WINDOW_MS: i64 = 60 * 60 * 1000;

    /// Default sweep interval.
    pub const DEFAULT_GC_INTERVAL_MS: i64 = 10_000;

    /// Create a cache with default windows.
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(Self::DEFAULT_WINDOW_MS)
    }

    /// Create a cache with an explicit memory window.
    #[must_use]
    pub fn with_window(window_ms: i64) -> Self {
        Self {
            seen: HashMap::new(),
            window_ms,
            gc_interval_ms: Self::DEFAULT_GC_INTERVAL_MS,
            last_gc_ms: 0,
        }
    }

    /// Record an arrival. Returns `Err(Duplicate)` if the pair was already
    /// seen inside the window.
    pub fn check_and_insert(
        &mut self,
        producer: &str,
        seq: u64,
        now_ms: TimestampMs,
    ) -> Result<(), DedupeError> {
        self.maybe_gc(now_ms);
        let key = (producer.to_string(), seq);
        if self.seen.contains_key(&key) {
            return Err(DedupeError::Duplicate {
                producer: producer.to_string(),
                seq,
            });
        }
        self.seen.insert(key, now_ms);
        Ok(())
    }

    /// Number of remembered pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn maybe_gc(&mut self, now_ms: TimestampMs) {
        if now_ms - self.last_gc_ms < self.gc_interval_ms {
            return;
        }
        let window = self.window_ms;
        self.seen.retain(|_, seen_at| now_ms - *seen_at < window);
        self.last_gc_ms = now_ms;
    }
}

impl Default for ProducerDedupeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_arrival_passes_duplicate_fails() {
        let mut cache = ProducerDedupeCache::new();
        assert!(cache.check_and_insert("proxy", 1, 1_000).is_ok());
        assert_eq!(
            cache.check_and_insert("proxy", 1, 1_001),
            Err(DedupeError::Duplicate {
                producer: "proxy".to_string(),
                seq: 1
            })
        );
    }

    #[test]
    fn test_distinct_producers_do_not_collide() {
        let mut cache = ProducerDedupeCache::new();
        assert!(cache.check_and_insert("proxy", 1, 0).is_ok());
        assert!(cache.check_and_insert("meter", 1, 0).is_ok());
    }

    #[test]
    fn test_entries_expire_after_window() {
        let mut cache = ProducerDedupeCache::with_window(100);
        assert!(cache.check_and_insert("proxy", 1, 0).is_ok());

        // Past the window and past the GC interval: the entry is swept and
        // the pair is accepted again.
        let later = ProducerDedupeCache::DEFAULT_GC_INTERVAL_MS + 200;
        assert!(cache.check_and_insert("proxy", 1, later).is_ok());
    }

    #[test]
    fn test_gc_bounds_memory() {
        let mut cache = ProducerDedupeCache::with_window(50);
        for seq in 0..100 {
            assert!(cache.check_and_insert("proxy", seq, seq as i64).is_ok());
        }
        let later = ProducerDedupeCache::DEFAULT_GC_INTERVAL_MS + 1_000;
        cache.check_and_insert("proxy", 100_000, later).unwrap();
        assert!(cache.len() < 100);
    }
}
