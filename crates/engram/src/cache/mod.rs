//! TTL-aware LRU cache for query results
//!
//! Bounded cache keyed by namespace-prefixed query fingerprints. Entries
//! expire lazily after their TTL; expired entries encountered while making
//! room are evicted before any live entry, regardless of LRU order. The
//! cache is shared mutable state across all callers, so every operation
//! takes the internal mutex.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use tracing::debug;

use crate::memory::types::QueryHit;

/// A cached, ordered query result list.
#[derive(Debug)]
struct CacheEntry {
    value: Vec<QueryHit>,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

/// Hit/miss counters exposed to the observability sink.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Bounded TTL+LRU cache of query results.
pub struct QueryCache {
    inner: Mutex<Inner>,
    max_entries: usize,
}

impl QueryCache {
    /// Create a cache holding at most `max_entries` results.
    pub fn new(max_entries: usize) -> Self {
        Self {
            // Capacity is enforced manually in put_at so expired entries
            // can be evicted ahead of live ones.
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                hits: 0,
                misses: 0,
            }),
            max_entries: max_entries.max(1),
        }
    }

    /// Look up a key, counting a hit or miss.
    pub fn get(&self, key: &str) -> Option<Vec<QueryHit>> {
        self.get_at(key, Instant::now())
    }

    /// Insert or overwrite a key with the given TTL.
    pub fn put(&self, key: &str, value: Vec<QueryHit>, ttl: Duration) {
        self.put_at(key, value, ttl, Instant::now());
    }

    /// Current counters. `hit_rate` is 0 when no lookups have happened.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                inner.hits as f64 / total as f64
            },
        }
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<Vec<QueryHit>> {
        let inner = &mut *self.inner.lock().unwrap();

        let expired = match inner.entries.peek(key) {
            None => {
                inner.misses += 1;
                debug!(key, "query cache miss");
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.entries.pop(key);
            inner.misses += 1;
            debug!(key, "query cache miss (expired)");
            return None;
        }

        inner.hits += 1;
        debug!(key, "query cache hit");
        // get() promotes the key to most-recently-used.
        inner
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    pub(crate) fn put_at(&self, key: &str, value: Vec<QueryHit>, ttl: Duration, now: Instant) {
        let inner = &mut *self.inner.lock().unwrap();

        if inner.entries.len() >= self.max_entries && inner.entries.peek(key).is_none() {
            // Prefer an expired victim over the LRU entry.
            let victim = inner
                .entries
                .iter()
                .find(|(_, entry)| entry.is_expired(now))
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    inner.entries.pop(&k);
                }
                None => {
                    inner.entries.pop_lru();
                }
            }
        }

        inner.entries.put(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
            },
        );
    }
}
