use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, trace};

mod entry;
mod index;
mod key;
mod policy;

use entry::CacheEntry;
use index::CacheIndex;
pub use key::CacheKey;
pub use policy::EvictionPolicy;

/// Result of [`CacheStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored {
        /// Entries evicted to make room.
        evicted: usize,
        /// An entry with the same key was replaced.
        replaced: bool,
    },
    /// The payload is larger than the whole store and was not cached.
    Oversized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub capacity: u64,
}

/// In-memory response cache shared by all workers.
///
/// Lookups run in parallel under the read side of `index`; only insert and eviction take the
/// write side. Recency and frequency are tracked in per-entry counters behind their own small
/// lock, so a hit never needs to restructure the list. Lock order is always the store lock
/// first, then an entry lock.
#[derive(Debug)]
pub struct CacheStore {
    index: RwLock<CacheIndex>,
    capacity: u64,
    next_sequence: AtomicU64,
}

impl CacheStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            index: RwLock::new(CacheIndex::new()),
            capacity,
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Sizes the store so every worker can hold one in-flight object on top of `base_capacity`.
    pub fn with_worker_slack(base_capacity: u64, worker_count: usize, max_object_size: u64) -> Self {
        let slack = (worker_count as u64).saturating_mul(max_object_size);
        Self::new(base_capacity.saturating_add(slack))
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn lookup(&self, key: &CacheKey, policy: EvictionPolicy) -> Option<Bytes> {
        let index = self.index.read();
        let Some(entry) = index.get(key) else {
            crate::metrics::record_cache_lookup(false);
            return None;
        };
        {
            let mut counters = entry.counters.lock();
            policy.record_hit(&mut counters, || self.bump_sequence());
        }
        let body = entry.body.clone();
        drop(index);
        trace!(%key, policy = %policy, "cache hit");
        crate::metrics::record_cache_lookup(true);
        Some(body)
    }

    pub fn insert(&self, key: CacheKey, body: Bytes, policy: EvictionPolicy) -> InsertOutcome {
        let size = body.len() as u64;
        if size > self.capacity {
            debug!(%key, size, capacity = self.capacity, "payload larger than cache capacity");
            return InsertOutcome::Oversized;
        }
        let entry = CacheEntry::new(key, body);

        let mut index = self.index.write();
        let replaced = index.remove_key(&entry.key).is_some();
        let mut evicted = 0usize;
        while index.bytes_in_use() + size > self.capacity {
            match index.evict_one(policy) {
                Some(victim) => {
                    trace!(key = %victim.key, size = victim.size(), policy = %policy, "evicted cache entry");
                    evicted += 1;
                }
                None => break,
            }
        }
        entry.counters.lock().sequence = self.bump_sequence();
        trace!(key = %entry.key, size, "stored cache entry");
        index.push_front(entry);
        let stats = self.stats_locked(&index);
        drop(index);

        crate::metrics::record_cache_store(evicted, stats.entries, stats.total_bytes);
        InsertOutcome::Stored { evicted, replaced }
    }

    /// Frees every entry and returns how many there were. Meant for shutdown after the workers
    /// have stopped.
    pub fn clear(&self) -> usize {
        let mut index = self.index.write();
        let freed = index.drain();
        drop(index);
        crate::metrics::record_cache_size(0, 0);
        freed
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.read();
        self.stats_locked(&index)
    }

    fn stats_locked(&self, index: &CacheIndex) -> CacheStats {
        CacheStats {
            entries: index.len(),
            total_bytes: index.bytes_in_use(),
            capacity: self.capacity,
        }
    }

    fn bump_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }
}
