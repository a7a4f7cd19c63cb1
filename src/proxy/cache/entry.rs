use bytes::Bytes;
use parking_lot::Mutex;

use super::CacheKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct EntryCounters {
    /// Recency rank drawn from the store-wide sequence; larger is more recent.
    pub sequence: u64,
    /// Lookup hits under LFU. Never reset.
    pub use_count: u64,
}

#[derive(Debug)]
pub(super) struct CacheEntry {
    pub key: CacheKey,
    pub body: Bytes,
    /// Guards only the counters; list membership belongs to the store lock. Always taken after
    /// the store lock, never before it.
    pub counters: Mutex<EntryCounters>,
}

impl CacheEntry {
    pub(super) fn new(key: CacheKey, body: Bytes) -> Self {
        Self {
            key,
            body,
            counters: Mutex::new(EntryCounters::default()),
        }
    }

    pub(super) fn size(&self) -> u64 {
        self.body.len() as u64
    }
}
