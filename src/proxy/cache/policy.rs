use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::entry::EntryCounters;

/// Eviction policy, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the entry touched least recently.
    Lru,
    /// Evict the entry with the fewest hits; ties go to the least recently touched.
    #[default]
    Lfu,
}

impl EvictionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
        }
    }

    /// Applies a cache hit to an entry's counters.
    pub(super) fn record_hit(self, counters: &mut EntryCounters, next_sequence: impl FnOnce() -> u64) {
        match self {
            EvictionPolicy::Lru => counters.sequence = next_sequence(),
            EvictionPolicy::Lfu => counters.use_count = counters.use_count.saturating_add(1),
        }
    }

    /// Orders entries by eviction priority; `Ordering::Less` means `a` goes first.
    pub(super) fn victim_order(self, a: &EntryCounters, b: &EntryCounters) -> Ordering {
        match self {
            EvictionPolicy::Lru => a.sequence.cmp(&b.sequence),
            EvictionPolicy::Lfu => a
                .use_count
                .cmp(&b.use_count)
                .then_with(|| a.sequence.cmp(&b.sequence)),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(sequence: u64, use_count: u64) -> EntryCounters {
        EntryCounters {
            sequence,
            use_count,
        }
    }

    #[test]
    fn lru_prefers_smallest_sequence() {
        let a = counters(5, 0);
        let b = counters(3, 10);
        assert_eq!(EvictionPolicy::Lru.victim_order(&b, &a), Ordering::Less);
        assert_eq!(EvictionPolicy::Lru.victim_order(&a, &b), Ordering::Greater);
    }

    #[test]
    fn lfu_breaks_frequency_ties_by_sequence() {
        let a = counters(10, 2);
        let b = counters(4, 2);
        assert_eq!(EvictionPolicy::Lfu.victim_order(&b, &a), Ordering::Less);

        let rare = counters(50, 1);
        assert_eq!(EvictionPolicy::Lfu.victim_order(&rare, &b), Ordering::Less);
    }

    #[test]
    fn hits_touch_only_the_policy_counter() {
        let mut entry = counters(1, 0);
        EvictionPolicy::Lru.record_hit(&mut entry, || 9);
        assert_eq!(entry.sequence, 9);
        assert_eq!(entry.use_count, 0);

        EvictionPolicy::Lfu.record_hit(&mut entry, || unreachable!());
        assert_eq!(entry.sequence, 9);
        assert_eq!(entry.use_count, 1);
    }
}
