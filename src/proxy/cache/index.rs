use std::cmp::Ordering;
use std::collections::HashMap;

use super::entry::EntryCounters;
use super::{CacheEntry, CacheKey, EvictionPolicy};

type SlotId = usize;

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Arena-backed doubly-linked list of entries plus a key index.
///
/// List position carries no recency meaning; eviction order comes from the entry counters.
/// Freed slots are recycled through `free` so slot ids stay stable while an entry is live.
#[derive(Debug, Default)]
pub(super) struct CacheIndex {
    slots: Vec<Option<Slot>>,
    free: Vec<SlotId>,
    by_key: HashMap<CacheKey, SlotId>,
    head: Option<SlotId>,
    bytes_in_use: u64,
}

impl CacheIndex {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(super) fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use
    }

    pub(super) fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        let id = *self.by_key.get(key)?;
        self.slots[id].as_ref().map(|slot| &slot.entry)
    }

    /// Links `entry` at the head of the list. The key must not already be present.
    pub(super) fn push_front(&mut self, entry: CacheEntry) {
        debug_assert!(!self.by_key.contains_key(&entry.key));
        let size = entry.size();
        let key = entry.key.clone();
        let slot = Slot {
            entry,
            prev: None,
            next: self.head,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(slot);
                id
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        if let Some(old_head) = self.head
            && let Some(slot) = self.slots[old_head].as_mut()
        {
            slot.prev = Some(id);
        }
        self.head = Some(id);
        self.by_key.insert(key, id);
        self.bytes_in_use += size;
    }

    pub(super) fn remove_key(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let id = *self.by_key.get(key)?;
        self.unlink(id)
    }

    /// Evicts the entry the policy ranks first, if any.
    pub(super) fn evict_one(&mut self, policy: EvictionPolicy) -> Option<CacheEntry> {
        let victim = self.select_victim(policy)?;
        self.unlink(victim)
    }

    /// Removes every entry, returning how many were freed.
    pub(super) fn drain(&mut self) -> usize {
        let count = self.len();
        self.slots.clear();
        self.free.clear();
        self.by_key.clear();
        self.head = None;
        self.bytes_in_use = 0;
        count
    }

    /// Single full pass over the list. Exclusive access means the per-entry locks can be
    /// bypassed with `get_mut`.
    fn select_victim(&mut self, policy: EvictionPolicy) -> Option<SlotId> {
        let mut best: Option<(SlotId, EntryCounters)> = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let slot = self.slots[id].as_mut()?;
            let counters = *slot.entry.counters.get_mut();
            let replace = match &best {
                None => true,
                Some((_, current)) => policy.victim_order(&counters, current) == Ordering::Less,
            };
            if replace {
                best = Some((id, counters));
            }
            cursor = slot.next;
        }
        best.map(|(id, _)| id)
    }

    fn unlink(&mut self, id: SlotId) -> Option<CacheEntry> {
        let slot = self.slots.get_mut(id)?.take()?;
        match slot.prev {
            Some(prev) => {
                if let Some(prev_slot) = self.slots[prev].as_mut() {
                    prev_slot.next = slot.next;
                }
            }
            None => self.head = slot.next,
        }
        if let Some(next) = slot.next
            && let Some(next_slot) = self.slots[next].as_mut()
        {
            next_slot.prev = slot.prev;
        }
        self.free.push(id);
        self.by_key.remove(&slot.entry.key);
        self.bytes_in_use -= slot.entry.size();
        Some(slot.entry)
    }

    #[cfg(test)]
    pub(super) fn keys_in_list_order(&self) -> Vec<CacheKey> {
        let mut keys = Vec::new();
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let slot = self.slots[id].as_ref().expect("linked slot is occupied");
            keys.push(slot.entry.key.clone());
            cursor = slot.next;
        }
        keys
    }
}
