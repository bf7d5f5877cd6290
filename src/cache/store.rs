//! Cache Store Module
//!
//! Single-threaded cache core: a hash index over a recency queue plus a
//! min-heap of expiration deadlines. The index and the queue are only ever
//! mutated together, so every key in the index has exactly one node in the
//! queue and vice versa. Locking lives one level up, in [`super::Cache`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::entry::deadline_for;
use super::queue::{NodeId, RecencyQueue};
use super::stats::Removal;
use super::{CacheEntry, CacheStats};

// == Lookup ==
/// Result of a key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(Bytes),
    Miss,
}

// == Cache Store ==
#[derive(Debug)]
pub struct CacheStore {
    /// Key to queue position
    index: HashMap<String, NodeId>,
    /// Entries ordered by recency
    queue: RecencyQueue,
    /// Pending expirations; stale records are skipped when popped
    expirations: BinaryHeap<Reverse<(Instant, String)>>,
    /// Performance statistics
    stats: CacheStats,
    /// Maximum number of entries, 0 = unbounded
    max_entries: usize,
}

impl CacheStore {
    // == Constructor ==
    /// Creates an empty store. `max_entries == 0` disables capacity eviction.
    pub fn new(max_entries: usize) -> Self {
        Self {
            index: HashMap::new(),
            queue: RecencyQueue::new(),
            expirations: BinaryHeap::new(),
            stats: CacheStats::new(),
            max_entries,
        }
    }

    // == Get ==
    /// Looks up a key, promoting it to the head on a hit.
    ///
    /// An entry whose deadline has passed is reported as a miss but left in
    /// place; removal belongs to the expiry task.
    pub fn get(&mut self, key: &str, now: Instant) -> Lookup {
        let live = self
            .index
            .get(key)
            .copied()
            .filter(|&id| self.queue.get(id).is_some_and(|e| !e.is_expired_at(now)));

        match live {
            Some(id) => {
                self.queue.move_to_front(id);
                self.stats.record_lookup(true);
                match self.queue.get(id) {
                    Some(entry) => Lookup::Hit(entry.value.clone()),
                    None => Lookup::Miss,
                }
            }
            None => {
                self.stats.record_lookup(false);
                Lookup::Miss
            }
        }
    }

    // == Set ==
    /// Inserts or overwrites a key and promotes it to the head.
    ///
    /// Overwriting replaces the deadline: a zero `ttl` clears any earlier
    /// expiration. Returns the key evicted to make room, if the store is
    /// bounded and was full.
    pub fn set(&mut self, key: &str, value: Bytes, ttl: Duration, now: Instant) -> Option<String> {
        let expires_at = deadline_for(ttl, now);
        if let Some(deadline) = expires_at {
            self.expirations.push(Reverse((deadline, key.to_string())));
        }

        if let Some(&id) = self.index.get(key) {
            if let Some(entry) = self.queue.get_mut(id) {
                entry.value = value;
                entry.expires_at = expires_at;
            }
            self.queue.move_to_front(id);
            return None;
        }

        let evicted = if self.max_entries > 0 && self.index.len() >= self.max_entries {
            self.evict_oldest()
        } else {
            None
        };

        let id = self.queue.push_front(CacheEntry {
            key: key.to_string(),
            value,
            expires_at,
        });
        self.index.insert(key.to_string(), id);
        evicted
    }

    // == Delete ==
    /// Removes a key. Returns false when the key was absent.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key, Removal::Deleted)
    }

    fn remove(&mut self, key: &str, cause: Removal) -> bool {
        let Some(id) = self.index.remove(key) else {
            return false;
        };
        self.queue.remove(id);
        self.stats.record_removal(cause);
        true
    }

    // == Has ==
    /// Index lookup without promotion or counters.
    pub fn has(&self, key: &str, now: Instant) -> bool {
        self.index
            .get(key)
            .and_then(|&id| self.queue.get(id))
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    // == Reset ==
    /// Drops all entries and zeroes all counters.
    pub fn reset(&mut self) {
        self.index = HashMap::new();
        self.queue.clear();
        self.expirations.clear();
        self.stats.reset();
    }

    // == Snapshot ==
    /// Point-in-time copy of every key/value pair.
    pub fn snapshot(&self) -> HashMap<String, Bytes> {
        self.queue
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect()
    }

    /// Replaces the whole state with `entries`. Imported entries never expire.
    pub fn load_snapshot(&mut self, entries: HashMap<String, Bytes>) {
        let stats = self.stats.clone();
        self.reset();
        self.stats = stats;

        for (key, value) in entries {
            let id = self.queue.push_front(CacheEntry {
                key: key.clone(),
                value,
                expires_at: None,
            });
            self.index.insert(key, id);
        }
    }

    // == Expiry ==
    /// Earliest pending deadline, possibly belonging to a stale record.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.expirations.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Removes every entry whose deadline is at or before `now` and returns
    /// the removed keys.
    pub fn remove_expired(&mut self, now: Instant) -> Vec<String> {
        let mut removed = Vec::new();

        while let Some(Reverse((deadline, _))) = self.expirations.peek() {
            if *deadline > now {
                break;
            }
            let Some(Reverse((deadline, key))) = self.expirations.pop() else {
                break;
            };

            // Skip records made stale by an overwrite or delete.
            let current = self
                .index
                .get(&key)
                .and_then(|&id| self.queue.get(id))
                .and_then(|entry| entry.expires_at);
            if current == Some(deadline) && self.remove(&key, Removal::Expired) {
                removed.push(key);
            }
        }

        removed
    }

    // == Inspection ==
    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.queue.iter().map(|entry| entry.key.clone()).collect()
    }

    /// Entries from most to least recently used.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.queue.iter()
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.with_total_entries(self.index.len())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Checks that the index and the queue describe the same set of nodes.
    pub fn check_consistency(&self) -> Result<(), String> {
        self.queue.check_links()?;

        if self.index.len() != self.queue.len() {
            return Err(format!(
                "index has {} keys but queue has {} nodes",
                self.index.len(),
                self.queue.len()
            ));
        }
        for (key, &id) in &self.index {
            match self.queue.get(id) {
                Some(entry) if entry.key == *key => {}
                _ => return Err(format!("index entry {key} points at the wrong node")),
            }
        }
        Ok(())
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let entry = self.queue.pop_back()?;
        self.index.remove(&entry.key);
        self.stats.record_removal(Removal::Capacity);
        Some(entry.key)
    }
}
