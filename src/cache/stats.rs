//! Cache Statistics Module
//!
//! Lookup and removal counters kept alongside the store.

use serde::Serialize;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Explicit delete
    Deleted,
    /// TTL elapsed
    Expired,
    /// Dropped to stay within `max_entries`
    Capacity,
}

// == Cache Stats ==
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    /// Lookups of absent or expired keys
    pub misses: u64,
    /// Entries removed for any reason
    pub evictions: u64,
    /// Subset of `evictions` caused by TTL expiry
    pub expirations: u64,
    /// Subset of `evictions` caused by the capacity bound
    pub capacity_evictions: u64,
    /// Filled in when a snapshot of the counters is taken
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// hits / (hits + misses), or 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }

    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn record_lookup(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    pub fn record_removal(&mut self, cause: Removal) {
        self.evictions += 1;
        match cause {
            Removal::Deleted => {}
            Removal::Expired => self.expirations += 1,
            Removal::Capacity => self.capacity_evictions += 1,
        }
    }

    /// Copy of the counters stamped with the current entry count.
    pub fn with_total_entries(&self, total_entries: usize) -> Self {
        Self {
            total_entries,
            ..self.clone()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
