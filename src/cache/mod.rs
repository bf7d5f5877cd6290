//! Cache Module
//!
//! In-memory cache engine: a hash index over a recency queue with per-key
//! expiration, wrapped in a thread-safe [`Cache`] handle that feeds the
//! append-only log and the replication stream.

mod entry;
mod queue;
mod shared;
mod stats;
mod store;


use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

// Re-export public types
pub use entry::CacheEntry;
pub use queue::{NodeId, RecencyQueue};
pub use shared::Cache;
pub use stats::{CacheStats, Removal};
pub use store::{CacheStore, Lookup};

// == Cacher ==
/// The capability set callers depend on, independent of the backing store.
pub trait Cacher: Send + Sync {
    /// Returns the value for `key`, promoting it to most recently used.
    fn get(&self, key: &str) -> Result<Bytes>;

    /// Stores `value` under `key`. A zero `ttl` means no expiration.
    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Reports whether `key` is present, without touching recency or counters.
    fn has(&self, key: &str) -> bool;

    /// Removes `key`, failing with `NotFound` when it is absent.
    fn delete(&self, key: &str) -> Result<()>;

    /// Drops every entry.
    fn reset(&self) -> Result<()>;
}
