//! Shared cache handle
//!
//! Guards a [`CacheStore`] with one exclusive lock and fans every successful
//! mutation out to the replication stream and the append-only log.
//!
//! Ordering per mutation is apply-then-log: the change is applied and
//! published to replicas under the cache lock, then appended to the log
//! under the log's own lock. A crash between the two loses the mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

use super::{CacheEntry, CacheStats, CacheStore, Cacher, Lookup};
use crate::error::{CacheError, Result};
use crate::persistence::{self, AofLog, LogRecord, ReplayStats};

/// Records buffered per replication subscriber before it is considered lagging.
const REPLICATION_BUFFER: usize = 4096;

// == Cache ==
pub struct Cache {
    store: Mutex<CacheStore>,
    aof: Option<AofLog>,
    replaying: AtomicBool,
    events: broadcast::Sender<LogRecord>,
    expiry: Notify,
}

impl Cache {
    /// Creates an in-memory cache with no log attached.
    pub fn new(max_entries: usize) -> Self {
        let (events, _) = broadcast::channel(REPLICATION_BUFFER);
        Self {
            store: Mutex::new(CacheStore::new(max_entries)),
            aof: None,
            replaying: AtomicBool::new(false),
            events,
            expiry: Notify::new(),
        }
    }

    /// Creates a cache whose mutations are appended to `aof`.
    pub fn with_aof(max_entries: usize, aof: AofLog) -> Self {
        Self {
            aof: Some(aof),
            ..Self::new(max_entries)
        }
    }

    // == Durability ==
    /// Rebuilds state from the attached log without re-appending to it.
    ///
    /// Must run before the node accepts client or replica traffic.
    pub fn replay_log(&self) -> Result<ReplayStats> {
        let Some(aof) = &self.aof else {
            return Ok(ReplayStats::default());
        };

        self.replaying.store(true, Ordering::SeqCst);
        let result = persistence::replay(aof.path(), self);
        self.replaying.store(false, Ordering::SeqCst);
        result
    }

    /// Flushes the log to disk.
    pub fn sync_log(&self) -> Result<()> {
        match &self.aof {
            Some(aof) => aof.sync(),
            None => Ok(()),
        }
    }

    /// Flushes and closes the log. Later mutations stay in memory only.
    pub fn close_log(&self) -> Result<()> {
        match &self.aof {
            Some(aof) => aof.close(),
            None => Ok(()),
        }
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    // == Replication ==
    /// Full point-in-time copy of every key/value pair.
    pub fn export_snapshot(&self) -> HashMap<String, Bytes> {
        self.store.lock().snapshot()
    }

    /// Discards the current state and rebuilds it from `entries`.
    pub fn import_snapshot(&self, entries: HashMap<String, Bytes>) {
        self.store.lock().load_snapshot(entries);
    }

    /// Takes a snapshot and subscribes to later mutations atomically, so
    /// every record after the snapshot arrives on the receiver exactly once.
    pub fn subscribe(&self) -> (HashMap<String, Bytes>, broadcast::Receiver<LogRecord>) {
        let store = self.store.lock();
        let receiver = self.events.subscribe();
        (store.snapshot(), receiver)
    }

    // == Expiry ==
    /// Earliest scheduled expiration, if any.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.store.lock().next_deadline()
    }

    /// Resolves when a new expiration has been scheduled.
    pub fn expiry_scheduled(&self) -> Notified<'_> {
        self.expiry.notified()
    }

    /// Removes every entry whose TTL has elapsed. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let records: Vec<LogRecord> = {
            let mut store = self.store.lock();
            let removed = store.remove_expired(Instant::now());
            removed
                .into_iter()
                .map(|key| {
                    let record = LogRecord::Delete { key };
                    self.publish(&record);
                    record
                })
                .collect()
        };

        for record in &records {
            self.append(record);
        }
        records.len()
    }

    // == Inspection ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.store.lock().stats()
    }

    /// Entries from most to least recently used.
    pub fn entries_by_recency(&self) -> Vec<CacheEntry> {
        self.store.lock().entries().cloned().collect()
    }

    pub fn keys_by_recency(&self) -> Vec<String> {
        self.store.lock().keys_by_recency()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Checks that the index and the recency queue agree.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        self.store.lock().check_consistency()
    }

    // Called with the store lock held so replicas see records in apply order.
    fn publish(&self, record: &LogRecord) {
        if self.is_replaying() {
            return;
        }
        // No subscribers is not an error.
        let _ = self.events.send(record.clone());
    }

    fn append(&self, record: &LogRecord) {
        if self.is_replaying() {
            return;
        }
        if let Some(aof) = &self.aof {
            if let Err(e) = aof.append(record) {
                warn!(error = %e, "Failed to append record to AOF");
            }
        }
    }
}

impl Cacher for Cache {
    // The store lookup itself does not allocate; a miss builds the owned
    // key only for the caller's error.
    fn get(&self, key: &str) -> Result<Bytes> {
        match self.store.lock().get(key, Instant::now()) {
            Lookup::Hit(value) => Ok(value),
            Lookup::Miss => Err(CacheError::NotFound(key.to_string())),
        }
    }

    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let record = LogRecord::set(key, value.clone(), ttl);
        // Refused up front so memory never holds a write the log cannot replay.
        record.check_encodable()?;
        let evicted = {
            let mut store = self.store.lock();
            let evicted = store
                .set(key, value, ttl, Instant::now())
                .map(|key| LogRecord::Delete { key });
            if let Some(eviction) = &evicted {
                self.publish(eviction);
            }
            self.publish(&record);
            evicted
        };

        if let Some(eviction) = &evicted {
            debug!(?eviction, "Evicted least recently used entry");
            self.append(eviction);
        }
        self.append(&record);

        if !ttl.is_zero() {
            self.expiry.notify_one();
        }
        Ok(())
    }

    fn has(&self, key: &str) -> bool {
        self.store.lock().has(key, Instant::now())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let record = LogRecord::Delete {
            key: key.to_string(),
        };
        {
            let mut store = self.store.lock();
            if !store.delete(key) {
                return Err(CacheError::NotFound(key.to_string()));
            }
            self.publish(&record);
        }
        self.append(&record);
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        {
            let mut store = self.store.lock();
            store.reset();
            self.publish(&LogRecord::FlushAll);
        }
        self.append(&LogRecord::FlushAll);
        Ok(())
    }
}
