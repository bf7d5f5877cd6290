//! Append-only file
//!
//! Every mutation is appended as one text line; at startup the file is
//! replayed through the regular cache entry points to rebuild state.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::LogRecord;
use crate::cache::Cacher;
use crate::error::{CacheError, Result};

// == AOF Log ==
/// Write handle for the append-only log, guarded by its own lock.
#[derive(Debug)]
pub struct AofLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl AofLog {
    /// Opens the log for appending, creating it and its directory if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_or_create(&path)?;
        info!(path = %path.display(), "Opened AOF");

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line.
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        record.check_encodable()?;
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(CacheError::LogClosed)?;
        file.write_all(&record.encode())?;
        Ok(())
    }

    /// Forces appended records down to disk.
    pub fn sync(&self) -> Result<()> {
        match self.file.lock().as_mut() {
            Some(file) => Ok(file.sync_data()?),
            None => Err(CacheError::LogClosed),
        }
    }

    /// Flushes and releases the file handle. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if let Some(mut file) = self.file.lock().take() {
            file.flush()?;
            file.sync_all()?;
            info!(path = %self.path.display(), "Closed AOF");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.file.lock().is_none()
    }
}

// == Replay ==
/// Outcome of a log replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records re-applied to the cache
    pub applied: usize,
    /// Blank, malformed or unappliable lines
    pub skipped: usize,
}

/// Re-applies every record in `path`, in file order, through `cache`.
///
/// The file is created when missing. Lines that fail to parse are skipped,
/// so a truncated trailing record is simply ignored. A read error stops the
/// replay but keeps whatever was applied before it.
pub fn replay<C: Cacher + ?Sized>(path: &Path, cache: &C) -> Result<ReplayStats> {
    let file = open_or_create(path)?;
    let reader = BufReader::new(file);
    let mut stats = ReplayStats::default();

    for (number, line) in reader.split(b'\n').enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, line = number + 1, "Stopping AOF replay on read error");
                break;
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match LogRecord::parse(&line).and_then(|record| apply_record(cache, &record)) {
            Ok(()) => stats.applied += 1,
            Err(e) => {
                debug!(error = %e, line = number + 1, "Skipping AOF line");
                stats.skipped += 1;
            }
        }
    }

    info!(
        path = %path.display(),
        applied = stats.applied,
        skipped = stats.skipped,
        "AOF replay complete"
    );
    Ok(stats)
}

/// Applies one record through the cache's public operations.
///
/// Deleting an absent key is not an error here: the key may already have
/// expired or been flushed.
pub fn apply_record<C: Cacher + ?Sized>(cache: &C, record: &LogRecord) -> Result<()> {
    match record {
        LogRecord::Set { key, value, ttl_ms } => {
            cache.set(key, value.clone(), Duration::from_millis(*ttl_ms))
        }
        LogRecord::Delete { key } => match cache.delete(key) {
            Err(CacheError::NotFound(_)) => Ok(()),
            other => other,
        },
        LogRecord::FlushAll => cache.reset(),
    }
}

fn open_or_create(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use bytes::Bytes;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn bytes(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn open_cache(path: &Path) -> Cache {
        let cache = Cache::with_aof(0, AofLog::open(path).unwrap());
        cache.replay_log().unwrap();
        cache
    }

    #[test]
    fn test_append_writes_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        let log = AofLog::open(&path).unwrap();

        log.append(&LogRecord::set("a", bytes("1"), Duration::ZERO))
            .unwrap();
        log.append(&LogRecord::Delete { key: "a".into() }).unwrap();
        log.append(&LogRecord::FlushAll).unwrap();
        log.close().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "SET a 1 0\nDELETE a\nFLUSHALL\n");
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("aof.log");

        let log = AofLog::open(&path).unwrap();
        assert!(path.exists());
        assert!(!log.is_closed());
    }

    #[test]
    fn test_append_after_close_fails() {
        let dir = tempdir().unwrap();
        let log = AofLog::open(dir.path().join("aof.log")).unwrap();

        log.close().unwrap();
        log.close().unwrap();
        assert!(log.is_closed());
        assert!(matches!(
            log.append(&LogRecord::FlushAll),
            Err(CacheError::LogClosed)
        ));
        assert!(matches!(log.sync(), Err(CacheError::LogClosed)));
    }

    #[test]
    fn test_roundtrip_durability_with_zero_ttl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");

        let cache = open_cache(&path);
        cache.set("k", bytes("v"), Duration::ZERO).unwrap();
        cache.close_log().unwrap();
        drop(cache);

        let restored = open_cache(&path);
        assert_eq!(restored.get("k").unwrap(), bytes("v"));
    }

    #[test]
    fn test_values_with_separators_never_reach_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");

        let cache = open_cache(&path);
        cache.set("important", bytes("data"), Duration::ZERO).unwrap();
        for value in ["x\nFLUSHALL\nSET y z", "hello world"] {
            assert!(matches!(
                cache.set("k", bytes(value), Duration::ZERO),
                Err(CacheError::InvalidRequest(_))
            ));
        }
        assert!(!cache.has("k"));
        cache.close_log().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "SET important data 0\n");
        let restored = open_cache(&path);
        assert_eq!(restored.keys_by_recency(), vec!["important"]);
    }

    #[test]
    fn test_replay_does_not_reappend() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        fs::write(&path, "SET a 1 0\nSET b 2 0\nDELETE a\n").unwrap();

        let cache = open_cache(&path);
        cache.close_log().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "SET a 1 0\nSET b 2 0\nDELETE a\n"
        );
        assert_eq!(cache.keys_by_recency(), vec!["b"]);
    }

    #[test]
    fn test_replay_skips_malformed_and_truncated_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        fs::write(&path, "SET a 1 0\nBOGUS line\n\nSET b 2 x\nSET c 3 0\nSET trunc").unwrap();

        let cache = Cache::new(0);
        let stats = replay(&path, &cache).unwrap();

        assert_eq!(stats, ReplayStats { applied: 2, skipped: 3 });
        assert!(cache.has("a"));
        assert!(cache.has("c"));
        assert!(!cache.has("b"));
    }

    #[test]
    fn test_replay_flushall_clears_prior_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        fs::write(&path, "SET a 1 0\nSET b 2 0\nFLUSHALL\nSET c 3 0\n").unwrap();

        let cache = Cache::new(0);
        replay(&path, &cache).unwrap();
        assert_eq!(cache.keys_by_recency(), vec!["c"]);
    }

    #[test]
    fn test_replay_delete_of_absent_key_is_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        fs::write(&path, "DELETE ghost\nDELETE ghost\n").unwrap();

        let cache = Cache::new(0);
        let stats = replay(&path, &cache).unwrap();
        assert_eq!(stats.applied, 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replay_idempotence() {
        let dir = tempdir().unwrap();
        let log = "SET a 1 0\nSET b 2 0\nDELETE a\nSET c 3 0\nSET b 4 0\n";
        let single = dir.path().join("single.log");
        let doubled = dir.path().join("doubled.log");
        fs::write(&single, log).unwrap();
        fs::write(&doubled, format!("{log}{log}")).unwrap();

        let once = Cache::new(0);
        replay(&single, &once).unwrap();

        let twice = Cache::new(0);
        replay(&doubled, &twice).unwrap();
        replay(&doubled, &twice).unwrap();

        assert_eq!(once.export_snapshot(), twice.export_snapshot());
    }

    #[test]
    fn test_replay_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.log");

        let stats = replay(&path, &Cache::new(0)).unwrap();
        assert_eq!(stats, ReplayStats::default());
        assert!(path.exists());
    }

    // Any store behind the narrow interface can be rebuilt from a log.
    #[derive(Default)]
    struct MapCache(parking_lot::Mutex<HashMap<String, Bytes>>);

    impl Cacher for MapCache {
        fn get(&self, key: &str) -> Result<Bytes> {
            self.0
                .lock()
                .get(key)
                .cloned()
                .ok_or_else(|| CacheError::NotFound(key.to_string()))
        }
        fn set(&self, key: &str, value: Bytes, _ttl: Duration) -> Result<()> {
            self.0.lock().insert(key.to_string(), value);
            Ok(())
        }
        fn has(&self, key: &str) -> bool {
            self.0.lock().contains_key(key)
        }
        fn delete(&self, key: &str) -> Result<()> {
            self.0
                .lock()
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| CacheError::NotFound(key.to_string()))
        }
        fn reset(&self) -> Result<()> {
            self.0.lock().clear();
            Ok(())
        }
    }

    #[test]
    fn test_replay_into_alternate_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        fs::write(&path, "SET a 1 0\nSET b 2 0\nDELETE a\n").unwrap();

        let store = MapCache::default();
        replay(&path, &store).unwrap();
        assert!(!store.has("a"));
        assert_eq!(store.get("b").unwrap(), bytes("2"));
    }
}
