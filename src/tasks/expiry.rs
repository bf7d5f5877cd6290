//! TTL Expiry Task
//!
//! Single background task that removes entries when their TTL elapses.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::Cache;

/// Spawns the task that services the cache's expiration heap.
///
/// The task sleeps until the earliest scheduled deadline and wakes early
/// whenever a new TTL is set. Abort the returned handle on shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(Cache::new(0));
/// let expiry_handle = spawn_expiry_task(cache.clone());
/// // Later, during shutdown:
/// expiry_handle.abort();
/// ```
pub fn spawn_expiry_task(cache: Arc<Cache>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting TTL expiry task");

        loop {
            let scheduled = cache.expiry_scheduled();
            match cache.next_expiry() {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(Instant::from_std(deadline)) => {}
                        _ = scheduled => {}
                    }
                }
                None => scheduled.await,
            }

            let removed = cache.evict_expired();
            if removed > 0 {
                info!("TTL expiry: removed {} expired entries", removed);
            } else {
                debug!("TTL expiry: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cacher;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn test_expiry_task_removes_expired_entries() {
        let cache = Arc::new(Cache::new(0));
        let handle = spawn_expiry_task(cache.clone());

        cache
            .set("expire_soon", Bytes::from_static(b"v"), Duration::from_millis(100))
            .unwrap();
        assert!(cache.get("expire_soon").is_ok());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache.is_empty(), "Expired entry should have been removed");
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().expirations, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_expiry_task_wakes_for_earlier_deadline() {
        let cache = Arc::new(Cache::new(0));
        let handle = spawn_expiry_task(cache.clone());

        cache
            .set("slow", Bytes::from_static(b"v"), Duration::from_secs(3600))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache
            .set("fast", Bytes::from_static(b"v"), Duration::from_millis(50))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!cache.has("fast"));
        assert!(cache.has("slow"));
        assert_eq!(cache.len(), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_expiry_task_preserves_entries_without_ttl() {
        let cache = Arc::new(Cache::new(0));
        let handle = spawn_expiry_task(cache.clone());

        cache
            .set("forever", Bytes::from_static(b"v"), Duration::ZERO)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.has("forever"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_expiry_task_can_be_aborted() {
        let cache = Arc::new(Cache::new(0));
        let handle = spawn_expiry_task(cache);

        handle.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
