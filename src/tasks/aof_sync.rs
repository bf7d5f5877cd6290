//! AOF Sync Task
//!
//! Periodically forces the append-only log to disk.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::Cache;

/// Spawns a task that fsyncs the log every `interval_secs` seconds.
///
/// Sync failures are logged and retried on the next tick.
pub fn spawn_aof_sync_task(cache: Arc<Cache>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!("Starting AOF sync task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            match cache.sync_log() {
                Ok(()) => debug!("AOF synced to disk"),
                Err(e) => warn!(error = %e, "AOF sync failed"),
            }
        }
    })
}
