//! Replica side of replication
//!
//! `Disconnected -> Connecting -> Handshaking -> Syncing -> Ready`.
//! Connection failures are retried after a fixed delay; a dropped session
//! reconnects and resynchronises from a fresh snapshot.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::{framed, recv_frame, send_frame, NodeInfo, Snapshot};
use crate::cache::Cache;
use crate::error::{CacheError, Result};
use crate::persistence::{apply_record, LogRecord};

/// Delay between connection attempts to the master.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaState {
    Disconnected,
    Connecting,
    Handshaking,
    Syncing,
    Ready,
}

// == Replica Client ==
pub struct ReplicaClient {
    master_addr: String,
    node_id: u64,
    http_port: u16,
    cache: Arc<Cache>,
    retry_delay: Duration,
    state: watch::Sender<ReplicaState>,
}

impl ReplicaClient {
    /// Creates a client with a freshly generated node id.
    pub fn new(master_addr: impl Into<String>, http_port: u16, cache: Arc<Cache>) -> Self {
        let (state, _) = watch::channel(ReplicaState::Disconnected);
        Self {
            master_addr: master_addr.into(),
            node_id: NodeInfo::generate_id(),
            http_port,
            cache,
            retry_delay: DEFAULT_RETRY_DELAY,
            state,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Watches the replication state.
    pub fn subscribe(&self) -> watch::Receiver<ReplicaState> {
        self.state.subscribe()
    }

    /// Keeps a replication session alive forever.
    pub async fn run(self) {
        loop {
            self.set_state(ReplicaState::Connecting);
            match TcpStream::connect(&self.master_addr).await {
                Ok(stream) => {
                    info!("Connected to master at {}", self.master_addr);
                    match self.follow(stream).await {
                        Ok(()) => info!("Master closed the replication stream"),
                        Err(e) => warn!(error = %e, "Replication session failed"),
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Error connecting to master at {}, retrying in {:?}",
                        self.master_addr, self.retry_delay
                    );
                }
            }

            self.set_state(ReplicaState::Disconnected);
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Runs one session: identify, load the snapshot, then apply the stream.
    async fn follow(&self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let local_ip = stream.local_addr()?.ip().to_string();
        let info = NodeInfo::new(self.node_id, local_ip, self.http_port);
        let mut conn = framed(stream);

        self.set_state(ReplicaState::Handshaking);
        send_frame(&mut conn, &info).await?;

        self.set_state(ReplicaState::Syncing);
        let snapshot: Snapshot = recv_frame(&mut conn).await?.ok_or_else(|| {
            CacheError::Protocol("master closed the connection before the snapshot".to_string())
        })?;
        let entries = snapshot.len();
        self.cache.import_snapshot(snapshot.into_inner());
        info!(entries, "Local cache seeded from master snapshot");
        self.set_state(ReplicaState::Ready);

        while let Some(record) = recv_frame::<_, LogRecord>(&mut conn).await? {
            debug!(op = record.op(), "Applying replicated record");
            apply_record(self.cache.as_ref(), &record)?;
        }
        Ok(())
    }

    fn set_state(&self, state: ReplicaState) {
        debug!(?state, "Replica state");
        self.state.send_replace(state);
    }
}

/// Waits until the replica has loaded its first snapshot.
pub async fn wait_until_ready(state: &mut watch::Receiver<ReplicaState>) -> Result<()> {
    state
        .wait_for(|s| *s == ReplicaState::Ready)
        .await
        .map(|_| ())
        .map_err(|_| CacheError::Protocol("replication client stopped".to_string()))
}
