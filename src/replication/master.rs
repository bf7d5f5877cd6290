//! Master side of replication
//!
//! Accepts replica connections, reads their identity, sends a full snapshot
//! and then streams every later mutation until the replica disconnects.
//!
//! Per-connection states:
//! `Accepted -> Identified -> SnapshotSent -> Active -> Closed`.
//! A connection that fails to identify goes straight to `Closed`; the
//! replica is responsible for reconnecting.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

use super::protocol::{framed, recv_frame, send_frame, NodeInfo, Snapshot};
use crate::cache::Cache;
use crate::error::{CacheError, Result};

/// How long a new connection has to send its identity.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Identified,
    SnapshotSent,
    Active,
    Closed,
}

// == Replica Registry ==
/// A connected replica as reported by the server info endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaSession {
    #[serde(flatten)]
    pub info: NodeInfo,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Table of currently connected replicas, keyed by node id.
#[derive(Debug, Default)]
pub struct ReplicaRegistry {
    sessions: RwLock<HashMap<u64, ReplicaSession>>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: ReplicaSession) {
        self.sessions.write().insert(session.info.node_id, session);
    }

    /// Removes `node_id` if it is still registered from `peer`.
    ///
    /// A replica that reconnects keeps its node id, so the stale session
    /// ending late must not drop the live one.
    pub fn remove(&self, node_id: u64, peer: SocketAddr) -> Option<ReplicaSession> {
        match self.sessions.write().entry(node_id) {
            Entry::Occupied(entry) if entry.get().peer == peer => Some(entry.remove()),
            _ => None,
        }
    }

    /// Connected replicas ordered by node id.
    pub fn connected(&self) -> Vec<ReplicaSession> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.info.node_id);
        sessions
    }

    pub fn contains(&self, node_id: u64) -> bool {
        self.sessions.read().contains_key(&node_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

// == Replication Server ==
pub struct ReplicationServer {
    listener: TcpListener,
    cache: Arc<Cache>,
    registry: Arc<ReplicaRegistry>,
    handshake_timeout: Duration,
}

impl ReplicationServer {
    /// Binds the replication listener.
    pub async fn bind(
        addr: impl tokio::net::ToSocketAddrs,
        cache: Arc<Cache>,
        registry: Arc<ReplicaRegistry>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            cache,
            registry,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts replicas forever, one task per connection.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Listening for replicas on {}", addr),
            Err(e) => warn!(error = %e, "Replication listener has no local address"),
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to accept replica connection");
                    continue;
                }
            };

            let session = ReplicaHandler {
                cache: Arc::clone(&self.cache),
                registry: Arc::clone(&self.registry),
                handshake_timeout: self.handshake_timeout,
                peer,
            };
            tokio::spawn(session.handle(stream));
        }
    }
}

struct ReplicaHandler {
    cache: Arc<Cache>,
    registry: Arc<ReplicaRegistry>,
    handshake_timeout: Duration,
    peer: SocketAddr,
}

impl ReplicaHandler {
    async fn handle(self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle on replica connection");
        }
        let mut conn = framed(stream);
        self.transition(SessionState::Accepted);

        let info = match self.identify(&mut conn).await {
            Ok(info) => info,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Dropping replica that failed to identify");
                self.transition(SessionState::Closed);
                return;
            }
        };
        self.transition(SessionState::Identified);

        let node_id = info.node_id;
        self.registry.register(ReplicaSession {
            info: info.clone(),
            peer: self.peer,
            connected_at: Utc::now(),
        });
        info!(peer = %self.peer, "Replica connected: {}", info);

        match self.replicate(&mut conn).await {
            Ok(()) => info!("Replica disconnected: {}", info),
            Err(e) => warn!(error = %e, "Replica session ended: {}", info),
        }

        self.registry.remove(node_id, self.peer);
        self.transition(SessionState::Closed);
    }

    async fn identify<S>(&self, conn: &mut Framed<S, LinesCodec>) -> Result<NodeInfo>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match timeout(self.handshake_timeout, recv_frame::<_, NodeInfo>(conn)).await {
            Ok(Ok(Some(info))) => Ok(info),
            Ok(Ok(None)) => Err(CacheError::Protocol(
                "connection closed before identity".to_string(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CacheError::Protocol("identity timed out".to_string())),
        }
    }

    async fn replicate<S>(&self, conn: &mut Framed<S, LinesCodec>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (snapshot, mut events) = self.cache.subscribe();
        let entries = snapshot.len();
        send_frame(conn, &Snapshot::from(snapshot)).await?;
        self.transition(SessionState::SnapshotSent);
        debug!(peer = %self.peer, entries, "Snapshot sent");

        self.transition(SessionState::Active);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(record) => send_frame(conn, &record).await?,
                    Err(RecvError::Lagged(missed)) => {
                        return Err(CacheError::Protocol(format!(
                            "replica fell behind by {missed} records"
                        )));
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
                incoming = conn.next() => match incoming {
                    None => return Ok(()),
                    Some(Err(e)) => return Err(CacheError::Protocol(e.to_string())),
                    Some(Ok(line)) => debug!(peer = %self.peer, %line, "Ignoring frame from replica"),
                },
            }
        }
    }

    fn transition(&self, state: SessionState) {
        debug!(peer = %self.peer, ?state, "Replica session state");
    }
}
