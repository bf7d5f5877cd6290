//! Integration Tests for Replication
//!
//! Runs a real replication listener and replica clients over loopback.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use distcache::cache::{Cache, Cacher};
use distcache::replication::{
    protocol::{framed, recv_frame, send_frame, NodeInfo, Snapshot},
    wait_until_ready, ReplicaClient, ReplicaRegistry, ReplicationServer,
};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

// == Helper Functions ==

async fn start_master(cache: Arc<Cache>) -> (SocketAddr, Arc<ReplicaRegistry>) {
    let registry = Arc::new(ReplicaRegistry::new());
    let server = ReplicationServer::bind("127.0.0.1:0", cache, Arc::clone(&registry))
        .await
        .unwrap()
        .with_handshake_timeout(Duration::from_millis(500));
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, registry)
}

async fn start_replica(addr: SocketAddr) -> Arc<Cache> {
    let cache = Arc::new(Cache::new(0));
    let client = ReplicaClient::new(addr.to_string(), 9000, Arc::clone(&cache))
        .with_retry_delay(Duration::from_millis(50));
    let mut state = client.subscribe();
    tokio::spawn(client.run());

    timeout(Duration::from_secs(5), wait_until_ready(&mut state))
        .await
        .expect("replica did not become ready")
        .unwrap();
    cache
}

/// Polls until `check` passes or two seconds elapse.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn value(s: &str) -> Bytes {
    Bytes::from(s.to_string())
}

/// TCP relay in front of the master whose connections can be cut.
struct Relay {
    addr: SocketAddr,
    open: Arc<AtomicBool>,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Relay {
    async fn start(target: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let open = Arc::new(AtomicBool::new(true));
        let links = Arc::new(Mutex::new(Vec::new()));

        let (accepting, tracked) = (Arc::clone(&open), Arc::clone(&links));
        tokio::spawn(async move {
            loop {
                let Ok((mut inbound, _)) = listener.accept().await else {
                    continue;
                };
                // Closed: the connection is dropped as soon as it arrives.
                if !accepting.load(Ordering::SeqCst) {
                    continue;
                }
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(target).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                tracked.lock().push(link);
            }
        });

        Self { addr, open, links }
    }

    /// Drops every relayed connection and refuses new ones.
    fn cut(&self) {
        self.open.store(false, Ordering::SeqCst);
        for link in self.links.lock().drain(..) {
            link.abort();
        }
    }

    fn restore(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

// == Snapshot Transfer ==

#[tokio::test]
async fn test_replica_receives_exact_snapshot() {
    let master = Arc::new(Cache::new(0));
    master.set("a", value("1"), Duration::ZERO).unwrap();
    master.set("b", value("2"), Duration::ZERO).unwrap();
    let (addr, registry) = start_master(Arc::clone(&master)).await;

    let replica = start_replica(addr).await;

    let expected: HashMap<String, Bytes> =
        [("a".to_string(), value("1")), ("b".to_string(), value("2"))]
            .into_iter()
            .collect();
    assert_eq!(replica.export_snapshot(), expected);
    assert!(eventually(|| registry.len() == 1).await);
}

#[tokio::test]
async fn test_raw_handshake_wire_shape() {
    let master = Arc::new(Cache::new(0));
    master.set("k", value("v"), Duration::ZERO).unwrap();
    let (addr, registry) = start_master(master).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut conn = framed(stream);
    send_frame(&mut conn, &NodeInfo::new(42, "127.0.0.1", 8082))
        .await
        .unwrap();
    let snapshot: Snapshot = recv_frame(&mut conn).await.unwrap().unwrap();

    assert_eq!(snapshot.get("k"), Some(&value("v")));
    assert!(eventually(|| registry.contains(42)).await);

    drop(conn);
    assert!(eventually(|| registry.is_empty()).await);
}

#[tokio::test]
async fn test_malformed_identity_is_dropped() {
    let (addr, registry) = start_master(Arc::new(Cache::new(0))).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"this is not json\n").await.unwrap();

    let mut conn = framed(stream);
    let reply: Option<Snapshot> = timeout(Duration::from_secs(2), recv_frame(&mut conn))
        .await
        .unwrap()
        .unwrap_or(None);
    assert!(reply.is_none());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_reconnect_with_same_id_survives_stale_session() {
    let (addr, registry) = start_master(Arc::new(Cache::new(0))).await;

    let mut stale = framed(TcpStream::connect(addr).await.unwrap());
    send_frame(&mut stale, &NodeInfo::new(7, "127.0.0.1", 8082))
        .await
        .unwrap();
    let _: Snapshot = recv_frame(&mut stale).await.unwrap().unwrap();

    let mut live = framed(TcpStream::connect(addr).await.unwrap());
    send_frame(&mut live, &NodeInfo::new(7, "127.0.0.1", 8082))
        .await
        .unwrap();
    let _: Snapshot = recv_frame(&mut live).await.unwrap().unwrap();
    assert!(eventually(|| registry.len() == 1).await);

    // Give the master time to notice the first connection closing.
    drop(stale);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(registry.contains(7));

    drop(live);
    assert!(eventually(|| registry.is_empty()).await);
}

// == Streaming ==

#[tokio::test]
async fn test_writes_after_sync_reach_replica() {
    let master = Arc::new(Cache::new(0));
    master.set("seed", value("0"), Duration::ZERO).unwrap();
    let (addr, _) = start_master(Arc::clone(&master)).await;
    let replica = start_replica(addr).await;

    master.set("a", value("1"), Duration::ZERO).unwrap();
    master.set("a", value("2"), Duration::ZERO).unwrap();
    master.delete("seed").unwrap();

    assert!(eventually(|| replica.get("a").ok() == Some(value("2"))).await);
    assert!(eventually(|| !replica.has("seed")).await);

    master.reset().unwrap();
    assert!(eventually(|| replica.is_empty()).await);
}

#[tokio::test]
async fn test_multiple_replicas_stay_in_sync() {
    let master = Arc::new(Cache::new(0));
    let (addr, registry) = start_master(Arc::clone(&master)).await;
    let first = start_replica(addr).await;
    let second = start_replica(addr).await;
    assert!(eventually(|| registry.len() == 2).await);

    for i in 0..50 {
        master
            .set(&format!("key{}", i), value(&i.to_string()), Duration::ZERO)
            .unwrap();
    }

    let expected = master.export_snapshot();
    assert!(eventually(|| first.export_snapshot() == expected).await);
    assert!(eventually(|| second.export_snapshot() == expected).await);
}

#[tokio::test]
async fn test_replica_resyncs_after_session_drops() {
    let master = Arc::new(Cache::new(0));
    master.set("gone", value("old"), Duration::ZERO).unwrap();
    master.set("kept", value("1"), Duration::ZERO).unwrap();
    let (addr, registry) = start_master(Arc::clone(&master)).await;
    let relay = Relay::start(addr).await;
    let replica = start_replica(relay.addr).await;
    assert!(eventually(|| registry.len() == 1).await);

    relay.cut();
    assert!(eventually(|| registry.is_empty()).await);

    master.delete("gone").unwrap();
    master.set("kept", value("2"), Duration::ZERO).unwrap();
    master.set("new", value("3"), Duration::ZERO).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(replica.has("gone"));
    assert_eq!(replica.get("kept").unwrap(), value("1"));

    // Only a fresh snapshot can carry what changed while disconnected.
    relay.restore();
    let expected = master.export_snapshot();
    assert!(eventually(|| replica.export_snapshot() == expected).await);
    assert!(eventually(|| registry.len() == 1).await);
}
