//! Replication wire protocol
//!
//! Newline-delimited JSON over a raw TCP connection, in this order:
//!
//! 1. replica -> master: [`NodeInfo`] identity record
//! 2. master -> replica: [`Snapshot`], a map of every key to its value
//! 3. master -> replica: one [`LogRecord`](crate::persistence::LogRecord)
//!    per mutation applied after the snapshot, until either side disconnects

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::{CacheError, Result};
use crate::persistence::text_value;

/// Upper bound on one frame; snapshots travel as a single line.
pub const MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;

// == Snapshot ==
/// Full key/value copy sent to a replica right after its handshake.
///
/// On the wire it is a plain JSON object of key to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot(HashMap<String, Bytes>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> HashMap<String, Bytes> {
        self.0
    }
}

impl From<HashMap<String, Bytes>> for Snapshot {
    fn from(entries: HashMap<String, Bytes>) -> Self {
        Self(entries)
    }
}

impl Deref for Snapshot {
    type Target = HashMap<String, Bytes>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Snapshot {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

struct ValueRef<'a>(&'a Bytes);

impl Serialize for ValueRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        text_value::serialize(self.0, serializer)
    }
}

struct OwnedValue(Bytes);

impl<'de> Deserialize<'de> for OwnedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        text_value::deserialize(deserializer).map(OwnedValue)
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, &ValueRef(value))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries = HashMap::<String, OwnedValue>::deserialize(deserializer)?;
        Ok(Self(entries.into_iter().map(|(k, v)| (k, v.0)).collect()))
    }
}

// == Node Info ==
/// Replica identity, generated once at replica startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_id: u64,
    pub node_ip_addr: String,
    /// Port the replica serves HTTP reads on
    pub port: String,
}

impl NodeInfo {
    pub fn new(node_id: u64, node_ip_addr: impl Into<String>, port: u16) -> Self {
        Self {
            node_id,
            node_ip_addr: node_ip_addr.into(),
            port: port.to_string(),
        }
    }

    /// Picks a random node id.
    pub fn generate_id() -> u64 {
        u64::from(rand::random::<u32>())
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} at {}:{}", self.node_id, self.node_ip_addr, self.port)
    }
}

// == Framing ==
/// Wraps a connection in the line codec used by the replication protocol.
pub fn framed<S>(stream: S) -> Framed<S, LinesCodec>
where
    S: AsyncRead + AsyncWrite,
{
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH))
}

/// Encodes `value` as one JSON line and flushes it.
pub async fn send_frame<S, T>(framed: &mut Framed<S, LinesCodec>, value: &T) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(value)?;
    framed
        .send(line)
        .await
        .map_err(|e| CacheError::Protocol(e.to_string()))
}

/// Reads and decodes the next JSON line. `Ok(None)` means the peer closed
/// the connection cleanly.
pub async fn recv_frame<S, T>(framed: &mut Framed<S, LinesCodec>) -> Result<Option<T>>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: DeserializeOwned,
{
    match framed.next().await {
        Some(Ok(line)) => Ok(Some(serde_json::from_str(&line)?)),
        Some(Err(e)) => Err(CacheError::Protocol(e.to_string())),
        None => Ok(None),
    }
}
