//! Replication Module
//!
//! Master/replica protocol: the replica identifies itself, receives a full
//! snapshot, then follows a stream of log records.

mod master;
pub mod protocol;
mod replica;

pub use master::{
    ReplicaRegistry, ReplicaSession, ReplicationServer, SessionState, DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use protocol::{NodeInfo, Snapshot};
pub use replica::{wait_until_ready, ReplicaClient, ReplicaState, DEFAULT_RETRY_DELAY};
