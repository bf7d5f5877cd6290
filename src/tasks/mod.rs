//! Background Tasks Module
//!
//! Contains background tasks that run for the lifetime of a cache node.
//!
//! # Tasks
//! - TTL expiry: removes entries when their TTL elapses
//! - AOF sync: periodically forces the append-only log to disk

mod aof_sync;
mod expiry;

pub use aof_sync::spawn_aof_sync_task;
pub use expiry::spawn_expiry_task;
