//! distcache - a replicated in-memory cache
//!
//! A master node owns the authoritative cache and its append-only log,
//! replicas follow it over a TCP replication stream, and a load balancer
//! splits HTTP traffic between them.

pub mod api;
pub mod balancer;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod persistence;
pub mod replication;
pub mod tasks;

pub use api::AppState;
pub use cache::{Cache, Cacher};
pub use config::Config;
pub use error::{CacheError, Result};
