//! API Module
//!
//! HTTP handlers and routing for cache nodes. Masters accept writes,
//! replicas only serve reads.

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::{create_master_router, create_replica_router};
