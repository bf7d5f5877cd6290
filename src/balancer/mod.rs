//! Read/write splitting load balancer
//!
//! Holds no cache state: it only decides where a request goes and relays it.

mod proxy;
mod router;

pub use proxy::{create_balancer_router, forward, ProxyState};
pub use router::{classify, LoadBalancer, RequestClass};
