//! Load Balancer Routing
//!
//! Sends writes and administrative requests to the master and spreads reads
//! across replicas in round-robin order.

use axum::http::Method;
use parking_lot::Mutex;

/// Paths under this prefix always go to the master.
const ADMIN_PREFIX: &str = "/server/";

/// Cache paths that mutate state regardless of the method used.
const WRITE_PATHS: [&str; 3] = ["/cache/set", "/cache/delete", "/cache/reset"];

/// How a request is routed, decided from its method and path only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Admin,
    Write,
    Read,
}

/// Classifies a request by declared intent.
pub fn classify(method: &Method, path: &str) -> RequestClass {
    if path.starts_with(ADMIN_PREFIX) {
        return RequestClass::Admin;
    }
    if WRITE_PATHS.iter().any(|p| *p == path) || !(*method == Method::GET || *method == Method::HEAD) {
        return RequestClass::Write;
    }
    RequestClass::Read
}

/// Routing state for one balancer instance.
#[derive(Debug)]
pub struct LoadBalancer {
    /// Base URL of the master's HTTP API
    master: String,
    /// Base URLs of replica HTTP APIs
    replicas: Vec<String>,
    /// Round-robin cursor; the lock covers the increment only
    next: Mutex<usize>,
}

impl LoadBalancer {
    /// Creates a balancer. Addresses without a scheme get `http://`.
    pub fn new(
        master: impl AsRef<str>,
        replicas: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        Self {
            master: base_url(master.as_ref()),
            replicas: replicas.into_iter().map(|r| base_url(r.as_ref())).collect(),
            next: Mutex::new(0),
        }
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn replicas(&self) -> &[String] {
        &self.replicas
    }

    /// Picks the backend for a request.
    ///
    /// Reads fall back to the master when no replica is configured.
    pub fn route(&self, method: &Method, path: &str) -> &str {
        match classify(method, path) {
            RequestClass::Admin | RequestClass::Write => self.master.as_str(),
            RequestClass::Read => self.next_replica().unwrap_or(self.master.as_str()),
        }
    }

    /// Advances the round-robin cursor and returns the replica it pointed at.
    pub fn next_replica(&self) -> Option<&str> {
        if self.replicas.is_empty() {
            return None;
        }
        let idx = {
            let mut next = self.next.lock();
            let idx = *next % self.replicas.len();
            *next = next.wrapping_add(1);
            idx
        };
        self.replicas.get(idx).map(String::as_str)
    }
}

fn base_url(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}
