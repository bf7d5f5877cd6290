//! Response DTOs for the cache node API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheEntry, CacheStats};
use crate::replication::{ReplicaSession, ReplicaState};

/// Response body for `GET /cache/get`
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value, decoded lossily as UTF-8
    pub value: String,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: &[u8]) -> Self {
        Self {
            key: key.into(),
            value: String::from_utf8_lossy(value).into_owned(),
        }
    }
}

/// Response body for `GET /cache/getAll`
#[derive(Debug, Clone, Serialize)]
pub struct AllEntriesResponse {
    /// Every key and its value
    pub entries: BTreeMap<String, String>,
    /// Keys from most to least recently used
    pub queue: Vec<String>,
}

impl AllEntriesResponse {
    /// Builds the response from entries ordered head to tail.
    pub fn from_entries(entries: Vec<CacheEntry>) -> Self {
        let queue = entries.iter().map(|e| e.key.clone()).collect();
        let entries = entries
            .into_iter()
            .map(|e| (e.key, String::from_utf8_lossy(&e.value).into_owned()))
            .collect();
        Self { entries, queue }
    }
}

/// Response body for `POST /cache/set`
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for `DELETE /cache/delete`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for `POST /cache/reset`
#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub message: String,
}

impl ResetResponse {
    pub fn new() -> Self {
        Self {
            message: "Cache reset successful".to_string(),
        }
    }
}

impl Default for ResetResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of removals (delete, expiry, capacity eviction)
    pub evictions: u64,
    pub expirations: u64,
    pub capacity_evictions: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            expirations: stats.expirations,
            capacity_evictions: stats.capacity_evictions,
            total_entries: stats.total_entries,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Response body for `GET /server/info`
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfoResponse {
    pub status: String,
    /// "master" or "replica"
    pub role: String,
    pub start_time: DateTime<Utc>,
    /// Replicas currently attached to this master
    pub connected_replicas: Vec<ReplicaSession>,
    pub number_of_replicas: usize,
    pub total_entries: usize,
    /// Replication progress, only reported by replicas
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicaState>,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
