//! API Handlers
//!
//! HTTP request handlers for the master and replica cache endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::cache::{Cache, Cacher};
use crate::error::{CacheError, Result};
use crate::models::{
    AllEntriesResponse, DeleteResponse, GetResponse, HealthResponse, KeyQuery, ResetResponse,
    ServerInfoResponse, SetRequest, SetResponse, StatsResponse,
};
use crate::replication::{ReplicaRegistry, ReplicaState};

/// Which side of replication a node is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Replica,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Replica => "replica",
        }
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Thread-safe cache handle
    pub cache: Arc<Cache>,
    pub role: NodeRole,
    /// Replicas attached to this node; always empty on a replica
    pub replicas: Arc<ReplicaRegistry>,
    /// Replication progress, present on replicas only
    pub replication: Option<watch::Receiver<ReplicaState>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// State for a master node that tracks its connected replicas.
    pub fn master(cache: Arc<Cache>, replicas: Arc<ReplicaRegistry>) -> Self {
        Self {
            cache,
            role: NodeRole::Master,
            replicas,
            replication: None,
            started_at: Utc::now(),
        }
    }

    /// State for a replica node following a master.
    pub fn replica(cache: Arc<Cache>, replication: watch::Receiver<ReplicaState>) -> Self {
        Self {
            cache,
            role: NodeRole::Replica,
            replicas: Arc::new(ReplicaRegistry::new()),
            replication: Some(replication),
            started_at: Utc::now(),
        }
    }
}

/// Handler for POST /cache/set
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = Duration::from_millis(req.ttl_ms.unwrap_or(0));
    state.cache.set(&req.key, Bytes::from(req.value), ttl)?;
    debug!(key = %req.key, ?ttl, "Key set");

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /cache/get?key=
pub async fn get_handler(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<GetResponse>> {
    let key = query.require()?;
    let value = state.cache.get(&key)?;

    Ok(Json(GetResponse::new(key, &value)))
}

/// Handler for GET /cache/getAll
///
/// Lists every live entry along with the recency order, most recent first.
pub async fn get_all_handler(State(state): State<AppState>) -> Json<AllEntriesResponse> {
    Json(AllEntriesResponse::from_entries(
        state.cache.entries_by_recency(),
    ))
}

/// Handler for DELETE /cache/delete?key=
pub async fn delete_handler(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<DeleteResponse>> {
    let key = query.require()?;
    state.cache.delete(&key)?;

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /cache/reset
pub async fn reset_handler(State(state): State<AppState>) -> Result<Json<ResetResponse>> {
    state.cache.reset()?;
    Ok(Json(ResetResponse::new()))
}

/// Handler for GET /server/info
pub async fn server_info_handler(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    let connected_replicas = state.replicas.connected();

    Json(ServerInfoResponse {
        status: "running".to_string(),
        role: state.role.as_str().to_string(),
        start_time: state.started_at,
        number_of_replicas: connected_replicas.len(),
        connected_replicas,
        total_entries: state.cache.len(),
        replication: state.replication.as_ref().map(|rx| *rx.borrow()),
    })
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master_state() -> AppState {
        AppState::master(Arc::new(Cache::new(0)), Arc::new(ReplicaRegistry::new()))
    }

    fn key(k: &str) -> Query<KeyQuery> {
        Query(KeyQuery {
            key: Some(k.to_string()),
        })
    }

    fn set_request(key: &str, value: &str) -> Json<SetRequest> {
        Json(SetRequest {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms: None,
        })
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let state = master_state();

        let result = set_handler(State(state.clone()), set_request("test_key", "test_value")).await;
        assert!(result.is_ok());

        let response = get_handler(State(state), key("test_key")).await.unwrap();
        assert_eq!(response.value, "test_value");
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let result = get_handler(State(master_state()), key("nonexistent")).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_missing_key_parameter() {
        let result = get_handler(State(master_state()), Query(KeyQuery::default())).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let state = master_state();
        set_handler(State(state.clone()), set_request("to_delete", "value"))
            .await
            .unwrap();

        let result = delete_handler(State(state.clone()), key("to_delete")).await;
        assert!(result.is_ok());

        let result = get_handler(State(state.clone()), key("to_delete")).await;
        assert!(result.is_err());

        let again = delete_handler(State(state), key("to_delete")).await;
        assert!(matches!(again, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reset_and_get_all() {
        let state = master_state();
        for (k, v) in [("a", "1"), ("b", "2")] {
            set_handler(State(state.clone()), set_request(k, v))
                .await
                .unwrap();
        }

        let all = get_all_handler(State(state.clone())).await;
        assert_eq!(all.queue, vec!["b", "a"]);
        assert_eq!(all.entries.len(), 2);

        reset_handler(State(state.clone())).await.unwrap();
        let all = get_all_handler(State(state)).await;
        assert!(all.entries.is_empty());
        assert!(all.queue.is_empty());
    }

    #[tokio::test]
    async fn test_server_info_reports_role() {
        let info = server_info_handler(State(master_state())).await;
        assert_eq!(info.role, "master");
        assert_eq!(info.number_of_replicas, 0);
        assert!(info.replication.is_none());

        let (_tx, rx) = watch::channel(ReplicaState::Ready);
        let replica = AppState::replica(Arc::new(Cache::new(0)), rx);
        let info = server_info_handler(State(replica)).await;
        assert_eq!(info.role, "replica");
        assert_eq!(info.replication, Some(ReplicaState::Ready));
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let response = stats_handler(State(master_state())).await;
        assert_eq!(response.hits, 0);
        assert_eq!(response.misses, 0);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_set_invalid_request() {
        let result = set_handler(State(master_state()), set_request("", "value")).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }
}
