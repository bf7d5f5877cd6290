//! API Routes
//!
//! Configures the Axum routers for master and replica nodes.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    delete_handler, get_all_handler, get_handler, health_handler, reset_handler,
    server_info_handler, set_handler, stats_handler, AppState,
};

/// Endpoints served by every node.
fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/cache/get", get(get_handler))
        .route("/cache/getAll", get(get_all_handler))
        .route("/server/info", get(server_info_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
}

fn with_middleware(router: Router<AppState>, state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Creates the master router: the read endpoints plus the write endpoints.
///
/// # Endpoints
/// - `POST /cache/set` - Store a key-value pair with optional TTL
/// - `DELETE /cache/delete?key=` - Delete a key
/// - `POST /cache/reset` - Drop every entry
/// - `GET /cache/get?key=`, `GET /cache/getAll`
/// - `GET /server/info`, `GET /stats`, `GET /health`
pub fn create_master_router(state: AppState) -> Router {
    let router = read_routes()
        .route("/cache/set", post(set_handler))
        .route("/cache/delete", delete(delete_handler))
        .route("/cache/reset", post(reset_handler));

    with_middleware(router, state)
}

/// Creates the read-only replica router.
pub fn create_replica_router(state: AppState) -> Router {
    with_middleware(read_routes(), state)
}
