//! Transparent HTTP forwarding
//!
//! Every request hitting the balancer is relayed to the backend chosen by
//! [`LoadBalancer::route`], and the backend's status, headers and body are
//! relayed back. No retries: an unreachable backend fails that request only.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName},
    response::Response,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::LoadBalancer;
use crate::error::{CacheError, Result};

/// Largest request body the balancer will buffer before forwarding.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

#[derive(Clone)]
pub struct ProxyState {
    pub balancer: Arc<LoadBalancer>,
    pub client: reqwest::Client,
}

/// Builds the balancer's router: a single fallback that forwards everything.
pub fn create_balancer_router(balancer: Arc<LoadBalancer>, timeout: Duration) -> Result<Router> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CacheError::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Router::new()
        .fallback(forward)
        .layer(TraceLayer::new_for_http())
        .with_state(ProxyState { balancer, client }))
}

/// Relays one request to its backend.
pub async fn forward(State(state): State<ProxyState>, req: Request) -> Result<Response> {
    let (parts, body) = req.into_parts();

    let path = parts.uri.path();
    let backend = state.balancer.route(&parts.method, path);
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);
    let url = format!("{}{}", backend, path_and_query);
    debug!(method = %parts.method, %url, "Forwarding request");

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| CacheError::InvalidRequest(format!("Unreadable request body: {}", e)))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    let upstream = state
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            warn!(%url, error = %e, "Backend unreachable");
            CacheError::Upstream(format!("{}: {}", backend, e))
        })?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| CacheError::Upstream(format!("{}: {}", backend, e)))?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}
