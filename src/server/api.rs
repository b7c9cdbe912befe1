//! HTTP API of a cache node.
//!
//! Peer protocol:
//! - POST /_groupcache/get
//! - POST /_groupcache/invalidate
//!
//! Client and admin surface:
//! - GET  /v1/groups/{group}/keys/{key}
//! - POST /v1/groups/{group}/invalidate
//! - POST /v1/groups/{group}/clear
//! - POST /v1/groups/{group}/reset
//! - PUT  /v1/peers
//! - GET  /v1/stats
//! - GET  /metrics
//! - GET  /health

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Error;
use crate::group::Invalidation;
use crate::metrics::GroupStats;
use crate::peers::protocol::{
    status_for, ErrorBody, PeerInvalidateRequest, PeerRequest, PEER_GET_PATH, PEER_INVALIDATE_PATH,
};
use crate::registry::GroupRegistry;

/// Application state shared across handlers.
pub struct AppState {
    pub registry: Arc<GroupRegistry>,
    /// Deadline applied to client-facing lookups.
    pub request_timeout: Duration,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(registry: Arc<GroupRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            request_timeout,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(PEER_GET_PATH, post(peer_get))
        .route(PEER_INVALIDATE_PATH, post(peer_invalidate))
        .route("/v1/groups/{group}/keys/{key}", get(get_key))
        .route("/v1/groups/{group}/invalidate", post(invalidate))
        .route("/v1/groups/{group}/clear", post(clear))
        .route("/v1/groups/{group}/reset", post(reset))
        .route("/v1/peers", put(set_peers).get(list_peers))
        .route("/v1/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct PeersBody {
    pub peers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateRequest {
    /// A key, or "*" for every key.
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct GroupStatsResponse {
    pub name: String,
    pub quota_bytes: usize,
    pub ttl_secs: Option<f64>,
    pub stats: GroupStats,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub self_addr: String,
    pub peers: usize,
    pub groups: usize,
}

fn error_response(err: &Error) -> Response {
    let status = StatusCode::from_u16(status_for(err)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody::from(err))).into_response()
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn peer_get(State(state): State<Arc<AppState>>, Json(req): Json<PeerRequest>) -> Response {
    let request_id = Uuid::new_v4();
    debug!(%request_id, group = %req.group, key_len = req.key.len(), "Peer request");

    let group = match state.registry.group(&req.group) {
        Ok(group) => group,
        Err(err) => return error_response(&err),
    };
    match group.serve_peer(&req.key).await {
        Ok(value) => value.into_response(),
        Err(err) => {
            debug!(%request_id, error = %err, "Peer request failed");
            error_response(&err)
        }
    }
}

/// Applied locally only; the sender already routed it.
async fn peer_invalidate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PeerInvalidateRequest>,
) -> Response {
    let group = match state.registry.group(&req.group) {
        Ok(group) => group,
        Err(err) => return error_response(&err),
    };
    let target = match req.key {
        Some(key) => Invalidation::Key(key.into()),
        None => Invalidation::All,
    };
    debug!(group = %req.group, ?target, "Peer invalidation");
    group.invalidate_local(&target);
    StatusCode::NO_CONTENT.into_response()
}

async fn get_key(
    State(state): State<Arc<AppState>>,
    Path((group, key)): Path<(String, String)>,
) -> Response {
    let group = match state.registry.group(&group) {
        Ok(group) => group,
        Err(err) => return error_response(&err),
    };
    match group.get_with_timeout(key.as_bytes(), state.request_timeout).await {
        Ok(value) => value.into_response(),
        Err(err) => error_response(&err),
    }
}

async fn invalidate(
    State(state): State<Arc<AppState>>,
    Path(group): Path<String>,
    Json(req): Json<InvalidateRequest>,
) -> Response {
    match state.registry.invalidate(&group, Invalidation::parse(&req.key)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

async fn clear(State(state): State<Arc<AppState>>, Path(group): Path<String>) -> Response {
    match state.registry.clear(&group) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

async fn reset(State(state): State<Arc<AppState>>, Path(group): Path<String>) -> Response {
    match state.registry.reset(&group) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

async fn set_peers(State(state): State<Arc<AppState>>, Json(body): Json<PeersBody>) -> Json<PeersBody> {
    info!(peers = ?body.peers, "Replacing peer set");
    state.registry.peers().set_peers(&body.peers);
    Json(PeersBody {
        peers: state.registry.peers().peers(),
    })
}

async fn list_peers(State(state): State<Arc<AppState>>) -> Json<PeersBody> {
    Json(PeersBody {
        peers: state.registry.peers().peers(),
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<Vec<GroupStatsResponse>> {
    let groups = state
        .registry
        .groups()
        .into_iter()
        .map(|group| GroupStatsResponse {
            name: group.name().to_string(),
            quota_bytes: group.options().quota_bytes,
            ttl_secs: group.options().ttl.map(|ttl| ttl.as_secs_f64()),
            stats: group.stats(),
        })
        .collect();
    Json(groups)
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.encode_metrics() {
        Ok(text) => text.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let peers = state.registry.peers();
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        self_addr: peers.self_addr().to_string(),
        peers: peers.peers().len(),
        groups: state.registry.groups().len(),
    })
}
