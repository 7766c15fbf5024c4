//! Local admin API for operator trust decisions.
//!
//! Runs inside the node so decisions land in the live trust store: change
//! notifications reach the routing table and a block takes effect on the
//! next packet. Bind it to loopback only.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

use meshtrust_core::{CoreError, PeerId, TrustRecord, TrustStatus};
use meshtrust_store::{StoreError, TrustStore};

/// Shared state for API handlers.
pub struct ApiState {
    pub store: Arc<TrustStore>,
    pub peer_id: PeerId,
    pub start_time: Instant,
}

// --- Request / response types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub peer_id: PeerId,
    pub peer_count: usize,
    pub pending_count: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<TrustRecord>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct PeersQuery {
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddPeerRequest {
    pub peer_id: PeerId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<IpAddr>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignRequest {
    pub address: Option<IpAddr>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub peer_id: PeerId,
    pub status: TrustStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn store_error(err: StoreError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        StoreError::PeerNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Core(CoreError::InvalidTransition { .. }) | StoreError::AddressInUse { .. } => {
            StatusCode::CONFLICT
        }
        StoreError::KeyMismatch(_) | StoreError::Core(CoreError::InvalidPeerId(_)) => {
            StatusCode::BAD_REQUEST
        }
        _ => {
            tracing::error!(error = %err, "admin request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

// --- Handlers ---

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

async fn handle_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        peer_id: state.peer_id.clone(),
        peer_count: state.store.len(),
        pending_count: state.store.pending_inbound().len(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn handle_list_peers(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PeersQuery>,
) -> Json<PeersResponse> {
    let peers = if query.pending {
        state.store.pending_inbound()
    } else {
        state.store.list_peers()
    };
    let count = peers.len();
    Json(PeersResponse { peers, count })
}

async fn handle_get_peer(
    State(state): State<Arc<ApiState>>,
    Path(peer_id): Path<PeerId>,
) -> ApiResult<TrustRecord> {
    state
        .store
        .get(&peer_id)
        .map(Json)
        .ok_or_else(|| store_error(StoreError::PeerNotFound(peer_id)))
}

async fn handle_add_peer(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<AddPeerRequest>,
) -> ApiResult<TrustRecord> {
    let public_key = req
        .peer_id
        .public_key_bytes()
        .map_err(|e| store_error(e.into()))?;
    state
        .store
        .add_pending_outbound(&req.peer_id, public_key, req.name)
        .map_err(store_error)?;
    if req.address.is_some() {
        state
            .store
            .assign_address(&req.peer_id, req.address)
            .map_err(store_error)?;
    }
    handle_get_peer(State(state), Path(req.peer_id)).await
}

fn decide(
    state: &ApiState,
    peer_id: PeerId,
    decision: fn(&TrustStore, &PeerId) -> Result<TrustStatus, StoreError>,
) -> ApiResult<DecisionResponse> {
    let status = decision(&state.store, &peer_id).map_err(store_error)?;
    Ok(Json(DecisionResponse { peer_id, status }))
}

async fn handle_approve(
    State(state): State<Arc<ApiState>>,
    Path(peer_id): Path<PeerId>,
) -> ApiResult<DecisionResponse> {
    decide(&state, peer_id, TrustStore::approve)
}

async fn handle_reject(
    State(state): State<Arc<ApiState>>,
    Path(peer_id): Path<PeerId>,
) -> ApiResult<DecisionResponse> {
    decide(&state, peer_id, TrustStore::reject)
}

async fn handle_block(
    State(state): State<Arc<ApiState>>,
    Path(peer_id): Path<PeerId>,
) -> ApiResult<DecisionResponse> {
    decide(&state, peer_id, TrustStore::block)
}

async fn handle_unblock(
    State(state): State<Arc<ApiState>>,
    Path(peer_id): Path<PeerId>,
) -> ApiResult<DecisionResponse> {
    decide(&state, peer_id, TrustStore::unblock)
}

async fn handle_remove(
    State(state): State<Arc<ApiState>>,
    Path(peer_id): Path<PeerId>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    if state.store.remove(&peer_id).map_err(store_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(store_error(StoreError::PeerNotFound(peer_id)))
    }
}

async fn handle_rename(
    State(state): State<Arc<ApiState>>,
    Path(peer_id): Path<PeerId>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<TrustRecord> {
    state
        .store
        .set_display_name(&peer_id, &req.name)
        .map_err(store_error)?;
    handle_get_peer(State(state), Path(peer_id)).await
}

async fn handle_assign(
    State(state): State<Arc<ApiState>>,
    Path(peer_id): Path<PeerId>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<TrustRecord> {
    state
        .store
        .assign_address(&peer_id, req.address)
        .map_err(store_error)?;
    handle_get_peer(State(state), Path(peer_id)).await
}

// --- Server ---

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/peers", get(handle_list_peers).post(handle_add_peer))
        .route("/api/v1/peers/{peer_id}", get(handle_get_peer).delete(handle_remove))
        .route("/api/v1/peers/{peer_id}/approve", post(handle_approve))
        .route("/api/v1/peers/{peer_id}/reject", post(handle_reject))
        .route("/api/v1/peers/{peer_id}/block", post(handle_block))
        .route("/api/v1/peers/{peer_id}/unblock", post(handle_unblock))
        .route("/api/v1/peers/{peer_id}/name", put(handle_rename))
        .route("/api/v1/peers/{peer_id}/address", put(handle_assign))
        .with_state(state)
}

/// Serve the admin API on an already-bound listener.
pub async fn serve(listener: TcpListener, state: Arc<ApiState>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "admin API started");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
