//! HTTP server for the asset cache
//!
//! Provides /health plus get/check/put/purge endpoints under /assets.

use crate::types::{
    AssetIdsResponse, ExistsResponse, FetchQuery, HealthResponse, PrefixQuery, StoreResponse,
};
use asset_storage::{
    Asset, AssetId, LocalAssetStore, NegativeResultCache, PutResult, StorageError, StorageManager,
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub manager: StorageManager,
    pub local: Arc<LocalAssetStore>,
    pub negative_cache: Arc<NegativeResultCache>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(
        manager: StorageManager,
        local: Arc<LocalAssetStore>,
        negative_cache: Arc<NegativeResultCache>,
    ) -> Self {
        Self {
            manager,
            local,
            negative_cache,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn storage_error_response(err: &StorageError) -> Response {
    match err {
        StorageError::InvalidAssetId => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        StorageError::DurabilityTimeout { .. } => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure"),
    }
}

fn parse_id(raw: &str) -> Result<AssetId, Response> {
    raw.parse::<AssetId>()
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid asset ID"))
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/assets", get(list_assets).delete(purge_all))
        .route(
            "/assets/{id}",
            get(get_asset).put(put_asset).delete(purge_asset),
        )
        .route("/assets/{id}/exists", get(check_asset))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.local.cache().stats(),
        negative_entries: state.negative_cache.entry_count().await,
    })
}

/// List locally known asset ids starting with `prefix`
async fn list_assets(
    State(state): State<SharedState>,
    Query(query): Query<PrefixQuery>,
) -> Json<AssetIdsResponse> {
    let ids = state
        .manager
        .get_locally_known_asset_ids(&query.prefix)
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    Json(AssetIdsResponse { ids })
}

/// Fetch an asset's bytes
async fn get_asset(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let mut found = None;
    let lookup = state
        .manager
        .get_asset(id, |asset| found = Some(asset), || {}, query.cache)
        .await;

    match (lookup, found) {
        (Ok(()), Some(asset)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(asset.data))
            .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "Bad response")),
        (Ok(()), None) => error_response(StatusCode::NOT_FOUND, "Asset not found"),
        (Err(e), _) => {
            warn!(%id, error = %e, "Failed to get asset");
            storage_error_response(&e)
        }
    }
}

/// Report whether an asset can be found
async fn check_asset(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let mut found = false;
    match state.manager.check_asset(id, |f| found = f).await {
        Ok(()) => Json(ExistsResponse { found }).into_response(),
        Err(e) => {
            warn!(%id, error = %e, "Failed to check asset");
            storage_error_response(&e)
        }
    }
}

/// Store an asset
async fn put_asset(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let mut outcome = PutResult::Failure;
    if let Err(e) = state
        .manager
        .store_asset(Asset::new(id, body.to_vec()), |result| outcome = result)
        .await
    {
        return storage_error_response(&e);
    }

    let status = match outcome {
        PutResult::Done => StatusCode::CREATED,
        PutResult::Duplicate => StatusCode::CONFLICT,
        PutResult::Failure => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(StoreResponse {
            result: outcome.to_string(),
        }),
    )
        .into_response()
}

/// Drop one asset from local storage
async fn purge_asset(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.local.purge(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Asset not found"),
        Err(e) => {
            error!(%id, error = %e, "Failed to purge asset");
            storage_error_response(&e)
        }
    }
}

/// Drop every locally stored asset
async fn purge_all(State(state): State<SharedState>) -> Response {
    match state.local.purge_all().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to purge local assets");
            storage_error_response(&e)
        }
    }
}
