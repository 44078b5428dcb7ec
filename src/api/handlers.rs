//! Admin API Handlers
//!
//! Handlers for the operator endpoints: purge, stats and health.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use tracing::info;

use crate::cache::CacheStore;
use crate::error::ApiError;
use crate::models::{HealthResponse, MessageResponse, PurgeRequest, StatsResponse};
use crate::stats::Stats;

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<dyn CacheStore>,
    pub stats: Arc<Stats>,
    /// Name of the configured store, `memory` or `memcached`
    pub backend: &'static str,
}

impl AppState {
    pub fn new(cache: Arc<dyn CacheStore>, stats: Arc<Stats>, backend: &'static str) -> Self {
        Self {
            cache,
            stats,
            backend,
        }
    }
}

/// Handler for POST /purge
///
/// Removes one resource, named by its cache key, from the cache.
pub async fn purge_handler(
    State(state): State<AppState>,
    payload: Result<Json<PurgeRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    req.validate().map_err(ApiError::InvalidRequest)?;

    state.cache.purge(&req.resource).await?;
    info!("purged {} from cache", req.resource);

    Ok(Json(MessageResponse::purged()))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(state.backend, state.stats.snapshot()))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
