//! API Handlers
//!
//! HTTP request handlers for the operator endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::cache::{CacheOptions, NamespacedCache};
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::models::{
    BreakersResponse, DeleteResponse, FlushResponse, GetResponse, HealthResponse, SetRequest,
    SetResponse,
};
use crate::resilience::{BreakerRegistry, BreakerSnapshot, CircuitState};
use crate::store::{ReconnectPolicy, StoreAdapter};

/// Application state shared across all handlers.
///
/// Built once at bootstrap; clones share the same cache and breakers.
#[derive(Clone)]
pub struct AppState {
    pub cache: NamespacedCache,
    pub breakers: BreakerRegistry,
}

impl AppState {
    pub fn new(cache: NamespacedCache, breakers: BreakerRegistry) -> Self {
        Self { cache, breakers }
    }

    /// Creates state around an existing store adapter with configured breaker defaults.
    pub fn from_config(config: &Config, adapter: StoreAdapter) -> Self {
        Self::new(
            NamespacedCache::new(adapter),
            BreakerRegistry::new(config.breaker_defaults()),
        )
    }

    /// State backed by a fresh in-process store, for tests and local runs.
    pub fn in_memory(max_entries: usize) -> Self {
        let backend = crate::store::MemoryBackend::new(max_entries);
        let adapter = StoreAdapter::new(std::sync::Arc::new(backend), ReconnectPolicy::default());
        Self::new(NamespacedCache::new(adapter), BreakerRegistry::default())
    }
}

/// Handler for GET /cache/:namespace/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Result<Json<GetResponse>> {
    let options = CacheOptions::new().with_namespace(namespace.clone());
    let value: Value = state
        .cache
        .get(&key, &options)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("{}:{}", namespace, key)))?;

    Ok(Json(GetResponse::new(namespace, key, value)))
}

/// Handler for PUT /cache/:namespace/:key
pub async fn set_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate(&key) {
        return Err(ApiError::InvalidRequest(error_msg));
    }

    let mut options = CacheOptions::new().with_namespace(namespace.clone());
    options.ttl = req.ttl;
    if !state.cache.set(&key, &req.value, &options).await {
        return Err(ApiError::CacheUnavailable(format!(
            "Could not store {}:{}",
            namespace, key
        )));
    }

    Ok(Json(SetResponse::new(namespace, key)))
}

/// Handler for DELETE /cache/:namespace/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>> {
    if !state.cache.delete(&key, Some(&namespace)).await {
        return Err(ApiError::NotFound(format!("{}:{}", namespace, key)));
    }

    Ok(Json(DeleteResponse::new(namespace, key)))
}

/// Handler for DELETE /cache/:namespace
pub async fn flush_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<FlushResponse>> {
    if !state.cache.flush(Some(&namespace)).await {
        return Err(ApiError::CacheUnavailable(format!(
            "Could not flush namespace '{}'",
            namespace
        )));
    }

    Ok(Json(FlushResponse::new(namespace)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<crate::cache::StatsSnapshot> {
    Json(state.cache.stats())
}

/// Handler for GET /breakers
pub async fn breakers_handler(State(state): State<AppState>) -> Json<BreakersResponse> {
    Json(BreakersResponse {
        breakers: state.breakers.snapshots(),
    })
}

/// Handler for POST /breakers/:name/reset
pub async fn reset_breaker_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BreakerSnapshot>> {
    let breaker = state
        .breakers
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("breaker '{}'", name)))?;
    breaker.reset();

    Ok(Json(breaker.snapshot()))
}

/// Handler for POST /breakers/reset
pub async fn reset_all_breakers_handler(State(state): State<AppState>) -> Json<BreakersResponse> {
    state.breakers.reset_all();
    Json(BreakersResponse {
        breakers: state.breakers.snapshots(),
    })
}

/// Handler for GET /health
///
/// Probes the cache store; reports degraded rather than failing when it is down.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let adapter = state.cache.adapter();
    let cache_ready = adapter.ping().await;
    let open_breakers = state
        .breakers
        .snapshots()
        .into_iter()
        .filter(|snapshot| snapshot.state != CircuitState::Closed)
        .map(|snapshot| snapshot.name)
        .collect();

    Json(HealthResponse::new(
        cache_ready,
        adapter.state_label(),
        adapter.target(),
        open_breakers,
    ))
}
