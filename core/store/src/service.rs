//! HTTP surface over [`MemoryStore`].
//!
//! Store calls are synchronous SQLite work, so every handler hops onto the
//! blocking pool.

use agent_memory_schemas::{MemoryId, MemoryPatch, NewMemory};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::database::MemoryStore;
use crate::error::{MemoryError, Result};

/// Results returned by `/search` when `top_k` is not given
pub const DEFAULT_TOP_K: i64 = 3;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
}

pub fn router(store: Arc<MemoryStore>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/search", get(search))
        .route("/memories", post(save_memory))
        .route("/memories/recent", get(recent_memories))
        .route(
            "/memories/:id",
            get(get_memory).patch(update_memory).delete(delete_memory),
        )
        .route("/memories/:id/verify", post(verify_memory))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store })
}

fn status_for(e: &MemoryError) -> StatusCode {
    match e {
        MemoryError::NotFound(_) => StatusCode::NOT_FOUND,
        MemoryError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Run a store call on the blocking pool and map failures to HTTP errors.
async fn with_store<T, F>(state: &AppState, action: &str, f: F) -> std::result::Result<T, (StatusCode, String)>
where
    T: Send + 'static,
    F: FnOnce(&MemoryStore) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    let outcome = tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| {
            error!("{} task failed: {}", action, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    outcome.map_err(|e| {
        let status = status_for(&e);
        if status.is_server_error() {
            error!("{} failed: {}", action, e);
        } else {
            info!("{} rejected: {}", action, e);
        }
        (status, e.to_string())
    })
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "agent-memory",
        "status": "healthy",
        "embedder": state.store.embedder().model_name(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn stats(
    State(state): State<AppState>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let (count, report) = with_store(&state, "Stats", |store| {
        Ok((store.count()?, store.check_consistency()?))
    })
    .await?;

    Ok(Json(serde_json::json!({
        "memories": count,
        "consistent": report.is_consistent(),
        "indexes": report
    })))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default = "default_top_k")]
    top_k: i64,
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    info!("Searching: {} (top_k: {})", params.q, params.top_k);

    // Non-positive top_k is an empty answer, not an error
    let top_k = usize::try_from(params.top_k).unwrap_or(0);
    let results = with_store(&state, "Search", move |store| store.query(&params.q, top_k)).await?;

    info!("Found {} results", results.len());
    Ok(Json(results))
}

async fn save_memory(
    State(state): State<AppState>,
    Json(memory): Json<NewMemory>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let id = with_store(&state, "Save", move |store| store.save(&memory)).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "status": "success",
            "id": id,
            "message": format!("Memory saved with ID {}", id)
        })),
    ))
}

async fn get_memory(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let id = MemoryId(id);
    let memory = with_store(&state, "Get", move |store| store.get(id)).await?;

    match memory {
        Some(memory) => Ok(Json(memory)),
        None => Err((StatusCode::NOT_FOUND, MemoryError::NotFound(id).to_string())),
    }
}

async fn update_memory(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<MemoryPatch>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let id = MemoryId(id);
    let memory = with_store(&state, "Update", move |store| store.update(id, &patch)).await?;

    Ok(Json(memory))
}

async fn delete_memory(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let id = MemoryId(id);
    with_store(&state, "Delete", move |store| store.delete(id)).await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "message": format!("Memory {} deleted", id)
    })))
}

async fn verify_memory(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let id = MemoryId(id);
    let memory = with_store(&state, "Verify", move |store| {
        store.verify(id)?;
        store.get(id)?.ok_or(MemoryError::NotFound(id))
    })
    .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "id": id,
        "last_verified_at": memory.last_verified_at
    })))
}

fn default_recent_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

async fn recent_memories(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let limit = params.limit.clamp(1, 100);
    let memories = with_store(&state, "Recent", move |store| store.recent(limit)).await?;

    Ok(Json(serde_json::json!({ "memories": memories })))
}
