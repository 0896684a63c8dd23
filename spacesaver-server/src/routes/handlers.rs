//! Handlers for the HTTP API table in §6. Response shapes are minimal,
//! hand-built `serde_json::json!` bodies in the teacher's handler style
//! (`main.rs::health_handler`, `config_handler`) rather than dedicated
//! response DTOs, since every payload here is small and not reused.

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;
use axum::extract::{Path as AxPath, State};
use axum::Json;
use serde_json::{json, Value};
use spacesaver_core::{CoreError, EntryFilter, MediaId};
use uuid::Uuid;

pub async fn version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    match state.progress.snapshot() {
        Some(progress) => Json(json!({
            "state": "busy",
            "id": progress.id.to_string(),
            "path": progress.path,
            "progress": progress.fraction,
        })),
        None => Json(json!({
            "state": "idle",
            "id": Value::Null,
            "path": Value::Null,
            "progress": Value::Null,
        })),
    }
}

pub async fn list(State(state): State<AppState>) -> ServerResult<Json<Value>> {
    let entries = state.catalog.list(&EntryFilter::default()).await?;
    let summaries: Vec<Value> = entries
        .iter()
        .map(|e| {
            json!({
                "id": e.id.to_string(),
                "path": e.path,
                "category": e.category.to_string(),
                "state": e.state.as_str(),
                "attempts": e.attempts,
                "updated_at": e.updated_at.to_rfc3339(),
            })
        })
        .collect();
    Ok(Json(json!(summaries)))
}

pub async fn get_entry(
    State(state): State<AppState>,
    AxPath(id): AxPath<Uuid>,
) -> ServerResult<Json<Value>> {
    let entry = state.catalog.get(MediaId::from(id)).await?;
    Ok(Json(serde_json::to_value(entry).unwrap_or(Value::Null)))
}

pub async fn enqueue(
    State(state): State<AppState>,
    AxPath(id): AxPath<Uuid>,
) -> ServerResult<Json<Value>> {
    let id = MediaId::from(id);
    // Surfaces 404 for an unknown id before attempting the state
    // transition, so "unknown" and "known but ineligible" map to
    // distinct status codes per §6.
    state.catalog.get(id).await?;
    state.catalog.enqueue(id).await?;
    Ok(Json(json!({ "id": id.to_string(), "state": "pending" })))
}

pub async fn enqueue_best(State(state): State<AppState>) -> ServerResult<Json<Value>> {
    match state.catalog.enqueue_best().await? {
        Some(id) => Ok(Json(json!({ "id": id.to_string(), "state": "pending" }))),
        None => Err(ServerError::Core(CoreError::Conflict(
            "no SKIP or FAILED candidate available to promote".to_string(),
        ))),
    }
}
