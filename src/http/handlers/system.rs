//! Supplemented ambient routes: health check and read-only data export
//! (SPEC_FULL.md §B).

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};

use crate::agent::ModelProvider;
use crate::error::ApiError;
use crate::http::state::AppState;
use crate::store::Store;

pub fn router<S: Store + 'static, P: ModelProvider + 'static>() -> Router<AppState<S, P>> {
    use axum::routing::get;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/export/sessions/:config_id", get(export_sessions))
        .route("/export/events/:session_id", get(export_events))
}

async fn healthz() -> Json<JsonValue> {
    Json(json!({ "status": "healthy" }))
}

async fn require_user<S: Store + 'static, P: ModelProvider + 'static>(
    state: &AppState<S, P>,
    headers: &HeaderMap,
) -> Result<String, ApiError> {
    let identity = state.identity().authenticate(headers).await;
    identity.user_id.ok_or(ApiError::Unauthorized)
}

async fn export_sessions<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Path(config_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let caller = require_user(&state, &headers).await?;
    let owner = state.store().config_owner(&config_id).await?;
    if owner != caller {
        return Err(ApiError::Forbidden);
    }
    let sessions = state.store().list_sessions_for_config(&config_id).await?;
    Ok(Json(json!({ "configId": config_id, "sessions": sessions })))
}

async fn export_events<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let caller = require_user(&state, &headers).await?;
    let session = state.store().get_session(&session_id).await?;
    let owner = state.store().config_owner(&session.config_id).await?;
    if owner != caller {
        return Err(ApiError::Forbidden);
    }
    let events = state.store().list_events_after(&session_id, 0).await?;
    Ok(Json(json!({ "sessionId": session_id, "events": events })))
}
