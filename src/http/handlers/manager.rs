//! Manager routes: experimenter-facing config and media management, all
//! behind an authenticated caller (spec.md §6 "HTTP (manager, ...)").

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::{Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::agent::ModelProvider;
use crate::error::ApiError;
use crate::http::state::AppState;
use crate::store::Store;

pub fn router<S: Store + 'static, P: ModelProvider + 'static>() -> Router<AppState<S, P>> {
    use axum::routing::{delete, get, post};
    Router::new()
        .route("/configs/upload", post(upload_config))
        .route("/configs", get(list_configs))
        .route("/configs/:config_id", delete(delete_config))
        .route("/media/upload", post(media_upload))
        .route("/media/upload-url", post(media_upload_url))
        .route("/media", get(media_list))
        .route("/media/:object", delete(media_delete))
}

async fn require_user<S: Store + 'static, P: ModelProvider + 'static>(
    state: &AppState<S, P>,
    headers: &HeaderMap,
) -> Result<String, ApiError> {
    let identity = state.identity().authenticate(headers).await;
    identity.user_id.ok_or(ApiError::Unauthorized)
}

#[derive(Debug, Deserialize)]
struct UploadConfigBody {
    config_id: String,
    checksum: String,
    config: JsonValue,
}

async fn upload_config<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Json(body): Json<UploadConfigBody>,
) -> Result<Json<JsonValue>, ApiError> {
    let owner = require_user(&state, &headers).await?;
    if body.config_id != body.config.get("config_id").and_then(|v| v.as_str()).unwrap_or_default() {
        return Err(ApiError::InvalidEvent("configId does not match the embedded document".into()));
    }
    let (config, diagnostics) = crate::compiler::compile(&body.config)?;
    if config.config_hash != body.checksum {
        return Err(ApiError::InvalidEvent("checksum does not match the compiled document".into()));
    }
    state.store().insert_config(&config, &owner, &config.config_hash).await?;
    Ok(Json(json!({
        "configId": config.config_id,
        "configHash": config.config_hash,
        "owner": owner,
        "diagnostics": diagnostics,
    })))
}

#[derive(Debug, Deserialize)]
struct ListConfigsQuery {
    owner: String,
}

async fn list_configs<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Query(query): Query<ListConfigsQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let caller = require_user(&state, &headers).await?;
    if caller != query.owner {
        return Err(ApiError::Forbidden);
    }
    let configs = state.store().list_configs(&query.owner).await?;
    Ok(Json(json!({
        "configs": configs.iter().map(|c| json!({
            "configId": c.config_id,
            "owner": c.owner,
            "checksum": c.checksum,
            "createdAt": c.created_at,
        })).collect::<Vec<_>>()
    })))
}

async fn delete_config<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Path(config_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let caller = require_user(&state, &headers).await?;
    let owner = state.store().config_owner(&config_id).await?;
    if owner != caller {
        return Err(ApiError::Forbidden);
    }
    state.store().delete_config(&config_id).await?;
    Ok(Json(json!({ "deleted": config_id })))
}

#[derive(Debug, Deserialize)]
struct MediaUploadBody {
    object: String,
    data: String,
    #[serde(default)]
    #[allow(dead_code)]
    content_type: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    public: bool,
}

async fn media_upload<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Json(body): Json<MediaUploadBody>,
) -> Result<Json<JsonValue>, ApiError> {
    require_user(&state, &headers).await?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body.data)
        .map_err(|e| ApiError::InvalidEvent(format!("invalid base64 payload: {e}")))?;
    if bytes.len() > state.settings().media.max_inline_bytes {
        return Err(ApiError::InvalidEvent(format!(
            "payload exceeds the {} byte inline upload limit; use /media/upload-url instead",
            state.settings().media.max_inline_bytes
        )));
    }
    state
        .media()
        .put(&body.object, &bytes)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "object": body.object, "url": state.media().public_url(&body.object) })))
}

#[derive(Debug, Deserialize)]
struct MediaUploadUrlBody {
    object: String,
    content_type: String,
    #[serde(default = "default_upload_url_ttl")]
    ttl_secs: u64,
}

fn default_upload_url_ttl() -> u64 {
    900
}

async fn media_upload_url<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Json(body): Json<MediaUploadUrlBody>,
) -> Result<Json<JsonValue>, ApiError> {
    require_user(&state, &headers).await?;
    let url = state
        .media()
        .signed_upload_url(&body.object, &body.content_type, body.ttl_secs)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "object": body.object, "uploadUrl": url })))
}

#[derive(Debug, Deserialize)]
struct MediaListQuery {
    #[serde(default)]
    prefix: String,
}

async fn media_list<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Query(query): Query<MediaListQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    require_user(&state, &headers).await?;
    let objects = state.media().list(&query.prefix).await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "objects": objects })))
}

async fn media_delete<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Path(object): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    require_user(&state, &headers).await?;
    state.media().delete(&object).await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "deleted": object })))
}
