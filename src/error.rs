//! Structured API errors (spec.md §7) and their conversions from the
//! domain-specific error enums each component raises internally.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value as Json_;

use crate::agent::AgentError;
use crate::chat::ChatError;
use crate::compiler::CompileError;
use crate::engine::EngineError;
use crate::matchmaker::MatchError;
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Json_>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("unknown button")]
    UnknownButton,
    #[error("unknown node")]
    UnknownNode,
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("forbidden write: {0}")]
    ForbiddenWrite(String),
    #[error("no branch matched")]
    NoBranchMatched,
    #[error("matchmaking conflict")]
    MatchmakingConflict,
    #[error("chat ended")]
    ChatEnded,
    #[error("gone")]
    Gone,
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::InvalidEvent(_) => "invalid_event",
            ApiError::UnknownButton => "unknown_button",
            ApiError::UnknownNode => "unknown_node",
            ApiError::SchemaMismatch(_) => "schema_mismatch",
            ApiError::ForbiddenWrite(_) => "forbidden_write",
            ApiError::NoBranchMatched => "no_branch_matched",
            ApiError::MatchmakingConflict => "matchmaking_conflict",
            ApiError::ChatEnded => "chat_ended",
            ApiError::Gone => "gone",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidEvent(_)
            | ApiError::UnknownButton
            | ApiError::UnknownNode
            | ApiError::SchemaMismatch(_)
            | ApiError::ForbiddenWrite(_)
            | ApiError::NoBranchMatched => StatusCode::BAD_REQUEST,
            ApiError::MatchmakingConflict | ApiError::ChatEnded => StatusCode::CONFLICT,
            ApiError::Gone => StatusCode::GONE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            details: None,
        };
        if status.is_server_error() {
            tracing::error!(code = body.code, message = %body.message, "request failed");
        } else {
            tracing::debug!(code = body.code, message = %body.message, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::VersionConflict => ApiError::Internal("store contention exhausted".into()),
            StoreError::Other(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::UnknownButton => ApiError::UnknownButton,
            EngineError::UnknownNode => ApiError::UnknownNode,
            EngineError::SchemaMismatch(m) => ApiError::SchemaMismatch(m),
            EngineError::ForbiddenWrite(p) => ApiError::ForbiddenWrite(p),
            EngineError::NoBranchMatched => ApiError::NoBranchMatched,
            EngineError::Gone => ApiError::Gone,
            EngineError::Store(e) => e.into(),
        }
    }
}

impl From<MatchError> for ApiError {
    fn from(e: MatchError) -> Self {
        match e {
            MatchError::Conflict => ApiError::MatchmakingConflict,
            MatchError::Store(e) => e.into(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Forbidden => ApiError::Forbidden,
            ChatError::Ended => ApiError::ChatEnded,
            ChatError::InvalidMessage(m) => ApiError::InvalidEvent(m),
            ChatError::Store(e) => e.into(),
        }
    }
}

impl From<CompileError> for ApiError {
    fn from(e: CompileError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}
