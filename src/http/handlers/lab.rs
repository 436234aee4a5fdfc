//! Lab routes: participant-facing session lifecycle, advance, generic event
//! log, SSE stream, and chat (spec.md §6 "HTTP (lab, participant-facing)").

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::{Json, Router};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::agent::ModelProvider;
use crate::domain::EventType;
use crate::engine::AdvanceRequest;
use crate::error::ApiError;
use crate::http::state::AppState;
use crate::push::PushFrame;
use crate::store::Store;

pub fn router<S: Store + 'static, P: ModelProvider + 'static>() -> Router<AppState<S, P>> {
    use axum::routing::{get, post};
    Router::new()
        .route("/sessions/start", post(start_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/advance", post(advance))
        .route("/sessions/:id/events", post(post_event))
        .route("/sessions/:id/stream", get(stream))
        .route("/chat/:group_id/message", post(chat_message))
}

#[derive(Debug, Deserialize)]
struct StartSessionBody {
    config_id: String,
    participant_id: Option<String>,
}

async fn start_session<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    headers: HeaderMap,
    Json(body): Json<StartSessionBody>,
) -> Result<Json<JsonValue>, ApiError> {
    let config = state.store().get_config(&body.config_id).await?;
    if config.require_auth {
        let identity = state.identity().authenticate(&headers).await;
        if identity.user_id.is_none() {
            return Err(ApiError::Unauthorized);
        }
    }
    let participant_id = body.participant_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let (session, page) = state.engine().start_session(&body.config_id, &participant_id).await?;
    Ok(Json(json!({
        "sessionId": session.session_id,
        "currentPageId": session.current_page_id,
        "page": page,
        "userState": session.user_state,
    })))
}

async fn get_session<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, ApiError> {
    let (session, page) = state.engine().get_session(&session_id).await?;
    let config = state.store().get_config(&session.config_id).await?;
    if config.require_auth {
        let identity = state.identity().authenticate(&headers).await;
        if identity.user_id.is_none() {
            return Err(ApiError::Unauthorized);
        }
    }
    if session.status == crate::domain::SessionStatus::Ended && !config.allow_retake {
        return Err(ApiError::Gone);
    }
    Ok(Json(json!({
        "sessionId": session.session_id,
        "currentPageId": session.current_page_id,
        "page": page,
        "userState": session.user_state,
    })))
}

#[derive(Debug, Deserialize)]
struct AdvanceEventBody {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    kind: String,
    payload: JsonValue,
}

#[derive(Debug, Deserialize)]
struct AdvanceBody {
    idempotency_key: Option<String>,
    event: AdvanceEventBody,
}

async fn advance<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    Path(session_id): Path<String>,
    Json(body): Json<AdvanceBody>,
) -> Result<Json<JsonValue>, ApiError> {
    let button_id = body
        .event
        .payload
        .get("buttonId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::InvalidEvent("event.payload.buttonId is required".into()))?
        .to_string();

    let (session, page) = state
        .engine()
        .advance(
            &session_id,
            AdvanceRequest {
                button_id,
                payload: body.event.payload,
                idempotency_key: body.idempotency_key,
            },
        )
        .await?;

    // Atomic-match attempt: the member just landed here, so try forming a
    // group right away rather than waiting on a separate scheduler.
    if let Some(pool_id) = page.matchmaking_pool_id() {
        let config = state.store().get_config(&session.config_id).await?;
        if let Ok(Some(group)) = state.matchmaker().try_match(&config, pool_id, state.engine()).await {
            if let Some(chat_page) = config.pages.iter().find(|p| p.chat_agent_ids().is_some()) {
                let agent_ids = chat_page.chat_agent_ids().unwrap_or(&[]).to_vec();
                state.agents().spawn_for_group(&config, &group, &agent_ids);
            }
        }
    }

    Ok(Json(json!({
        "sessionId": session.session_id,
        "currentPageId": session.current_page_id,
        "page": page,
        "userState": session.user_state,
    })))
}

#[derive(Debug, Deserialize)]
struct ClientEventBody {
    idempotency_key: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    payload: JsonValue,
}

async fn post_event<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    Path(session_id): Path<String>,
    Json(body): Json<ClientEventBody>,
) -> Result<Json<JsonValue>, ApiError> {
    let event_type: EventType = serde_json::from_value(JsonValue::String(body.kind.clone()))
        .map_err(|_| ApiError::InvalidEvent(format!("unrecognized event type `{}`", body.kind)))?;
    let (session, event) = state
        .engine()
        .log_event(&session_id, event_type, body.payload, body.idempotency_key)
        .await?;
    Ok(Json(json!({ "sessionId": session.session_id, "event": event })))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    cursor: Option<i64>,
}

async fn stream<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let cursor = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .or(query.cursor)
        .unwrap_or(0);

    let (mut rx, _token) = state.hub().subscribe(&session_id, cursor).await?;

    let stream = async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            match frame {
                PushFrame::Event(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(SseEvent::default().id(event.sequence.to_string()).event(event_type_name(event.event_type)).data(data));
                }
                PushFrame::Heartbeat => {
                    yield Ok(SseEvent::default().event("heartbeat").data("{}"));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn event_type_name(event_type: EventType) -> &'static str {
    match event_type {
        EventType::ButtonClick => "button_click",
        EventType::SurveySubmission => "survey_submission",
        EventType::StateUpdated => "state_updated",
        EventType::MatchFound => "match_found",
        EventType::MatchTimeout => "match_timeout",
        EventType::Timeout => "timeout",
        EventType::ChatMessage => "chat_message",
        EventType::AgentMessage => "agent_message",
        EventType::AgentMessageDelta => "agent_message_delta",
        EventType::ChatEnded => "chat_ended",
        EventType::ToolCall => "tool_call",
        EventType::ToolError => "tool_error",
        EventType::AgentError => "agent_error",
        EventType::SessionEnded => "session_ended",
        EventType::Heartbeat => "heartbeat",
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessageBody {
    idempotency_key: Option<String>,
    session_id: String,
    body: String,
}

async fn chat_message<S: Store + 'static, P: ModelProvider + 'static>(
    State(state): State<AppState<S, P>>,
    Path(group_id): Path<String>,
    Json(body): Json<ChatMessageBody>,
) -> Result<Json<JsonValue>, ApiError> {
    let message = state
        .chat()
        .send_message(
            &group_id,
            crate::domain::SenderKind::Participant,
            &body.session_id,
            &body.body,
            body.idempotency_key.as_deref(),
        )
        .await?;
    state.agents().notify_message(&group_id, &message);
    Ok(Json(serde_json::to_value(&message).unwrap_or_default()))
}
