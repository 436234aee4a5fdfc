use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Component+verb event type tags (spec.md §3.1, §6 "Event payload shapes").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ButtonClick,
    SurveySubmission,
    StateUpdated,
    MatchFound,
    MatchTimeout,
    Timeout,
    ChatMessage,
    AgentMessage,
    AgentMessageDelta,
    ChatEnded,
    ToolCall,
    ToolError,
    AgentError,
    SessionEnded,
    Heartbeat,
}

/// An append-only record of something that happened to a session
/// (spec.md §3.1). `sequence` is assigned server-side under the session's
/// monotonic counter and is gap-free within a session (invariant 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: i64,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub page_id: String,
    pub component_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: Json,
    pub idempotency_key: Option<String>,
}
