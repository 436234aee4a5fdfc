use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Participant,
    Agent,
    System,
}

/// Append-only, strictly ordered per group (spec.md §3.1, §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub group_id: String,
    pub sender_kind: SenderKind,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub sequence: i64,
}
