use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Formed atomically by the matchmaker (spec.md §3.1, §4.F). Never
/// re-opened; members may leave but the record persists for export fidelity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub group_id: String,
    pub pool_id: String,
    pub config_id: String,
    pub member_session_ids: Vec<String>,
    pub treatment: String,
    pub shared_state: Map<String, Json>,
    pub chat_group_id: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub chat_ended: bool,
    pub next_chat_sequence: i64,
}

/// Transient, in-memory matchmaking-queue entry (spec.md §3.1), mirrored
/// into the store so a restart can reconstruct the queue (§4.F, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPoolEntry {
    pub session_id: String,
    pub config_id: String,
    pub pool_id: String,
    pub enqueued_at: DateTime<Utc>,
}
