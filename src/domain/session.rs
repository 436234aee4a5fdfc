use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
    Abandoned,
}

/// The per-participant runtime document (spec.md §3.1). `version` backs
/// the optimistic-concurrency CAS described in §4.D / §5; it is bumped by
/// every store-level write and never observed by callers above the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub config_id: String,
    pub participant_id: String,
    pub current_page_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub user_state: Map<String, Json>,
    pub group_id: Option<String>,
    pub event_cursor: i64,
    pub next_sequence: i64,
    pub status: SessionStatus,
    pub version: i64,
}

impl Session {
    pub fn new(session_id: String, config_id: String, participant_id: String, initial_page_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            config_id,
            participant_id,
            current_page_id: initial_page_id,
            started_at: now,
            ended_at: None,
            last_activity_at: now,
            user_state: Map::new(),
            group_id: None,
            event_cursor: 0,
            next_sequence: 1,
            status: SessionStatus::Active,
            version: 0,
        }
    }

    pub fn is_idle_since(&self, ttl_secs: u64) -> bool {
        self.status == SessionStatus::Active
            && Utc::now().signed_duration_since(self.last_activity_at).num_seconds() as u64 > ttl_secs
    }
}
