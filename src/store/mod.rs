//! 4.C State store — abstracted over a document database. `Store` is the
//! single trait boundary the session engine, matchmaker, and chat
//! coordinator write through; `memory` backs tests and `postgres` backs
//! production, per the "plug-in points, not inheritance" design note (§9).

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};

use crate::domain::{ChatMessage, Event, EventType, Group, MatchPoolEntry, Session, SessionStatus};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    /// CAS on `Session.version` (or a pool/group equivalent) lost a race.
    /// The caller retries a bounded number of times before surfacing
    /// `internal` (spec.md §4.D "Failure semantics").
    #[error("version conflict")]
    VersionConflict,
    #[error("store error: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct ConfigMeta {
    pub config_id: String,
    pub owner: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// A field-level patch applied atomically alongside new events, never a
/// full-document replacement of `user_state` (spec.md §5 "Shared-resource
/// policy").
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub current_page_id: Option<String>,
    pub user_state_patch: Map<String, Json>,
    pub group_id: Option<Option<String>>,
    pub status: Option<SessionStatus>,
    pub ended_at: Option<DateTime<Utc>>,
    pub event_cursor: Option<i64>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.current_page_id.is_none()
            && self.user_state_patch.is_empty()
            && self.group_id.is_none()
            && self.status.is_none()
            && self.ended_at.is_none()
            && self.event_cursor.is_none()
    }
}

/// An event awaiting a server-assigned `sequence` and `timestamp`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub page_id: String,
    pub component_id: Option<String>,
    pub data: Json,
    pub idempotency_key: Option<String>,
}

/// What a replayed idempotent write resolves to: the sequence of the
/// originally-appended event and the session exactly as it stood once that
/// transition committed, so a retry can answer with that snapshot instead of
/// whatever the session looks like by the time the retry lands.
#[derive(Debug, Clone)]
pub struct IdempotentReplay {
    pub sequence: i64,
    pub session: Session,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- Configs -----------------------------------------------------
    async fn insert_config(
        &self,
        config: &crate::domain::CanonicalConfig,
        owner: &str,
        checksum: &str,
    ) -> Result<(), StoreError>;
    async fn get_config(&self, config_id: &str) -> Result<crate::domain::CanonicalConfig, StoreError>;
    async fn list_configs(&self, owner: &str) -> Result<Vec<ConfigMeta>, StoreError>;
    async fn delete_config(&self, config_id: &str) -> Result<(), StoreError>;
    async fn config_owner(&self, config_id: &str) -> Result<String, StoreError>;

    // --- Sessions ------------------------------------------------------
    async fn insert_session(&self, session: Session) -> Result<(), StoreError>;
    async fn get_session(&self, session_id: &str) -> Result<Session, StoreError>;
    async fn list_sessions_for_config(&self, config_id: &str) -> Result<Vec<Session>, StoreError>;
    /// Active sessions whose `last_activity_at` is older than `ttl_secs` —
    /// candidates for the idle-session sweeper (spec.md §5 "Cancellation
    /// and timeouts").
    async fn list_idle_sessions(&self, ttl_secs: u64) -> Result<Vec<Session>, StoreError>;

    /// Idempotency check: `(sessionId, idempotencyKey)` -> the prior event's
    /// sequence plus the session snapshot taken the moment that event's
    /// transition committed, if any (spec.md §4.C, invariant 6). Callers
    /// replaying a duplicate request must answer from this snapshot, not
    /// from the session's current/live state.
    async fn check_idempotency(
        &self,
        session_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotentReplay>, StoreError>;

    /// Applies `patch` and appends `new_events` atomically, gated on
    /// `expected_version` matching the session's current version
    /// (spec.md §4.D steps 3-7). Returns the updated session and the
    /// appended events (now carrying assigned sequences).
    async fn apply_session_transition(
        &self,
        session_id: &str,
        expected_version: i64,
        patch: SessionPatch,
        new_events: Vec<NewEvent>,
    ) -> Result<(Session, Vec<Event>), StoreError>;

    async fn list_events_after(&self, session_id: &str, after_sequence: i64) -> Result<Vec<Event>, StoreError>;

    // --- Matchmaking -----------------------------------------------------
    async fn enqueue_pool_entry(&self, entry: MatchPoolEntry) -> Result<(), StoreError>;
    async fn cancel_pool_entry(&self, session_id: &str, pool_id: &str) -> Result<bool, StoreError>;
    async fn find_pool_entry(&self, session_id: &str) -> Result<Option<MatchPoolEntry>, StoreError>;
    /// Atomically pops exactly `n` head entries off `pool_id`'s queue, or
    /// returns `None` if fewer than `n` are currently eligible
    /// (spec.md §4.C `AtomicMatch`).
    async fn pop_pool_entries(&self, pool_id: &str, n: usize) -> Result<Option<Vec<MatchPoolEntry>>, StoreError>;
    /// Re-enqueues entries at the front, preserving `enqueued_at`, used to
    /// roll back a partially-failed match (spec.md §4.F step 4).
    async fn requeue_pool_entries(&self, entries: Vec<MatchPoolEntry>) -> Result<(), StoreError>;
    async fn list_pool_entries(&self, pool_id: &str) -> Result<Vec<MatchPoolEntry>, StoreError>;
    /// Every pending entry across every config and pool, for the
    /// matchmaking-timeout sweep, which has no single `pool_id` to key off.
    async fn list_all_pool_entries(&self) -> Result<Vec<MatchPoolEntry>, StoreError>;

    /// Persisted per-`(configId, poolId)` condition histogram, so balanced
    /// assignment survives restarts (spec.md §9 open question resolution).
    async fn treatment_histogram(&self, config_id: &str, pool_id: &str) -> Result<HashMap<String, u64>, StoreError>;
    async fn record_treatment_assignment(&self, config_id: &str, pool_id: &str, condition: &str) -> Result<(), StoreError>;
    async fn unrecord_treatment_assignment(&self, config_id: &str, pool_id: &str, condition: &str) -> Result<(), StoreError>;

    async fn insert_group(&self, group: Group) -> Result<(), StoreError>;
    async fn get_group(&self, group_id: &str) -> Result<Group, StoreError>;
    async fn update_group_shared_state(&self, group_id: &str, patch: Map<String, Json>) -> Result<Group, StoreError>;
    async fn set_group_chat_ended(&self, group_id: &str) -> Result<Group, StoreError>;

    // --- Chat ------------------------------------------------------------
    /// Appends a chat message under the group's monotonic sequence. When
    /// `idempotency_key` matches one already recorded for this group, no
    /// new message is appended; the previously-stored one is returned with
    /// `is_new = false` so the caller can skip re-broadcasting it.
    async fn append_chat_message(
        &self,
        group_id: &str,
        sender_kind: crate::domain::SenderKind,
        sender_id: &str,
        body: &str,
        idempotency_key: Option<&str>,
    ) -> Result<(ChatMessage, bool), StoreError>;
    async fn list_chat_messages_after(&self, group_id: &str, after_sequence: i64) -> Result<Vec<ChatMessage>, StoreError>;
}
