//! Postgres-backed `Store`. Uses runtime-checked queries (`query_as` with
//! `.bind()`, not the `query!` macro) so the crate doesn't need a live
//! `DATABASE_URL` at compile time, following the same `sqlx::PgPool` +
//! `anyhow::Context` shape as the teacher's `ChatDatabaseService`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};
use sqlx::{PgPool, Row};

use crate::domain::{
    CanonicalConfig, ChatMessage, Event, EventType, Group, MatchPoolEntry, SenderKind, Session,
    SessionStatus,
};

use super::{ConfigMeta, IdempotentReplay, NewEvent, SessionPatch, Store, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Other(e.to_string())
}

fn session_status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Ended => "ended",
        SessionStatus::Abandoned => "abandoned",
    }
}

fn parse_session_status(raw: &str) -> SessionStatus {
    match raw {
        "ended" => SessionStatus::Ended,
        "abandoned" => SessionStatus::Abandoned,
        _ => SessionStatus::Active,
    }
}

fn event_type_str(t: EventType) -> &'static str {
    match t {
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

fn parse_event_type(raw: &str) -> EventType {
    match raw {
        "survey_submission" => EventType::SurveySubmission,
        "state_updated" => EventType::StateUpdated,
        "match_found" => EventType::MatchFound,
        "match_timeout" => EventType::MatchTimeout,
        "timeout" => EventType::Timeout,
        "chat_message" => EventType::ChatMessage,
        "agent_message" => EventType::AgentMessage,
        "agent_message_delta" => EventType::AgentMessageDelta,
        "chat_ended" => EventType::ChatEnded,
        "tool_call" => EventType::ToolCall,
        "tool_error" => EventType::ToolError,
        "agent_error" => EventType::AgentError,
        "session_ended" => EventType::SessionEnded,
        "heartbeat" => EventType::Heartbeat,
        _ => EventType::ButtonClick,
    }
}

fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<Session, StoreError> {
    let user_state: Json = row.try_get("user_state").map_err(db_err)?;
    Ok(Session {
        session_id: row.try_get("session_id").map_err(db_err)?,
        config_id: row.try_get("config_id").map_err(db_err)?,
        participant_id: row.try_get("participant_id").map_err(db_err)?,
        current_page_id: row.try_get("current_page_id").map_err(db_err)?,
        started_at: row.try_get("started_at").map_err(db_err)?,
        ended_at: row.try_get("ended_at").map_err(db_err)?,
        last_activity_at: row.try_get("last_activity_at").map_err(db_err)?,
        user_state: user_state.as_object().cloned().unwrap_or_default(),
        group_id: row.try_get("group_id").map_err(db_err)?,
        event_cursor: row.try_get("event_cursor").map_err(db_err)?,
        next_sequence: row.try_get("next_sequence").map_err(db_err)?,
        status: parse_session_status(row.try_get::<String, _>("status").map_err(db_err)?.as_str()),
        version: row.try_get("version").map_err(db_err)?,
    })
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<Event, StoreError> {
    Ok(Event {
        sequence: row.try_get("sequence").map_err(db_err)?,
        session_id: row.try_get("session_id").map_err(db_err)?,
        event_type: parse_event_type(row.try_get::<String, _>("event_type").map_err(db_err)?.as_str()),
        page_id: row.try_get("page_id").map_err(db_err)?,
        component_id: row.try_get("component_id").map_err(db_err)?,
        timestamp: row.try_get("ts").map_err(db_err)?,
        data: row.try_get("data").map_err(db_err)?,
        idempotency_key: row.try_get("idempotency_key").map_err(db_err)?,
    })
}

fn row_to_group(row: &sqlx::postgres::PgRow) -> Result<Group, StoreError> {
    let member_ids: Json = row.try_get("member_session_ids").map_err(db_err)?;
    let shared_state: Json = row.try_get("shared_state").map_err(db_err)?;
    Ok(Group {
        group_id: row.try_get("group_id").map_err(db_err)?,
        pool_id: row.try_get("pool_id").map_err(db_err)?,
        config_id: row.try_get("config_id").map_err(db_err)?,
        member_session_ids: serde_json::from_value(member_ids).unwrap_or_default(),
        treatment: row.try_get("treatment").map_err(db_err)?,
        shared_state: shared_state.as_object().cloned().unwrap_or_default(),
        chat_group_id: row.try_get("chat_group_id").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        closed_at: row.try_get("closed_at").map_err(db_err)?,
        chat_ended: row.try_get("chat_ended").map_err(db_err)?,
        next_chat_sequence: row.try_get("next_chat_sequence").map_err(db_err)?,
    })
}

fn row_to_chat_message(row: &sqlx::postgres::PgRow) -> Result<ChatMessage, StoreError> {
    let sender_kind: String = row.try_get("sender_kind").map_err(db_err)?;
    Ok(ChatMessage {
        message_id: row.try_get("message_id").map_err(db_err)?,
        group_id: row.try_get("group_id").map_err(db_err)?,
        sender_kind: match sender_kind.as_str() {
            "agent" => SenderKind::Agent,
            "system" => SenderKind::System,
            _ => SenderKind::Participant,
        },
        sender_id: row.try_get("sender_id").map_err(db_err)?,
        body: row.try_get("body").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        sequence: row.try_get("sequence").map_err(db_err)?,
    })
}

fn row_to_pool_entry(row: &sqlx::postgres::PgRow) -> Result<MatchPoolEntry, StoreError> {
    Ok(MatchPoolEntry {
        session_id: row.try_get("session_id").map_err(db_err)?,
        config_id: row.try_get("config_id").map_err(db_err)?,
        pool_id: row.try_get("pool_id").map_err(db_err)?,
        enqueued_at: row.try_get("enqueued_at").map_err(db_err)?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn insert_config(&self, config: &CanonicalConfig, owner: &str, checksum: &str) -> Result<(), StoreError> {
        let document = serde_json::to_value(config).map_err(|e| StoreError::Other(e.to_string()))?;
        sqlx::query("INSERT INTO configs (config_id, owner, checksum, document) VALUES ($1, $2, $3, $4)")
            .bind(&config.config_id)
            .bind(owner)
            .bind(checksum)
            .bind(document)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_config(&self, config_id: &str) -> Result<CanonicalConfig, StoreError> {
        let row = sqlx::query("SELECT document FROM configs WHERE config_id = $1")
            .bind(config_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("config {config_id}")))?;
        let document: Json = row.try_get("document").map_err(db_err)?;
        serde_json::from_value(document).map_err(|e| StoreError::Other(e.to_string()))
    }

    async fn list_configs(&self, owner: &str) -> Result<Vec<ConfigMeta>, StoreError> {
        let rows = sqlx::query("SELECT config_id, owner, checksum, created_at FROM configs WHERE owner = $1")
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| {
                Ok(ConfigMeta {
                    config_id: row.try_get("config_id").map_err(db_err)?,
                    owner: row.try_get("owner").map_err(db_err)?,
                    checksum: row.try_get("checksum").map_err(db_err)?,
                    created_at: row.try_get("created_at").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn delete_config(&self, config_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM configs WHERE config_id = $1")
            .bind(config_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("config {config_id}")));
        }
        Ok(())
    }

    async fn config_owner(&self, config_id: &str) -> Result<String, StoreError> {
        sqlx::query("SELECT owner FROM configs WHERE config_id = $1")
            .bind(config_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("config {config_id}")))?
            .try_get("owner")
            .map_err(db_err)
    }

    async fn insert_session(&self, session: Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (session_id, config_id, participant_id, current_page_id, started_at, \
             ended_at, last_activity_at, user_state, group_id, event_cursor, next_sequence, status, version) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
        )
        .bind(&session.session_id)
        .bind(&session.config_id)
        .bind(&session.participant_id)
        .bind(&session.current_page_id)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.last_activity_at)
        .bind(Json::Object(session.user_state.clone()))
        .bind(&session.group_id)
        .bind(session.event_cursor)
        .bind(session.next_sequence)
        .bind(session_status_str(session.status))
        .bind(session.version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        row_to_session(&row)
    }

    async fn list_sessions_for_config(&self, config_id: &str) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sessions WHERE config_id = $1")
            .bind(config_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_session).collect()
    }

    async fn list_idle_sessions(&self, ttl_secs: u64) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE status = 'active' AND last_activity_at < now() - make_interval(secs => $1)",
        )
        .bind(ttl_secs as f64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_session).collect()
    }

    async fn check_idempotency(&self, session_id: &str, idempotency_key: &str) -> Result<Option<IdempotentReplay>, StoreError> {
        let row = sqlx::query(
            "SELECT sequence, session_snapshot FROM events WHERE session_id = $1 AND idempotency_key = $2",
        )
        .bind(session_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        let Some(row) = row else { return Ok(None) };
        let sequence: i64 = row.try_get("sequence").map_err(db_err)?;
        let snapshot: Json = row.try_get("session_snapshot").map_err(db_err)?;
        let session: Session = serde_json::from_value(snapshot).map_err(|e| StoreError::Other(e.to_string()))?;
        Ok(Some(IdempotentReplay { sequence, session }))
    }

    async fn apply_session_transition(
        &self,
        session_id: &str,
        expected_version: i64,
        patch: SessionPatch,
        new_events: Vec<NewEvent>,
    ) -> Result<(Session, Vec<Event>), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = $1 FOR UPDATE")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        let mut session = row_to_session(&row)?;
        if session.version != expected_version {
            return Err(StoreError::VersionConflict);
        }

        if let Some(page) = patch.current_page_id {
            session.current_page_id = page;
        }
        for (field, value) in patch.user_state_patch {
            session.user_state.insert(field, value);
        }
        if let Some(group_id) = patch.group_id {
            session.group_id = group_id;
        }
        if let Some(status) = patch.status {
            session.status = status;
        }
        if let Some(ended_at) = patch.ended_at {
            session.ended_at = Some(ended_at);
        }
        if let Some(cursor) = patch.event_cursor {
            session.event_cursor = cursor;
        }
        session.last_activity_at = Utc::now();
        session.version += 1;

        let mut appended = Vec::with_capacity(new_events.len());
        let now = Utc::now();
        for new_event in new_events {
            let sequence = session.next_sequence;
            session.next_sequence += 1;
            appended.push(Event {
                sequence,
                session_id: session_id.to_string(),
                event_type: new_event.event_type,
                page_id: new_event.page_id,
                component_id: new_event.component_id,
                timestamp: now,
                data: new_event.data,
                idempotency_key: new_event.idempotency_key,
            });
        }

        sqlx::query(
            "UPDATE sessions SET current_page_id=$1, user_state=$2, group_id=$3, event_cursor=$4, \
             next_sequence=$5, status=$6, version=$7, ended_at=$8, last_activity_at=$9 WHERE session_id=$10",
        )
        .bind(&session.current_page_id)
        .bind(Json::Object(session.user_state.clone()))
        .bind(&session.group_id)
        .bind(session.event_cursor)
        .bind(session.next_sequence)
        .bind(session_status_str(session.status))
        .bind(session.version)
        .bind(session.ended_at)
        .bind(session.last_activity_at)
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let snapshot = serde_json::to_value(&session).map_err(|e| StoreError::Other(e.to_string()))?;
        for event in &appended {
            let session_snapshot = event.idempotency_key.as_ref().map(|_| snapshot.clone());
            sqlx::query(
                "INSERT INTO events (session_id, sequence, event_type, page_id, component_id, ts, data, idempotency_key, session_snapshot) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
            )
            .bind(session_id)
            .bind(event.sequence)
            .bind(event_type_str(event.event_type))
            .bind(&event.page_id)
            .bind(&event.component_id)
            .bind(event.timestamp)
            .bind(&event.data)
            .bind(&event.idempotency_key)
            .bind(session_snapshot)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok((session, appended))
    }

    async fn list_events_after(&self, session_id: &str, after_sequence: i64) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query("SELECT * FROM events WHERE session_id = $1 AND sequence > $2 ORDER BY sequence ASC")
            .bind(session_id)
            .bind(after_sequence)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn enqueue_pool_entry(&self, entry: MatchPoolEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO pool_entries (session_id, config_id, pool_id, enqueued_at) VALUES ($1,$2,$3,$4)",
        )
        .bind(&entry.session_id)
        .bind(&entry.config_id)
        .bind(&entry.pool_id)
        .bind(entry.enqueued_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn cancel_pool_entry(&self, session_id: &str, pool_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pool_entries WHERE session_id = $1 AND pool_id = $2")
            .bind(session_id)
            .bind(pool_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_pool_entry(&self, session_id: &str) -> Result<Option<MatchPoolEntry>, StoreError> {
        let row = sqlx::query("SELECT * FROM pool_entries WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_pool_entry).transpose()
    }

    async fn pop_pool_entries(&self, pool_id: &str, n: usize) -> Result<Option<Vec<MatchPoolEntry>>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let rows = sqlx::query(
            "SELECT * FROM pool_entries WHERE pool_id = $1 ORDER BY enqueued_at ASC LIMIT $2 FOR UPDATE SKIP LOCKED",
        )
        .bind(pool_id)
        .bind(n as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;
        if rows.len() < n {
            return Ok(None);
        }
        let entries: Vec<MatchPoolEntry> = rows.iter().map(row_to_pool_entry).collect::<Result<_, _>>()?;
        for entry in &entries {
            sqlx::query("DELETE FROM pool_entries WHERE session_id = $1")
                .bind(&entry.session_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(Some(entries))
    }

    async fn requeue_pool_entries(&self, entries: Vec<MatchPoolEntry>) -> Result<(), StoreError> {
        for entry in entries {
            self.enqueue_pool_entry(entry).await?;
        }
        Ok(())
    }

    async fn list_pool_entries(&self, pool_id: &str) -> Result<Vec<MatchPoolEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM pool_entries WHERE pool_id = $1 ORDER BY enqueued_at ASC")
            .bind(pool_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_pool_entry).collect()
    }

    async fn list_all_pool_entries(&self) -> Result<Vec<MatchPoolEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM pool_entries ORDER BY enqueued_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_pool_entry).collect()
    }

    async fn treatment_histogram(&self, config_id: &str, pool_id: &str) -> Result<HashMap<String, u64>, StoreError> {
        let rows = sqlx::query("SELECT condition, count FROM treatment_histogram WHERE config_id = $1 AND pool_id = $2")
            .bind(config_id)
            .bind(pool_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut histogram = HashMap::new();
        for row in rows {
            let condition: String = row.try_get("condition").map_err(db_err)?;
            let count: i64 = row.try_get("count").map_err(db_err)?;
            histogram.insert(condition, count as u64);
        }
        Ok(histogram)
    }

    async fn record_treatment_assignment(&self, config_id: &str, pool_id: &str, condition: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO treatment_histogram (config_id, pool_id, condition, count) VALUES ($1,$2,$3,1) \
             ON CONFLICT (config_id, pool_id, condition) DO UPDATE SET count = treatment_histogram.count + 1",
        )
        .bind(config_id)
        .bind(pool_id)
        .bind(condition)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn unrecord_treatment_assignment(&self, config_id: &str, pool_id: &str, condition: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE treatment_histogram SET count = GREATEST(count - 1, 0) \
             WHERE config_id = $1 AND pool_id = $2 AND condition = $3",
        )
        .bind(config_id)
        .bind(pool_id)
        .bind(condition)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_group(&self, group: Group) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO groups (group_id, pool_id, config_id, member_session_ids, treatment, shared_state, \
             chat_group_id, created_at, closed_at, chat_ended, next_chat_sequence) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
        )
        .bind(&group.group_id)
        .bind(&group.pool_id)
        .bind(&group.config_id)
        .bind(serde_json::to_value(&group.member_session_ids).unwrap())
        .bind(&group.treatment)
        .bind(Json::Object(group.shared_state.clone()))
        .bind(&group.chat_group_id)
        .bind(group.created_at)
        .bind(group.closed_at)
        .bind(group.chat_ended)
        .bind(group.next_chat_sequence)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> Result<Group, StoreError> {
        let row = sqlx::query("SELECT * FROM groups WHERE group_id = $1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
        row_to_group(&row)
    }

    async fn update_group_shared_state(&self, group_id: &str, patch: Map<String, Json>) -> Result<Group, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query("SELECT * FROM groups WHERE group_id = $1 FOR UPDATE")
            .bind(group_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
        let mut group = row_to_group(&row)?;
        for (k, v) in patch {
            group.shared_state.insert(k, v);
        }
        sqlx::query("UPDATE groups SET shared_state = $1 WHERE group_id = $2")
            .bind(Json::Object(group.shared_state.clone()))
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(group)
    }

    async fn set_group_chat_ended(&self, group_id: &str) -> Result<Group, StoreError> {
        sqlx::query("UPDATE groups SET chat_ended = true WHERE group_id = $1")
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        self.get_group(group_id).await
    }

    async fn append_chat_message(
        &self,
        group_id: &str,
        sender_kind: SenderKind,
        sender_id: &str,
        body: &str,
        idempotency_key: Option<&str>,
    ) -> Result<(ChatMessage, bool), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if let Some(key) = idempotency_key {
            let existing = sqlx::query("SELECT * FROM chat_messages WHERE group_id = $1 AND idempotency_key = $2")
                .bind(group_id)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
            if let Some(row) = existing {
                return Ok((row_to_chat_message(&row)?, false));
            }
        }

        let row = sqlx::query("SELECT next_chat_sequence FROM groups WHERE group_id = $1 FOR UPDATE")
            .bind(group_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
        let sequence: i64 = row.try_get("next_chat_sequence").map_err(db_err)?;

        sqlx::query("UPDATE groups SET next_chat_sequence = $1 WHERE group_id = $2")
            .bind(sequence + 1)
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let message_id = uuid::Uuid::new_v4().to_string();
        let created_at: DateTime<Utc> = Utc::now();
        let sender_kind_str = match sender_kind {
            SenderKind::Participant => "participant",
            SenderKind::Agent => "agent",
            SenderKind::System => "system",
        };
        sqlx::query(
            "INSERT INTO chat_messages (message_id, group_id, sender_kind, sender_id, body, created_at, sequence, idempotency_key) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(&message_id)
        .bind(group_id)
        .bind(sender_kind_str)
        .bind(sender_id)
        .bind(body)
        .bind(created_at)
        .bind(sequence)
        .bind(idempotency_key)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok((
            ChatMessage {
                message_id,
                group_id: group_id.to_string(),
                sender_kind,
                sender_id: sender_id.to_string(),
                body: body.to_string(),
                created_at,
                sequence,
            },
            true,
        ))
    }

    async fn list_chat_messages_after(&self, group_id: &str, after_sequence: i64) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM chat_messages WHERE group_id = $1 AND sequence > $2 ORDER BY sequence ASC",
        )
        .bind(group_id)
        .bind(after_sequence)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_chat_message).collect()
    }
}
