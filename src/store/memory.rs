//! In-process `Store` implementation. Backs the integration test suite
//! (see `SPEC_FULL.md` §A "Test tooling") and is a legitimate dev backend
//! for single-instance deployments that don't want a Postgres dependency.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value as Json};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{CanonicalConfig, ChatMessage, Event, Group, MatchPoolEntry, SenderKind, Session};

use super::{ConfigMeta, IdempotentReplay, NewEvent, SessionPatch, Store, StoreError};

#[derive(Default)]
struct State {
    configs: HashMap<String, (CanonicalConfig, ConfigMeta)>,
    sessions: HashMap<String, Session>,
    events: HashMap<String, Vec<Event>>,
    idempotency: HashMap<(String, String), (i64, Session)>,
    pools: HashMap<(String, String), VecDeque<MatchPoolEntry>>,
    histograms: HashMap<(String, String), HashMap<String, u64>>,
    groups: HashMap<String, Group>,
    chat_messages: HashMap<String, Vec<ChatMessage>>,
    chat_idempotency: HashMap<(String, String), ChatMessage>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(what: &str, id: &str) -> StoreError {
    StoreError::NotFound(format!("{what} {id}"))
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_config(
        &self,
        config: &CanonicalConfig,
        owner: &str,
        checksum: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.configs.contains_key(&config.config_id) {
            return Err(StoreError::Other(format!(
                "config {} already exists",
                config.config_id
            )));
        }
        state.configs.insert(
            config.config_id.clone(),
            (
                config.clone(),
                ConfigMeta {
                    config_id: config.config_id.clone(),
                    owner: owner.to_string(),
                    checksum: checksum.to_string(),
                    created_at: Utc::now(),
                },
            ),
        );
        Ok(())
    }

    async fn get_config(&self, config_id: &str) -> Result<CanonicalConfig, StoreError> {
        let state = self.state.lock().await;
        state
            .configs
            .get(config_id)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| not_found("config", config_id))
    }

    async fn list_configs(&self, owner: &str) -> Result<Vec<ConfigMeta>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .configs
            .values()
            .map(|(_, meta)| meta.clone())
            .filter(|meta| meta.owner == owner)
            .collect())
    }

    async fn delete_config(&self, config_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .configs
            .remove(config_id)
            .map(|_| ())
            .ok_or_else(|| not_found("config", config_id))
    }

    async fn config_owner(&self, config_id: &str) -> Result<String, StoreError> {
        let state = self.state.lock().await;
        state
            .configs
            .get(config_id)
            .map(|(_, meta)| meta.owner.clone())
            .ok_or_else(|| not_found("config", config_id))
    }

    async fn insert_session(&self, session: Session) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, StoreError> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| not_found("session", session_id))
    }

    async fn list_sessions_for_config(&self, config_id: &str) -> Result<Vec<Session>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.config_id == config_id)
            .cloned()
            .collect())
    }

    async fn list_idle_sessions(&self, ttl_secs: u64) -> Result<Vec<Session>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sessions.values().filter(|s| s.is_idle_since(ttl_secs)).cloned().collect())
    }

    async fn check_idempotency(
        &self,
        session_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotentReplay>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .idempotency
            .get(&(session_id.to_string(), idempotency_key.to_string()))
            .map(|(sequence, session)| IdempotentReplay {
                sequence: *sequence,
                session: session.clone(),
            }))
    }

    async fn apply_session_transition(
        &self,
        session_id: &str,
        expected_version: i64,
        patch: SessionPatch,
        new_events: Vec<NewEvent>,
    ) -> Result<(Session, Vec<Event>), StoreError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| not_found("session", session_id))?;
        if session.version != expected_version {
            return Err(StoreError::VersionConflict);
        }

        let mut session = session;
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
        let mut idempotency_keys = Vec::new();
        let now = Utc::now();
        for new_event in new_events {
            let sequence = session.next_sequence;
            session.next_sequence += 1;
            let event = Event {
                sequence,
                session_id: session_id.to_string(),
                event_type: new_event.event_type,
                page_id: new_event.page_id,
                component_id: new_event.component_id,
                timestamp: now,
                data: new_event.data,
                idempotency_key: new_event.idempotency_key.clone(),
            };
            if let Some(key) = &new_event.idempotency_key {
                idempotency_keys.push((key.clone(), sequence));
            }
            appended.push(event);
        }

        state
            .events
            .entry(session_id.to_string())
            .or_default()
            .extend(appended.clone());
        state.sessions.insert(session_id.to_string(), session.clone());
        // Snapshot the session exactly as it stood once this transition
        // committed, so a replayed request answers from this state rather
        // than whatever the session looks like by the time the retry lands.
        for (key, sequence) in idempotency_keys {
            state
                .idempotency
                .entry((session_id.to_string(), key))
                .or_insert_with(|| (sequence, session.clone()));
        }

        Ok((session, appended))
    }

    async fn list_events_after(&self, session_id: &str, after_sequence: i64) -> Result<Vec<Event>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .get(session_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.sequence > after_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn enqueue_pool_entry(&self, entry: MatchPoolEntry) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .pools
            .entry((entry.config_id.clone(), entry.pool_id.clone()))
            .or_default()
            .push_back(entry);
        Ok(())
    }

    async fn cancel_pool_entry(&self, session_id: &str, pool_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let mut removed = false;
        for (key, queue) in state.pools.iter_mut() {
            if key.1.as_str() != pool_id {
                continue;
            }
            let before = queue.len();
            queue.retain(|e| e.session_id != session_id);
            if queue.len() != before {
                removed = true;
            }
        }
        Ok(removed)
    }

    async fn find_pool_entry(&self, session_id: &str) -> Result<Option<MatchPoolEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .pools
            .values()
            .flat_map(|q| q.iter())
            .find(|e| e.session_id == session_id)
            .cloned())
    }

    async fn pop_pool_entries(&self, pool_id: &str, n: usize) -> Result<Option<Vec<MatchPoolEntry>>, StoreError> {
        let mut state = self.state.lock().await;
        let key = state
            .pools
            .keys()
            .find(|(_, p)| p.as_str() == pool_id)
            .cloned();
        let Some(key) = key else { return Ok(None) };
        let queue = state.pools.get_mut(&key).unwrap();
        if queue.len() < n {
            return Ok(None);
        }
        let popped: Vec<_> = queue.drain(..n).collect();
        Ok(Some(popped))
    }

    async fn requeue_pool_entries(&self, entries: Vec<MatchPoolEntry>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for entry in entries.into_iter().rev() {
            state
                .pools
                .entry((entry.config_id.clone(), entry.pool_id.clone()))
                .or_default()
                .push_front(entry);
        }
        Ok(())
    }

    async fn list_pool_entries(&self, pool_id: &str) -> Result<Vec<MatchPoolEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .pools
            .iter()
            .filter(|((_, p), _)| p.as_str() == pool_id)
            .flat_map(|(_, q)| q.iter().cloned())
            .collect())
    }

    async fn list_all_pool_entries(&self) -> Result<Vec<MatchPoolEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.pools.values().flat_map(|q| q.iter().cloned()).collect())
    }

    async fn treatment_histogram(&self, config_id: &str, pool_id: &str) -> Result<HashMap<String, u64>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .histograms
            .get(&(config_id.to_string(), pool_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn record_treatment_assignment(&self, config_id: &str, pool_id: &str, condition: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        *state
            .histograms
            .entry((config_id.to_string(), pool_id.to_string()))
            .or_default()
            .entry(condition.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn unrecord_treatment_assignment(&self, config_id: &str, pool_id: &str, condition: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(hist) = state.histograms.get_mut(&(config_id.to_string(), pool_id.to_string())) {
            if let Some(count) = hist.get_mut(condition) {
                *count = count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn insert_group(&self, group: Group) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.groups.insert(group.group_id.clone(), group);
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> Result<Group, StoreError> {
        let state = self.state.lock().await;
        state
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| not_found("group", group_id))
    }

    async fn update_group_shared_state(&self, group_id: &str, patch: Map<String, Json>) -> Result<Group, StoreError> {
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("group", group_id))?;
        for (k, v) in patch {
            group.shared_state.insert(k, v);
        }
        Ok(group.clone())
    }

    async fn set_group_chat_ended(&self, group_id: &str) -> Result<Group, StoreError> {
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("group", group_id))?;
        group.chat_ended = true;
        Ok(group.clone())
    }

    async fn append_chat_message(
        &self,
        group_id: &str,
        sender_kind: SenderKind,
        sender_id: &str,
        body: &str,
        idempotency_key: Option<&str>,
    ) -> Result<(ChatMessage, bool), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(key) = idempotency_key {
            if let Some(existing) = state.chat_idempotency.get(&(group_id.to_string(), key.to_string())) {
                return Ok((existing.clone(), false));
            }
        }
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| not_found("group", group_id))?;
        let sequence = group.next_chat_sequence;
        group.next_chat_sequence += 1;
        let message = ChatMessage {
            message_id: Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            sender_kind,
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            sequence,
        };
        state
            .chat_messages
            .entry(group_id.to_string())
            .or_default()
            .push(message.clone());
        if let Some(key) = idempotency_key {
            state
                .chat_idempotency
                .insert((group_id.to_string(), key.to_string()), message.clone());
        }
        Ok((message, true))
    }

    async fn list_chat_messages_after(&self, group_id: &str, after_sequence: i64) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .chat_messages
            .get(group_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.sequence > after_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
