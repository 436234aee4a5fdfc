//! 4.G Chat coordinator — per-group message sequencing, persistence, and
//! broadcast. Chat ordering is strictly total within a group, assigned by
//! the store's per-group counter under CAS (`Store::append_chat_message`);
//! delivery to each member's own push stream goes through the session
//! engine so every member sees it at a real, replayable sequence.

use std::sync::Arc;

use crate::domain::{ChatMessage, EventType, Group, SenderKind};
use crate::engine::{ServerEvent, SessionEngine};
use crate::push::PushHub;
use crate::store::{SessionPatch, Store, StoreError};

const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("forbidden")]
    Forbidden,
    #[error("chat ended")]
    Ended,
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ChatCoordinator<S: Store> {
    store: Arc<S>,
    engine: Arc<SessionEngine<S>>,
    hub: Arc<PushHub<S>>,
}

impl<S: Store + 'static> ChatCoordinator<S> {
    pub fn new(store: Arc<S>, engine: Arc<SessionEngine<S>>, hub: Arc<PushHub<S>>) -> Self {
        Self { store, engine, hub }
    }

    /// Verifies membership, message shape, persists under the group's
    /// monotonic sequence, and fans a `chat_message` event out to every
    /// member — the sender included, so the client's own message is
    /// confirmed only via the stream, never the POST response (spec.md §4.G).
    pub async fn send_message(
        &self,
        group_id: &str,
        sender_kind: SenderKind,
        sender_id: &str,
        body: &str,
        idempotency_key: Option<&str>,
    ) -> Result<ChatMessage, ChatError> {
        let group = self.store.get_group(group_id).await?;
        if sender_kind == SenderKind::Participant && !group.member_session_ids.iter().any(|m| m == sender_id) {
            return Err(ChatError::Forbidden);
        }
        if group.chat_ended {
            return Err(ChatError::Ended);
        }
        if body.is_empty() {
            return Err(ChatError::InvalidMessage("message body is empty".into()));
        }
        if body.len() > MAX_MESSAGE_LEN {
            return Err(ChatError::InvalidMessage(format!("message exceeds {MAX_MESSAGE_LEN} bytes")));
        }

        let (message, is_new) = self
            .store
            .append_chat_message(group_id, sender_kind, sender_id, body, idempotency_key)
            .await?;
        if is_new {
            self.broadcast(&group, EventType::ChatMessage, serde_json::to_value(&message).unwrap_or_default())
                .await;
        }
        Ok(message)
    }

    pub async fn replay_history(&self, group_id: &str, after_sequence: i64) -> Result<Vec<ChatMessage>, ChatError> {
        Ok(self.store.list_chat_messages_after(group_id, after_sequence).await?)
    }

    /// Marks the group's chat as terminal, invoked by the agent runtime's
    /// `end_chat` tool dispatch.
    pub async fn end_chat(&self, group_id: &str) -> Result<Group, ChatError> {
        let group = self.store.set_group_chat_ended(group_id).await?;
        self.broadcast(&group, EventType::ChatEnded, serde_json::json!({ "group_id": group_id })).await;
        Ok(group)
    }

    async fn broadcast(&self, group: &Group, event_type: EventType, data: serde_json::Value) {
        for member in &group.member_session_ids {
            if let Err(e) = self
                .engine
                .apply_and_publish(
                    &self.hub,
                    member,
                    ServerEvent {
                        event_type,
                        component_id: None,
                        data: data.clone(),
                        patch: SessionPatch::default(),
                    },
                )
                .await
            {
                tracing::warn!(session_id = %member, error = %e, "failed to deliver chat event to member");
            }
        }
    }
}
