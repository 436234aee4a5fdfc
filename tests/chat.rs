use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pairit::chat::{ChatCoordinator, ChatError};
use pairit::domain::{Group, SenderKind};
use pairit::engine::SessionEngine;
use pairit::push::PushHub;
use pairit::store::memory::MemoryStore;
use pairit::store::Store;
use serde_json::{json, Map};

async fn group_with_two_members() -> (Arc<MemoryStore>, ChatCoordinator<MemoryStore>, Group, String, String) {
    let store = Arc::new(MemoryStore::new());
    let doc = json!({
        "config_id": "exp-chat",
        "initial_page_id": "chatting",
        "pages": [{"id": "chatting", "text": {"body": "chat"}, "end": true}]
    });
    let (config, _) = pairit::compiler::compile(&doc).unwrap();
    store.insert_config(&config, "owner1", &config.config_hash).await.unwrap();

    let engine = Arc::new(SessionEngine::new(Arc::clone(&store)));
    let (s1, _) = engine.start_session("exp-chat", "p1").await.unwrap();
    let (s2, _) = engine.start_session("exp-chat", "p2").await.unwrap();

    let group = Group {
        group_id: "group-1".into(),
        pool_id: "pairs".into(),
        config_id: "exp-chat".into(),
        member_session_ids: vec![s1.session_id.clone(), s2.session_id.clone()],
        treatment: "control".into(),
        shared_state: Map::new(),
        chat_group_id: "group-1".into(),
        created_at: Utc::now(),
        closed_at: None,
        chat_ended: false,
        next_chat_sequence: 1,
    };
    store.insert_group(group.clone()).await.unwrap();

    let hub = Arc::new(PushHub::new(Arc::clone(&store), Duration::from_secs(30), Duration::from_secs(300)));
    let chat = ChatCoordinator::new(Arc::clone(&store), Arc::clone(&engine), hub);
    (store, chat, group, s1.session_id, s2.session_id)
}

#[tokio::test]
async fn a_member_can_send_a_message_and_it_is_persisted() {
    let (store, chat, group, s1, _s2) = group_with_two_members().await;
    let message = chat
        .send_message(&group.group_id, SenderKind::Participant, &s1, "hello there", None)
        .await
        .unwrap();
    assert_eq!(message.sequence, 1);

    let history = store.list_chat_messages_after(&group.group_id, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body, "hello there");
}

#[tokio::test]
async fn a_non_member_cannot_send_a_message() {
    let (_store, chat, group, _s1, _s2) = group_with_two_members().await;
    let result = chat
        .send_message(&group.group_id, SenderKind::Participant, "not-a-member", "hi", None)
        .await;
    assert!(matches!(result, Err(ChatError::Forbidden)));
}

#[tokio::test]
async fn messages_are_rejected_after_end_chat() {
    let (_store, chat, group, s1, _s2) = group_with_two_members().await;
    chat.end_chat(&group.group_id).await.unwrap();

    let result = chat.send_message(&group.group_id, SenderKind::Participant, &s1, "still here?", None).await;
    assert!(matches!(result, Err(ChatError::Ended)));
}

#[tokio::test]
async fn empty_message_body_is_rejected() {
    let (_store, chat, group, s1, _s2) = group_with_two_members().await;
    let result = chat.send_message(&group.group_id, SenderKind::Participant, &s1, "", None).await;
    assert!(matches!(result, Err(ChatError::InvalidMessage(_))));
}

#[tokio::test]
async fn replay_history_returns_messages_in_order() {
    let (_store, chat, group, s1, s2) = group_with_two_members().await;
    chat.send_message(&group.group_id, SenderKind::Participant, &s1, "first", None).await.unwrap();
    chat.send_message(&group.group_id, SenderKind::Participant, &s2, "second", None).await.unwrap();

    let history = chat.replay_history(&group.group_id, 0).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].body, "first");
    assert_eq!(history[1].body, "second");
}

#[tokio::test]
async fn a_repeated_idempotency_key_does_not_append_twice() {
    let (store, chat, group, s1, _s2) = group_with_two_members().await;
    let first = chat
        .send_message(&group.group_id, SenderKind::Participant, &s1, "hello", Some("key-1"))
        .await
        .unwrap();
    let second = chat
        .send_message(&group.group_id, SenderKind::Participant, &s1, "hello", Some("key-1"))
        .await
        .unwrap();
    assert_eq!(first.message_id, second.message_id);

    let history = store.list_chat_messages_after(&group.group_id, 0).await.unwrap();
    assert_eq!(history.len(), 1);
}
