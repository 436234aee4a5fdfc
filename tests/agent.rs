use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pairit::agent::provider::StreamUpdate;
use pairit::agent::{AgentRuntime, CompletionOutcome, CompletionRequest, ModelProvider, ProviderError};
use pairit::chat::ChatCoordinator;
use pairit::domain::{ChatMessage, Group, SenderKind};
use pairit::engine::SessionEngine;
use pairit::push::PushHub;
use pairit::store::memory::MemoryStore;
use pairit::store::Store;
use serde_json::{json, Map};
use tokio::sync::mpsc;

/// Always replies with a fixed line, ignoring the conversation so far.
struct EchoProvider {
    reply: String,
}

#[async_trait]
impl ModelProvider for EchoProvider {
    async fn complete(&self, _request: CompletionRequest, _updates: mpsc::Sender<StreamUpdate>) -> Result<CompletionOutcome, ProviderError> {
        Ok(CompletionOutcome::Message(self.reply.clone()))
    }
}

struct AlwaysFailsProvider;

#[async_trait]
impl ModelProvider for AlwaysFailsProvider {
    async fn complete(&self, _request: CompletionRequest, _updates: mpsc::Sender<StreamUpdate>) -> Result<CompletionOutcome, ProviderError> {
        Err(ProviderError::RequestFailed("simulated outage".into()))
    }
}

fn chat_document() -> serde_json::Value {
    json!({
        "config_id": "exp-agent",
        "initial_page_id": "chatting",
        "pages": [
            {
                "id": "chatting",
                "components": [{"type": "chat", "props": {"agent_ids": ["coach"]}}],
                "end": true
            }
        ],
        "agents": [
            {"id": "coach", "model": "demo-model", "system_prompt": "Be supportive."}
        ]
    })
}

async fn harness<P: ModelProvider + 'static>(provider: P) -> (Arc<MemoryStore>, Arc<AgentRuntime<MemoryStore, P>>, Group, String) {
    let store = Arc::new(MemoryStore::new());
    let (config, _) = pairit::compiler::compile(&chat_document()).unwrap();
    store.insert_config(&config, "owner1", &config.config_hash).await.unwrap();

    let engine = Arc::new(SessionEngine::new(Arc::clone(&store)));
    let (session, _) = engine.start_session("exp-agent", "p1").await.unwrap();

    let group = Group {
        group_id: "group-agent-1".into(),
        pool_id: "none".into(),
        config_id: "exp-agent".into(),
        member_session_ids: vec![session.session_id.clone()],
        treatment: "control".into(),
        shared_state: Map::new(),
        chat_group_id: "group-agent-1".into(),
        created_at: Utc::now(),
        closed_at: None,
        chat_ended: false,
        next_chat_sequence: 1,
    };
    store.insert_group(group.clone()).await.unwrap();

    let hub = Arc::new(PushHub::new(Arc::clone(&store), Duration::from_secs(30), Duration::from_secs(300)));
    let chat = Arc::new(ChatCoordinator::new(Arc::clone(&store), Arc::clone(&engine), Arc::clone(&hub)));
    let runtime = Arc::new(AgentRuntime::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        hub,
        chat,
        Arc::new(provider),
        Duration::from_secs(5),
        3,
    ));
    runtime.spawn_for_group(&config, &group, &["coach".to_string()]);

    (store, runtime, group, session.session_id)
}

async fn wait_for_messages(store: &MemoryStore, group_id: &str, at_least: usize) -> Vec<ChatMessage> {
    for _ in 0..50 {
        let history = store.list_chat_messages_after(group_id, 0).await.unwrap();
        if history.len() >= at_least {
            return history;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    store.list_chat_messages_after(group_id, 0).await.unwrap()
}

#[tokio::test]
async fn agent_replies_to_a_participant_message() {
    let (store, runtime, group, session_id) = harness(EchoProvider { reply: "hang in there".into() }).await;

    let participant_message = ChatMessage {
        message_id: "m1".into(),
        group_id: group.group_id.clone(),
        sender_kind: SenderKind::Participant,
        sender_id: session_id,
        body: "I'm nervous".into(),
        created_at: Utc::now(),
        sequence: 0,
    };
    runtime.notify_message(&group.group_id, &participant_message);

    let history = wait_for_messages(&store, &group.group_id, 1).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender_id, "coach");
    assert_eq!(history[0].body, "hang in there");
}

#[tokio::test]
async fn an_agent_never_replies_to_its_own_message() {
    let (store, runtime, group, _session_id) = harness(EchoProvider { reply: "should not appear".into() }).await;

    let own_message = ChatMessage {
        message_id: "m1".into(),
        group_id: group.group_id.clone(),
        sender_kind: SenderKind::Agent,
        sender_id: "coach".into(),
        body: "already said this".into(),
        created_at: Utc::now(),
        sequence: 0,
    };
    runtime.notify_message(&group.group_id, &own_message);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let history = store.list_chat_messages_after(&group.group_id, 0).await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn repeated_provider_failures_send_a_system_notice_and_go_dormant() {
    let (store, runtime, group, session_id) = harness(AlwaysFailsProvider).await;

    for n in 0..3 {
        let trigger = ChatMessage {
            message_id: format!("m{n}"),
            group_id: group.group_id.clone(),
            sender_kind: SenderKind::Participant,
            sender_id: session_id.clone(),
            body: format!("attempt {n}"),
            created_at: Utc::now(),
            sequence: 0,
        };
        runtime.notify_message(&group.group_id, &trigger);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let history = wait_for_messages(&store, &group.group_id, 1).await;
    assert!(history.iter().any(|m| m.sender_kind == SenderKind::System));
}
