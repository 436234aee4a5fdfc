use std::sync::Arc;
use std::time::Duration;

use pairit::engine::SessionEngine;
use pairit::matchmaker::Matchmaker;
use pairit::push::PushHub;
use pairit::store::memory::MemoryStore;
use pairit::store::Store;
use serde_json::json;

fn paired_document() -> serde_json::Value {
    json!({
        "config_id": "exp-match",
        "initial_page_id": "waiting",
        "pages": [
            {
                "id": "waiting",
                "components": [{"type": "matchmaking", "props": {"pool_id": "pairs"}}],
                "buttons": [{"id": "continue", "action": "next"}]
            },
            {"id": "paired", "text": {"body": "You're matched"}, "end": true}
        ],
        "matchmaking": [
            {"pool_id": "pairs", "num_users": 2, "timeout_seconds": 60, "conditions": ["control", "treatment"]}
        ]
    })
}

async fn harness() -> (Arc<MemoryStore>, SessionEngine<MemoryStore>, Matchmaker<MemoryStore>, pairit::domain::CanonicalConfig) {
    let store = Arc::new(MemoryStore::new());
    let (config, _) = pairit::compiler::compile(&paired_document()).unwrap();
    store.insert_config(&config, "owner1", &config.config_hash).await.unwrap();
    let hub = Arc::new(PushHub::new(Arc::clone(&store), Duration::from_secs(30), Duration::from_secs(300)));
    let engine = SessionEngine::new(Arc::clone(&store));
    let matchmaker = Matchmaker::new(Arc::clone(&store), hub);
    (store, engine, matchmaker, config)
}

#[tokio::test]
async fn try_match_waits_until_pool_is_full() {
    let (_store, engine, matchmaker, config) = harness().await;
    let (session, _) = engine.start_session("exp-match", "p1").await.unwrap();
    matchmaker.enqueue("exp-match", "pairs", &session.session_id).await.unwrap();

    let outcome = matchmaker.try_match(&config, "pairs", &engine).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn try_match_forms_a_group_once_full() {
    let (store, engine, matchmaker, config) = harness().await;

    let (s1, _) = engine.start_session("exp-match", "p1").await.unwrap();
    let (s2, _) = engine.start_session("exp-match", "p2").await.unwrap();
    matchmaker.enqueue("exp-match", "pairs", &s1.session_id).await.unwrap();
    matchmaker.enqueue("exp-match", "pairs", &s2.session_id).await.unwrap();

    let group = matchmaker.try_match(&config, "pairs", &engine).await.unwrap().expect("group should form");
    assert_eq!(group.member_session_ids.len(), 2);
    assert!(group.member_session_ids.contains(&s1.session_id));
    assert!(group.member_session_ids.contains(&s2.session_id));

    let updated = store.get_session(&s1.session_id).await.unwrap();
    assert_eq!(updated.group_id.as_deref(), Some(group.group_id.as_str()));
}

#[tokio::test]
async fn enqueueing_an_already_grouped_session_conflicts() {
    let (_store, engine, matchmaker, config) = harness().await;
    let (s1, _) = engine.start_session("exp-match", "p1").await.unwrap();
    let (s2, _) = engine.start_session("exp-match", "p2").await.unwrap();
    matchmaker.enqueue("exp-match", "pairs", &s1.session_id).await.unwrap();
    matchmaker.enqueue("exp-match", "pairs", &s2.session_id).await.unwrap();
    matchmaker.try_match(&config, "pairs", &engine).await.unwrap();

    let result = matchmaker.enqueue("exp-match", "pairs", &s1.session_id).await;
    assert!(matches!(result, Err(pairit::matchmaker::MatchError::Conflict)));
}

#[tokio::test]
async fn sweeping_before_timeout_leaves_the_entry_enqueued() {
    let (store, engine, matchmaker, _config) = harness().await;
    let (session, _) = engine.start_session("exp-match", "p1").await.unwrap();
    matchmaker.enqueue("exp-match", "pairs", &session.session_id).await.unwrap();

    matchmaker.sweep_timeouts(&engine).await;

    let entry = store.find_pool_entry(&session.session_id).await.unwrap();
    assert!(entry.is_some(), "entry should still be enqueued; the 60s timeout hasn't elapsed");
}

#[tokio::test]
async fn sweeping_past_timeout_cancels_the_entry_and_moves_the_session() {
    let doc = json!({
        "config_id": "exp-match-fast",
        "initial_page_id": "waiting",
        "pages": [
            {
                "id": "waiting",
                "components": [{"type": "matchmaking", "props": {"pool_id": "pairs"}}],
                "buttons": [{"id": "continue", "action": "next"}]
            },
            {"id": "gave_up", "text": {"body": "no match"}, "end": true}
        ],
        "matchmaking": [
            {"pool_id": "pairs", "num_users": 2, "timeout_seconds": 0, "timeout_target": "gave_up", "conditions": ["control"]}
        ]
    });
    let store = Arc::new(MemoryStore::new());
    let (config, _) = pairit::compiler::compile(&doc).unwrap();
    store.insert_config(&config, "owner1", &config.config_hash).await.unwrap();
    let hub = Arc::new(PushHub::new(Arc::clone(&store), Duration::from_secs(30), Duration::from_secs(300)));
    let engine = SessionEngine::new(Arc::clone(&store));
    let matchmaker = Matchmaker::new(Arc::clone(&store), hub);

    let (session, _) = engine.start_session("exp-match-fast", "p1").await.unwrap();
    matchmaker.enqueue("exp-match-fast", "pairs", &session.session_id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    matchmaker.sweep_timeouts(&engine).await;

    let entry = store.find_pool_entry(&session.session_id).await.unwrap();
    assert!(entry.is_none(), "timed-out entry should be cancelled");

    let (updated, _) = engine.get_session(&session.session_id).await.unwrap();
    assert_eq!(updated.current_page_id, "gave_up");
}
