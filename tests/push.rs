use std::sync::Arc;
use std::time::Duration;

use pairit::engine::{ServerEvent, SessionEngine};
use pairit::push::{PushFrame, PushHub};
use pairit::store::memory::MemoryStore;
use pairit::store::{SessionPatch, Store};
use serde_json::json;

async fn seeded_session() -> (Arc<MemoryStore>, SessionEngine<MemoryStore>, String) {
    let store = Arc::new(MemoryStore::new());
    let doc = json!({
        "config_id": "exp-push",
        "initial_page_id": "intro",
        "pages": [{"id": "intro", "text": {"body": "hi"}, "end": true}]
    });
    let (config, _) = pairit::compiler::compile(&doc).unwrap();
    store.insert_config(&config, "owner1", &config.config_hash).await.unwrap();
    let engine = SessionEngine::new(Arc::clone(&store));
    let (session, _) = engine.start_session("exp-push", "p1").await.unwrap();
    (store, engine, session.session_id)
}

#[tokio::test]
async fn subscriber_receives_an_event_published_after_subscribing() {
    let (store, engine, session_id) = seeded_session().await;
    let hub = PushHub::new(Arc::clone(&store), Duration::from_secs(30), Duration::from_secs(300));

    let (mut rx, _token) = hub.subscribe(&session_id, 0).await.unwrap();

    engine
        .apply_and_publish(
            &hub,
            &session_id,
            ServerEvent {
                event_type: pairit::domain::EventType::Heartbeat,
                component_id: None,
                data: json!({"ping": true}),
                patch: SessionPatch::default(),
            },
        )
        .await
        .unwrap();

    let frame = rx.recv().await.expect("expected a frame");
    match frame {
        PushFrame::Event(event) => {
            assert_eq!(event.sequence, 1);
            assert_eq!(event.data, json!({"ping": true}));
        }
        PushFrame::Heartbeat => panic!("expected the published event, not a heartbeat"),
    }
}

#[tokio::test]
async fn subscribing_replays_backlog_before_live_events() {
    let (store, engine, session_id) = seeded_session().await;
    let hub = PushHub::new(Arc::clone(&store), Duration::from_secs(30), Duration::from_secs(300));

    engine
        .apply_and_publish(
            &hub,
            &session_id,
            ServerEvent {
                event_type: pairit::domain::EventType::Heartbeat,
                component_id: None,
                data: json!({"seq": 1}),
                patch: SessionPatch::default(),
            },
        )
        .await
        .unwrap();

    let (mut rx, _token) = hub.subscribe(&session_id, 0).await.unwrap();
    let frame = rx.recv().await.expect("expected the backlog event");
    match frame {
        PushFrame::Event(event) => assert_eq!(event.data, json!({"seq": 1})),
        PushFrame::Heartbeat => panic!("backlog replay should never be a heartbeat"),
    }
}

#[tokio::test]
async fn cancelling_the_subscription_token_closes_the_channel() {
    let (store, _engine, session_id) = seeded_session().await;
    let hub = PushHub::new(Arc::clone(&store), Duration::from_secs(30), Duration::from_secs(300));

    let (mut rx, token) = hub.subscribe(&session_id, 0).await.unwrap();
    token.cancel();

    // The heartbeat loop exits on its next select and drops its subscriber
    // slot; no further frames arrive once that task observes cancellation.
    let outcome = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(matches!(outcome, Ok(None) | Err(_)));
}

#[tokio::test]
async fn a_subscriber_that_never_reads_is_dropped_after_the_disconnect_timeout() {
    let (store, _engine, session_id) = seeded_session().await;
    let hub = PushHub::new(Arc::clone(&store), Duration::from_millis(10), Duration::from_millis(20));

    let (mut rx, _token) = hub.subscribe(&session_id, 0).await.unwrap();
    // Never drain `rx`: the channel's buffer absorbs the first few
    // heartbeats, but once it's full a send blocks past the disconnect
    // timeout and the background task should give up, dropping both its own
    // sender and the one held in the subscriber registry — closing `rx`.
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Drain whatever heartbeats made it into the buffer before the
    // teardown; the channel should then report closed rather than pending.
    while rx.try_recv().is_ok() {}
    let outcome = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert_eq!(outcome.ok(), Some(None), "subscriber should have been torn down after the disconnect timeout");
}
