use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use pairit::agent::provider::StreamUpdate;
use pairit::agent::{AgentRuntime, CompletionOutcome, CompletionRequest, ModelProvider, ProviderError};
use pairit::auth::BearerIdentityProvider;
use pairit::chat::ChatCoordinator;
use pairit::engine::SessionEngine;
use pairit::http::configure_app;
use pairit::http::state::AppState;
use pairit::matchmaker::Matchmaker;
use pairit::media::{FilesystemStore, ObjectStore};
use pairit::push::PushHub;
use pairit::store::memory::MemoryStore;
use pairit::Settings;
use serde_json::json;
use tokio::sync::mpsc;

struct SilentProvider;

#[async_trait]
impl ModelProvider for SilentProvider {
    async fn complete(&self, _request: CompletionRequest, _updates: mpsc::Sender<StreamUpdate>) -> Result<CompletionOutcome, ProviderError> {
        Ok(CompletionOutcome::Message(String::new()))
    }
}

fn test_server() -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(PushHub::new(Arc::clone(&store), Duration::from_secs(30), Duration::from_secs(300)));
    let engine = Arc::new(SessionEngine::new(Arc::clone(&store)));
    let matchmaker = Arc::new(Matchmaker::new(Arc::clone(&store), Arc::clone(&hub)));
    let chat = Arc::new(ChatCoordinator::new(Arc::clone(&store), Arc::clone(&engine), Arc::clone(&hub)));
    let agents = Arc::new(AgentRuntime::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        Arc::clone(&hub),
        Arc::clone(&chat),
        Arc::new(SilentProvider),
        Duration::from_secs(5),
        3,
    ));
    let identity = Arc::new(BearerIdentityProvider);
    let media_dir = tempfile::tempdir().expect("tempdir");
    let media: Arc<dyn ObjectStore> = Arc::new(FilesystemStore::new(media_dir.path().to_path_buf(), "/media"));
    let settings = Arc::new(Settings::load().expect("settings load with defaults"));

    let state = AppState::new(store, engine, hub, matchmaker, chat, agents, identity, media, settings);
    let app = configure_app(state);
    TestServer::new(app).expect("test server")
}

fn minimal_document() -> serde_json::Value {
    json!({
        "config_id": "exp-http",
        "initial_page_id": "intro",
        "pages": [
            {"id": "intro", "text": {"body": "hi"}, "buttons": [{"id": "continue", "action": "next"}]},
            {"id": "bye", "text": {"body": "bye"}, "end": true}
        ]
    })
}

#[tokio::test]
async fn healthz_reports_healthy() {
    let server = test_server();
    let response = server.get("/healthz").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn upload_then_start_session_and_advance() {
    let server = test_server();

    let doc = minimal_document();
    let upload = server
        .post("/configs/upload")
        .add_header("Authorization", "Bearer owner-1")
        .json(&json!({
            "config_id": "exp-http",
            "checksum": pairit::compiler::compile(&doc).unwrap().0.config_hash,
            "config": doc,
        }))
        .await;
    assert_eq!(upload.status_code(), 200);

    let start = server
        .post("/sessions/start")
        .json(&json!({"config_id": "exp-http", "participant_id": "p1"}))
        .await;
    assert_eq!(start.status_code(), 200);
    let started: serde_json::Value = start.json();
    let session_id = started["sessionId"].as_str().unwrap().to_string();
    assert_eq!(started["currentPageId"], "intro");

    let advance = server
        .post(&format!("/sessions/{session_id}/advance"))
        .json(&json!({"event": {"type": "button_click", "payload": {"buttonId": "continue"}}}))
        .await;
    assert_eq!(advance.status_code(), 200);
    let advanced: serde_json::Value = advance.json();
    assert_eq!(advanced["currentPageId"], "bye");
}

#[tokio::test]
async fn starting_a_session_for_an_unknown_config_is_not_found() {
    let server = test_server();
    let response = server
        .post("/sessions/start")
        .json(&json!({"config_id": "does-not-exist"}))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn uploading_a_config_without_auth_is_unauthorized() {
    let server = test_server();
    let doc = minimal_document();
    let response = server
        .post("/configs/upload")
        .json(&json!({
            "config_id": "exp-http",
            "checksum": "irrelevant",
            "config": doc,
        }))
        .await;
    assert_eq!(response.status_code(), 401);
}
