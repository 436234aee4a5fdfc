use std::sync::Arc;
use std::time::Duration;

use pairit::agent::provider::OpenAiCompatibleProvider;
use pairit::agent::AgentRuntime;
use pairit::auth::BearerIdentityProvider;
use pairit::chat::ChatCoordinator;
use pairit::config::{MediaBackend, Settings};
use pairit::engine::SessionEngine;
use pairit::http::configure_app;
use pairit::http::state::AppState;
use pairit::matchmaker::Matchmaker;
use pairit::media::{FilesystemStore, ObjectStore};
use pairit::push::PushHub;
use pairit::store::postgres::PgStore;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "pairit=info,tower_http=info".into()))
        .init();

    let settings = Settings::load().expect("failed to load configuration");

    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(secrecy::ExposeSecret::expose_secret(&settings.database.url))
        .await
        .expect("failed to create database pool");

    let store = Arc::new(PgStore::new(pool));
    store.migrate().await.expect("failed to run migrations");

    let hub = Arc::new(PushHub::new(
        Arc::clone(&store),
        Duration::from_secs(settings.sse_heartbeat_secs),
        Duration::from_secs(settings.sse_subscriber_disconnect_secs),
    ));
    let engine = Arc::new(SessionEngine::new(Arc::clone(&store)));
    let matchmaker = Arc::new(Matchmaker::new(Arc::clone(&store), Arc::clone(&hub)));
    let chat = Arc::new(ChatCoordinator::new(Arc::clone(&store), Arc::clone(&engine), Arc::clone(&hub)));

    let provider = Arc::new(OpenAiCompatibleProvider::new(
        settings.agent_provider.base_url.clone(),
        settings.agent_provider.api_key.clone(),
        Duration::from_secs(settings.agent_turn_timeout_secs),
    ));
    let agents = Arc::new(AgentRuntime::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        Arc::clone(&hub),
        Arc::clone(&chat),
        provider,
        Duration::from_secs(settings.agent_turn_timeout_secs),
        settings.agent_failure_threshold,
    ));

    let identity = Arc::new(BearerIdentityProvider);
    let media: Arc<dyn ObjectStore> = match &settings.media.backend {
        MediaBackend::Filesystem => Arc::new(FilesystemStore::new(settings.media.root.clone(), "/media")),
        MediaBackend::S3 => panic!("S3 media backend is not implemented; see DESIGN.md"),
    };

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(pairit::runtime::run_idle_sweeper(
        Arc::clone(&store),
        settings.session_idle_ttl_secs,
        settings.sweeper_interval_secs,
        shutdown.clone(),
    ));
    let matchmaking_sweeper = tokio::spawn(pairit::runtime::run_matchmaking_sweeper(
        Arc::clone(&matchmaker),
        Arc::clone(&engine),
        settings.sweeper_interval_secs,
        shutdown.clone(),
    ));

    let state = AppState::new(store, engine, hub, matchmaker, chat, agents, identity, media, Arc::new(settings.clone()));
    let app = configure_app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.app_port));
    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind listener");
    info!("pairit listening on {}", listener.local_addr().unwrap());

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_signal.cancel();
        })
        .await
        .expect("server error");

    shutdown.cancel();
    let _ = sweeper.await;
    let _ = matchmaking_sweeper.await;
}
