use std::sync::Arc;

use crate::agent::{AgentRuntime, ModelProvider};
use crate::auth::IdentityProvider;
use crate::chat::ChatCoordinator;
use crate::config::Settings;
use crate::engine::SessionEngine;
use crate::matchmaker::Matchmaker;
use crate::media::ObjectStore;
use crate::push::PushHub;
use crate::store::Store;

struct Inner<S: Store, P: ModelProvider> {
    store: Arc<S>,
    engine: Arc<SessionEngine<S>>,
    hub: Arc<PushHub<S>>,
    matchmaker: Arc<Matchmaker<S>>,
    chat: Arc<ChatCoordinator<S>>,
    agents: Arc<AgentRuntime<S, P>>,
    identity: Arc<dyn IdentityProvider>,
    media: Arc<dyn ObjectStore>,
    settings: Arc<Settings>,
}

/// Everything a handler needs, grouped the way the teacher's `AppState`
/// groups the database pool — one `Arc`-backed struct threaded through
/// `axum::extract::State`.
pub struct AppState<S: Store, P: ModelProvider> {
    inner: Arc<Inner<S, P>>,
}

impl<S: Store, P: ModelProvider> Clone for AppState<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Store + 'static, P: ModelProvider + 'static> AppState<S, P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        engine: Arc<SessionEngine<S>>,
        hub: Arc<PushHub<S>>,
        matchmaker: Arc<Matchmaker<S>>,
        chat: Arc<ChatCoordinator<S>>,
        agents: Arc<AgentRuntime<S, P>>,
        identity: Arc<dyn IdentityProvider>,
        media: Arc<dyn ObjectStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                engine,
                hub,
                matchmaker,
                chat,
                agents,
                identity,
                media,
                settings,
            }),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn engine(&self) -> &Arc<SessionEngine<S>> {
        &self.inner.engine
    }

    pub fn hub(&self) -> &Arc<PushHub<S>> {
        &self.inner.hub
    }

    pub fn matchmaker(&self) -> &Arc<Matchmaker<S>> {
        &self.inner.matchmaker
    }

    pub fn chat(&self) -> &Arc<ChatCoordinator<S>> {
        &self.inner.chat
    }

    pub fn agents(&self) -> &Arc<AgentRuntime<S, P>> {
        &self.inner.agents
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.inner.identity
    }

    pub fn media(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.media
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }
}
