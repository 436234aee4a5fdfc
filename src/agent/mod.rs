//! 4.H Agent runtime — one worker per agent per group, reacting to chat
//! traffic and dispatching the two built-in tools (`end_chat`,
//! `assign_state`) plus custom tools declared on the agent's config.
//! Grounded in the teacher's `GroqService`/`DeepSeekService` call pattern
//! (see `provider`), generalized here into a provider-agnostic trait since
//! no single teacher service owns a working streaming implementation.

pub mod provider;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use provider::{ChatTurn, CompletionOutcome, CompletionRequest, ModelProvider, ProviderError, ToolCall, ToolDeclaration};

use crate::chat::{ChatCoordinator, ChatError};
use crate::domain::{AgentConfig, CanonicalConfig, ChatMessage, EventType, Group, SenderKind};
use crate::engine::{EngineError, ServerEvent, SessionEngine};
use crate::push::PushHub;
use crate::store::{SessionPatch, Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("unknown agent `{0}`")]
    UnknownAgent(String),
    #[error("invalid tool call: {0}")]
    InvalidToolCall(String),
    #[error("agent is dormant after repeated failures")]
    Dormant,
}

impl From<EngineError> for AgentError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Store(s) => AgentError::Store(s),
            other => AgentError::InvalidToolCall(other.to_string()),
        }
    }
}

/// What wakes a worker up (spec.md §4.H "Worker lifecycle").
#[derive(Debug, Clone)]
pub enum Trigger {
    ParticipantMessage(ChatMessage),
    Start,
}

struct WorkerHandle {
    agent_id: String,
    tx: mpsc::Sender<Trigger>,
    cancel: CancellationToken,
}

#[derive(Clone)]
struct WorkerDeps<S: Store, P: ModelProvider> {
    store: Arc<S>,
    engine: Arc<SessionEngine<S>>,
    hub: Arc<PushHub<S>>,
    chat: Arc<ChatCoordinator<S>>,
    provider: Arc<P>,
    turn_timeout: Duration,
    failure_threshold: u32,
}

/// Owns every live agent worker, keyed by group. One worker per
/// `(group, agent)` pair, spawned once when the group's chat component is
/// first reached and torn down when the chat ends or the process shuts down.
pub struct AgentRuntime<S: Store, P: ModelProvider> {
    deps: WorkerDeps<S, P>,
    workers: DashMap<String, Vec<WorkerHandle>>,
}

impl<S: Store + 'static, P: ModelProvider + 'static> AgentRuntime<S, P> {
    pub fn new(
        store: Arc<S>,
        engine: Arc<SessionEngine<S>>,
        hub: Arc<PushHub<S>>,
        chat: Arc<ChatCoordinator<S>>,
        provider: Arc<P>,
        turn_timeout: Duration,
        failure_threshold: u32,
    ) -> Self {
        Self {
            deps: WorkerDeps {
                store,
                engine,
                hub,
                chat,
                provider,
                turn_timeout,
                failure_threshold,
            },
            workers: DashMap::new(),
        }
    }

    /// Spawns one worker per id in `agent_ids` for `group`, idempotently —
    /// a group whose workers already exist is left untouched.
    pub fn spawn_for_group(&self, config: &CanonicalConfig, group: &Group, agent_ids: &[String]) {
        if self.workers.contains_key(&group.group_id) {
            return;
        }
        let mut handles = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            let Some(agent) = config.agent(agent_id).cloned() else {
                tracing::warn!(agent_id, "chat component references unknown agent; skipping worker");
                continue;
            };
            let (tx, rx) = mpsc::channel(16);
            let cancel = CancellationToken::new();
            let deps = self.deps.clone();
            let group_id = group.group_id.clone();
            let worker_cancel = cancel.clone();
            tokio::spawn(async move {
                run_worker(agent, group_id, deps, rx, worker_cancel).await;
            });
            handles.push(WorkerHandle {
                agent_id: agent_id.clone(),
                tx,
                cancel,
            });
        }
        self.workers.insert(group.group_id.clone(), handles);
    }

    /// Wakes every non-dormant worker in `group_id` with the new message.
    /// Best-effort: a full or closed channel just means that worker misses
    /// this particular nudge, same as a dropped push-stream frame.
    pub fn notify_message(&self, group_id: &str, message: &ChatMessage) {
        if let Some(handles) = self.workers.get(group_id) {
            for handle in handles.value() {
                if handle.agent_id == message.sender_id {
                    continue; // an agent never reacts to its own message
                }
                let _ = handle.tx.try_send(Trigger::ParticipantMessage(message.clone()));
            }
        }
    }

    /// Tears down every worker for a group once its chat has ended.
    pub fn shutdown_group(&self, group_id: &str) {
        if let Some((_, handles)) = self.workers.remove(group_id) {
            for handle in handles {
                handle.cancel.cancel();
            }
        }
    }
}

async fn run_worker<S: Store + 'static, P: ModelProvider + 'static>(
    agent: AgentConfig,
    group_id: String,
    deps: WorkerDeps<S, P>,
    mut rx: mpsc::Receiver<Trigger>,
    cancel: CancellationToken,
) {
    let failures = AtomicU32::new(0);
    let dormant = AtomicBool::new(false);
    loop {
        let trigger = tokio::select! {
            _ = cancel.cancelled() => break,
            trigger = rx.recv() => match trigger {
                Some(t) => t,
                None => break,
            },
        };
        if dormant.load(Ordering::SeqCst) {
            continue;
        }
        let _ = &trigger; // both variants drive the same turn: re-read full history
        if let Err(e) = handle_turn(&agent, &group_id, &deps).await {
            let count = failures.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(agent_id = %agent.id, group_id = %group_id, error = %e, failures = count, "agent turn failed");
            report_failure(&agent, &group_id, &deps, &e).await;
            if count >= deps.failure_threshold {
                dormant.store(true, Ordering::SeqCst);
                tracing::warn!(agent_id = %agent.id, group_id = %group_id, "agent marked dormant after repeated failures");
            }
        } else {
            failures.store(0, Ordering::SeqCst);
        }
    }
}

async fn handle_turn<S: Store + 'static, P: ModelProvider + 'static>(
    agent: &AgentConfig,
    group_id: &str,
    deps: &WorkerDeps<S, P>,
) -> Result<(), AgentError> {
    let group = deps.store.get_group(group_id).await?;
    if group.chat_ended {
        return Ok(());
    }
    let config = deps.store.get_config(&group.config_id).await?;

    let history = deps.chat.replay_history(group_id, 0).await?;
    let turns = history
        .iter()
        .map(|m| ChatTurn {
            role: if m.sender_id == agent.id { "assistant" } else { "user" },
            content: m.body.clone(),
        })
        .collect();

    let tools = agent
        .tools
        .iter()
        .map(|t| ToolDeclaration {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        })
        .collect();

    let request = CompletionRequest {
        model: agent.model.clone(),
        system_prompt: agent.system_prompt.clone(),
        turns,
        tools,
    };

    let (tx, mut drain) = mpsc::channel(32);
    let drain_task = tokio::spawn(async move { while drain.recv().await.is_some() {} });

    let outcome = tokio::time::timeout(deps.turn_timeout, deps.provider.complete(request, tx))
        .await
        .map_err(|_| AgentError::Provider(ProviderError::RequestFailed("turn timed out".into())))??;
    drain_task.abort();

    match outcome {
        CompletionOutcome::Message(text) => {
            let text = text.trim();
            if !text.is_empty() {
                deps.chat.send_message(group_id, SenderKind::Agent, &agent.id, text, None).await?;
            }
            Ok(())
        }
        CompletionOutcome::ToolCall(call) => dispatch_tool(agent, &group, &config, deps, call).await,
    }
}

async fn dispatch_tool<S: Store + 'static, P: ModelProvider + 'static>(
    agent: &AgentConfig,
    group: &Group,
    config: &CanonicalConfig,
    deps: &WorkerDeps<S, P>,
    call: ToolCall,
) -> Result<(), AgentError> {
    match call.name.as_str() {
        "end_chat" => {
            deps.chat.end_chat(&group.group_id).await?;
            Ok(())
        }
        "assign_state" => {
            let fields = call
                .arguments
                .as_object()
                .ok_or_else(|| AgentError::InvalidToolCall("assign_state requires an object argument".into()))?;
            for (key, value) in fields {
                let field_type = config
                    .user_state_schema
                    .get(key)
                    .ok_or_else(|| AgentError::InvalidToolCall(format!("unknown user_state field `{key}`")))?;
                if !field_type.accepts(value) {
                    return Err(AgentError::InvalidToolCall(format!("value for `{key}` does not match its declared type")));
                }
            }
            for member in &group.member_session_ids {
                let mut patch = SessionPatch::default();
                patch.user_state_patch = fields.clone();
                deps.engine
                    .apply_and_publish(
                        &deps.hub,
                        member,
                        ServerEvent {
                            event_type: EventType::ToolCall,
                            component_id: None,
                            data: serde_json::json!({"tool": "assign_state", "agent_id": agent.id, "arguments": call.arguments}),
                            patch,
                        },
                    )
                    .await?;
            }
            Ok(())
        }
        other => dispatch_custom_tool(agent, group, deps, other, call).await,
    }
}

/// Custom tools declared on the agent's config are surfaced to the group as
/// a `tool_call` event for observability; the default behavior is
/// conservative and has no further side effect unless a future built-in is
/// added, since an arbitrary custom tool has no universal execution
/// semantics to assume.
async fn dispatch_custom_tool<S: Store + 'static, P: ModelProvider + 'static>(
    agent: &AgentConfig,
    group: &Group,
    deps: &WorkerDeps<S, P>,
    name: &str,
    call: ToolCall,
) -> Result<(), AgentError> {
    let Some(schema) = agent.tools.iter().find(|t| t.name == name) else {
        return Err(AgentError::InvalidToolCall(format!("undeclared tool `{name}`")));
    };
    if let Some(required) = schema.parameters.get("required").and_then(|v| v.as_array()) {
        let provided = call.arguments.as_object();
        for field in required {
            let Some(field_name) = field.as_str() else { continue };
            let present = provided.map(|o| o.contains_key(field_name)).unwrap_or(false);
            if !present {
                return Err(AgentError::InvalidToolCall(format!("missing required argument `{field_name}` for tool `{name}`")));
            }
        }
    }
    for member in &group.member_session_ids {
        deps.engine
            .apply_and_publish(
                &deps.hub,
                member,
                ServerEvent {
                    event_type: EventType::ToolCall,
                    component_id: None,
                    data: serde_json::json!({"tool": name, "agent_id": agent.id, "arguments": call.arguments}),
                    patch: SessionPatch::default(),
                },
            )
            .await?;
    }
    Ok(())
}

async fn report_failure<S: Store + 'static, P: ModelProvider + 'static>(agent: &AgentConfig, group_id: &str, deps: &WorkerDeps<S, P>, err: &AgentError) {
    let Ok(group) = deps.store.get_group(group_id).await else {
        return;
    };
    for member in &group.member_session_ids {
        let _ = deps
            .engine
            .apply_and_publish(
                &deps.hub,
                member,
                ServerEvent {
                    event_type: EventType::AgentError,
                    component_id: None,
                    data: serde_json::json!({"agent_id": agent.id, "message": err.to_string()}),
                    patch: SessionPatch::default(),
                },
            )
            .await;
    }
    let _ = deps
        .chat
        .send_message(
            group_id,
            SenderKind::System,
            &agent.id,
            "The assistant ran into a problem and will retry shortly.",
            None,
        )
        .await;
}
