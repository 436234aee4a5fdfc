//! Provider-agnostic model call abstraction, grounded in the teacher's
//! `GroqService`/`DeepSeekService` reqwest-based gateway services: a thin
//! OpenAI-compatible chat-completions client with streaming SSE parsing.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("failed to parse response: {0}")]
    ParseError(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Json,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub turns: Vec<ChatTurn>,
    pub tools: Vec<ToolDeclaration>,
}

/// A requested tool invocation surfaced by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Json,
}

/// What the worker does with each chunk of a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    Delta(String),
    ToolCall(ToolCall),
}

/// The terminal outcome of a completion: either the model said something,
/// or it wants a tool invoked.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    Message(String),
    ToolCall(ToolCall),
}

#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Streams deltas over `updates` as they arrive and returns the final
    /// outcome once the provider signals the turn is complete.
    async fn complete(
        &self,
        request: CompletionRequest,
        updates: mpsc::Sender<StreamUpdate>,
    ) -> Result<CompletionOutcome, ProviderError>;
}

/// A reqwest-based client for any OpenAI-compatible `/chat/completions`
/// endpoint (Groq, DeepSeek, OpenRouter, ...), selected by base URL and key.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: secrecy::Secret<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: String, api_key: secrecy::Secret<String>, timeout: Duration) -> Self {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .expect("failed to build model provider http client");
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    id: String,
    function: RawFunctionCall,
}

#[derive(Debug, Deserialize)]
struct RawFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[async_trait::async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
        updates: mpsc::Sender<StreamUpdate>,
    ) -> Result<CompletionOutcome, ProviderError> {
        use secrecy::ExposeSecret;

        let mut messages = vec![serde_json::json!({"role": "system", "content": request.system_prompt})];
        for turn in &request.turns {
            messages.push(serde_json::json!({"role": turn.role, "content": turn.content}));
        }
        let tools: Vec<Json> = request
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {"name": t.name, "description": t.description, "parameters": t.parameters},
                })
            })
            .collect();

        let mut response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .json(&serde_json::json!({
                "model": request.model,
                "messages": messages,
                "tools": tools,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(body));
        }

        let mut buffer = String::new();
        let mut text = String::new();
        let mut pending_tool_call: Option<ToolCall> = None;

        while let Some(chunk) = response.chunk().await.map_err(|e| ProviderError::RequestFailed(e.to_string()))? {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find("\n\n") {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..pos + 2);
                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                if payload == "[DONE]" {
                    break;
                }
                let parsed: StreamResponse = serde_json::from_str(payload).map_err(|e| ProviderError::ParseError(e.to_string()))?;
                let Some(choice) = parsed.choices.into_iter().next() else {
                    continue;
                };
                if let Some(delta) = choice.delta.content {
                    text.push_str(&delta);
                    let _ = updates.send(StreamUpdate::Delta(delta)).await;
                }
                if let Some(calls) = choice.delta.tool_calls {
                    if let Some(raw) = calls.into_iter().next() {
                        let arguments: Json = serde_json::from_str(&raw.function.arguments).unwrap_or(Json::Null);
                        let call = ToolCall {
                            id: raw.id,
                            name: raw.function.name,
                            arguments,
                        };
                        let _ = updates.send(StreamUpdate::ToolCall(call.clone())).await;
                        pending_tool_call = Some(call);
                    }
                }
            }
        }

        match pending_tool_call {
            Some(call) => Ok(CompletionOutcome::ToolCall(call)),
            None => Ok(CompletionOutcome::Message(text)),
        }
    }
}
