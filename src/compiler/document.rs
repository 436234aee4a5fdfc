//! The loosely-typed shapes a raw config document deserializes into.
//! Nothing here is validated; `desugar` and `validate` turn this into
//! `crate::domain::CanonicalConfig`.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::domain::FieldType;

#[derive(Debug, Clone, Deserialize)]
pub struct RawDocument {
    pub config_id: String,
    pub initial_page_id: String,
    pub pages: Vec<RawPage>,
    #[serde(default)]
    pub user_state_schema: HashMap<String, FieldType>,
    #[serde(default)]
    pub agents: Vec<RawAgent>,
    #[serde(default)]
    pub matchmaking: Vec<RawPool>,
    #[serde(default)]
    pub allow_retake: bool,
    #[serde(default)]
    pub require_auth: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPage {
    pub id: String,
    #[serde(default)]
    pub text: Option<RawText>,
    #[serde(default)]
    pub survey: Option<RawSurvey>,
    #[serde(default)]
    pub components: Vec<RawComponent>,
    #[serde(default)]
    pub buttons: Vec<RawButton>,
    #[serde(default)]
    pub end: bool,
    #[serde(default)]
    pub end_redirect_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawText {
    #[serde(default = "default_true")]
    pub markdown: bool,
    pub body: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSurvey {
    pub questions: Vec<RawQuestion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestion {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub prompt: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "props", rename_all = "snake_case")]
pub enum RawComponent {
    Text(RawText),
    Survey(RawSurvey),
    Media {
        object: String,
        #[serde(default)]
        content_type: Option<String>,
    },
    Matchmaking {
        pool_id: String,
    },
    Chat {
        #[serde(default)]
        agent_ids: Vec<String>,
        #[serde(default)]
        message_limit: Option<usize>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawButton {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub action: Option<RawAction>,
}

/// Either the `next`/`end` shorthand, a bare `target`, or a full
/// `{target?, branches?}` record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAction {
    Shorthand(String),
    Explicit {
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        branches: Vec<RawBranch>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBranch {
    #[serde(default)]
    pub when: Option<String>,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAgent {
    pub id: String,
    pub model: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<RawTool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPool {
    pub pool_id: String,
    pub num_users: usize,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub timeout_target: Option<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub shared_state_init: HashMap<String, Json>,
}
