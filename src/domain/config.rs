//! Canonical, post-compile representation of an experiment document.
//!
//! Nothing in this module is ever constructed from a raw config document
//! directly; it is only ever produced by `crate::compiler::compile`. See
//! `crate::compiler::document` for the loosely-typed input shapes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::expr::Expr;

/// A declared `user_state` / `group_state` field type, closed per spec §3.3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    Int,
    Bool,
    String,
    Object,
    Array,
    /// A closed value set, e.g. the `treatment` field of a matchmaking pool.
    Enum { values: Vec<String> },
}

impl FieldType {
    /// Whether `value` is an admissible instance of this declared type.
    pub fn accepts(&self, value: &Json) -> bool {
        match self {
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::String => value.is_string(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Enum { values } => value
                .as_str()
                .map(|s| values.iter().any(|v| v == s))
                .unwrap_or(false),
        }
    }
}

pub type UserStateSchema = HashMap<String, FieldType>;

/// `{ when?: Expr, target: PageId }` — evaluated in declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub when: Option<Expr>,
    pub target: String,
}

/// What a button does. Currently only `go_to`, either directly to a page
/// or through an ordered list of branches (first truthy `when` wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub target: Option<String>,
    #[serde(default)]
    pub branches: Vec<Branch>,
}

impl Action {
    /// Every target this action can resolve to, direct or branched.
    pub fn all_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.branches.iter().map(|b| b.target.as_str()).collect();
        if let Some(t) = &self.target {
            targets.push(t);
        }
        targets
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub label: Option<String>,
    pub action: Action,
}

/// Closed tagged union of built-in components (design note §9: a new
/// built-in is a new variant plus a handler, never a string-keyed dispatch).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "props", rename_all = "snake_case")]
pub enum ComponentKind {
    Text {
        markdown: bool,
        body: String,
    },
    Survey {
        questions: Vec<SurveyQuestion>,
    },
    Media {
        object: String,
        content_type: Option<String>,
    },
    Matchmaking(MatchmakingComponentProps),
    Chat {
        agent_ids: Vec<String>,
        message_limit: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingComponentProps {
    pub pool_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyQuestion {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SurveyQuestionKind,
    pub prompt: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub required: bool,
    pub answer: AnswerShape,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SurveyQuestionKind {
    Likert5,
    MultipleChoice,
    FreeText,
    Number,
    Boolean,
}

/// Canonical answer shape a question's `answer` shorthand expands to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerShape {
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub kind: ComponentKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub components: Vec<Component>,
    pub buttons: Vec<Button>,
    pub end: bool,
    pub end_redirect_url: Option<String>,
}

impl Page {
    pub fn matchmaking_pool_id(&self) -> Option<&str> {
        self.components.iter().find_map(|c| match &c.kind {
            ComponentKind::Matchmaking(m) => Some(m.pool_id.as_str()),
            _ => None,
        })
    }

    pub fn chat_agent_ids(&self) -> Option<&[String]> {
        self.components.iter().find_map(|c| match &c.kind {
            ComponentKind::Chat { agent_ids, .. } => Some(agent_ids.as_slice()),
            _ => None,
        })
    }

    pub fn button(&self, id: &str) -> Option<&Button> {
        self.buttons.iter().find(|b| b.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub model: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingPoolConfig {
    pub pool_id: String,
    pub num_users: usize,
    pub timeout_seconds: u64,
    pub timeout_target: Option<String>,
    pub conditions: Vec<String>,
    #[serde(default)]
    pub shared_state_init: HashMap<String, Json>,
}

/// The compiled, immutable description of an experiment's pages, state
/// schema, agents and matchmaking pools (spec.md §3.1). Identified by a
/// stable `config_id`; `config_hash` is content-addressable over the
/// canonical serialization, produced once by the compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalConfig {
    pub config_id: String,
    pub config_hash: String,
    pub initial_page_id: String,
    pub pages: Vec<Page>,
    pub user_state_schema: UserStateSchema,
    pub agents: Vec<AgentConfig>,
    pub matchmaking: Vec<MatchmakingPoolConfig>,
    pub allow_retake: bool,
    pub require_auth: bool,
}

impl CanonicalConfig {
    pub fn page(&self, id: &str) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == id)
    }

    pub fn pool(&self, id: &str) -> Option<&MatchmakingPoolConfig> {
        self.matchmaking.iter().find(|p| p.pool_id == id)
    }

    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }
}
