//! Steps 3-6 of the pipeline: structural validation, reference resolution,
//! expression compilation, and `user_state` schema checking.

use std::collections::HashSet;

use crate::domain::{
    Action, AgentConfig, Branch, Button, Component, ComponentKind, FieldType,
    MatchmakingComponentProps, MatchmakingPoolConfig, Page, SurveyQuestion, ToolSchema,
    UserStateSchema,
};
use crate::expr;

use super::desugar::{DesugaredAction, DesugaredComponentKind, DesugaredPage};
use super::document::RawDocument;
use super::{CompileError, LintDiagnostic};

pub struct Validated {
    pub pages: Vec<Page>,
    pub agents: Vec<AgentConfig>,
    pub matchmaking: Vec<MatchmakingPoolConfig>,
    pub diagnostics: Vec<LintDiagnostic>,
}

fn compile_action(action: &DesugaredAction) -> Result<Action, CompileError> {
    if action.target.is_none() && action.branches.is_empty() {
        return Err(CompileError::ActionNeedsTarget);
    }
    let branches = action
        .branches
        .iter()
        .map(|b| {
            let when = match &b.when {
                Some(text) => Some(expr::parse(text).map_err(|e| CompileError::Expression { message: e.0 })?),
                None => None,
            };
            Ok(Branch {
                when,
                target: b.target.clone(),
            })
        })
        .collect::<Result<Vec<_>, CompileError>>()?;
    Ok(Action {
        target: action.target.clone(),
        branches,
    })
}

fn compile_component(
    c: &super::desugar::DesugaredComponent,
    pool_ids: &HashSet<&str>,
    agent_ids: &HashSet<&str>,
) -> Result<Component, CompileError> {
    let kind = match &c.kind {
        DesugaredComponentKind::Text { markdown, body } => ComponentKind::Text {
            markdown: *markdown,
            body: body.clone(),
        },
        DesugaredComponentKind::Survey { questions } => ComponentKind::Survey {
            questions: questions
                .iter()
                .map(|q| SurveyQuestion {
                    id: q.id.clone(),
                    kind: q.kind,
                    prompt: q.prompt.clone(),
                    choices: q.choices.clone(),
                    required: q.required,
                    answer: q.answer.clone(),
                })
                .collect(),
        },
        DesugaredComponentKind::Media { object, content_type } => ComponentKind::Media {
            object: object.clone(),
            content_type: content_type.clone(),
        },
        DesugaredComponentKind::Matchmaking { pool_id } => {
            if !pool_ids.contains(pool_id.as_str()) {
                return Err(CompileError::UnknownPool(pool_id.clone()));
            }
            ComponentKind::Matchmaking(MatchmakingComponentProps {
                pool_id: pool_id.clone(),
            })
        }
        DesugaredComponentKind::Chat { agent_ids: ids, message_limit } => {
            for id in ids {
                if !agent_ids.contains(id.as_str()) {
                    return Err(CompileError::UnknownAgent(id.clone()));
                }
            }
            ComponentKind::Chat {
                agent_ids: ids.clone(),
                message_limit: *message_limit,
            }
        }
    };
    Ok(Component {
        id: c.id.clone(),
        kind,
    })
}

/// Every question id backing a `survey` component must be a declared
/// `user_state` field whose type accepts the question's answer shape
/// (spec.md §4.B step 6).
fn check_survey_schema(page: &Page, schema: &UserStateSchema) -> Result<(), CompileError> {
    for component in &page.components {
        if let ComponentKind::Survey { questions } = &component.kind {
            for q in questions {
                let declared = schema
                    .get(&q.id)
                    .ok_or_else(|| CompileError::SchemaMismatch(format!("survey answer `{}` has no declared user_state field", q.id)))?;
                if declared != &q.answer.field_type {
                    return Err(CompileError::SchemaMismatch(format!(
                        "user_state.{} declared as {:?} but survey answer is {:?}",
                        q.id, declared, q.answer.field_type
                    )));
                }
            }
        }
    }
    Ok(())
}

pub fn validate(doc: &RawDocument, pages: Vec<DesugaredPage>) -> Result<Validated, CompileError> {
    let mut seen_pages = HashSet::new();
    for p in &pages {
        if !seen_pages.insert(p.id.as_str()) {
            return Err(CompileError::DuplicatePageId(p.id.clone()));
        }
    }

    let mut agent_ids = HashSet::new();
    for a in &doc.agents {
        if !agent_ids.insert(a.id.as_str()) {
            return Err(CompileError::DuplicateAgentId(a.id.clone()));
        }
    }

    let mut pool_ids = HashSet::new();
    for p in &doc.matchmaking {
        if !pool_ids.insert(p.pool_id.as_str()) {
            return Err(CompileError::DuplicatePoolId(p.pool_id.clone()));
        }
    }

    if !seen_pages.contains(doc.initial_page_id.as_str()) {
        return Err(CompileError::UnknownTarget(doc.initial_page_id.clone()));
    }

    let mut compiled_pages = Vec::with_capacity(pages.len());
    for page in &pages {
        let mut button_ids = HashSet::new();
        let mut buttons = Vec::with_capacity(page.buttons.len());
        for b in &page.buttons {
            if !button_ids.insert(b.id.as_str()) {
                return Err(CompileError::DuplicateButtonId {
                    page: page.id.clone(),
                    button: b.id.clone(),
                });
            }
            let action = compile_action(&b.action)?;
            for target in action.all_targets() {
                if !seen_pages.contains(target) {
                    return Err(CompileError::UnknownTarget(target.to_string()));
                }
            }
            buttons.push(Button {
                id: b.id.clone(),
                label: b.label.clone(),
                action,
            });
        }
        if page.end && !buttons.is_empty() {
            return Err(CompileError::TerminalPageHasButtons(page.id.clone()));
        }

        let components = page
            .components
            .iter()
            .map(|c| compile_component(c, &pool_ids, &agent_ids))
            .collect::<Result<Vec<_>, _>>()?;

        compiled_pages.push(Page {
            id: page.id.clone(),
            components,
            buttons,
            end: page.end,
            end_redirect_url: page.end_redirect_url.clone(),
        });
    }

    for page in &compiled_pages {
        check_survey_schema(page, &doc.user_state_schema)?;
    }

    let agents: Vec<AgentConfig> = doc
        .agents
        .iter()
        .map(|a| AgentConfig {
            id: a.id.clone(),
            model: a.model.clone(),
            system_prompt: a.system_prompt.clone(),
            tools: a
                .tools
                .iter()
                .map(|t| ToolSchema {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                })
                .collect(),
        })
        .collect();

    let matchmaking: Vec<MatchmakingPoolConfig> = doc
        .matchmaking
        .iter()
        .map(|p| {
            if let Some(target) = &p.timeout_target {
                if !seen_pages.contains(target.as_str()) {
                    return Err(CompileError::UnknownTarget(target.clone()));
                }
            }
            Ok(MatchmakingPoolConfig {
                pool_id: p.pool_id.clone(),
                num_users: p.num_users,
                timeout_seconds: p.timeout_seconds,
                timeout_target: p.timeout_target.clone(),
                conditions: p.conditions.clone(),
                shared_state_init: p.shared_state_init.clone(),
            })
        })
        .collect::<Result<_, CompileError>>()?;

    let mut diagnostics = Vec::new();
    let referenced_agents: HashSet<&str> = compiled_pages
        .iter()
        .flat_map(|p| p.chat_agent_ids().unwrap_or(&[]))
        .map(String::as_str)
        .collect();
    for agent in &agents {
        if !referenced_agents.contains(agent.id.as_str()) {
            diagnostics.push(LintDiagnostic::warning(format!(
                "agent `{}` is declared but not used by any chat component",
                agent.id
            )));
        }
    }
    let referenced_pools: HashSet<&str> = compiled_pages
        .iter()
        .filter_map(|p| p.matchmaking_pool_id())
        .collect();
    for pool in &matchmaking {
        if !referenced_pools.contains(pool.pool_id.as_str()) {
            diagnostics.push(LintDiagnostic::warning(format!(
                "pool `{}` is declared but not used by any matchmaking component",
                pool.pool_id
            )));
        }
    }
    for (field, field_type) in &doc.user_state_schema {
        if let FieldType::Enum { values } = field_type {
            if values.is_empty() {
                diagnostics.push(LintDiagnostic::warning(format!(
                    "user_state.{field} is an enum with no declared values"
                )));
            }
        }
    }

    Ok(Validated {
        pages: compiled_pages,
        agents,
        matchmaking,
        diagnostics,
    })
}
