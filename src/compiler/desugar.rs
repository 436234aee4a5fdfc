//! Step 2 of the pipeline: expand `text`/`survey` page shorthands and
//! button `action` shorthands into their canonical forms. Expressions are
//! still raw strings here; `validate` compiles them.

use crate::domain::{AnswerShape, FieldType, SurveyQuestionKind};

use super::document::{RawAction, RawBranch, RawComponent, RawDocument, RawPage, RawQuestion};
use super::CompileError;

pub const TERMINAL_PAGE_ID: &str = "__end";

#[derive(Debug, Clone)]
pub struct DesugaredComponent {
    pub id: String,
    pub kind: DesugaredComponentKind,
}

#[derive(Debug, Clone)]
pub enum DesugaredComponentKind {
    Text { markdown: bool, body: String },
    Survey { questions: Vec<DesugaredQuestion> },
    Media { object: String, content_type: Option<String> },
    Matchmaking { pool_id: String },
    Chat { agent_ids: Vec<String>, message_limit: Option<usize> },
}

#[derive(Debug, Clone)]
pub struct DesugaredQuestion {
    pub id: String,
    pub kind: SurveyQuestionKind,
    pub prompt: String,
    pub choices: Vec<String>,
    pub required: bool,
    pub answer: AnswerShape,
}

#[derive(Debug, Clone)]
pub struct DesugaredBranch {
    pub when: Option<String>,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct DesugaredAction {
    pub target: Option<String>,
    pub branches: Vec<DesugaredBranch>,
}

#[derive(Debug, Clone)]
pub struct DesugaredButton {
    pub id: String,
    pub label: Option<String>,
    pub action: DesugaredAction,
}

#[derive(Debug, Clone)]
pub struct DesugaredPage {
    pub id: String,
    pub components: Vec<DesugaredComponent>,
    pub buttons: Vec<DesugaredButton>,
    pub end: bool,
    pub end_redirect_url: Option<String>,
}

fn question_kind(raw: &str) -> Result<SurveyQuestionKind, CompileError> {
    match raw {
        "likert5" => Ok(SurveyQuestionKind::Likert5),
        "multiple_choice" => Ok(SurveyQuestionKind::MultipleChoice),
        "free_text" => Ok(SurveyQuestionKind::FreeText),
        "number" => Ok(SurveyQuestionKind::Number),
        "boolean" => Ok(SurveyQuestionKind::Boolean),
        other => Err(CompileError::UnknownQuestionKind(other.to_string())),
    }
}

fn desugar_question(raw: &RawQuestion) -> Result<DesugaredQuestion, CompileError> {
    let kind = question_kind(&raw.kind)?;
    if kind == SurveyQuestionKind::MultipleChoice && raw.choices.is_empty() {
        return Err(CompileError::EmptyChoices(raw.id.clone()));
    }
    let field_type = match kind {
        SurveyQuestionKind::Likert5 | SurveyQuestionKind::Number => FieldType::Int,
        SurveyQuestionKind::MultipleChoice => FieldType::Enum {
            values: raw.choices.clone(),
        },
        SurveyQuestionKind::FreeText => FieldType::String,
        SurveyQuestionKind::Boolean => FieldType::Bool,
    };
    Ok(DesugaredQuestion {
        id: raw.id.clone(),
        kind,
        prompt: raw.prompt.clone(),
        choices: raw.choices.clone(),
        required: raw.required,
        answer: AnswerShape { field_type },
    })
}

fn desugar_component(raw: &RawComponent, index: usize) -> Result<DesugaredComponent, CompileError> {
    let kind = match raw {
        RawComponent::Text(t) => DesugaredComponentKind::Text {
            markdown: t.markdown,
            body: t.body.clone(),
        },
        RawComponent::Survey(s) => DesugaredComponentKind::Survey {
            questions: s.questions.iter().map(desugar_question).collect::<Result<_, _>>()?,
        },
        RawComponent::Media { object, content_type } => DesugaredComponentKind::Media {
            object: object.clone(),
            content_type: content_type.clone(),
        },
        RawComponent::Matchmaking { pool_id } => DesugaredComponentKind::Matchmaking {
            pool_id: pool_id.clone(),
        },
        RawComponent::Chat { agent_ids, message_limit } => DesugaredComponentKind::Chat {
            agent_ids: agent_ids.clone(),
            message_limit: *message_limit,
        },
    };
    Ok(DesugaredComponent {
        id: format!("component_{index}"),
        kind,
    })
}

fn desugar_action(
    raw: Option<&RawAction>,
    page_index: usize,
    page_ids: &[String],
    needs_terminal: &mut bool,
) -> Result<DesugaredAction, CompileError> {
    match raw {
        None => Ok(DesugaredAction {
            target: None,
            branches: Vec::new(),
        }),
        Some(RawAction::Shorthand(word)) => match word.as_str() {
            "next" => {
                let target = page_ids
                    .get(page_index + 1)
                    .cloned()
                    .ok_or_else(|| CompileError::DanglingNext(page_ids[page_index].clone()))?;
                Ok(DesugaredAction {
                    target: Some(target),
                    branches: Vec::new(),
                })
            }
            "end" => {
                *needs_terminal = true;
                Ok(DesugaredAction {
                    target: Some(TERMINAL_PAGE_ID.to_string()),
                    branches: Vec::new(),
                })
            }
            other => Err(CompileError::UnknownActionShorthand(other.to_string())),
        },
        Some(RawAction::Explicit { target, branches }) => Ok(DesugaredAction {
            target: target.clone(),
            branches: branches
                .iter()
                .map(|b: &RawBranch| DesugaredBranch {
                    when: b.when.clone(),
                    target: b.target.clone(),
                })
                .collect(),
        }),
    }
}

fn desugar_page(
    raw: &RawPage,
    page_index: usize,
    page_ids: &[String],
    needs_terminal: &mut bool,
) -> Result<DesugaredPage, CompileError> {
    let mut components = Vec::new();
    if let Some(text) = &raw.text {
        components.push(DesugaredComponent {
            id: "text".to_string(),
            kind: DesugaredComponentKind::Text {
                markdown: text.markdown,
                body: text.body.clone(),
            },
        });
    }
    if let Some(survey) = &raw.survey {
        components.push(DesugaredComponent {
            id: "survey".to_string(),
            kind: DesugaredComponentKind::Survey {
                questions: survey.questions.iter().map(desugar_question).collect::<Result<_, _>>()?,
            },
        });
    }
    for (i, c) in raw.components.iter().enumerate() {
        components.push(desugar_component(c, i)?);
    }

    let buttons = raw
        .buttons
        .iter()
        .map(|b| {
            Ok(DesugaredButton {
                id: b.id.clone(),
                label: b.label.clone(),
                action: desugar_action(b.action.as_ref(), page_index, page_ids, needs_terminal)?,
            })
        })
        .collect::<Result<_, CompileError>>()?;

    Ok(DesugaredPage {
        id: raw.id.clone(),
        components,
        buttons,
        end: raw.end,
        end_redirect_url: raw.end_redirect_url.clone(),
    })
}

pub fn desugar(doc: &RawDocument) -> Result<Vec<DesugaredPage>, CompileError> {
    let page_ids: Vec<String> = doc.pages.iter().map(|p| p.id.clone()).collect();
    let mut needs_terminal = false;
    let mut pages = doc
        .pages
        .iter()
        .enumerate()
        .map(|(i, p)| desugar_page(p, i, &page_ids, &mut needs_terminal))
        .collect::<Result<Vec<_>, _>>()?;

    if needs_terminal && !pages.iter().any(|p| p.id == TERMINAL_PAGE_ID) {
        pages.push(DesugaredPage {
            id: TERMINAL_PAGE_ID.to_string(),
            components: Vec::new(),
            buttons: Vec::new(),
            end: true,
            end_redirect_url: None,
        });
    }
    Ok(pages)
}
