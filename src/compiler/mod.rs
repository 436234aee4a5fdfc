//! 4.B Config compiler — `compile(document) -> (CanonicalConfig,
//! Vec<LintDiagnostic>, Result<_, CompileError>)`, implemented as the seven
//! numbered steps of the pipeline: parse, desugar, validate, resolve
//! references, compile expressions, schema-check, emit + hash.

pub mod desugar;
pub mod document;
pub mod hash;
pub mod validate;

use serde::Serialize;

use crate::domain::CanonicalConfig;

use document::RawDocument;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("malformed document: {0}")]
    Parse(String),
    #[error("duplicate page id: {0}")]
    DuplicatePageId(String),
    #[error("duplicate button id `{button}` on page `{page}`")]
    DuplicateButtonId { page: String, button: String },
    #[error("duplicate agent id: {0}")]
    DuplicateAgentId(String),
    #[error("duplicate pool id: {0}")]
    DuplicatePoolId(String),
    #[error("unknown page target: {0}")]
    UnknownTarget(String),
    #[error("unknown matchmaking pool: {0}")]
    UnknownPool(String),
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("terminal page `{0}` declares outgoing buttons")]
    TerminalPageHasButtons(String),
    #[error("action has neither a target nor branches")]
    ActionNeedsTarget,
    #[error("unknown button action shorthand: {0}")]
    UnknownActionShorthand(String),
    #[error("button action `next` on last page has no following page: {0}")]
    DanglingNext(String),
    #[error("unknown survey question kind: {0}")]
    UnknownQuestionKind(String),
    #[error("multiple_choice question `{0}` has no declared choices")]
    EmptyChoices(String),
    #[error("{message}")]
    Expression { message: String },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LintSeverity {
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct LintDiagnostic {
    pub severity: LintSeverity,
    pub message: String,
}

impl LintDiagnostic {
    fn warning(message: String) -> Self {
        Self {
            severity: LintSeverity::Warning,
            message,
        }
    }
}

/// Runs the full pipeline over a raw JSON document and produces the
/// canonical, immutable config plus any non-fatal lint diagnostics.
pub fn compile(raw_json: &serde_json::Value) -> Result<(CanonicalConfig, Vec<LintDiagnostic>), CompileError> {
    let document: RawDocument = serde_json::from_value(raw_json.clone()).map_err(|e| CompileError::Parse(e.to_string()))?;
    compile_document(&document)
}

pub fn compile_document(document: &RawDocument) -> Result<(CanonicalConfig, Vec<LintDiagnostic>), CompileError> {
    let pages = desugar::desugar(document)?;
    let validated = validate::validate(document, pages)?;

    let mut config = CanonicalConfig {
        config_id: document.config_id.clone(),
        config_hash: String::new(),
        initial_page_id: document.initial_page_id.clone(),
        pages: validated.pages,
        user_state_schema: document.user_state_schema.clone(),
        agents: validated.agents,
        matchmaking: validated.matchmaking,
        allow_retake: document.allow_retake,
        require_auth: document.require_auth,
    };
    config.config_hash = hash::compute(&config);

    Ok((config, validated.diagnostics))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn minimal_document() -> serde_json::Value {
        json!({
            "config_id": "exp1",
            "initial_page_id": "intro",
            "pages": [
                {
                    "id": "intro",
                    "text": {"body": "Welcome"},
                    "buttons": [
                        {"id": "continue", "action": "next"}
                    ]
                },
                {
                    "id": "bye",
                    "text": {"body": "Thanks"},
                    "end": true
                }
            ]
        })
    }

    #[test]
    fn compiles_minimal_document() {
        let (config, diagnostics) = compile(&minimal_document()).unwrap();
        assert_eq!(config.pages.len(), 2);
        assert!(diagnostics.is_empty());
        assert!(!config.config_hash.is_empty());
    }

    #[test]
    fn end_shorthand_creates_terminal_page() {
        let doc = json!({
            "config_id": "exp1",
            "initial_page_id": "intro",
            "pages": [
                {"id": "intro", "text": {"body": "hi"}, "buttons": [{"id": "done", "action": "end"}]}
            ]
        });
        let (config, _) = compile(&doc).unwrap();
        assert!(config.page(desugar::TERMINAL_PAGE_ID).unwrap().end);
    }

    #[test]
    fn unknown_branch_target_is_rejected() {
        let doc = json!({
            "config_id": "exp1",
            "initial_page_id": "intro",
            "pages": [
                {
                    "id": "intro",
                    "text": {"body": "hi"},
                    "buttons": [
                        {"id": "go", "action": {"branches": [{"target": "nowhere"}]}}
                    ]
                }
            ]
        });
        assert!(matches!(compile(&doc), Err(CompileError::UnknownTarget(_))));
    }

    #[test]
    fn terminal_page_with_buttons_is_rejected() {
        let doc = json!({
            "config_id": "exp1",
            "initial_page_id": "intro",
            "pages": [
                {"id": "intro", "text": {"body": "hi"}, "end": true, "buttons": [{"id": "go", "action": {"target": "intro"}}]}
            ]
        });
        assert!(matches!(compile(&doc), Err(CompileError::TerminalPageHasButtons(_))));
    }

    #[test]
    fn survey_answer_must_match_declared_schema() {
        let doc = json!({
            "config_id": "exp1",
            "initial_page_id": "intro",
            "user_state_schema": {"mood": {"kind": "string"}},
            "pages": [
                {
                    "id": "intro",
                    "survey": {"questions": [{"id": "mood", "type": "number", "prompt": "How do you feel, 1-5?"}]},
                    "end": true
                }
            ]
        });
        assert!(matches!(compile(&doc), Err(CompileError::SchemaMismatch(_))));
    }

    #[test]
    fn config_hash_is_stable_across_recompiles() {
        let doc = minimal_document();
        let (c1, _) = compile(&doc).unwrap();
        let (c2, _) = compile(&doc).unwrap();
        assert_eq!(c1.config_hash, c2.config_hash);
    }
}
