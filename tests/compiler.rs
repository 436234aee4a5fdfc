use pairit::compiler::{compile, CompileError};
use serde_json::json;

fn document_with_pool_and_agent() -> serde_json::Value {
    json!({
        "config_id": "exp-full",
        "initial_page_id": "waiting",
        "user_state_schema": {"mood": {"kind": "number"}},
        "pages": [
            {
                "id": "waiting",
                "components": [{"type": "matchmaking", "props": {"pool_id": "pairs"}}],
                "buttons": [{"id": "continue", "action": "next"}]
            },
            {
                "id": "chatting",
                "components": [{"type": "chat", "props": {"agent_ids": ["coach"]}}],
                "buttons": [{"id": "done", "action": "end"}]
            }
        ],
        "agents": [
            {
                "id": "coach",
                "model": "demo-model",
                "system_prompt": "Be supportive.",
                "tools": [
                    {"name": "assign_state", "description": "set mood", "parameters": {"type": "object", "properties": {"mood": {"type": "number"}}}}
                ]
            }
        ],
        "matchmaking": [
            {"pool_id": "pairs", "num_users": 2, "timeout_seconds": 120, "conditions": ["control", "treatment"]}
        ]
    })
}

#[test]
fn compiles_a_document_with_matchmaking_and_an_agent() {
    let (config, diagnostics) = compile(&document_with_pool_and_agent()).unwrap();
    assert!(diagnostics.is_empty());
    assert_eq!(config.matchmaking.len(), 1);
    assert_eq!(config.agents.len(), 1);
    assert_eq!(config.agents[0].tools.len(), 1);
    assert_eq!(config.page("waiting").unwrap().matchmaking_pool_id(), Some("pairs"));
    assert_eq!(config.page("chatting").unwrap().chat_agent_ids(), Some(&["coach".to_string()][..]));
}

#[test]
fn matchmaking_pool_referencing_unknown_timeout_target_is_rejected() {
    let mut doc = document_with_pool_and_agent();
    doc["matchmaking"][0]["timeout_target"] = json!("nowhere");
    assert!(matches!(compile(&doc), Err(CompileError::UnknownTarget(_))));
}

#[test]
fn duplicate_page_ids_are_rejected() {
    let doc = json!({
        "config_id": "exp-dup",
        "initial_page_id": "intro",
        "pages": [
            {"id": "intro", "text": {"body": "a"}, "end": true},
            {"id": "intro", "text": {"body": "b"}, "end": true}
        ]
    });
    assert!(compile(&doc).is_err());
}

#[test]
fn two_structurally_different_documents_hash_differently() {
    let (c1, _) = compile(&document_with_pool_and_agent()).unwrap();
    let mut other = document_with_pool_and_agent();
    other["agents"][0]["system_prompt"] = json!("Be strict.");
    let (c2, _) = compile(&other).unwrap();
    assert_ne!(c1.config_hash, c2.config_hash);
}
