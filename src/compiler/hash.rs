//! Step 7: a content-addressable `configHash` over the canonical form.
//! Re-derived instead of serde'd through, so it is stable across the
//! `when`-as-source-text round trip.

use sha2::{Digest, Sha256};

use crate::domain::{CanonicalConfig, ComponentKind};

/// Renders the parts of a config that define its behaviour (everything but
/// `config_id`/`config_hash` themselves) into a stable string and digests it.
pub fn compute(config: &CanonicalConfig) -> String {
    let mut out = String::new();
    out.push_str(&config.initial_page_id);
    for page in &config.pages {
        out.push('\n');
        out.push_str(&page.id);
        out.push(if page.end { 'T' } else { 'F' });
        for component in &page.components {
            render_component(&mut out, component);
        }
        for button in &page.buttons {
            out.push_str(&button.id);
            if let Some(t) = &button.action.target {
                out.push_str(t);
            }
            for branch in &button.action.branches {
                let when = branch.when.as_ref().map(|e| e.source_text()).unwrap_or_default();
                out.push_str(&when);
                out.push_str(&branch.target);
            }
        }
    }
    let mut fields: Vec<_> = config.user_state_schema.iter().collect();
    fields.sort_by_key(|(k, _)| k.clone());
    for (name, ty) in fields {
        out.push_str(name);
        out.push_str(&format!("{ty:?}"));
    }
    for agent in &config.agents {
        out.push_str(&agent.id);
        out.push_str(&agent.model);
        out.push_str(&agent.system_prompt);
    }
    for pool in &config.matchmaking {
        out.push_str(&pool.pool_id);
        out.push_str(&pool.num_users.to_string());
        out.push_str(&pool.conditions.join(","));
    }

    let digest = Sha256::digest(out.as_bytes());
    hex::encode(digest)
}

fn render_component(out: &mut String, component: &crate::domain::Component) {
    out.push_str(&component.id);
    match &component.kind {
        ComponentKind::Text { markdown, body } => {
            out.push(if *markdown { 'm' } else { 'p' });
            out.push_str(body);
        }
        ComponentKind::Survey { questions } => {
            for q in questions {
                out.push_str(&q.id);
                out.push_str(&format!("{:?}", q.kind));
            }
        }
        ComponentKind::Media { object, .. } => out.push_str(object),
        ComponentKind::Matchmaking(props) => out.push_str(&props.pool_id),
        ComponentKind::Chat { agent_ids, .. } => out.push_str(&agent_ids.join(",")),
    }
}
