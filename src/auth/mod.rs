//! Authentication boundary contract (spec.md §6): the core never decides
//! how a caller is identified, only what it does with the result.

use async_trait::async_trait;
use axum::http::HeaderMap;

/// Result of authenticating one request: the caller's user id, if any, plus
/// an opaque bag of session info handlers may log or forward.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user_id: Option<String>,
    pub session_info: serde_json::Value,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Identity;
}

/// Development/reference identity provider: trusts a bearer token as the
/// user id verbatim. Production deployments inject a real `IdentityProvider`
/// (OAuth/session-cookie backed) without touching the core.
pub struct BearerIdentityProvider;

#[async_trait]
impl IdentityProvider for BearerIdentityProvider {
    async fn authenticate(&self, headers: &HeaderMap) -> Identity {
        let user_id = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .filter(|token| !token.is_empty())
            .map(|token| token.to_string());
        Identity {
            user_id,
            session_info: serde_json::Value::Null,
        }
    }
}
