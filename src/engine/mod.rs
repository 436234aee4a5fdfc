//! 4.D Session engine — advances a participant through the page graph and
//! ingests client events idempotently. All writes for a single `Advance`
//! occur inside one CAS on `Session.version` (spec.md §4.D).

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value as Json};

use crate::domain::{CanonicalConfig, Event, EventType, Page, Session, SessionStatus};
use crate::expr::{self, EvalContext};
use crate::push::PushHub;
use crate::store::{NewEvent, SessionPatch, Store, StoreError};

const MAX_CAS_RETRIES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown button")]
    UnknownButton,
    #[error("unknown node")]
    UnknownNode,
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("forbidden write: {0}")]
    ForbiddenWrite(String),
    #[error("no branch matched")]
    NoBranchMatched,
    #[error("gone")]
    Gone,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A client-authored action: a button click, optionally carrying a survey
/// submission or other payload.
#[derive(Debug, Clone, Default)]
pub struct AdvanceRequest {
    pub button_id: String,
    pub payload: Json,
    pub idempotency_key: Option<String>,
}

/// Server-originated injections used by F/G/H (`ApplyServerEvent`).
#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub event_type: EventType,
    pub component_id: Option<String>,
    pub data: Json,
    pub patch: SessionPatch,
}

pub struct SessionEngine<S: Store> {
    store: Arc<S>,
}

impl<S: Store> SessionEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn start_session(
        &self,
        config_id: &str,
        participant_id: &str,
    ) -> Result<(Session, Page), EngineError> {
        let config = self.store.get_config(config_id).await?;
        let session = Session::new(
            uuid::Uuid::new_v4().to_string(),
            config_id.to_string(),
            participant_id.to_string(),
            config.initial_page_id.clone(),
        );
        self.store.insert_session(session.clone()).await?;
        let page = config
            .page(&session.current_page_id)
            .cloned()
            .ok_or(EngineError::UnknownNode)?;
        Ok((session, page))
    }

    pub async fn get_session(&self, session_id: &str) -> Result<(Session, Page), EngineError> {
        let session = self.store.get_session(session_id).await?;
        let config = self.store.get_config(&session.config_id).await?;
        let page = config
            .page(&session.current_page_id)
            .cloned()
            .ok_or(EngineError::UnknownNode)?;
        Ok((session, page))
    }

    pub async fn advance(
        &self,
        session_id: &str,
        request: AdvanceRequest,
    ) -> Result<(Session, Page), EngineError> {
        if let Some(key) = &request.idempotency_key {
            if let Some(replay) = self.store.check_idempotency(session_id, key).await? {
                let config = self.store.get_config(&replay.session.config_id).await?;
                let page = config
                    .page(&replay.session.current_page_id)
                    .cloned()
                    .ok_or(EngineError::UnknownNode)?;
                return Ok((replay.session, page));
            }
        }

        for _ in 0..MAX_CAS_RETRIES {
            let session = self.store.get_session(session_id).await?;
            if session.status != SessionStatus::Active {
                return Err(EngineError::Gone);
            }
            let config = self.store.get_config(&session.config_id).await?;
            match self.try_advance(&config, &session, &request).await {
                Ok(outcome) => return Ok(outcome),
                Err(EngineError::Store(StoreError::VersionConflict)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::Store(StoreError::VersionConflict))
    }

    async fn try_advance(
        &self,
        config: &CanonicalConfig,
        session: &Session,
        request: &AdvanceRequest,
    ) -> Result<(Session, Page), EngineError> {
        let page = config.page(&session.current_page_id).ok_or(EngineError::UnknownNode)?;
        let button = page.button(&request.button_id).ok_or(EngineError::UnknownButton)?;

        let mut user_state_patch = Map::new();
        let mut is_survey_submission = false;
        if let Some(answers) = request.payload.get("answers").and_then(|v| v.as_object()) {
            is_survey_submission = true;
            user_state_patch = validate_survey_answers(page, answers)?;
        }

        let mut patched_user_state = session.user_state.clone();
        for (k, v) in &user_state_patch {
            patched_user_state.insert(k.clone(), v.clone());
        }

        let run_meta = serde_json::json!({ "current_page_id": session.current_page_id });
        let ctx = EvalContext::new(patched_user_state, request.payload.clone(), run_meta);

        let target = pick_target(&button.action, &ctx)?;
        let target_page = config.page(target).ok_or(EngineError::UnknownNode)?;

        let mut patch = SessionPatch {
            current_page_id: Some(target.to_string()),
            user_state_patch,
            ..Default::default()
        };
        if target_page.end {
            patch.status = Some(SessionStatus::Ended);
            patch.ended_at = Some(Utc::now());
        }

        let mut new_events = vec![NewEvent {
            event_type: EventType::ButtonClick,
            page_id: session.current_page_id.clone(),
            component_id: Some(button.id.clone()),
            data: request.payload.clone(),
            idempotency_key: request.idempotency_key.clone(),
        }];
        if is_survey_submission {
            new_events.push(NewEvent {
                event_type: EventType::SurveySubmission,
                page_id: session.current_page_id.clone(),
                component_id: None,
                data: request.payload.clone(),
                idempotency_key: request.idempotency_key.clone(),
            });
        }
        new_events.push(NewEvent {
            event_type: EventType::StateUpdated,
            page_id: session.current_page_id.clone(),
            component_id: None,
            data: Json::Object(patch.user_state_patch.clone()),
            idempotency_key: request.idempotency_key.clone(),
        });

        let (updated, _events) = self
            .store
            .apply_session_transition(&session.session_id, session.version, patch, new_events)
            .await?;

        if target_page.end {
            if let Some(entry) = self.store.find_pool_entry(&session.session_id).await? {
                self.store.cancel_pool_entry(&session.session_id, &entry.pool_id).await?;
            }
        }
        if let Some(pool_id) = target_page.matchmaking_pool_id() {
            self.store
                .enqueue_pool_entry(crate::domain::MatchPoolEntry {
                    session_id: session.session_id.clone(),
                    config_id: session.config_id.clone(),
                    pool_id: pool_id.to_string(),
                    enqueued_at: Utc::now(),
                })
                .await?;
        }

        Ok((updated, target_page.clone()))
    }

    /// Generic client-originated event log (`POST /sessions/:id/events`):
    /// appends one event under the same idempotency/CAS discipline as
    /// `advance`, without touching `current_page_id` or `user_state`.
    pub async fn log_event(
        &self,
        session_id: &str,
        event_type: EventType,
        data: Json,
        idempotency_key: Option<String>,
    ) -> Result<(Session, Event), EngineError> {
        if let Some(key) = &idempotency_key {
            if let Some(replay) = self.store.check_idempotency(session_id, key).await? {
                let prior = self
                    .store
                    .list_events_after(session_id, replay.sequence - 1)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(EngineError::Gone)?;
                return Ok((replay.session, prior));
            }
        }
        for _ in 0..MAX_CAS_RETRIES {
            let session = self.store.get_session(session_id).await?;
            let new_event = NewEvent {
                event_type,
                page_id: session.current_page_id.clone(),
                component_id: None,
                data: data.clone(),
                idempotency_key: idempotency_key.clone(),
            };
            match self
                .store
                .apply_session_transition(session_id, session.version, SessionPatch::default(), vec![new_event])
                .await
            {
                Ok((updated, mut events)) => return Ok((updated, events.remove(0))),
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Store(StoreError::VersionConflict))
    }

    /// Entry point for F/G/H to inject `match_found`, `timeout`,
    /// `agent_message`, `tool_assign_state`, etc. without going through a
    /// client-authored button click.
    pub async fn apply_server_event(
        &self,
        session_id: &str,
        event: ServerEvent,
    ) -> Result<(Session, Event), EngineError> {
        for _ in 0..MAX_CAS_RETRIES {
            let session = self.store.get_session(session_id).await?;
            let new_event = NewEvent {
                event_type: event.event_type,
                page_id: session.current_page_id.clone(),
                component_id: event.component_id.clone(),
                data: event.data.clone(),
                idempotency_key: None,
            };
            match self
                .store
                .apply_session_transition(session_id, session.version, event.patch.clone(), vec![new_event])
                .await
            {
                Ok((updated, mut events)) => return Ok((updated, events.remove(0))),
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Store(StoreError::VersionConflict))
    }

    /// `apply_server_event` followed by handing the now-sequenced event to
    /// the push hub — the "persist, then publish" ordering F/G/H all need
    /// (spec.md §4.E `Publish`).
    pub async fn apply_and_publish(
        &self,
        hub: &PushHub<S>,
        session_id: &str,
        event: ServerEvent,
    ) -> Result<Session, EngineError> {
        let (session, persisted) = self.apply_server_event(session_id, event).await?;
        hub.publish(session_id, persisted);
        Ok(session)
    }
}

fn pick_target<'a>(action: &'a crate::domain::Action, ctx: &EvalContext) -> Result<&'a str, EngineError> {
    for branch in &action.branches {
        if expr::evaluate_optional(branch.when.as_ref(), ctx) {
            return Ok(branch.target.as_str());
        }
    }
    action.target.as_deref().ok_or(EngineError::NoBranchMatched)
}

fn validate_survey_answers(page: &Page, answers: &Map<String, Json>) -> Result<Map<String, Json>, EngineError> {
    let questions = page.components.iter().find_map(|c| match &c.kind {
        crate::domain::ComponentKind::Survey { questions } => Some(questions),
        _ => None,
    });
    let Some(questions) = questions else {
        return Err(EngineError::SchemaMismatch("page has no survey component".into()));
    };

    for key in answers.keys() {
        if !questions.iter().any(|q| &q.id == key) {
            return Err(EngineError::ForbiddenWrite(format!("no such survey question `{key}`")));
        }
    }

    let mut patch = Map::new();
    for question in questions {
        match answers.get(&question.id) {
            Some(value) => {
                if !question.answer.field_type.accepts(value) {
                    return Err(EngineError::SchemaMismatch(format!(
                        "answer for `{}` does not match its declared type",
                        question.id
                    )));
                }
                patch.insert(question.id.clone(), value.clone());
            }
            None if question.required => {
                return Err(EngineError::SchemaMismatch(format!("missing required answer `{}`", question.id)));
            }
            None => {}
        }
    }
    Ok(patch)
}
