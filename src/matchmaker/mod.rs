//! 4.F Matchmaker — atomic group formation, balanced-random treatment
//! assignment, timeout and abandonment handling. The in-memory queue lives
//! in the store (`pop_pool_entries` etc.); this module owns the policy
//! (eligibility, histogram-based assignment) on top of it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;

use crate::domain::{CanonicalConfig, Group, MatchPoolEntry};
use crate::engine::{EngineError, ServerEvent, SessionEngine};
use crate::push::PushHub;
use crate::store::{SessionPatch, Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// A session is already enqueued or already grouped (spec.md §4.F
    /// `Enqueue`: "reject if the session is already in a pool or in a group").
    #[error("matchmaking conflict")]
    Conflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Matchmaker<S: Store> {
    store: Arc<S>,
    hub: Arc<PushHub<S>>,
}

impl<S: Store + 'static> Matchmaker<S> {
    pub fn new(store: Arc<S>, hub: Arc<PushHub<S>>) -> Self {
        Self { store, hub }
    }

    pub async fn enqueue(&self, config_id: &str, pool_id: &str, session_id: &str) -> Result<(), MatchError> {
        let session = self.store.get_session(session_id).await?;
        if session.group_id.is_some() {
            return Err(MatchError::Conflict);
        }
        if self.store.find_pool_entry(session_id).await?.is_some() {
            return Err(MatchError::Conflict);
        }
        self.store
            .enqueue_pool_entry(MatchPoolEntry {
                session_id: session_id.to_string(),
                config_id: config_id.to_string(),
                pool_id: pool_id.to_string(),
                enqueued_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    pub async fn cancel(&self, session_id: &str, pool_id: &str) -> Result<bool, MatchError> {
        Ok(self.store.cancel_pool_entry(session_id, pool_id).await?)
    }

    /// Attempts to pop exactly `pool.num_users` entries off `pool_id` and
    /// form a group. Returns `Ok(None)` if too few entries are currently
    /// eligible — not an error, just "nothing to do yet".
    pub async fn try_match(
        &self,
        config: &CanonicalConfig,
        pool_id: &str,
        engine: &SessionEngine<S>,
    ) -> Result<Option<Group>, MatchError> {
        let pool = config.pool(pool_id).ok_or(MatchError::Conflict)?;
        let Some(entries) = self.store.pop_pool_entries(pool_id, pool.num_users).await? else {
            return Ok(None);
        };

        // Filter for eligibility (still active, still on the matchmaking
        // page) after the atomic pop; ineligible entries are simply dropped
        // rather than requeued, since their owning session has already moved on.
        let mut eligible = Vec::with_capacity(entries.len());
        for entry in &entries {
            if let Ok(session) = self.store.get_session(&entry.session_id).await {
                if session.status == crate::domain::SessionStatus::Active
                    && session.current_page_id == config_page_with_pool(config, pool_id)
                {
                    eligible.push(entry.clone());
                }
            }
        }
        if eligible.len() < pool.num_users {
            self.store.requeue_pool_entries(entries).await?;
            return Ok(None);
        }

        let histogram = self.store.treatment_histogram(&config.config_id, pool_id).await?;
        let treatment = pick_balanced_condition(&pool.conditions, &histogram);

        let group_id = uuid::Uuid::new_v4().to_string();
        let mut shared_state = serde_json::Map::new();
        for (k, v) in &pool.shared_state_init {
            shared_state.insert(k.clone(), v.clone());
        }
        let group = Group {
            group_id: group_id.clone(),
            pool_id: pool_id.to_string(),
            config_id: config.config_id.clone(),
            member_session_ids: eligible.iter().map(|e| e.session_id.clone()).collect(),
            treatment: treatment.clone(),
            shared_state,
            chat_group_id: group_id.clone(),
            created_at: Utc::now(),
            closed_at: None,
            chat_ended: false,
            next_chat_sequence: 1,
        };

        if let Err(e) = self.store.insert_group(group.clone()).await {
            self.store.requeue_pool_entries(entries).await?;
            return Err(e.into());
        }
        self.store
            .record_treatment_assignment(&config.config_id, pool_id, &treatment)
            .await?;

        for entry in &eligible {
            let mut patch = SessionPatch {
                group_id: Some(Some(group_id.clone())),
                ..Default::default()
            };
            patch.user_state_patch.insert("group_id".to_string(), serde_json::json!(group_id));
            patch.user_state_patch.insert("treatment".to_string(), serde_json::json!(treatment));
            if let Err(e) = engine
                .apply_and_publish(
                    &self.hub,
                    &entry.session_id,
                    ServerEvent {
                        event_type: crate::domain::EventType::MatchFound,
                        component_id: None,
                        data: serde_json::json!({
                            "group_id": group_id,
                            "member_session_ids": group.member_session_ids,
                            "treatment": treatment,
                        }),
                        patch,
                    },
                )
                .await
            {
                tracing::warn!(session_id = %entry.session_id, error = %e, "failed to apply match_found to member; group record stands, member left stale");
            }
        }

        Ok(Some(group))
    }

    /// Removes a timed-out entry and, if the matchmaking page declares a
    /// `timeoutTarget`, transitions the session there as a synthetic
    /// server-originated `go_to` (spec.md §4.F "Timeout").
    pub async fn handle_timeout(
        &self,
        config: &CanonicalConfig,
        pool_id: &str,
        session_id: &str,
        engine: &SessionEngine<S>,
    ) -> Result<(), MatchError> {
        self.store.cancel_pool_entry(session_id, pool_id).await?;
        let pool = config.pool(pool_id).ok_or(MatchError::Conflict)?;

        let mut patch = SessionPatch::default();
        if let Some(target) = &pool.timeout_target {
            patch.current_page_id = Some(target.clone());
        }
        if let Err(err) = engine
            .apply_and_publish(
                &self.hub,
                session_id,
                ServerEvent {
                    event_type: crate::domain::EventType::MatchTimeout,
                    component_id: None,
                    data: serde_json::json!({ "pool_id": pool_id }),
                    patch,
                },
            )
            .await
        {
            return Err(match err {
                EngineError::Store(s) => MatchError::Store(s),
                other => MatchError::Store(StoreError::Other(other.to_string())),
            });
        }
        Ok(())
    }

    /// Called periodically by the runtime's matchmaking sweeper: finds
    /// every pending pool entry whose age has passed its pool's
    /// `timeout_seconds` and runs `handle_timeout` on it. One loop over
    /// every config/pool, not per-entry timers.
    pub async fn sweep_timeouts(&self, engine: &SessionEngine<S>) {
        let entries = match self.store.list_all_pool_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "matchmaking timeout sweep failed to list pool entries");
                return;
            }
        };

        let mut configs: HashMap<String, CanonicalConfig> = HashMap::new();
        for entry in entries {
            if !configs.contains_key(&entry.config_id) {
                match self.store.get_config(&entry.config_id).await {
                    Ok(config) => {
                        configs.insert(entry.config_id.clone(), config);
                    }
                    Err(e) => {
                        tracing::warn!(config_id = %entry.config_id, error = %e, "matchmaking sweep could not load config");
                        continue;
                    }
                }
            }
            let config = configs.get(&entry.config_id).expect("just inserted");
            let Some(pool) = config.pool(&entry.pool_id) else { continue };
            let age_secs = Utc::now().signed_duration_since(entry.enqueued_at).num_seconds().max(0) as u64;
            if age_secs < pool.timeout_seconds {
                continue;
            }
            if let Err(e) = self.handle_timeout(config, &entry.pool_id, &entry.session_id, engine).await {
                tracing::warn!(
                    session_id = %entry.session_id,
                    pool_id = %entry.pool_id,
                    error = %e,
                    "failed to apply a matchmaking timeout"
                );
            }
        }
    }
}

fn config_page_with_pool(config: &CanonicalConfig, pool_id: &str) -> String {
    config
        .pages
        .iter()
        .find(|p| p.matchmaking_pool_id() == Some(pool_id))
        .map(|p| p.id.clone())
        .unwrap_or_default()
}

/// Balanced random: among conditions currently at the minimum assigned
/// count, pick uniformly at random (spec.md §3.3 invariant 5, §4.F step 2).
fn pick_balanced_condition(conditions: &[String], histogram: &std::collections::HashMap<String, u64>) -> String {
    if conditions.is_empty() {
        return String::new();
    }
    let min_count = conditions.iter().map(|c| histogram.get(c).copied().unwrap_or(0)).min().unwrap_or(0);
    let candidates: Vec<&String> = conditions
        .iter()
        .filter(|c| histogram.get(*c).copied().unwrap_or(0) == min_count)
        .collect();
    candidates
        .choose(&mut rand::thread_rng())
        .map(|s| (*s).clone())
        .unwrap_or_else(|| conditions[0].clone())
}
