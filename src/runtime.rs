//! Background lifecycle machinery owned by the process, not any one
//! request: the idle-session sweeper (spec.md §5 "Cancellation and
//! timeouts"), grounded in the teacher's pattern of long-lived
//! `tokio::spawn`ed loops driven by a `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::domain::SessionStatus;
use crate::engine::SessionEngine;
use crate::matchmaker::Matchmaker;
use crate::store::{SessionPatch, Store, StoreError};

/// Runs until `cancel` fires, moving sessions idle past `ttl_secs` to
/// `abandoned` every `interval_secs`.
pub async fn run_idle_sweeper<S: Store + 'static>(store: Arc<S>, ttl_secs: u64, interval_secs: u64, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => sweep_once(&store, ttl_secs).await,
        }
    }
}

async fn sweep_once<S: Store>(store: &Arc<S>, ttl_secs: u64) {
    let idle = match store.list_idle_sessions(ttl_secs).await {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::warn!(error = %e, "idle-session sweep failed to list candidates");
            return;
        }
    };
    for session in idle {
        let patch = SessionPatch {
            status: Some(SessionStatus::Abandoned),
            ended_at: Some(Utc::now()),
            ..Default::default()
        };
        match store.apply_session_transition(&session.session_id, session.version, patch, vec![]).await {
            Ok(_) => {
                if let Ok(Some(entry)) = store.find_pool_entry(&session.session_id).await {
                    let _ = store.cancel_pool_entry(&session.session_id, &entry.pool_id).await;
                }
                tracing::info!(session_id = %session.session_id, "idle session moved to abandoned");
            }
            Err(StoreError::VersionConflict) => {
                // The session gained activity between listing and this
                // write; leave it for the next sweep.
            }
            Err(e) => tracing::warn!(session_id = %session.session_id, error = %e, "failed to abandon idle session"),
        }
    }
}

/// Runs until `cancel` fires, sweeping every matchmaking pool entry for
/// timeout past its pool's `timeout_seconds` every `interval_secs`. The
/// production driver for `Matchmaker::handle_timeout`.
pub async fn run_matchmaking_sweeper<S: Store + 'static>(
    matchmaker: Arc<Matchmaker<S>>,
    engine: Arc<SessionEngine<S>>,
    interval_secs: u64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => matchmaker.sweep_timeouts(&engine).await,
        }
    }
}
