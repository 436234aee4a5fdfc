//! 4.E Push stream hub — the single per-session subscription point for
//! server-originated events. Process-memory; durability comes from replaying
//! the event log (`crate::store::Store::list_events_after`) on resume, per
//! the "SSE delivery guarantee under process crash" design note (§9).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::Event;
use crate::store::{Store, StoreError};

/// What travels down a subscriber's channel: a durable event, or a
/// keepalive with no event of its own.
#[derive(Debug, Clone)]
pub enum PushFrame {
    Event(Event),
    Heartbeat,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<PushFrame>,
}

/// Per-process registry of live subscriptions, guarded per-session by
/// `DashMap`'s internal sharded locks rather than one global mutex.
pub struct PushHub<S: Store> {
    store: Arc<S>,
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    heartbeat_interval: Duration,
    disconnect_timeout: Duration,
}

impl<S: Store + 'static> PushHub<S> {
    pub fn new(store: Arc<S>, heartbeat_interval: Duration, disconnect_timeout: Duration) -> Self {
        Self {
            store,
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            heartbeat_interval,
            disconnect_timeout,
        }
    }

    /// Replays everything after `cursor` from the store, then registers a
    /// live subscription. The returned channel is closed when `token` is
    /// cancelled, when the hub drops the subscriber for a full buffer, or
    /// when the process shuts down.
    pub async fn subscribe(
        &self,
        session_id: &str,
        cursor: i64,
    ) -> Result<(mpsc::Receiver<PushFrame>, CancellationToken), StoreError> {
        let backlog = self.store.list_events_after(session_id, cursor).await?;
        let (tx, rx) = mpsc::channel(32);
        for event in backlog {
            // Fresh channel, nobody has read yet: a blocking send here would
            // deadlock if the backlog exceeds capacity, so this is
            // best-effort and the client's own resume/replay catches the rest.
            if tx.try_send(PushFrame::Event(event)).is_err() {
                break;
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(session_id.to_string())
            .or_default()
            .push(Subscriber { id, tx: tx.clone() });

        let token = CancellationToken::new();
        let child = token.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let disconnect_timeout = self.disconnect_timeout;
        let session_key = session_id.to_string();
        let subscribers = Arc::clone(&self.subscribers);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        // A send that blocks past `disconnect_timeout` means
                        // nothing is draining the channel on the other end —
                        // a half-open connection. Tear the subscription down
                        // rather than hold the slot forever.
                        match tokio::time::timeout(disconnect_timeout, tx.send(PushFrame::Heartbeat)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) | Err(_) => break,
                        }
                    }
                }
            }
            if let Some(mut entry) = subscribers.get_mut(&session_key) {
                entry.retain(|s| s.id != id);
            }
        });

        Ok((rx, token))
    }

    /// Fans `event` out to any live subscribers for `session_id`. The caller
    /// must have already persisted it (its `sequence` must be store-assigned)
    /// before calling this — the hub never assigns sequences itself.
    /// Non-blocking; a full subscriber buffer drops that one subscription
    /// (the client reconnects and replays from the store, losing nothing).
    pub fn publish(&self, session_id: &str, event: Event) {
        if let Some(mut entry) = self.subscribers.get_mut(session_id) {
            entry.retain(|s| s.tx.try_send(PushFrame::Event(event.clone())).is_ok());
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
