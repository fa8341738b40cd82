// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Real-time subscription manager.
//!
//! Each subscription owns one listener task reading the store's
//! [`ChangeStream`]. The manager tracks a shared connection state:
//!
//! ```text
//! Disconnected ──► Connected ──► Error ──► Reconnecting ──► Connected
//!                                              │
//!                                              └─(attempts > max)──► Failed
//! ```
//!
//! A delivered snapshot marks the manager `Connected` and resets the
//! reconnect counter. A listener error schedules a wait of
//! `backoff.delay(attempts)`. The stream keeps being read during the wait:
//! a snapshot cancels it, while further errors are held until it elapses, so
//! consecutive errors are spaced by the backoff. Once the budget is spent the
//! state is `Failed` and no more waits are scheduled. The manager never re-issues a listen: the
//! store's push channel recovers on its own and the next delivery clears the
//! failure.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::change::{ChangeStream, Snapshot};
use crate::error::DataError;
use crate::metrics;
use crate::query::QueryOptions;
use crate::resilience::backoff::Backoff;
use crate::storage::{DocumentStore, StorageError};

/// Connection state shared by all subscriptions of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Error,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    /// Numeric code for the state gauge
    pub fn code(&self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Error => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Failed => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnect budget for listener errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(60),
            },
        }
    }
}

/// Listener identity: collection plus canonical query. Identical
/// subscriptions share one id and one listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(String);

impl ListenerId {
    #[must_use]
    pub fn new(collection: &str, query: &QueryOptions) -> Self {
        Self(format!("{}:{}", collection, query.canonical_key()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback invoked with every delivered snapshot.
pub type SnapshotCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

struct Subscription {
    collection: String,
    handle: JoinHandle<()>,
}

struct Shared {
    config: ReconnectConfig,
    attempts: AtomicU32,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
            metrics::set_connection_state(state.code());
        }
    }
}

/// Tracks push subscriptions and the reconnect state machine.
pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    shared: Arc<Shared>,
    subscriptions: DashMap<ListenerId, Subscription>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn DocumentStore>, config: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            store,
            shared: Arc::new(Shared {
                config,
                attempts: AtomicU32::new(0),
                state,
            }),
            subscriptions: DashMap::new(),
        }
    }

    /// Attach a listener for `query` on `collection`.
    ///
    /// A subscription with the same collection and query returns the
    /// existing id; `callback` is then ignored.
    pub async fn subscribe<F>(
        &self,
        collection: &str,
        query: &QueryOptions,
        callback: F,
    ) -> Result<ListenerId, DataError>
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = ListenerId::new(collection, query);
        if self.subscriptions.contains_key(&id) {
            debug!(listener = %id, "Reusing existing subscription");
            return Ok(id);
        }

        let stream = self.store.listen(collection, query).await?;
        let callback: SnapshotCallback = Arc::new(callback);

        let inserted = match self.subscriptions.entry(id.clone()) {
            // Lost a race with an identical subscribe; dropping our stream
            // detaches the extra listener.
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let handle = tokio::spawn(run_listener(
                    Arc::clone(&self.shared),
                    collection.to_string(),
                    stream,
                    callback,
                ));
                slot.insert(Subscription {
                    collection: collection.to_string(),
                    handle,
                });
                true
            }
        };

        if inserted {
            info!(listener = %id, "Subscribed");
            metrics::set_subscriptions(self.subscriptions.len());
        } else {
            debug!(listener = %id, "Reusing existing subscription");
        }
        Ok(id)
    }

    /// Detach one listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: &ListenerId) -> bool {
        let Some((_, subscription)) = self.subscriptions.remove(id) else {
            return false;
        };
        subscription.handle.abort();
        info!(listener = %id, collection = %subscription.collection, "Unsubscribed");
        self.after_removal();
        true
    }

    /// Detach every listener. Returns how many were removed.
    pub fn unsubscribe_all(&self) -> usize {
        let ids: Vec<ListenerId> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        let removed = ids.iter().filter(|id| self.unsubscribe(id)).count();
        if removed > 0 {
            info!(count = removed, "Unsubscribed all listeners");
        }
        removed
    }

    fn after_removal(&self) {
        metrics::set_subscriptions(self.subscriptions.len());
        if self.subscriptions.is_empty() {
            self.shared.attempts.store(0, Ordering::SeqCst);
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Observe state transitions
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Consecutive listener errors since the last delivery
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_subscribed(&self, id: &ListenerId) -> bool {
        self.subscriptions.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().handle.abort();
        }
    }
}

async fn run_listener(
    shared: Arc<Shared>,
    collection: String,
    mut stream: ChangeStream,
    callback: SnapshotCallback,
) {
    // Errors that arrive during a reconnect wait are handled once it elapses
    let mut deferred: VecDeque<StorageError> = VecDeque::new();
    let mut wait_until: Option<Instant> = None;

    loop {
        let deadline = wait_until.unwrap_or_else(Instant::now);
        tokio::select! {
            delivery = stream.recv() => {
                let Some(delivery) = delivery else { break };
                match delivery {
                    Ok(snapshot) => {
                        if wait_until.take().is_some() || !deferred.is_empty() {
                            debug!(collection = %collection, "Delivery during reconnect wait, cancelling it");
                        }
                        deferred.clear();
                        shared.attempts.store(0, Ordering::SeqCst);
                        callback(&snapshot);
                        shared.set_state(ConnectionState::Connected);
                    }
                    Err(e) => deferred.push_back(e),
                }
            }
            () = tokio::time::sleep_until(deadline), if wait_until.is_some() => {
                wait_until = None;
                debug!(collection = %collection, "Reconnect wait elapsed");
            }
        }

        while wait_until.is_none() {
            let Some(error) = deferred.pop_front() else { break };
            wait_until = on_listener_error(&shared, &collection, &error).map(|delay| Instant::now() + delay);
        }
    }
    debug!(collection = %collection, "Listener stream closed");
}

/// Count a listener error and return the wait before the next one is
/// handled, or `None` once the budget is spent.
fn on_listener_error(shared: &Shared, collection: &str, error: &StorageError) -> Option<Duration> {
    shared.set_state(ConnectionState::Error);
    let attempts = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
    if attempts > shared.config.max_attempts {
        warn!(
            collection = %collection,
            attempts,
            error = %error,
            "Listener reconnect budget exhausted"
        );
        shared.set_state(ConnectionState::Failed);
        return None;
    }

    let delay = shared.config.backoff.delay(attempts);
    warn!(
        collection = %collection,
        attempt = attempts,
        max_attempts = shared.config.max_attempts,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "Listener error, waiting to reconnect"
    );
    metrics::record_reconnect(collection);
    shared.set_state(ConnectionState::Reconnecting);
    Some(delay)
}
