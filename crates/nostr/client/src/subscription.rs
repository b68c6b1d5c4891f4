//! Live subscription bookkeeping shared between the pool and its handles.

use crate::error::Result;
use crate::relay::{RelayConnection, SubscriptionSink};
use nostr::{Event, Filter};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Callback invoked once per distinct event.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Callback invoked once when the stored-event phase is over.
pub type CompleteCallback = Box<dyn FnOnce() + Send>;

pub(crate) type RelayMap = Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>;
pub(crate) type TrackerMap = Arc<RwLock<HashMap<String, SubscriptionTracker>>>;

/// Generate a subscription ID (first 8 characters of a v4 UUID).
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Tracks which relays carry a live subscription and which finished their
/// stored-event phase.
#[derive(Debug, Clone)]
pub struct SubscriptionTracker {
    pub id: String,
    pub filters: Vec<Filter>,
    /// Relays that have this subscription
    pub relays: HashSet<String>,
    /// Relays that have sent EOSE (or closed the subscription)
    pub eose_relays: HashSet<String>,
    /// Whether every tracked relay has finished
    pub all_eose: bool,
    pub(crate) sink: SubscriptionSink,
}

impl SubscriptionTracker {
    pub(crate) fn new(id: impl Into<String>, filters: Vec<Filter>, sink: SubscriptionSink) -> Self {
        Self {
            id: id.into(),
            filters,
            relays: HashSet::new(),
            eose_relays: HashSet::new(),
            all_eose: false,
            sink,
        }
    }

    pub fn add_relay(&mut self, relay_url: impl Into<String>) {
        self.relays.insert(relay_url.into());
        self.update_all_eose();
    }

    pub fn remove_relay(&mut self, relay_url: &str) {
        self.relays.remove(relay_url);
        self.eose_relays.remove(relay_url);
        self.update_all_eose();
    }

    /// Mark EOSE received from a relay. Returns the new `all_eose`.
    pub fn mark_eose(&mut self, relay_url: impl Into<String>) -> bool {
        self.eose_relays.insert(relay_url.into());
        self.update_all_eose();
        self.all_eose
    }

    fn update_all_eose(&mut self) {
        self.all_eose = !self.relays.is_empty()
            && self.relays.iter().all(|url| self.eose_relays.contains(url));
    }

    pub fn has_relay(&self, relay_url: &str) -> bool {
        self.relays.contains(relay_url)
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }
}

/// Handle to a live subscription opened through the pool.
///
/// Dropping the handle does not end the subscription; call
/// [`Subscription::unsubscribe`].
pub struct Subscription {
    id: String,
    closed: AtomicBool,
    relays: RelayMap,
    trackers: TrackerMap,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        relays: RelayMap,
        trackers: TrackerMap,
        dispatcher: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            relays,
            trackers,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Send CLOSE to every relay still carrying the subscription and stop
    /// delivering events. Calling it again, or after the relays went away,
    /// is a no-op.
    pub async fn unsubscribe(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.trackers.write().await.remove(&self.id);

        let relays: Vec<Arc<RelayConnection>> =
            self.relays.read().await.values().cloned().collect();
        for relay in relays {
            if let Err(e) = relay.unsubscribe(&self.id).await {
                debug!("CLOSE {} on {} failed: {}", self.id, relay.url(), e);
            }
        }

        if let Ok(mut dispatcher) = self.dispatcher.lock()
            && let Some(handle) = dispatcher.take()
        {
            handle.abort();
        }
        Ok(())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
