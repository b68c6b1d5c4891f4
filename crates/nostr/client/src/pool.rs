//! Relay pool for managing connections to multiple Nostr relays.
//!
//! The pool fans every operation out to its connected relays, one future per
//! relay, and merges what comes back: publishes resolve on the first
//! acceptance, queries and live subscriptions are de-duplicated by event id.
//! A relay that errors or stays silent only shrinks the effective relay set.

use crate::cache::EventStore;
use crate::error::{ClientError, Result};
use crate::relay::{
    ConnectionState, PublishConfirmation, RelayConfig, RelayConnection, RelayNotification,
    SubscriptionMessage,
};
use crate::subscription::{
    CompleteCallback, EventCallback, RelayMap, Subscription, SubscriptionTracker, TrackerMap,
    generate_subscription_id,
};
use futures::future::join_all;
use nostr::{Event, Filter, sort_events, unix_timestamp};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tracing::{debug, info, warn};
use url::Url;

/// Timeouts and policy for a [`RelayPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Websocket handshake timeout per relay
    pub connect_timeout: Duration,
    /// Window in which at least one relay must accept a publish
    pub publish_timeout: Duration,
    /// Default query deadline
    pub query_timeout: Duration,
    /// Live subscriptions report completion after this long at the latest
    pub eose_timeout: Duration,
    /// Replaces `eose_timeout` once when nothing arrived yet
    pub eose_extended_timeout: Duration,
    /// Drop events whose id or signature does not check out
    pub verify_signatures: bool,
    /// Admit `ws://` relays (local development and tests)
    pub allow_insecure_relays: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(8),
            query_timeout: Duration::from_secs(15),
            eose_timeout: Duration::from_secs(10),
            eose_extended_timeout: Duration::from_secs(15),
            verify_signatures: true,
            allow_insecure_relays: false,
        }
    }
}

/// Outcome of a publish that at least one relay accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishResult {
    pub event_id: String,
    /// Relays that accepted before the call resolved
    pub accepted_by: BTreeSet<String>,
    /// Relays that answered with a rejection or failed, with the reason
    pub rejected_by: BTreeMap<String, String>,
}

/// Per-call query options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Overrides [`PoolConfig::query_timeout`]
    pub timeout: Option<Duration>,
}

impl QueryOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Events emitted by the relay pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A relay connected
    Connected { relay_url: String },
    /// A relay disconnected
    Disconnected { relay_url: String },
    /// A connect attempt or a live socket failed
    ConnectionFailed { relay_url: String, error: String },
    /// Notice from a relay
    Notice { relay_url: String, message: String },
    /// OK response for a published event, including ones that arrived after
    /// the publish call resolved
    PublishAck {
        relay_url: String,
        event_id: String,
        accepted: bool,
        message: String,
    },
}

/// Snapshot of one relay in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    pub url: String,
    pub state: ConnectionState,
    pub last_error: Option<String>,
}

/// A pool of Nostr relay connections.
pub struct RelayPool {
    config: PoolConfig,
    /// Connections indexed by URL
    relays: RelayMap,
    /// Live subscription trackers indexed by subscription ID
    subscriptions: TrackerMap,
    /// Every event delivered through the pool
    store: Arc<RwLock<EventStore>>,
    /// Broadcast channel for pool events
    events_tx: broadcast::Sender<PoolEvent>,
    /// Per-relay notification forwarders
    forwarders: std::sync::Mutex<HashMap<String, JoinHandle<()>>>,
    /// Subscription IDs of queries still in flight
    queries: std::sync::Mutex<HashSet<String>>,
}

impl RelayPool {
    /// Create a new relay pool.
    pub fn new(config: PoolConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1000);
        Self {
            config,
            relays: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            store: Arc::new(RwLock::new(EventStore::new())),
            events_tx,
            forwarders: std::sync::Mutex::new(HashMap::new()),
            queries: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Fresh subscription ID, unused by any live subscription or running
    /// query. Queries reserve theirs until they finish.
    fn unused_subscription_id(
        &self,
        live: &HashMap<String, SubscriptionTracker>,
        reserve_for_query: bool,
    ) -> String {
        let mut queries = match self.queries.lock() {
            Ok(queries) => queries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut id = generate_subscription_id();
        while live.contains_key(&id) || queries.contains(&id) {
            id = generate_subscription_id();
        }
        if reserve_for_query {
            queries.insert(id.clone());
        }
        id
    }

    fn release_query_id(&self, id: &str) {
        match self.queries.lock() {
            Ok(mut queries) => queries.remove(id),
            Err(poisoned) => poisoned.into_inner().remove(id),
        };
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Subscribe to pool events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events_tx.subscribe()
    }

    /// Normalize a relay URL and check it is admissible for this pool.
    pub fn normalize_url(&self, url: &str) -> Result<String> {
        normalize_relay_url(url, self.config.allow_insecure_relays)
    }

    /// Add a relay to the pool. Returns `false` if it was already present.
    pub async fn add_relay(&self, url: &str) -> Result<bool> {
        let url = self.normalize_url(url)?;

        let relay = {
            let mut relays = self.relays.write().await;
            if relays.contains_key(&url) {
                debug!("Relay {} already in pool", url);
                return Ok(false);
            }
            let relay = Arc::new(RelayConnection::with_config(
                &url,
                RelayConfig {
                    connect_timeout: self.config.connect_timeout,
                },
            )?);
            relays.insert(url.clone(), Arc::clone(&relay));
            relay
        };

        info!("Adding relay to pool: {}", url);
        self.spawn_notification_forwarder(&relay);
        Ok(true)
    }

    /// Remove a relay from the pool, closing its connection.
    pub async fn remove_relay(&self, url: &str) -> Result<bool> {
        let url = self.normalize_url(url)?;

        let Some(relay) = self.relays.write().await.remove(&url) else {
            return Ok(false);
        };
        info!("Removing relay from pool: {}", url);

        relay.close().await?;

        if let Ok(mut forwarders) = self.forwarders.lock()
            && let Some(handle) = forwarders.remove(&url)
        {
            handle.abort();
        }

        let mut subs = self.subscriptions.write().await;
        for tracker in subs.values_mut() {
            tracker.remove_relay(&url);
        }
        Ok(true)
    }

    /// Forward a relay's state changes and notices to pool events.
    fn spawn_notification_forwarder(&self, relay: &Arc<RelayConnection>) {
        let mut rx = relay.notifications();
        let events_tx = self.events_tx.clone();
        let relay_url = relay.url().to_string();
        let relay_ref = Arc::downgrade(relay);

        let handle = tokio::spawn(async move {
            loop {
                let notification = match rx.recv().await {
                    Ok(n) => n,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Dropped {} notifications from {}", skipped, relay_url);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let pool_event = match notification {
                    RelayNotification::StateChanged(ConnectionState::Connected) => {
                        PoolEvent::Connected {
                            relay_url: relay_url.clone(),
                        }
                    }
                    RelayNotification::StateChanged(ConnectionState::Disconnected) => {
                        PoolEvent::Disconnected {
                            relay_url: relay_url.clone(),
                        }
                    }
                    RelayNotification::StateChanged(ConnectionState::Failed) => {
                        let error = match relay_ref.upgrade() {
                            Some(relay) => relay.last_error().await,
                            None => None,
                        };
                        PoolEvent::ConnectionFailed {
                            relay_url: relay_url.clone(),
                            error: error.unwrap_or_else(|| "connection failed".to_string()),
                        }
                    }
                    RelayNotification::StateChanged(ConnectionState::Connecting) => continue,
                    RelayNotification::Notice(message) => PoolEvent::Notice {
                        relay_url: relay_url.clone(),
                        message,
                    },
                };

                let _ = events_tx.send(pool_event);
            }
        });

        if let Ok(mut forwarders) = self.forwarders.lock() {
            forwarders.insert(relay.url().to_string(), handle);
        }
    }

    async fn relay(&self, url: &str) -> Result<Arc<RelayConnection>> {
        let url = self.normalize_url(url)?;
        self.relays
            .read()
            .await
            .get(&url)
            .cloned()
            .ok_or_else(|| ClientError::InvalidRelayUrl(format!("{} is not in the pool", url)))
    }

    /// Connect to a specific relay and hand it every live subscription.
    pub async fn connect_relay(&self, url: &str) -> Result<()> {
        let relay = self.relay(url).await?;
        relay.connect().await?;
        self.resubscribe(&relay).await;
        Ok(())
    }

    /// Close, wait `backoff`, and connect a relay again.
    pub async fn reconnect_relay(&self, url: &str, backoff: Duration) -> Result<()> {
        let relay = self.relay(url).await?;
        relay.reconnect(backoff).await?;
        self.resubscribe(&relay).await;
        Ok(())
    }

    async fn resubscribe(&self, relay: &RelayConnection) {
        let active: HashSet<String> = relay.active_subscriptions().await.into_iter().collect();
        let mut subs = self.subscriptions.write().await;
        for tracker in subs.values_mut() {
            if active.contains(&tracker.id) {
                continue;
            }
            match relay
                .subscribe_with_sink(&tracker.id, tracker.filters.clone(), tracker.sink.clone())
                .await
            {
                Ok(()) => tracker.add_relay(relay.url()),
                Err(e) => warn!(
                    "Failed to resubscribe {} on {}: {}",
                    tracker.id,
                    relay.url(),
                    e
                ),
            }
        }
    }

    /// Connect every relay concurrently. One result per relay.
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        let urls: Vec<String> = self.relays.read().await.keys().cloned().collect();

        let attempts = urls.into_iter().map(|url| async move {
            let result = self.connect_relay(&url).await;
            if let Err(e) = &result {
                warn!("Failed to connect to {}: {}", url, e);
            }
            (url, result)
        });
        join_all(attempts).await
    }

    /// Disconnect from all relays. Relays stay in the pool.
    pub async fn disconnect_all(&self) {
        let relays: Vec<Arc<RelayConnection>> = self.relays.read().await.values().cloned().collect();
        for relay in relays {
            if let Err(e) = relay.close().await {
                warn!("Error closing {}: {}", relay.url(), e);
            }
        }
        for tracker in self.subscriptions.write().await.values_mut() {
            tracker.relays.clear();
            tracker.eose_relays.clear();
            tracker.all_eose = false;
        }
    }

    /// Status of every relay in the pool, sorted by URL.
    pub async fn get_relays(&self) -> Vec<RelayStatus> {
        let relays: Vec<Arc<RelayConnection>> = self.relays.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(relays.len());
        for relay in relays {
            statuses.push(RelayStatus {
                url: relay.url().to_string(),
                state: relay.state().await,
                last_error: relay.last_error().await,
            });
        }
        statuses.sort_by(|a, b| a.url.cmp(&b.url));
        statuses
    }

    pub async fn connected_count(&self) -> usize {
        self.connected_relays().await.len()
    }

    async fn connected_relays(&self) -> Vec<Arc<RelayConnection>> {
        let relays: Vec<Arc<RelayConnection>> = self.relays.read().await.values().cloned().collect();
        let mut connected = Vec::with_capacity(relays.len());
        for relay in relays {
            if relay.is_connected().await {
                connected.push(relay);
            }
        }
        connected
    }

    /// Publish to every connected relay; resolves on the first acceptance.
    pub async fn publish(&self, event: &Event) -> Result<PublishResult> {
        if !nostr::verify(event) {
            return Err(ClientError::InvalidEvent(format!(
                "event {} failed id/signature verification",
                event.id
            )));
        }

        let relays = self.connected_relays().await;
        if relays.is_empty() {
            return Err(ClientError::NotConnected);
        }

        info!("Publishing {} to {} relays", event.id, relays.len());

        let (tx, mut rx) = mpsc::unbounded_channel();
        for relay in relays {
            let tx = tx.clone();
            let event = event.clone();
            let publish_timeout = self.config.publish_timeout;
            tokio::spawn(async move {
                let result = relay.publish(&event, publish_timeout).await;
                let _ = tx.send((relay.url().to_string(), result));
            });
        }
        drop(tx);

        let mut result = PublishResult {
            event_id: event.id.clone(),
            ..PublishResult::default()
        };
        let deadline = sleep(self.config.publish_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                answer = rx.recv() => match answer {
                    Some((relay_url, Ok(confirmation))) => {
                        emit_ack(&self.events_tx, &confirmation);
                        if confirmation.accepted {
                            result.accepted_by.insert(relay_url);
                            break;
                        }
                        debug!("{} rejected {}: {}", relay_url, event.id, confirmation.message);
                        result.rejected_by.insert(relay_url, confirmation.message);
                    }
                    Some((relay_url, Err(e))) => {
                        debug!("Publish to {} failed: {}", relay_url, e);
                        result.rejected_by.insert(relay_url, e.to_string());
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    debug!("Publish window for {} elapsed", event.id);
                    break;
                }
            }
        }

        if result.accepted_by.is_empty() {
            warn!("No relay accepted {}", event.id);
            return Err(ClientError::NoRelayAccepted {
                event_id: result.event_id,
                rejected_by: result.rejected_by,
            });
        }

        // Late answers still surface as pool events.
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some((_, answer)) = rx.recv().await {
                if let Ok(confirmation) = answer {
                    emit_ack(&events_tx, &confirmation);
                }
            }
        });

        Ok(result)
    }

    /// One-shot query across all connected relays.
    ///
    /// Waits per relay for EOSE, CLOSED or connection loss, bounded by the
    /// query timeout; silent relays contribute nothing. Results are
    /// de-duplicated, verified, stored and sorted newest first.
    pub async fn query(&self, filters: Vec<Filter>, options: QueryOptions) -> Result<Vec<Event>> {
        if filters.is_empty() {
            return Err(ClientError::InvalidFilter(
                "query needs at least one filter".to_string(),
            ));
        }

        let relays = self.connected_relays().await;
        if relays.is_empty() {
            return Err(ClientError::NotConnected);
        }

        let deadline = Instant::now() + options.timeout.unwrap_or(self.config.query_timeout);
        let subscription_id = {
            let subs = self.subscriptions.read().await;
            self.unused_subscription_id(&subs, true)
        };
        debug!("Query {} on {} relays", subscription_id, relays.len());

        let per_relay = relays.iter().map(|relay| {
            let filters = filters.clone();
            let subscription_id = subscription_id.as_str();
            async move {
                let mut rx = match relay.subscribe(subscription_id, filters).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        warn!("Query on {} failed: {}", relay.url(), e);
                        return Vec::new();
                    }
                };

                let mut events = Vec::new();
                loop {
                    match timeout_at(deadline, rx.recv()).await {
                        Ok(Some((_, SubscriptionMessage::Event(event)))) => events.push(event),
                        Ok(Some((_, SubscriptionMessage::Eose))) => break,
                        Ok(Some((_, SubscriptionMessage::Closed(reason)))) => {
                            debug!("{} closed query: {}", relay.url(), reason);
                            break;
                        }
                        Ok(None) => break,
                        Err(_) => {
                            debug!("{} did not finish before the query deadline", relay.url());
                            break;
                        }
                    }
                }

                if let Err(e) = relay.unsubscribe(subscription_id).await {
                    debug!("CLOSE on {} failed: {}", relay.url(), e);
                }
                events
            }
        });

        let batches = join_all(per_relay).await;
        self.release_query_id(&subscription_id);

        // Verify before dedup: a forged copy must not shadow the real event.
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for event in batches.into_iter().flatten() {
            if seen.contains(&event.id) {
                continue;
            }
            if self.config.verify_signatures && !nostr::verify(&event) {
                debug!("Dropping event {} with invalid signature", event.id);
                continue;
            }
            seen.insert(event.id.clone());
            events.push(event);
        }

        {
            let mut store = self.store.write().await;
            for event in &events {
                store.insert(event.clone());
            }
        }

        sort_events(&mut events);
        Ok(events)
    }

    /// Live subscription for events newer than now.
    pub async fn subscribe_live<F>(&self, filters: Vec<Filter>, on_event: F) -> Result<Subscription>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.subscribe_live_with(filters, on_event, || {}).await
    }

    /// Live subscription with a completion callback that fires once when
    /// every relay finished its stored events or the EOSE timer ran out.
    pub async fn subscribe_live_with<F, C>(
        &self,
        filters: Vec<Filter>,
        on_event: F,
        on_complete: C,
    ) -> Result<Subscription>
    where
        F: Fn(Event) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        if filters.is_empty() {
            return Err(ClientError::InvalidFilter(
                "subscription needs at least one filter".to_string(),
            ));
        }

        let now = unix_timestamp();
        let filters: Vec<Filter> = filters.into_iter().map(|f| f.since(now)).collect();

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription_id = {
            let mut subs = self.subscriptions.write().await;
            let id = self.unused_subscription_id(&subs, false);
            subs.insert(
                id.clone(),
                SubscriptionTracker::new(id.clone(), filters.clone(), tx.clone()),
            );
            id
        };

        let relays = self.connected_relays().await;
        if relays.is_empty() {
            warn!(
                "Live subscription {} has no connected relay yet",
                subscription_id
            );
        }
        for relay in &relays {
            match relay
                .subscribe_with_sink(&subscription_id, filters.clone(), tx.clone())
                .await
            {
                Ok(()) => {
                    if let Some(tracker) = self.subscriptions.write().await.get_mut(&subscription_id) {
                        tracker.add_relay(relay.url());
                    }
                }
                Err(e) => warn!(
                    "Failed to subscribe {} on {}: {}",
                    subscription_id,
                    relay.url(),
                    e
                ),
            }
        }
        drop(tx);

        let dispatcher = tokio::spawn(dispatch_live(
            subscription_id.clone(),
            rx,
            Arc::new(on_event),
            Box::new(on_complete),
            LiveContext {
                trackers: Arc::clone(&self.subscriptions),
                store: Arc::clone(&self.store),
                verify_signatures: self.config.verify_signatures,
                eose_timeout: self.config.eose_timeout,
                eose_extended_timeout: self.config.eose_extended_timeout,
            },
        ));

        info!("Live subscription {} on {} relays", subscription_id, relays.len());
        Ok(Subscription::new(
            subscription_id,
            Arc::clone(&self.relays),
            Arc::clone(&self.subscriptions),
            dispatcher,
        ))
    }

    /// IDs of live subscriptions.
    pub async fn subscription_ids(&self) -> Vec<String> {
        self.subscriptions.read().await.keys().cloned().collect()
    }

    /// Read access to the event store.
    pub async fn with_store<R>(&self, f: impl FnOnce(&EventStore) -> R) -> R {
        let store = self.store.read().await;
        f(&store)
    }

    pub async fn clear_store(&self) {
        self.store.write().await.clear();
    }
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        if let Ok(mut forwarders) = self.forwarders.lock() {
            for (_, handle) in forwarders.drain() {
                handle.abort();
            }
        }
        // Releasing the trackers' sinks lets live dispatchers finish.
        if let Ok(mut subs) = self.subscriptions.try_write() {
            subs.clear();
        }
    }
}

/// Trim a relay URL, drop a trailing `/` and require `wss://` (or `ws://`
/// when `allow_insecure` is set) with a host.
pub fn normalize_relay_url(url: &str, allow_insecure: bool) -> Result<String> {
    let trimmed = url.trim();
    let normalized = trimmed.strip_suffix('/').unwrap_or(trimmed);

    let parsed = Url::parse(normalized)
        .map_err(|e| ClientError::InvalidRelayUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "wss" => {}
        "ws" if allow_insecure => {}
        scheme => {
            return Err(ClientError::InvalidRelayUrl(format!(
                "{}: relays must use wss://, got {}://",
                url, scheme
            )));
        }
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ClientError::InvalidRelayUrl(format!("{}: missing host", url)));
    }

    Ok(normalized.to_string())
}

fn emit_ack(events_tx: &broadcast::Sender<PoolEvent>, confirmation: &PublishConfirmation) {
    let _ = events_tx.send(PoolEvent::PublishAck {
        relay_url: confirmation.relay_url.clone(),
        event_id: confirmation.event_id.clone(),
        accepted: confirmation.accepted,
        message: confirmation.message.clone(),
    });
}

struct LiveContext {
    trackers: TrackerMap,
    store: Arc<RwLock<EventStore>>,
    verify_signatures: bool,
    eose_timeout: Duration,
    eose_extended_timeout: Duration,
}

async fn dispatch_live(
    subscription_id: String,
    mut rx: mpsc::UnboundedReceiver<(String, SubscriptionMessage)>,
    on_event: EventCallback,
    on_complete: CompleteCallback,
    ctx: LiveContext,
) {
    let started = Instant::now();
    let mut seen: HashSet<String> = HashSet::new();
    let mut on_complete = Some(on_complete);
    let mut extended = false;

    let eose_timer = sleep_until(started + ctx.eose_timeout);
    tokio::pin!(eose_timer);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some((relay_url, msg)) = msg else { break };
                let finished = match msg {
                    SubscriptionMessage::Event(event) => {
                        if ctx.verify_signatures && !nostr::verify(&event) {
                            debug!("Dropping event {} with invalid signature", event.id);
                            continue;
                        }
                        if !seen.insert(event.id.clone()) {
                            continue;
                        }
                        ctx.store.write().await.insert(event.clone());
                        on_event(event);
                        false
                    }
                    SubscriptionMessage::Eose => ctx
                        .trackers
                        .write()
                        .await
                        .get_mut(&subscription_id)
                        .is_some_and(|tracker| tracker.mark_eose(&relay_url)),
                    SubscriptionMessage::Closed(reason) => {
                        debug!("{} closed live subscription {}: {}", relay_url, subscription_id, reason);
                        ctx.trackers
                            .write()
                            .await
                            .get_mut(&subscription_id)
                            .is_some_and(|tracker| {
                                tracker.remove_relay(&relay_url);
                                tracker.all_eose
                            })
                    }
                };
                if finished && let Some(complete) = on_complete.take() {
                    debug!("Live subscription {} caught up", subscription_id);
                    complete();
                }
            }
            _ = &mut eose_timer, if on_complete.is_some() => {
                if seen.is_empty() && !extended {
                    extended = true;
                    eose_timer.as_mut().reset(started + ctx.eose_extended_timeout);
                    continue;
                }
                if let Some(complete) = on_complete.take() {
                    debug!("Live subscription {} EOSE timer fired", subscription_id);
                    complete();
                }
            }
        }
    }
}
