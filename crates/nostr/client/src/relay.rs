//! Single relay connection management
//!
//! A [`RelayConnection`] owns one websocket. A background reader task parses
//! inbound frames and routes them: EVENT/EOSE/CLOSED to the subscription that
//! asked for them, OK to the publish waiting on that event id, NOTICE to the
//! notification channel. Malformed frames are logged and dropped.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nostr::{Event, Filter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected (initial state, or closed cleanly)
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Last connect attempt or the live socket failed
    Failed,
}

/// Confirmation result for event publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfirmation {
    /// Relay that answered
    pub relay_url: String,
    /// Event ID that was published
    pub event_id: String,
    /// Whether the relay accepted the event
    pub accepted: bool,
    /// Message from the relay (usually empty when accepted)
    pub message: String,
}

/// What a relay delivers for one subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    Event(Event),
    /// End of stored events
    Eose,
    /// Relay or transport ended the subscription
    Closed(String),
}

/// Subscription traffic tagged with the relay it came from.
pub type SubscriptionSink = mpsc::UnboundedSender<(String, SubscriptionMessage)>;

/// Connection-level happenings that are not tied to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayNotification {
    StateChanged(ConnectionState),
    Notice(String),
}

/// Relay connection configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Websocket handshake timeout
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type ConfirmationSender = oneshot::Sender<PublishConfirmation>;

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

fn install_crypto_provider() {
    INSTALL_CRYPTO_PROVIDER.call_once(|| {
        // Err means another provider is already installed, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Relay connection
pub struct RelayConnection {
    url: String,
    config: RelayConfig,
    state: Arc<RwLock<ConnectionState>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    /// Pending event confirmations (event_id -> oneshot sender)
    pending_confirmations: Arc<Mutex<HashMap<String, ConfirmationSender>>>,
    /// Active subscriptions (subscription_id -> sink)
    subscriptions: Arc<Mutex<HashMap<String, SubscriptionSink>>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    last_error: Arc<RwLock<Option<String>>>,
    notifications: broadcast::Sender<RelayNotification>,
    /// Bumped by every connect and close; a handshake only completes if
    /// nothing bumped it in between.
    generation: AtomicU64,
}

impl RelayConnection {
    /// Create a new relay connection (does not connect yet)
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let parsed =
            Url::parse(url).map_err(|e| ClientError::InvalidRelayUrl(format!("{}: {}", url, e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(ClientError::InvalidRelayUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed.scheme()
            )));
        }

        let (notifications, _) = broadcast::channel(64);

        Ok(Self {
            url: url.to_string(),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            pending_confirmations: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            recv_task: Mutex::new(None),
            last_error: Arc::new(RwLock::new(None)),
            notifications,
            generation: AtomicU64::new(0),
        })
    }

    /// Connect to the relay. Connecting an already connected relay is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let attempt = {
            let mut state = self.state.write().await;
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(ClientError::Connection(format!(
                        "connect to {} already in progress",
                        self.url
                    )));
                }
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    *state = ConnectionState::Connecting;
                }
            }
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.notify(RelayNotification::StateChanged(ConnectionState::Connecting));

        install_crypto_provider();
        info!("Connecting to relay: {}", self.url);

        let connect_start = Instant::now();
        let ws_stream = match timeout(self.config.connect_timeout, connect_async(self.url.as_str()))
            .await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                let err = ClientError::Connection(format!("{}: {}", self.url, e));
                self.fail(attempt, &err).await;
                return Err(err);
            }
            Err(_) => {
                let err = ClientError::Timeout(format!(
                    "connection to {} timed out after {:?}",
                    self.url, self.config.connect_timeout
                ));
                self.fail(attempt, &err).await;
                return Err(err);
            }
        };

        let (writer, reader) = ws_stream.split();
        {
            // close() may have run during the handshake
            let mut state = self.state.write().await;
            if *state != ConnectionState::Connecting
                || self.generation.load(Ordering::SeqCst) != attempt
            {
                drop(state);
                info!("Connection to {} closed during handshake", self.url);
                let mut writer = writer;
                let _ = writer.close().await;
                drop(reader);
                return Err(ClientError::Connection(format!(
                    "{}: closed during connect",
                    self.url
                )));
            }
            *self.writer.lock().await = Some(writer);
            *self.last_error.write().await = None;
            *state = ConnectionState::Connected;
            self.start_recv_loop(reader).await;
        }
        self.notify(RelayNotification::StateChanged(ConnectionState::Connected));

        info!(
            "Connected to relay: {} (took {:?})",
            self.url,
            connect_start.elapsed()
        );
        Ok(())
    }

    async fn fail(&self, attempt: u64, err: &ClientError) {
        warn!("Failed to connect to {}: {}", self.url, err);
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Connecting
                || self.generation.load(Ordering::SeqCst) != attempt
            {
                return;
            }
            *state = ConnectionState::Failed;
        }
        *self.last_error.write().await = Some(err.to_string());
        self.notify(RelayNotification::StateChanged(ConnectionState::Failed));
    }

    fn notify(&self, notification: RelayNotification) {
        // No receivers is normal.
        let _ = self.notifications.send(notification);
    }

    /// Start background receive loop to process incoming messages
    async fn start_recv_loop(&self, mut reader: SplitStream<WsStream>) {
        let url = self.url.clone();
        let state = Arc::clone(&self.state);
        let writer = Arc::clone(&self.writer);
        let pending_confirmations = Arc::clone(&self.pending_confirmations);
        let subscriptions = Arc::clone(&self.subscriptions);
        let last_error = Arc::clone(&self.last_error);
        let notifications = self.notifications.clone();

        let handle = tokio::spawn(async move {
            let mut failure: Option<String> = None;

            while let Some(frame) = reader.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Ping(data)) => {
                        if let Some(sink) = writer.lock().await.as_mut() {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        continue;
                    }
                    Ok(Message::Close(_)) => {
                        info!("Relay {} closed connection", url);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("WebSocket error from {}: {}", url, e);
                        failure = Some(e.to_string());
                        break;
                    }
                };

                let relay_msg = match RelayMessage::from_json(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(relay = %url, error = %e, "dropping malformed frame");
                        continue;
                    }
                };

                match relay_msg {
                    RelayMessage::Event {
                        subscription_id,
                        event,
                    } => {
                        let mut subs = subscriptions.lock().await;
                        let delivered = subs.get(&subscription_id).map(|sink| {
                            sink.send((url.clone(), SubscriptionMessage::Event(event)))
                                .is_ok()
                        });
                        match delivered {
                            Some(true) => {}
                            Some(false) => {
                                debug!("Subscription {} receiver gone, removing", subscription_id);
                                subs.remove(&subscription_id);
                            }
                            None => debug!(
                                "Event for unknown subscription {} from {}",
                                subscription_id, url
                            ),
                        }
                    }
                    RelayMessage::Eose { subscription_id } => {
                        let subs = subscriptions.lock().await;
                        if let Some(sink) = subs.get(&subscription_id) {
                            let _ = sink.send((url.clone(), SubscriptionMessage::Eose));
                        }
                    }
                    RelayMessage::Closed {
                        subscription_id,
                        message,
                    } => {
                        info!("Relay {} closed subscription {}: {}", url, subscription_id, message);
                        if let Some(sink) = subscriptions.lock().await.remove(&subscription_id) {
                            let _ = sink.send((url.clone(), SubscriptionMessage::Closed(message)));
                        }
                    }
                    RelayMessage::Ok {
                        event_id,
                        success,
                        message,
                    } => {
                        if let Some(tx) = pending_confirmations.lock().await.remove(&event_id) {
                            let _ = tx.send(PublishConfirmation {
                                relay_url: url.clone(),
                                event_id,
                                accepted: success,
                                message,
                            });
                        } else {
                            debug!("Unsolicited OK for {} from {}", event_id, url);
                        }
                    }
                    RelayMessage::Notice { message } => {
                        info!("NOTICE from {}: {}", url, message);
                        let _ = notifications.send(RelayNotification::Notice(message));
                    }
                    RelayMessage::Auth { .. } => {
                        debug!("Ignoring AUTH challenge from {}", url);
                    }
                }
            }

            // Socket is gone: settle everything that was waiting on it.
            let next_state = if failure.is_some() {
                ConnectionState::Failed
            } else {
                ConnectionState::Disconnected
            };
            {
                let mut current = state.write().await;
                if *current != ConnectionState::Connected {
                    // close() already handled teardown
                    return;
                }
                *current = next_state;
            }
            if let Some(err) = failure {
                *last_error.write().await = Some(err);
            }
            writer.lock().await.take();
            pending_confirmations.lock().await.clear();
            for (_, sink) in subscriptions.lock().await.drain() {
                let _ = sink.send((
                    url.clone(),
                    SubscriptionMessage::Closed("connection closed".to_string()),
                ));
            }
            let _ = notifications.send(RelayNotification::StateChanged(next_state));
        });

        *self.recv_task.lock().await = Some(handle);
    }

    /// Close the connection. Closing a closed connection is a no-op.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if matches!(
                *state,
                ConnectionState::Disconnected | ConnectionState::Failed
            ) {
                return Ok(());
            }
            *state = ConnectionState::Disconnected;
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        info!("Disconnecting from relay: {}", self.url);

        if let Some(handle) = self.recv_task.lock().await.take() {
            handle.abort();
        }
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }

        // Dropping the senders wakes every waiting publish.
        self.pending_confirmations.lock().await.clear();
        for (_, sink) in self.subscriptions.lock().await.drain() {
            let _ = sink.send((
                self.url.clone(),
                SubscriptionMessage::Closed("connection closed".to_string()),
            ));
        }

        self.notify(RelayNotification::StateChanged(ConnectionState::Disconnected));
        Ok(())
    }

    /// Close, wait `backoff`, connect again.
    pub async fn reconnect(&self, backoff: Duration) -> Result<()> {
        self.close().await?;
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }
        self.connect().await
    }

    /// Get current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Get relay URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Most recent connection failure, cleared on successful connect
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Connection-level notifications (state changes, NOTICE frames)
    pub fn notifications(&self) -> broadcast::Receiver<RelayNotification> {
        self.notifications.subscribe()
    }

    /// Send a protocol message to the relay
    pub async fn send(&self, msg: &ClientMessage) -> Result<()> {
        if !self.is_connected().await {
            return Err(ClientError::NotConnected);
        }

        let text = msg.to_json()?;
        debug!("Sending to {}: {}", self.url, text);

        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink
                .send(Message::text(text))
                .await
                .map_err(|e| ClientError::Connection(format!("{}: {}", self.url, e))),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Publish an event and wait for the relay's OK.
    ///
    /// A rejection is still `Ok`: check [`PublishConfirmation::accepted`].
    pub async fn publish(
        &self,
        event: &Event,
        confirmation_timeout: Duration,
    ) -> Result<PublishConfirmation> {
        let (tx, rx) = oneshot::channel();
        let event_id = event.id.clone();

        self.pending_confirmations
            .lock()
            .await
            .insert(event_id.clone(), tx);

        if let Err(e) = self.send(&ClientMessage::Event(event.clone())).await {
            self.pending_confirmations.lock().await.remove(&event_id);
            return Err(e);
        }

        match timeout(confirmation_timeout, rx).await {
            Ok(Ok(confirmation)) => Ok(confirmation),
            Ok(Err(_)) => Err(ClientError::Connection(format!(
                "{} closed before acknowledging {}",
                self.url, event_id
            ))),
            Err(_) => {
                self.pending_confirmations.lock().await.remove(&event_id);
                Err(ClientError::Timeout(format!(
                    "no OK from {} within {:?}",
                    self.url, confirmation_timeout
                )))
            }
        }
    }

    /// Open a subscription and receive its traffic on a fresh channel.
    pub async fn subscribe(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
    ) -> Result<mpsc::UnboundedReceiver<(String, SubscriptionMessage)>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe_with_sink(subscription_id, filters, tx).await?;
        Ok(rx)
    }

    /// Open a subscription whose traffic goes to an existing sink.
    pub async fn subscribe_with_sink(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
        sink: SubscriptionSink,
    ) -> Result<()> {
        if filters.is_empty() {
            return Err(ClientError::InvalidFilter(
                "subscription needs at least one filter".to_string(),
            ));
        }

        self.subscriptions
            .lock()
            .await
            .insert(subscription_id.to_string(), sink);

        let req = ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filters,
        };
        if let Err(e) = self.send(&req).await {
            self.subscriptions.lock().await.remove(subscription_id);
            return Err(e);
        }
        Ok(())
    }

    /// Close a subscription. Unknown ids and closed connections are fine.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let known = self
            .subscriptions
            .lock()
            .await
            .remove(subscription_id)
            .is_some();

        if !known || !self.is_connected().await {
            return Ok(());
        }

        self.send(&ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .await
    }

    /// Get all active subscription IDs
    pub async fn active_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.keys().cloned().collect()
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Ok(mut task) = self.recv_task.try_lock()
            && let Some(handle) = task.take()
        {
            handle.abort();
        }
    }
}
