//! Scriptable in-process Nostr relay.
//!
//! [`MockRelay`] listens on an ephemeral localhost port and speaks enough of
//! NIP-01 (EVENT, REQ, CLOSE) to drive client tests. How it answers
//! publishes and queries is chosen per relay through [`RelayBehavior`], so a
//! test can line up a relay that rejects, one that never answers, and one
//! that accepts late.

use futures::{SinkExt, StreamExt};
use nostr::{Event, Filter, sort_events};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// How the relay answers `["EVENT", ..]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PublishBehavior {
    /// Store and answer `OK true` immediately
    #[default]
    Accept,
    /// Store and answer `OK true` after a delay
    AcceptAfter(Duration),
    /// Answer `OK false` with this message, store nothing
    Reject(String),
    /// Never answer, store nothing
    Ignore,
}

/// How the relay answers `["REQ", ..]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryBehavior {
    /// Send stored matches, then EOSE
    #[default]
    Serve,
    /// Register the subscription but never send stored events or EOSE
    Silent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayBehavior {
    pub publish: PublishBehavior,
    pub query: QueryBehavior,
}

#[derive(Debug, Clone)]
enum Command {
    /// Deliver to matching live subscriptions
    Event(Event),
    /// Send a text frame verbatim
    Raw(String),
    /// Drop every client connection
    Disconnect,
}

struct Shared {
    behavior: RelayBehavior,
    events: Mutex<Vec<Event>>,
    commands: broadcast::Sender<Command>,
    requests: AtomicUsize,
    closes: AtomicUsize,
}

impl Shared {
    fn store(&self, event: Event) {
        if let Ok(mut events) = self.events.lock()
            && !events.iter().any(|e| e.id == event.id)
        {
            events.push(event);
        }
    }

    fn matching(&self, filters: &[Filter]) -> Vec<Event> {
        let Ok(events) = self.events.lock() else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for filter in filters {
            let mut matches: Vec<Event> =
                events.iter().filter(|e| filter.matches(e)).cloned().collect();
            sort_events(&mut matches);
            if let Some(limit) = filter.limit {
                matches.truncate(limit as usize);
            }
            for event in matches {
                if seen.insert(event.id.clone()) {
                    out.push(event);
                }
            }
        }
        out
    }
}

/// A running relay. Stops listening when dropped.
pub struct MockRelay {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockRelay {
    /// Start a relay that accepts publishes and serves queries.
    pub async fn start_default() -> std::io::Result<Self> {
        Self::start(RelayBehavior::default()).await
    }

    pub async fn start(behavior: RelayBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (commands, _) = broadcast::channel(256);

        let shared = Arc::new(Shared {
            behavior,
            events: Mutex::new(Vec::new()),
            commands,
            requests: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Mock relay {} accepted {}", addr, peer);
                        tokio::spawn(handle_connection(stream, Arc::clone(&accept_shared)));
                    }
                    Err(e) => {
                        warn!("Mock relay {} accept failed: {}", addr, e);
                        break;
                    }
                }
            }
        });

        info!("Mock relay listening on {}", addr);
        Ok(Self {
            addr,
            shared,
            accept_task,
        })
    }

    /// `ws://` URL of the relay.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Store events as if they had been published earlier.
    pub fn seed(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.shared.store(event);
        }
    }

    /// Store an event and push it to matching live subscriptions.
    pub fn inject(&self, event: Event) {
        self.shared.store(event.clone());
        let _ = self.shared.commands.send(Command::Event(event));
    }

    /// Push a raw text frame to every connected client.
    pub fn send_raw(&self, frame: impl Into<String>) {
        let _ = self.shared.commands.send(Command::Raw(frame.into()));
    }

    /// Close every client connection; the listener keeps running.
    pub fn disconnect_clients(&self) {
        let _ = self.shared.commands.send(Command::Disconnect);
    }

    pub fn stored_events(&self) -> Vec<Event> {
        self.shared
            .events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of REQ frames received so far.
    pub fn request_count(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// Number of CLOSE frames received so far.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.shared.commands.send(Command::Disconnect);
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Mock relay handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let mut commands = shared.commands.subscribe();
    let mut subscriptions: HashMap<String, Vec<Filter>> = HashMap::new();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(text.as_str(), &shared, &mut subscriptions, &out_tx);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Mock relay read error: {}", e);
                    break;
                }
            },
            Some(frame) = out_rx.recv() => {
                if write.send(Message::text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            command = commands.recv() => match command {
                Ok(Command::Event(event)) => {
                    for (id, filters) in &subscriptions {
                        if Filter::matches_any(filters, &event) {
                            let _ = out_tx.send(json!(["EVENT", id, event]));
                        }
                    }
                }
                Ok(Command::Raw(frame)) => {
                    if write.send(Message::text(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Disconnect) => {
                    let _ = write.close().await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

fn handle_frame(
    text: &str,
    shared: &Shared,
    subscriptions: &mut HashMap<String, Vec<Filter>>,
    out: &mpsc::UnboundedSender<Value>,
) {
    let Ok(Value::Array(frame)) = serde_json::from_str::<Value>(text) else {
        let _ = out.send(json!(["NOTICE", "invalid: expected a JSON array"]));
        return;
    };

    match frame.first().and_then(Value::as_str) {
        Some("EVENT") => {
            let Some(event) = frame
                .get(1)
                .and_then(|v| serde_json::from_value::<Event>(v.clone()).ok())
            else {
                let _ = out.send(json!(["NOTICE", "invalid: malformed EVENT"]));
                return;
            };
            handle_event(event, shared, out);
        }
        Some("REQ") => {
            let Some(id) = frame.get(1).and_then(Value::as_str) else {
                let _ = out.send(json!(["NOTICE", "invalid: REQ without id"]));
                return;
            };
            let filters: Vec<Filter> = frame
                .iter()
                .skip(2)
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect();
            shared.requests.fetch_add(1, Ordering::SeqCst);

            if shared.behavior.query == QueryBehavior::Serve {
                for event in shared.matching(&filters) {
                    let _ = out.send(json!(["EVENT", id, event]));
                }
                let _ = out.send(json!(["EOSE", id]));
            }
            subscriptions.insert(id.to_string(), filters);
        }
        Some("CLOSE") => {
            if let Some(id) = frame.get(1).and_then(Value::as_str) {
                shared.closes.fetch_add(1, Ordering::SeqCst);
                subscriptions.remove(id);
            }
        }
        other => {
            let _ = out.send(json!(["NOTICE", format!("unsupported message: {:?}", other)]));
        }
    }
}

fn handle_event(event: Event, shared: &Shared, out: &mpsc::UnboundedSender<Value>) {
    let accept = |shared: &Shared, event: Event| {
        shared.store(event.clone());
        let _ = shared.commands.send(Command::Event(event));
    };

    match &shared.behavior.publish {
        PublishBehavior::Ignore => {}
        PublishBehavior::Reject(reason) => {
            let _ = out.send(json!(["OK", event.id, false, reason]));
        }
        PublishBehavior::Accept | PublishBehavior::AcceptAfter(_)
            if !nostr::verify(&event) =>
        {
            let _ = out.send(json!(["OK", event.id, false, "invalid: bad signature"]));
        }
        PublishBehavior::Accept => {
            let _ = out.send(json!(["OK", event.id, true, ""]));
            accept(shared, event);
        }
        PublishBehavior::AcceptAfter(delay) => {
            let delay = *delay;
            let out = out.clone();
            let ok = json!(["OK", event.id, true, ""]);
            accept(shared, event);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = out.send(ok);
            });
        }
    }
}
