//! Nostr relay client for Sobrkey.
//!
//! This crate provides:
//! - [`RelayConnection`]: one websocket to one relay, with frame routing
//! - [`RelayPool`]: fan-out publish (first acceptance wins), merged and
//!   de-duplicated queries, live subscriptions
//! - [`EventStore`]: indexed in-memory store of delivered events
//! - [`NostrClient`]: the pool bound to a [`nostr::CryptoGateway`] identity
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nostr::{FilterBuilder, Keys};
//! use nostr_client::{DEFAULT_RELAYS, NostrClient, PoolConfig, QueryOptions};
//!
//! # async fn example() -> nostr_client::Result<()> {
//! let relays: Vec<String> = DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect();
//! let client = NostrClient::new(Arc::new(Keys::generate()), &relays, PoolConfig::default()).await?;
//! client.connect().await?;
//!
//! client
//!     .sign_and_publish(1, "test", vec![vec!["t".into(), "sobrkey".into()]])
//!     .await?;
//!
//! let filter = FilterBuilder::new().kinds(vec![1]).tag("t", "sobrkey").build()?;
//! let events = client.query(vec![filter], QueryOptions::default()).await?;
//! println!("{} events", events.len());
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod error;
mod message;
mod pool;
mod relay;
mod subscription;

pub use cache::EventStore;
pub use client::NostrClient;
pub use error::{ClientError, ErrorSink, Result, TracingErrorSink};
pub use message::{ClientMessage, RelayMessage};
pub use pool::{
    PoolConfig, PoolEvent, PublishResult, QueryOptions, RelayPool, RelayStatus, normalize_relay_url,
};
pub use relay::{
    ConnectionState, PublishConfirmation, RelayConfig, RelayConnection, RelayNotification,
    SubscriptionMessage, SubscriptionSink,
};
pub use subscription::{
    CompleteCallback, EventCallback, Subscription, SubscriptionTracker, generate_subscription_id,
};

/// Relays used when nothing else is configured.
pub const DEFAULT_RELAYS: &[&str] = &["wss://relay.damus.io", "wss://nos.lol"];
