//! High-level client: one identity, one relay pool.

use crate::error::{ClientError, ErrorSink, Result, TracingErrorSink};
use crate::pool::{PoolConfig, PoolEvent, PublishResult, QueryOptions, RelayPool, RelayStatus};
use crate::subscription::Subscription;
use nostr::{CryptoGateway, Event, Filter, build_unsigned, finalize, unix_timestamp};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Nostr client bound to a signing identity.
///
/// Per-relay failures are reported to the [`ErrorSink`] and never abort the
/// whole operation; whole-operation failures come back as [`ClientError`].
pub struct NostrClient {
    crypto: Arc<dyn CryptoGateway>,
    pool: RelayPool,
    error_sink: Arc<dyn ErrorSink>,
}

impl NostrClient {
    /// Build a client and register `relays` (not connected yet).
    pub async fn new(
        crypto: Arc<dyn CryptoGateway>,
        relays: &[String],
        config: PoolConfig,
    ) -> Result<Self> {
        Self::with_error_sink(crypto, relays, config, Arc::new(TracingErrorSink)).await
    }

    pub async fn with_error_sink(
        crypto: Arc<dyn CryptoGateway>,
        relays: &[String],
        config: PoolConfig,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Result<Self> {
        let pool = RelayPool::new(config);
        for url in relays {
            pool.add_relay(url).await?;
        }
        Ok(Self {
            crypto,
            pool,
            error_sink,
        })
    }

    /// Hex public key of the client identity.
    pub fn public_key(&self) -> String {
        self.crypto.public_key()
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoGateway> {
        &self.crypto
    }

    pub fn pool(&self) -> &RelayPool {
        &self.pool
    }

    /// Connect every relay. Succeeds if at least one relay connected.
    pub async fn connect(&self) -> Result<usize> {
        let results = self.pool.connect_all().await;
        let total = results.len();
        let mut connected = 0;
        for (url, result) in results {
            match result {
                Ok(()) => connected += 1,
                Err(e) => self.error_sink.report(&e, &format!("connect {}", url)),
            }
        }

        info!("Connected to {}/{} relays", connected, total);
        if connected == 0 {
            return Err(ClientError::NotConnected);
        }
        Ok(connected)
    }

    pub async fn disconnect(&self) {
        self.pool.disconnect_all().await;
    }

    pub async fn add_relay(&self, url: &str) -> Result<bool> {
        self.pool.add_relay(url).await
    }

    pub async fn remove_relay(&self, url: &str) -> Result<bool> {
        self.pool.remove_relay(url).await
    }

    pub async fn get_relays(&self) -> Vec<RelayStatus> {
        self.pool.get_relays().await
    }

    /// Build and sign an event as this identity, timestamped now.
    pub fn sign_event(&self, kind: u16, content: &str, tags: Vec<Vec<String>>) -> Result<Event> {
        let unsigned = build_unsigned(
            i64::from(kind),
            content,
            tags,
            self.crypto.public_key(),
            unix_timestamp(),
        )?;
        Ok(finalize(unsigned, |id| self.crypto.sign(id))?)
    }

    pub async fn publish(&self, event: &Event) -> Result<PublishResult> {
        let result = self.pool.publish(event).await;
        if let Err(e) = &result {
            self.error_sink.report(e, "publish");
        }
        result
    }

    pub async fn sign_and_publish(
        &self,
        kind: u16,
        content: &str,
        tags: Vec<Vec<String>>,
    ) -> Result<Event> {
        let event = self.sign_event(kind, content, tags)?;
        self.publish(&event).await?;
        Ok(event)
    }

    pub async fn query(&self, filters: Vec<Filter>, options: QueryOptions) -> Result<Vec<Event>> {
        let result = self.pool.query(filters, options).await;
        if let Err(e) = &result {
            self.error_sink.report(e, "query");
        }
        result
    }

    pub async fn subscribe_live<F>(&self, filters: Vec<Filter>, on_event: F) -> Result<Subscription>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.pool.subscribe_live(filters, on_event).await
    }

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
        self.pool
            .subscribe_live_with(filters, on_event, on_complete)
            .await
    }

    /// Pool events (connections, notices, publish acknowledgements).
    pub fn notifications(&self) -> broadcast::Receiver<PoolEvent> {
        self.pool.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::Keys;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<String>>,
    }

    impl ErrorSink for RecordingSink {
        fn report(&self, _error: &ClientError, context: &str) {
            self.reports.lock().unwrap().push(context.to_string());
        }
    }

    #[tokio::test]
    async fn test_sign_event_verifies() {
        let keys = Arc::new(Keys::generate());
        let client = NostrClient::new(keys.clone(), &[], PoolConfig::default())
            .await
            .unwrap();

        let event = client
            .sign_event(1, "test", vec![vec!["t".to_string(), "sobrkey".to_string()]])
            .unwrap();
        assert_eq!(event.pubkey, keys.public_key_hex());
        assert!(nostr::verify(&event));
    }

    #[tokio::test]
    async fn test_new_rejects_insecure_relay() {
        let result = NostrClient::new(
            Arc::new(Keys::generate()),
            &["ws://relay.example.com".to_string()],
            PoolConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(ClientError::InvalidRelayUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_failures_reach_error_sink() {
        let sink = Arc::new(RecordingSink::default());
        let client = NostrClient::with_error_sink(
            Arc::new(Keys::generate()),
            &["ws://127.0.0.1:9".to_string()],
            PoolConfig {
                allow_insecure_relays: true,
                connect_timeout: std::time::Duration::from_secs(2),
                ..PoolConfig::default()
            },
            sink.clone(),
        )
        .await
        .unwrap();

        assert!(matches!(
            client.connect().await,
            Err(ClientError::NotConnected)
        ));
        assert_eq!(
            sink.reports.lock().unwrap().as_slice(),
            ["connect ws://127.0.0.1:9".to_string()]
        );
    }
}
