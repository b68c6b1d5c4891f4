//! The application facade: one identity, one relay client, one key store.

use crate::config::Config;
use crate::contacts::TrustedContacts;
use crate::error::Result;
use crate::identity;
use crate::keystore::SecureKeyStore;
use crate::relays::RelaySettings;
use chrono::{NaiveDate, Utc};
use nostr::{Event, Filter};
use nostr_client::{NostrClient, QueryOptions};
use std::sync::Arc;
use tracing::{info, warn};

/// Sobrkey session. Use-cases live in the `journal`, `checkin`, `meetings`,
/// `messages` and `emergency` modules as further `impl` blocks.
pub struct Sobrkey {
    pub(crate) client: NostrClient,
    store: Arc<dyn SecureKeyStore>,
}

impl Sobrkey {
    /// Load (or create) the identity from `store` and register relays.
    ///
    /// The saved relay list wins over `config.relays`. Nothing is connected
    /// until [`connect`](Self::connect).
    pub async fn open(config: &Config, store: Arc<dyn SecureKeyStore>) -> Result<Self> {
        let keys = identity::load_or_generate(store.as_ref())?;
        let relays = RelaySettings::new(store.clone())
            .saved()?
            .unwrap_or_else(|| config.relays.clone());

        let client = NostrClient::new(Arc::new(keys), &relays, config.to_pool_config()).await?;
        Ok(Self::with_client(client, store))
    }

    pub fn with_client(client: NostrClient, store: Arc<dyn SecureKeyStore>) -> Self {
        Self { client, store }
    }

    pub fn public_key(&self) -> String {
        self.client.public_key()
    }

    pub fn client(&self) -> &NostrClient {
        &self.client
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings::new(self.store.clone())
    }

    pub fn trusted_contacts(&self) -> TrustedContacts {
        TrustedContacts::new(self.store.clone())
    }

    /// Connect to every registered relay; at least one must succeed.
    pub async fn connect(&self) -> Result<usize> {
        Ok(self.client.connect().await?)
    }

    pub async fn disconnect(&self) {
        self.client.disconnect().await;
    }

    /// Save a relay and bring it into the running session.
    pub async fn add_relay(&self, url: &str) -> Result<bool> {
        let added = self.relay_settings().add(url)?;
        if self.client.add_relay(url).await? {
            if let Err(e) = self.client.pool().connect_relay(url).await {
                warn!("Relay {} saved but not reachable: {}", url, e);
            }
        }
        Ok(added)
    }

    pub async fn remove_relay(&self, url: &str) -> Result<bool> {
        let removed = self.relay_settings().remove(url)?;
        self.client.remove_relay(url).await?;
        Ok(removed)
    }

    pub(crate) async fn query(&self, filters: Vec<Filter>) -> Result<Vec<Event>> {
        let events = self.client.query(filters, QueryOptions::default()).await?;
        info!("Query returned {} events", events.len());
        Ok(events)
    }

    pub(crate) fn encrypt_for(&self, peer: &str, plaintext: &str) -> Result<String> {
        Ok(self.client.crypto().encrypt(peer, plaintext)?)
    }
}

/// Today's date in UTC, the calendar used for `d` tags.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(crate) fn tag(name: &str, value: impl Into<String>) -> Vec<String> {
    vec![name.to_string(), value.into()]
}
