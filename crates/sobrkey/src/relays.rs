//! The user's saved relay list.

use crate::constants::STORAGE_RELAYS;
use crate::error::Result;
use crate::keystore::{SecureKeyStore, get_json, set_json};
use nostr_client::{DEFAULT_RELAYS, normalize_relay_url};
use std::sync::Arc;

/// Relay list stored under `sobrkey_relays`. Only `wss://` relays are saved.
#[derive(Clone)]
pub struct RelaySettings {
    store: Arc<dyn SecureKeyStore>,
}

impl RelaySettings {
    pub fn new(store: Arc<dyn SecureKeyStore>) -> Self {
        Self { store }
    }

    /// The saved list, or `None` if the user never saved one.
    pub fn saved(&self) -> Result<Option<Vec<String>>> {
        get_json(self.store.as_ref(), STORAGE_RELAYS)
    }

    /// The saved list, falling back to the default relays.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .saved()?
            .unwrap_or_else(|| DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect()))
    }

    /// Add a relay. Returns `false` if it was already in the list.
    pub fn add(&self, url: &str) -> Result<bool> {
        let url = normalize_relay_url(url, false)?;
        let mut relays = self.list()?;
        if relays.contains(&url) {
            return Ok(false);
        }
        relays.push(url);
        set_json(self.store.as_ref(), STORAGE_RELAYS, &relays)?;
        Ok(true)
    }

    /// Remove a relay. Returns `false` if it was not in the list.
    pub fn remove(&self, url: &str) -> Result<bool> {
        let trimmed = url.trim();
        let url = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let mut relays = self.list()?;
        let before = relays.len();
        relays.retain(|r| r != url);
        if relays.len() == before {
            return Ok(false);
        }
        set_json(self.store.as_ref(), STORAGE_RELAYS, &relays)?;
        Ok(true)
    }

    /// Forget the saved list; [`list`](Self::list) returns the defaults again.
    pub fn reset(&self) -> Result<()> {
        self.store.delete(STORAGE_RELAYS)
    }
}
