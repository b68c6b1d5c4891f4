//! Shared helpers for sobrkey integration tests.

#![allow(dead_code)]

use nostr::{Event, Keys, build_unsigned, finalize};
use nostr_test_relay::MockRelay;
use sobrkey::{Config, MemoryKeyStore, SecureKeyStore, Sobrkey, identity};
use std::sync::Arc;
use std::time::Duration;

/// Config for local `ws://` relays with short timers.
pub fn test_config(relays: &[&MockRelay]) -> Config {
    Config {
        relays: relays.iter().map(|r| r.url()).collect(),
        connect_timeout_ms: 2_000,
        publish_timeout_ms: 3_000,
        query_timeout_ms: 3_000,
        eose_timeout_ms: 300,
        eose_extended_timeout_ms: 600,
        allow_insecure_relays: true,
        ..Config::default()
    }
}

/// A connected session for `keys`.
pub async fn session(keys: &Keys, relays: &[&MockRelay]) -> Sobrkey {
    let store: Arc<dyn SecureKeyStore> = Arc::new(MemoryKeyStore::new());
    identity::import_secret_key(store.as_ref(), &keys.secret_key_hex()).unwrap();

    let app = Sobrkey::open(&test_config(relays), store).await.unwrap();
    app.connect().await.unwrap();
    app
}

/// Let relays register a REQ before anything is published.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

pub fn signed(keys: &Keys, kind: i64, content: &str, tags: &[(&str, &str)], created_at: u64) -> Event {
    let tags = tags
        .iter()
        .map(|(k, v)| vec![k.to_string(), v.to_string()])
        .collect();
    let unsigned = build_unsigned(kind, content, tags, keys.public_key_hex(), created_at).unwrap();
    finalize(unsigned, |id| keys.sign_id(id)).unwrap()
}
