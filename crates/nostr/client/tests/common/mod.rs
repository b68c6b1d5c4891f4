//! Shared helpers for client integration tests.

#![allow(dead_code)]

use nostr::{Event, Keys, build_unsigned, finalize};
use nostr_client::{PoolConfig, RelayPool};
use nostr_test_relay::MockRelay;
use std::sync::Once;
use std::time::Duration;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Pool config for local `ws://` relays with short timers.
pub fn test_config() -> PoolConfig {
    PoolConfig {
        allow_insecure_relays: true,
        connect_timeout: Duration::from_secs(2),
        publish_timeout: Duration::from_secs(8),
        query_timeout: Duration::from_secs(3),
        eose_timeout: Duration::from_millis(300),
        eose_extended_timeout: Duration::from_millis(600),
        ..PoolConfig::default()
    }
}

/// A pool connected to every relay given.
pub async fn connected_pool(relays: &[&MockRelay], config: PoolConfig) -> RelayPool {
    init_tracing();
    let pool = RelayPool::new(config);
    for relay in relays {
        pool.add_relay(&relay.url()).await.unwrap();
    }
    for (url, result) in pool.connect_all().await {
        result.unwrap_or_else(|e| panic!("connect {} failed: {}", url, e));
    }
    pool
}

pub fn signed(
    keys: &Keys,
    kind: i64,
    content: &str,
    tags: &[(&str, &str)],
    created_at: u64,
) -> Event {
    let tags = tags
        .iter()
        .map(|(k, v)| vec![k.to_string(), v.to_string()])
        .collect();
    let unsigned = build_unsigned(kind, content, tags, keys.public_key_hex(), created_at).unwrap();
    finalize(unsigned, |id| keys.sign_id(id)).unwrap()
}
