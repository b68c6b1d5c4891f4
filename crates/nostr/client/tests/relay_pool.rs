//! Pool behavior against in-process relays: fan-out, merging, timeouts.

mod common;

use common::{connected_pool, signed, test_config};
use nostr::{Filter, FilterBuilder, Keys, unix_timestamp};
use nostr_client::{ClientError, ConnectionState, PoolEvent, QueryOptions};
use nostr_test_relay::{MockRelay, PublishBehavior, QueryBehavior, RelayBehavior};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

fn silent() -> RelayBehavior {
    RelayBehavior {
        query: QueryBehavior::Silent,
        ..RelayBehavior::default()
    }
}

#[tokio::test]
async fn test_query_deduplicates_overlapping_relays() {
    let keys = Keys::generate();
    let shared = signed(&keys, 1, "on both", &[], 1_000);
    let only_a = signed(&keys, 1, "only a", &[], 2_000);
    let only_b = signed(&keys, 1, "only b", &[], 3_000);

    let a = MockRelay::start_default().await.unwrap();
    let b = MockRelay::start_default().await.unwrap();
    a.seed([shared.clone(), only_a.clone()]);
    b.seed([shared.clone(), only_b.clone()]);

    let pool = connected_pool(&[&a, &b], test_config()).await;
    let events = pool
        .query(vec![Filter::new().kinds(vec![1])], QueryOptions::default())
        .await
        .unwrap();

    let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec![only_b.id.as_str(), only_a.id.as_str(), shared.id.as_str()]);
    assert_eq!(pool.with_store(|store| store.len()).await, 3);
}

#[tokio::test]
async fn test_query_sort_is_deterministic() {
    let keys = Keys::generate();
    let same_time: Vec<_> = (0..4)
        .map(|i| signed(&keys, 1, &format!("n{}", i), &[], 500))
        .collect();
    let newer = signed(&keys, 1, "newer", &[], 600);

    let relay = MockRelay::start_default().await.unwrap();
    relay.seed(same_time.iter().cloned().rev());
    relay.seed([newer.clone()]);

    let pool = connected_pool(&[&relay], test_config()).await;
    let first = pool
        .query(vec![Filter::new().kinds(vec![1])], QueryOptions::default())
        .await
        .unwrap();
    let second = pool
        .query(vec![Filter::new().kinds(vec![1])], QueryOptions::default())
        .await
        .unwrap();

    let mut expected_tail: Vec<String> = same_time.iter().map(|e| e.id.clone()).collect();
    expected_tail.sort();
    let mut expected = vec![newer.id.clone()];
    expected.extend(expected_tail);

    let ids = |events: &[nostr::Event]| events.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), expected);
    assert_eq!(ids(&second), expected);
}

#[tokio::test]
async fn test_publish_succeeds_on_first_acceptance() {
    let rejecting = MockRelay::start(RelayBehavior {
        publish: PublishBehavior::Reject("blocked: not today".to_string()),
        ..RelayBehavior::default()
    })
    .await
    .unwrap();
    let ignoring = MockRelay::start(RelayBehavior {
        publish: PublishBehavior::Ignore,
        ..RelayBehavior::default()
    })
    .await
    .unwrap();
    let slow = MockRelay::start(RelayBehavior {
        publish: PublishBehavior::AcceptAfter(Duration::from_secs(1)),
        ..RelayBehavior::default()
    })
    .await
    .unwrap();

    let pool = connected_pool(&[&rejecting, &ignoring, &slow], test_config()).await;
    let event = signed(&Keys::generate(), 1, "hello", &[], unix_timestamp());

    let started = Instant::now();
    let result = pool.publish(&event).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.event_id, event.id);
    assert!(result.accepted_by.contains(&slow.url()));
    assert_eq!(result.accepted_by.len(), 1);
    assert_eq!(
        result.rejected_by.get(&rejecting.url()).map(String::as_str),
        Some("blocked: not today")
    );
    assert!(elapsed < Duration::from_secs(8), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_publish_fails_when_every_relay_rejects() {
    let reject = || RelayBehavior {
        publish: PublishBehavior::Reject("blocked".to_string()),
        ..RelayBehavior::default()
    };
    let a = MockRelay::start(reject()).await.unwrap();
    let b = MockRelay::start(reject()).await.unwrap();

    let pool = connected_pool(&[&a, &b], test_config()).await;
    let event = signed(&Keys::generate(), 1, "nope", &[], unix_timestamp());

    match pool.publish(&event).await {
        Err(ClientError::NoRelayAccepted {
            event_id,
            rejected_by,
        }) => {
            assert_eq!(event_id, event.id);
            assert_eq!(rejected_by.len(), 2);
        }
        other => panic!("expected NoRelayAccepted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_times_out_when_no_relay_answers() {
    let relay = MockRelay::start(RelayBehavior {
        publish: PublishBehavior::Ignore,
        ..RelayBehavior::default()
    })
    .await
    .unwrap();

    let config = nostr_client::PoolConfig {
        publish_timeout: Duration::from_millis(400),
        ..test_config()
    };
    let pool = connected_pool(&[&relay], config).await;
    let event = signed(&Keys::generate(), 1, "void", &[], unix_timestamp());

    let started = Instant::now();
    let result = pool.publish(&event).await;
    assert!(matches!(result, Err(ClientError::NoRelayAccepted { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_late_acknowledgements_surface_as_pool_events() {
    let fast = MockRelay::start_default().await.unwrap();
    let late = MockRelay::start(RelayBehavior {
        publish: PublishBehavior::AcceptAfter(Duration::from_millis(300)),
        ..RelayBehavior::default()
    })
    .await
    .unwrap();

    let pool = connected_pool(&[&fast, &late], test_config()).await;
    let mut notifications = pool.subscribe();
    let event = signed(&Keys::generate(), 1, "ack me", &[], unix_timestamp());

    let result = pool.publish(&event).await.unwrap();
    assert!(result.accepted_by.contains(&fast.url()));

    let late_url = late.url();
    let late_ack = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(PoolEvent::PublishAck {
                relay_url,
                event_id,
                accepted,
                ..
            }) = notifications.recv().await
                && relay_url == late_url
            {
                return (event_id, accepted);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(late_ack, (event.id.clone(), true));
}

#[tokio::test]
async fn test_publish_then_query_end_to_end() {
    let a = MockRelay::start_default().await.unwrap();
    let b = MockRelay::start_default().await.unwrap();
    let pool = connected_pool(&[&a, &b], test_config()).await;

    let event = signed(
        &Keys::generate(),
        1,
        "test",
        &[("t", "sobrkey")],
        unix_timestamp(),
    );
    pool.publish(&event).await.unwrap();

    // Give the second relay time to store its copy.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let filter = FilterBuilder::new()
        .kinds(vec![1])
        .tag("#t", "#sobrkey")
        .build()
        .unwrap();
    let events = pool.query(vec![filter], QueryOptions::default()).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, event.id);
    assert_eq!(events[0].content, "test");
}

#[tokio::test]
async fn test_query_against_silent_relays_respects_timeout() {
    let a = MockRelay::start(silent()).await.unwrap();
    let b = MockRelay::start(silent()).await.unwrap();
    let pool = connected_pool(&[&a, &b], test_config()).await;

    let timeout = Duration::from_millis(500);
    let started = Instant::now();
    let events = pool
        .query(
            vec![Filter::new().kinds(vec![1])],
            QueryOptions::with_timeout(timeout),
        )
        .await
        .unwrap();

    assert!(events.is_empty());
    assert!(started.elapsed() < timeout + Duration::from_millis(500));
}

#[tokio::test]
async fn test_query_keeps_results_from_responsive_relays() {
    let keys = Keys::generate();
    let event = signed(&keys, 1, "still here", &[], 100);

    let quiet = MockRelay::start(silent()).await.unwrap();
    let serving = MockRelay::start_default().await.unwrap();
    serving.seed([event.clone()]);

    let pool = connected_pool(&[&quiet, &serving], test_config()).await;
    let events = pool
        .query(
            vec![Filter::new().kinds(vec![1])],
            QueryOptions::with_timeout(Duration::from_millis(400)),
        )
        .await
        .unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, event.id);
}

#[tokio::test]
async fn test_query_drops_events_with_bad_signatures() {
    let keys = Keys::generate();
    let good = signed(&keys, 1, "good", &[], 100);
    let mut forged = signed(&keys, 1, "original", &[], 200);
    forged.content = "tampered".to_string();

    let relay = MockRelay::start_default().await.unwrap();
    relay.seed([good.clone(), forged]);

    let pool = connected_pool(&[&relay], test_config()).await;
    let events = pool
        .query(vec![Filter::new().kinds(vec![1])], QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, good.id);
}

#[tokio::test]
async fn test_forged_copy_on_one_relay_does_not_hide_the_real_event() {
    let keys = Keys::generate();
    let good = signed(&keys, 1, "genuine", &[], 100);
    let mut forged = good.clone();
    forged.content = "forged".to_string();

    let honest = MockRelay::start_default().await.unwrap();
    let hostile = MockRelay::start_default().await.unwrap();
    honest.seed([good.clone()]);
    hostile.seed([forged]);

    // Arrival order across relays varies, so repeat with fresh pools.
    for _ in 0..10 {
        let pool = connected_pool(&[&hostile, &honest], test_config()).await;
        let events = pool
            .query(vec![Filter::new().kinds(vec![1])], QueryOptions::default())
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content, "genuine");
        pool.disconnect_all().await;
    }
}

#[tokio::test]
async fn test_query_leaves_live_subscription_running() {
    let keys = Keys::generate();
    let relay = MockRelay::start_default().await.unwrap();
    let pool = connected_pool(&[&relay], test_config()).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _live = pool
        .subscribe_live(vec![Filter::new().kinds(vec![1])], move |event| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();

    for _ in 0..5 {
        pool.query(vec![Filter::new().kinds(vec![1])], QueryOptions::default())
            .await
            .unwrap();
    }

    let fresh = signed(&keys, 1, "still live", &[], unix_timestamp() + 5);
    relay.inject(fresh.clone());
    let received = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.id, fresh.id);
}

#[tokio::test]
async fn test_malformed_frames_do_not_break_the_connection() {
    let keys = Keys::generate();
    let event = signed(&keys, 1, "after garbage", &[], 100);

    let relay = MockRelay::start_default().await.unwrap();
    relay.seed([event.clone()]);
    let pool = connected_pool(&[&relay], test_config()).await;

    relay.send_raw("this is not json");
    relay.send_raw(r#"["EVENT","x",{"id":1}]"#);
    relay.send_raw(r#"["WHATEVER"]"#);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = pool
        .query(vec![Filter::new().kinds(vec![1])], QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(pool.connected_count().await, 1);
}

#[tokio::test]
async fn test_connection_loss_releases_pending_query() {
    let relay = MockRelay::start(silent()).await.unwrap();
    let pool = connected_pool(&[&relay], test_config()).await;
    let mut notifications = pool.subscribe();

    let started = Instant::now();
    let query = pool.query(
        vec![Filter::new().kinds(vec![1])],
        QueryOptions::with_timeout(Duration::from_secs(10)),
    );
    let drop_clients = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        relay.disconnect_clients();
    };
    let (events, ()) = tokio::join!(query, drop_clients);

    assert!(events.unwrap().is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));

    let disconnected = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(PoolEvent::Disconnected { relay_url }) = notifications.recv().await {
                return relay_url;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(disconnected, relay.url());

    let statuses = pool.get_relays().await;
    assert_eq!(statuses[0].state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_relay_after_disconnect() {
    let relay = MockRelay::start_default().await.unwrap();
    let pool = connected_pool(&[&relay], test_config()).await;

    pool.disconnect_all().await;
    assert_eq!(pool.connected_count().await, 0);

    pool.reconnect_relay(&relay.url(), Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(pool.connected_count().await, 1);
}

#[tokio::test]
async fn test_connect_all_reports_unreachable_relays() {
    let relay = MockRelay::start_default().await.unwrap();
    let pool = connected_pool(&[&relay], test_config()).await;
    pool.add_relay("ws://127.0.0.1:9").await.unwrap();
    let mut notifications = pool.subscribe();

    let results = pool.connect_all().await;
    let failed: Vec<&String> = results
        .iter()
        .filter(|(_, result)| result.is_err())
        .map(|(url, _)| url)
        .collect();
    assert_eq!(failed, vec!["ws://127.0.0.1:9"]);

    let failure = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(PoolEvent::ConnectionFailed { relay_url, .. }) = notifications.recv().await {
                return relay_url;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failure, "ws://127.0.0.1:9");

    let statuses = pool.get_relays().await;
    let unreachable = statuses
        .iter()
        .find(|s| s.url == "ws://127.0.0.1:9")
        .unwrap();
    assert_eq!(unreachable.state, ConnectionState::Failed);
    assert!(unreachable.last_error.is_some());
}
