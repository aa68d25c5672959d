//! Integration Tests for the player client
//!
//! Runs real clients against the in-process broker.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use playerlink::client::ConnectionState;
use playerlink::config::ClientConfig;
use playerlink::network::{ClientEvent, ConnectFailure, EventKind, EventProcessor, LocalBroker};
use playerlink::{PlayerClient, PositionUpdate};

const PERIOD: Duration = Duration::from_millis(100);

fn player(broker: &LocalBroker, client_id: &str) -> PlayerClient {
    let config = ClientConfig::new(client_id).with_topic_prefix("g");
    PlayerClient::new(config, Arc::new(broker.clone())).unwrap()
}

async fn next_event(processor: &mut EventProcessor) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), processor.next())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

async fn connect(client: &PlayerClient) {
    let mut connected = client.subscribe_kind(EventKind::Connected);
    client.init().unwrap();
    next_event(&mut connected).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.connected());
}

/// Let delivery tasks and at least one tick run
async fn settle() {
    tokio::time::sleep(PERIOD * 2).await;
}

#[tokio::test(start_paused = true)]
async fn test_positions_reach_other_players_only() {
    let broker = LocalBroker::new();
    let alice = player(&broker, "alice");
    let bob = player(&broker, "bob");
    let mut alice_received = alice.subscribe_kind(EventKind::Received);
    let mut bob_received = bob.subscribe_kind(EventKind::Received);

    connect(&alice).await;
    connect(&bob).await;
    assert_eq!(broker.connected_clients(), vec!["alice".to_string(), "bob".to_string()]);

    let update = PositionUpdate {
        x: 1.0,
        y: 2.0,
        z: Some(3.0),
        timestamp_ms: 1000,
    };
    alice.broadcast_positions(&update).unwrap();

    match next_event(&mut bob_received).await {
        ClientEvent::Received { topic, data, client_id } => {
            assert_eq!(topic, "g/alice/positions");
            assert_eq!(client_id, "alice");
            let decoded: PositionUpdate = serde_json::from_str(&data).unwrap();
            assert_eq!(decoded, update);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    settle().await;
    assert!(alice_received.try_next().is_none(), "own broadcast must not echo");
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_coalesced_to_last_value() {
    let broker = LocalBroker::new();
    let alice = player(&broker, "alice");
    let bob = player(&broker, "bob");
    let mut bob_received = bob.subscribe_kind(EventKind::Received);
    connect(&alice).await;
    connect(&bob).await;

    for frame in 0..20 {
        alice.broadcast_positions(&json!({ "frame": frame })).unwrap();
    }
    settle().await;

    match bob_received.try_next() {
        Some(ClientEvent::Received { data, .. }) => assert_eq!(data, r#"{"frame":19}"#),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(bob_received.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_join_announcement_sent_on_connect() {
    let broker = LocalBroker::new();
    let alice = player(&broker, "alice");
    let mut sent = alice.subscribe_kind(EventKind::Sent);

    alice.init().unwrap();

    assert_eq!(
        next_event(&mut sent).await,
        ClientEvent::Sent {
            topic: "g/join".to_string(),
            data: "alice is alive".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_external_publisher_is_received() {
    let broker = LocalBroker::new();
    let alice = player(&broker, "alice");
    let mut received = alice.subscribe_kind(EventKind::Received);
    connect(&alice).await;

    assert_eq!(broker.publish("g/carol/positions", "raw"), 1);
    assert_eq!(broker.publish("g/join", "carol is alive"), 0);
    assert_eq!(broker.publish("other/carol/positions", "elsewhere"), 0);

    assert_eq!(
        next_event(&mut received).await,
        ClientEvent::Received {
            topic: "g/carol/positions".to_string(),
            data: "raw".to_string(),
            client_id: "carol".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_broker_drop_disconnects_and_stops_sending() {
    let broker = LocalBroker::new();
    let alice = player(&broker, "alice");
    let bob = player(&broker, "bob");
    let mut alice_disconnected = alice.subscribe_kind(EventKind::Disconnected);
    let mut bob_received = bob.subscribe_kind(EventKind::Received);
    connect(&alice).await;
    connect(&bob).await;
    alice.set_pair_id(Some("pair-1".to_string()));

    assert!(broker.disconnect_client("alice", "keepalive timeout"));
    assert_eq!(
        next_event(&mut alice_disconnected).await,
        ClientEvent::Disconnected {
            client_id: "alice".to_string(),
            reason: "keepalive timeout".to_string(),
        }
    );

    assert_eq!(alice.state(), ConnectionState::Disconnected);
    assert!(!alice.connected());
    assert!(!alice.throttle_running());
    assert_eq!(alice.pair_id(), None);

    alice.broadcast_positions(&json!({"x": 1})).unwrap();
    tokio::time::sleep(PERIOD * 5).await;
    assert!(bob_received.try_next().is_none());
    assert_eq!(alice.pending_messages(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_flushes_latest_pending() {
    let broker = LocalBroker::new();
    let alice = player(&broker, "alice");
    let bob = player(&broker, "bob");
    let mut bob_received = bob.subscribe_kind(EventKind::Received);
    connect(&alice).await;
    connect(&bob).await;

    let mut disconnected = alice.subscribe_kind(EventKind::Disconnected);
    broker.disconnect_client("alice", "network");
    next_event(&mut disconnected).await;

    alice.broadcast_positions(&json!({"x": 1})).unwrap();
    alice.broadcast_positions(&json!({"x": 2})).unwrap();
    connect(&alice).await;

    match next_event(&mut bob_received).await {
        ClientEvent::Received { data, .. } => assert_eq!(data, r#"{"x":2}"#),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_refused_connection_then_retry() {
    let broker = LocalBroker::new();
    broker.refuse_connections(Some(ConnectFailure::new(5, "not authorized")));

    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    let config = ClientConfig::new("alice").with_topic_prefix("g");
    let alice = PlayerClient::builder(config, Arc::new(broker.clone()))
        .on_failure(move |failure| seen.lock().push(failure.clone()))
        .build()
        .unwrap();

    alice.init().unwrap();
    settle().await;

    assert_eq!(alice.state(), ConnectionState::Disconnected);
    assert!(!alice.connected());
    assert_eq!(failures.lock().clone(), vec![ConnectFailure::new(5, "not authorized")]);
    assert!(broker.connected_clients().is_empty());

    broker.refuse_connections(None);
    connect(&alice).await;
}

#[tokio::test(start_paused = true)]
async fn test_reinit_replaces_session() {
    let broker = LocalBroker::new();
    let alice = player(&broker, "alice");
    let mut disconnected = alice.subscribe_kind(EventKind::Disconnected);
    connect(&alice).await;

    connect(&alice).await;
    settle().await;

    // The takeover notice went to the replaced session and is ignored
    assert!(disconnected.try_next().is_none());
    assert_eq!(alice.state(), ConnectionState::Connected);
    assert_eq!(broker.connected_clients(), vec!["alice".to_string()]);
    assert!(alice.throttle_running());
}

#[tokio::test(start_paused = true)]
async fn test_send_count_bounded_by_ticks() {
    let broker = LocalBroker::new();
    let alice = player(&broker, "alice");
    connect(&alice).await;
    let mut sent = alice.subscribe_kind(EventKind::Sent);
    let ticks_before = alice.throttle_ticks();

    for frame in 0..120 {
        alice.broadcast_positions(&json!({ "frame": frame })).unwrap();
        tokio::time::sleep(Duration::from_millis(16)).await;
    }

    let mut sends = 0u64;
    while sent.try_next().is_some() {
        sends += 1;
    }
    let ticks = alice.throttle_ticks() - ticks_before;
    assert!(sends > 0);
    assert!(sends <= ticks, "{} sends over {} ticks", sends, ticks);
}
