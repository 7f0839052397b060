mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{init_logging, wait_for_status, FakeTransport};
use pathsync_core::ConnectionStatus;
use pathsync_engine::{
    BackoffSettings, ConnectionError, ConnectionEvent, ConnectionManager, StaticToken,
};
use serde_json::json;

fn manager(transport: Arc<FakeTransport>, delay_secs: u64) -> ConnectionManager {
    ConnectionManager::new(
        transport,
        Arc::new(StaticToken::new("secret")),
        BackoffSettings::fixed(Duration::from_secs(delay_secs)),
    )
}

#[tokio::test(start_paused = true)]
async fn transport_error_schedules_exactly_one_retry() {
    init_logging();
    let transport = FakeTransport::new();
    let manager = manager(transport.clone(), 5);
    let mut events = manager.events();

    manager.connect();
    wait_for_status(&mut events, ConnectionStatus::Open).await;
    assert_eq!(transport.opens(), 1);

    transport.fail_stream();
    wait_for_status(&mut events, ConnectionStatus::Retrying).await;
    assert!(!manager.status().is_connected());
    assert!(!manager.has_transport());
    assert!(manager.retry_pending());

    // Manual connect while the retry is pending; the open fails again.
    transport.set_fail_open(true);
    manager.connect();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.opens(), 2);
    assert!(manager.retry_pending());

    // Only one timer fires per delay: a leftover timer would open twice.
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert_eq!(transport.opens(), 3);

    transport.set_fail_open(false);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.opens(), 4);
    assert_eq!(manager.status(), ConnectionStatus::Open);
    assert!(!manager.retry_pending());
}

#[tokio::test(start_paused = true)]
async fn error_is_broadcast_to_every_subscriber() {
    let transport = FakeTransport::new();
    let manager = manager(transport.clone(), 1);
    let mut first = manager.events();
    let mut second = manager.events();

    manager.connect();
    wait_for_status(&mut first, ConnectionStatus::Open).await;
    transport.fail_stream();
    wait_for_status(&mut first, ConnectionStatus::Disconnected).await;

    let mut saw_error = false;
    while let Ok(event) = second.try_recv() {
        if let ConnectionEvent::Error(message) = event {
            assert!(message.contains("connection reset"));
            saw_error = true;
        }
    }
    assert!(saw_error);
}

#[tokio::test(start_paused = true)]
async fn waits_for_credential_before_opening() {
    let slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let credential = {
        let slot = slot.clone();
        move || slot.lock().unwrap().clone()
    };
    let transport = FakeTransport::new();
    let manager = ConnectionManager::new(
        transport.clone(),
        Arc::new(credential),
        BackoffSettings::fixed(Duration::from_secs(2)),
    );
    let mut events = manager.events();

    manager.connect();
    assert_eq!(manager.status(), ConnectionStatus::Retrying);
    assert!(manager.retry_pending());
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(transport.opens(), 0);

    *slot.lock().unwrap() = Some("secret".into());
    wait_for_status(&mut events, ConnectionStatus::Open).await;
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_replaces_the_previous_transport() {
    let transport = FakeTransport::new();
    let manager = manager(transport.clone(), 1);
    let mut events = manager.events();

    manager.connect();
    wait_for_status(&mut events, ConnectionStatus::Open).await;
    manager.connect();
    wait_for_status(&mut events, ConnectionStatus::Open).await;
    assert_eq!(transport.opens(), 2);

    transport.push_json(json!({"event": "jobprogress", "channel": "u1", "data": {}}));
    loop {
        if let ConnectionEvent::Message(message) = events.recv().await.unwrap() {
            assert_eq!(message.event, "jobprogress");
            break;
        }
    }
    assert!(!manager.retry_pending());
}

#[tokio::test(start_paused = true)]
async fn subscribe_and_unsubscribe_are_idempotent() {
    let transport = FakeTransport::new();
    let manager = manager(transport.clone(), 1);
    let mut events = manager.events();
    manager.connect();
    wait_for_status(&mut events, ConnectionStatus::Open).await;

    manager.subscribe("user:u1").await.unwrap();
    manager.subscribe("user:u1").await.unwrap();
    assert_eq!(transport.subscribes(), vec!["user:u1"]);
    assert_eq!(manager.subscriptions(), vec!["user:u1"]);

    manager.unsubscribe("user:u1").await.unwrap();
    manager.unsubscribe("user:u1").await.unwrap();
    manager.unsubscribe("never-joined").await.unwrap();
    assert_eq!(transport.unsubscribes(), vec!["user:u1"]);
    assert!(manager.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn subscribe_fails_without_changing_membership() {
    let transport = FakeTransport::new();
    let manager = manager(transport.clone(), 1);

    let err = manager.subscribe("user:u1").await.unwrap_err();
    assert_eq!(err, ConnectionError::NotConnected);
    assert!(transport.subscribes().is_empty());

    let mut events = manager.events();
    manager.connect();
    wait_for_status(&mut events, ConnectionStatus::Open).await;
    transport.set_fail_subscribe(true);
    let err = manager.subscribe("user:u1").await.unwrap_err();
    assert!(matches!(err, ConnectionError::Remote(_)));
    assert!(manager.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resubscribe_reissues_every_joined_channel() {
    let transport = FakeTransport::new();
    let manager = manager(transport.clone(), 1);
    let mut events = manager.events();
    manager.connect();
    wait_for_status(&mut events, ConnectionStatus::Open).await;
    manager.subscribe("a").await.unwrap();
    manager.subscribe("b").await.unwrap();

    transport.fail_stream();
    wait_for_status(&mut events, ConnectionStatus::Open).await;
    assert_eq!(manager.subscriptions(), vec!["a", "b"]);

    manager.resubscribe_all().await.unwrap();
    assert_eq!(transport.subscribes(), vec!["a", "b", "a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn malformed_messages_are_dropped() {
    init_logging();
    let transport = FakeTransport::new();
    let manager = manager(transport.clone(), 1);
    let mut events = manager.events();
    manager.connect();
    wait_for_status(&mut events, ConnectionStatus::Open).await;

    transport.push("not json at all");
    transport.push_json(json!({"channel": "u1"}));
    transport.push_json(json!({"event": "jobdone", "channel": "u1", "data": {"job": {"id": "J1"}}}));

    let message = loop {
        match events.recv().await.unwrap() {
            ConnectionEvent::Message(message) => break message,
            ConnectionEvent::Status(status) => panic!("unexpected status {status:?}"),
            ConnectionEvent::Error(error) => panic!("unexpected error {error}"),
        }
    };
    assert_eq!(message.event, "jobdone");
    assert_eq!(manager.last_message(), Some(message));
    assert_eq!(manager.status(), ConnectionStatus::Open);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_retrying() {
    let transport = FakeTransport::new();
    let manager = manager(transport.clone(), 1);
    let mut events = manager.events();
    manager.connect();
    wait_for_status(&mut events, ConnectionStatus::Open).await;

    transport.fail_stream();
    wait_for_status(&mut events, ConnectionStatus::Retrying).await;
    manager.shutdown();
    assert!(!manager.retry_pending());
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.opens(), 1);
    manager.connect();
    assert_eq!(transport.opens(), 1);
}
