//! Lifecycle scenarios for the connection supervisor, driven through the
//! public API against a scripted transport.

use std::sync::Arc;
use std::time::Duration;

use nostr_sdk::prelude::{Kind, RelayUrl};
use pretty_assertions::assert_eq;

use relayscope::domain::relay::RelayInformation;
use relayscope::test_helpers::{text_note, wait_until, ConnectScript, FakeTransport};
use relayscope::{Connection, ConnectionStatus, Error, Settings};

fn new_connection(transport: &Arc<FakeTransport>) -> Connection {
    Connection::new(Arc::clone(transport), Settings::default())
}

#[tokio::test(start_paused = true)]
async fn backfill_flows_into_cache_and_loading_clears_on_eose() {
    let transport = FakeTransport::new();
    let conn = new_connection(&transport);

    conn.connect("wss://example.relay", vec![Kind::TextNote])
        .await
        .expect("connect accepts a valid address");
    assert_eq!(conn.status(), ConnectionStatus::Connecting);

    wait_until("connected", || conn.status() == ConnectionStatus::Connected).await;
    wait_until("primary subscription open", || {
        transport.subscription_count() == 1
    })
    .await;
    assert!(conn.is_loading(), "backfill in progress until EOSE");

    let sub_id = transport.open_subscription_ids()[0].clone();
    let first = text_note("one", 1000);
    let newest = text_note("two", 3000);
    let middle = text_note("three", 2000);
    transport.emit_event(&sub_id, first.clone());
    transport.emit_event(&sub_id, newest.clone());
    transport.emit_event(&sub_id, middle.clone());
    transport.emit_eose(&sub_id);

    wait_until("three events cached", || conn.events().len() == 3).await;
    wait_until("loading cleared", || !conn.is_loading()).await;

    assert_eq!(conn.events().timeline(), vec![newest, middle, first]);
}

#[tokio::test(start_paused = true)]
async fn invalid_address_is_rejected_before_any_state_change() {
    let transport = FakeTransport::new();
    let conn = new_connection(&transport);

    for address in ["http://example.com", "not a url", ""] {
        let result = conn.connect(address, vec![Kind::TextNote]).await;
        assert!(matches!(result, Err(Error::Validation(_))), "{address}");
    }

    assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    assert!(transport.connect_attempts().is_empty());
    assert_eq!(transport.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reconnect_replaces_session_and_drops_stale_events() {
    let transport = FakeTransport::new();
    let conn = new_connection(&transport);

    conn.connect("wss://first.relay", vec![Kind::TextNote])
        .await
        .expect("first connect");
    wait_until("first session connected", || {
        conn.status() == ConnectionStatus::Connected
    })
    .await;
    wait_until("first primary open", || transport.subscription_count() == 1).await;
    let first_sub = transport.open_subscription_ids()[0].clone();

    transport.emit_event(&first_sub, text_note("from first", 1000));
    wait_until("first event cached", || conn.events().len() == 1).await;

    conn.connect("wss://second.relay", vec![Kind::TextNote])
        .await
        .expect("second connect");

    // Teardown happened before bring-up: old subscription stopped, cache
    // emptied.
    assert!(transport.unsubscribed().contains(&first_sub));
    assert_eq!(conn.events().len(), 0);

    wait_until("second session connected", || {
        conn.status() == ConnectionStatus::Connected
    })
    .await;
    wait_until("second primary open", || {
        transport.open_subscription_ids().len() == 1
    })
    .await;
    let second_sub = transport.open_subscription_ids()[0].clone();
    assert_ne!(first_sub, second_sub);

    // A late event for the torn-down subscription is dropped; only the
    // second session's events appear.
    transport.emit_event(&first_sub, text_note("stale", 5000));
    let fresh = text_note("fresh", 6000);
    transport.emit_event(&second_sub, fresh.clone());

    wait_until("fresh event cached", || conn.events().len() == 1).await;
    assert_eq!(conn.events().timeline(), vec![fresh]);
    assert_eq!(
        conn.current_url(),
        Some(RelayUrl::parse("wss://second.relay").expect("valid url"))
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_while_connecting_supersedes_first_handshake() {
    let transport = FakeTransport::new();
    transport.script_connects([ConnectScript::Hang]);
    let conn = new_connection(&transport);

    conn.connect("wss://slow.relay", vec![]).await.expect("first connect");
    wait_until("first attempt seen", || {
        transport.connect_attempts().len() == 1
    })
    .await;
    assert_eq!(conn.status(), ConnectionStatus::Connecting);

    conn.connect("wss://fast.relay", vec![]).await.expect("second connect");
    wait_until("second session connected", || {
        conn.status() == ConnectionStatus::Connected
    })
    .await;
    assert_eq!(
        conn.current_url(),
        Some(RelayUrl::parse("wss://fast.relay").expect("valid url"))
    );

    // Let the superseded handshake's timeout fire; it must not clobber
    // the live session.
    tokio::time::advance(Duration::from_secs(30)).await;
    tokio::task::yield_now().await;
    assert_eq!(conn.status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_reports_error_status() {
    let transport = FakeTransport::new();
    transport.script_connects([ConnectScript::Hang]);
    let conn = new_connection(&transport);

    conn.connect("wss://dead.relay", vec![]).await.expect("connect");
    wait_until("attempt seen", || transport.connect_attempts().len() == 1).await;

    tokio::time::advance(Duration::from_secs(21)).await;
    wait_until("error status", || {
        matches!(conn.status(), ConnectionStatus::Error(_))
    })
    .await;

    match conn.status() {
        ConnectionStatus::Error(message) => assert!(message.contains("dead.relay")),
        status => panic!("unexpected status {status}"),
    }
}

#[tokio::test(start_paused = true)]
async fn failed_handshake_reports_error_status() {
    let transport = FakeTransport::failing_connect("connection refused");
    let conn = new_connection(&transport);

    conn.connect("wss://refusing.relay", vec![]).await.expect("connect");
    wait_until("error status", || {
        matches!(conn.status(), ConnectionStatus::Error(_))
    })
    .await;

    match conn.status() {
        ConnectionStatus::Error(message) => assert!(message.contains("connection refused")),
        status => panic!("unexpected status {status}"),
    }
}

#[tokio::test(start_paused = true)]
async fn transport_reported_disconnect_moves_status() {
    let transport = FakeTransport::new();
    let conn = new_connection(&transport);

    conn.connect("wss://example.relay", vec![Kind::TextNote])
        .await
        .expect("connect");
    wait_until("connected", || conn.status() == ConnectionStatus::Connected).await;

    let url = RelayUrl::parse("wss://example.relay").expect("valid url");
    transport.emit_disconnected(&url);
    wait_until("disconnected", || {
        conn.status() == ConnectionStatus::Disconnected
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent_and_clears_session_state() {
    let transport = FakeTransport::new();
    let conn = new_connection(&transport);

    conn.connect("wss://example.relay", vec![Kind::TextNote])
        .await
        .expect("connect");
    wait_until("connected", || conn.status() == ConnectionStatus::Connected).await;
    wait_until("primary open", || transport.subscription_count() == 1).await;

    let sub_id = transport.open_subscription_ids()[0].clone();
    transport.emit_event(&sub_id, text_note("cached", 1000));
    wait_until("event cached", || conn.events().len() == 1).await;

    conn.disconnect().await;
    assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    assert_eq!(conn.current_url(), None);
    assert!(conn.events().is_empty());
    assert!(!conn.is_loading());

    conn.disconnect().await;
    assert_eq!(conn.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn relay_information_is_fetched_after_connect() {
    let transport = FakeTransport::new();
    transport.set_relay_information(RelayInformation {
        name: Some(String::from("test relay")),
        supported_nips: vec![1, 11],
        ..Default::default()
    });
    let conn = new_connection(&transport);

    conn.connect("wss://example.relay", vec![Kind::TextNote])
        .await
        .expect("connect");
    wait_until("information fetched", || conn.relay_information().is_some()).await;

    let info = conn.relay_information().expect("present");
    assert_eq!(info.name.as_deref(), Some("test relay"));
    assert_eq!(info.supported_nips, vec![1, 11]);
}
