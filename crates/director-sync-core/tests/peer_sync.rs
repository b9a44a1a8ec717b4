//! Loopback tests: two coordinators in one process talking over real sockets

use std::time::Duration;

use director_sync_core::{Direction, IncomingMeta, SyncCoordinator, SyncCoordinatorOptions, SyncEvent};
use serde_json::{json, Value};
use tokio::sync::broadcast;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn node(id: &str) -> SyncCoordinator {
    SyncCoordinator::new(SyncCoordinatorOptions {
        instance_id: Some(id.to_string()),
        on_event: None,
    })
}

async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

async fn next_incoming(rx: &mut broadcast::Receiver<SyncEvent>) -> (Value, IncomingMeta) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(SyncEvent::Incoming { update, meta }) => return (update, meta),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("no incoming update within 5s")
}

async fn listen(node: &SyncCoordinator, port: u16) {
    node.set_settings(&json!({ "serverEnabled": true, "listenPort": port })).await;
}

async fn dial(node: &SyncCoordinator, port: u16) {
    node.set_settings(&json!({
        "clientEnabled": true,
        "remoteHost": "127.0.0.1",
        "remotePort": port,
    }))
    .await;
}

async fn connect_pair(a: &SyncCoordinator, b: &SyncCoordinator, port: u16) {
    listen(a, port).await;
    dial(b, port).await;
    assert!(
        wait_until(Duration::from_secs(5), || {
            b.status().outbound_connected && a.status().inbound_connection_count == 1
        })
        .await,
        "peers never connected"
    );
}

#[tokio::test]
async fn test_listener_reports_listening() {
    let a = node("a");
    let port = free_port();
    listen(&a, port).await;

    let status = a.status();
    assert!(status.listening);
    assert!(status.enabled);
    assert_eq!(status.listen_port, port);
    assert_eq!(status.last_error, None);
}

#[tokio::test]
async fn test_bind_failure_is_reported_not_raised() {
    let port = free_port();
    let _occupied = std::net::TcpListener::bind(("0.0.0.0", port)).unwrap();

    let a = node("a");
    listen(&a, port).await;

    let status = a.status();
    assert!(!status.listening);
    let err = status.last_error.expect("bind error recorded");
    assert!(err.contains(&format!("listen failed on port {port}")), "{err}");
}

#[tokio::test]
async fn test_late_joiner_receives_snapshot() {
    let a = node("a");
    let b = node("b");
    let port = free_port();
    listen(&a, port).await;

    let score = json!({ "type": "score", "scoreData": { "teamAWins": 1 } });
    // Nobody connected yet: cached, not sent
    assert!(!a.broadcast_update(&score));

    let mut events = b.subscribe();
    dial(&b, port).await;

    let (update, meta) = next_incoming(&mut events).await;
    assert_eq!(update, score);
    assert!(meta.snapshot);
    assert_eq!(meta.direction, Direction::Outbound);
    assert_eq!(meta.origin.as_deref(), Some("a"));
    assert!(b.status().last_connected_at.is_some());
}

#[tokio::test]
async fn test_updates_flow_both_ways() {
    let a = node("a");
    let b = node("b");
    connect_pair(&a, &b, free_port()).await;

    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    let state = json!({ "type": "state", "state": { "phase": "ban", "round": 3 } });
    assert!(a.broadcast_update(&state));
    let (update, meta) = next_incoming(&mut b_events).await;
    assert_eq!(update, state);
    assert!(!meta.snapshot);
    assert_eq!(meta.direction, Direction::Outbound);

    let postmatch = json!({ "type": "postmatch", "postMatchData": { "mvp": "player-7" } });
    assert!(b.broadcast_update(&postmatch));
    let (update, meta) = next_incoming(&mut a_events).await;
    assert_eq!(update, postmatch);
    assert_eq!(meta.direction, Direction::Inbound);
    assert_eq!(meta.origin.as_deref(), Some("b"));
}

#[tokio::test]
async fn test_outbound_reconnects_after_peer_drops_it() {
    let a = node("a");
    let b = node("b");
    let port = free_port();
    connect_pair(&a, &b, port).await;

    // Kill the link from A's side, then bring the listener straight back
    a.set_settings(&json!({ "serverEnabled": false })).await;
    assert!(wait_until(Duration::from_secs(3), || !b.status().outbound_connected).await);
    listen(&a, port).await;
    assert!(a.status().listening);

    let reconnected = wait_until(Duration::from_secs(8), || {
        b.status().outbound_connected && a.status().inbound_connection_count == 1
    })
    .await;
    assert!(reconnected, "outbound never reconnected: {}", b.status().summary());
}

#[tokio::test]
async fn test_manual_disconnect_and_reconnect() {
    let a = node("a");
    let b = node("b");
    connect_pair(&a, &b, free_port()).await;

    let status = b.disconnect_now();
    assert!(!status.outbound_connected);
    assert!(wait_until(Duration::from_secs(3), || a.status().inbound_connection_count == 0).await);

    // No automatic retry after a manual disconnect
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert!(!b.status().outbound_connected);

    b.reconnect_now();
    assert!(wait_until(Duration::from_secs(5), || b.status().outbound_connected).await);
}

#[tokio::test]
async fn test_dispose_tears_everything_down() {
    let a = node("a");
    let b = node("b");
    connect_pair(&a, &b, free_port()).await;

    a.dispose();
    let status = a.status();
    assert!(!status.listening);
    assert_eq!(status.inbound_connection_count, 0);
    assert!(wait_until(Duration::from_secs(3), || !b.status().outbound_connected).await);
}

#[tokio::test]
async fn test_listen_port_change_rebinds() {
    let a = node("a");
    let old_port = free_port();
    let mut new_port = free_port();
    while new_port == old_port {
        new_port = free_port();
    }
    listen(&a, old_port).await;
    assert!(a.status().listening);

    listen(&a, new_port).await;
    let status = a.status();
    assert!(status.listening);
    assert_eq!(status.listen_port, new_port);
    assert_eq!(status.last_error, None);

    // Old socket is released
    assert!(std::net::TcpListener::bind(("0.0.0.0", old_port)).is_ok());

    let b = node("b");
    dial(&b, new_port).await;
    assert!(wait_until(Duration::from_secs(5), || a.status().inbound_connection_count == 1).await);
}

#[tokio::test]
async fn test_dialer_sends_snapshot_to_listener() {
    let a = node("a");
    let b = node("b");
    let port = free_port();

    // B is active but nobody is listening yet
    dial(&b, port).await;
    let state = json!({ "type": "state", "state": { "phase": "pick", "round": 1 } });
    assert!(!b.broadcast_update(&state));

    let mut a_events = a.subscribe();
    listen(&a, port).await;
    b.reconnect_now();

    let (update, meta) = next_incoming(&mut a_events).await;
    assert_eq!(update, state);
    assert!(meta.snapshot);
    assert_eq!(meta.direction, Direction::Inbound);
    assert_eq!(meta.origin.as_deref(), Some("b"));
}
