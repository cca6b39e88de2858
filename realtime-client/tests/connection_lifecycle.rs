//! Full-lifecycle tests against an in-process mock push server.
//!
//! Each test stands up a real WebSocket listener, points a client at it and
//! drives both ends: scripted server frames in, observed client state and
//! outbound commands out.

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use realtime_client::{
    Config, ConnectionManager, ConnectionState, MessageRouter, NotificationState,
    NotificationStore, SessionTransition,
};

const WAIT: Duration = Duration::from_secs(2);

struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    async fn send_json(&mut self, frame: Value) -> Result<()> {
        self.ws
            .send(Message::Text(frame.to_string().into()))
            .await?;
        Ok(())
    }

    /// Next text frame from the client, parsed.
    async fn recv_json(&mut self) -> Result<Value> {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("client went away"))??;
            if let Message::Text(text) = msg {
                return Ok(serde_json::from_str(&text)?);
            }
        }
    }
}

struct MockPushServer {
    url: String,
    conns: mpsc::Receiver<ServerConn>,
    accept_task: JoinHandle<()>,
}

impl MockPushServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, conns) = mpsc::channel(8);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    if tx.send(ServerConn { ws }).await.is_err() {
                        break;
                    }
                }
            }
        });
        Self {
            url: format!("ws://{addr}/ws/notifications"),
            conns,
            accept_task,
        }
    }

    async fn next_conn(&mut self) -> ServerConn {
        timeout(WAIT, self.conns.recv())
            .await
            .expect("no connection in time")
            .expect("accept loop gone")
    }

    async fn expect_no_conn(&mut self, within: Duration) {
        assert!(
            timeout(within, self.conns.recv()).await.is_err(),
            "unexpected connection"
        );
    }

    /// Stop accepting; the port starts refusing connections.
    fn shut_down(&self) {
        self.accept_task.abort();
    }
}

fn test_config(url: &str) -> Config {
    Config {
        ws_url: url.to_string(),
        base_delay_ms: 20,
        max_delay_ms: 100,
        max_attempts: 5,
        ack_timeout_ms: 200,
        ..Config::default()
    }
}

fn build_store(config: &Config) -> (NotificationStore, ConnectionManager) {
    let connection = ConnectionManager::new(config, MessageRouter::new());
    let store = NotificationStore::new(config, connection.clone());
    (store, connection)
}

async fn sign_in(store: &NotificationStore) {
    store
        .on_session_transition(SessionTransition::Valid {
            access_token: "itinerary-token".to_string(),
        })
        .await;
}

async fn wait_for<F>(store: &NotificationStore, mut pred: F) -> NotificationState
where
    F: FnMut(&NotificationState) -> bool,
{
    let mut rx = store.watch();
    timeout(WAIT, async {
        loop {
            {
                let state = rx.borrow().clone();
                if pred(&state) {
                    return state;
                }
            }
            rx.changed().await.expect("store dropped");
        }
    })
    .await
    .expect("state condition not reached")
}

fn notification_json(id: i64, is_read: bool, created_at: &str) -> Value {
    json!({
        "id": id,
        "sender": {"id": id * 10, "display_name": format!("traveler-{id}")},
        "kind": "comment",
        "is_read": is_read,
        "created_at": created_at,
    })
}

#[tokio::test]
async fn snapshot_push_and_optimistic_mark() -> Result<()> {
    let mut server = MockPushServer::start().await;
    let config = test_config(&server.url);
    let (store, _connection) = build_store(&config);
    sign_in(&store).await;

    let mut conn = server.next_conn().await;
    conn.send_json(json!({
        "type": "initial_notifications",
        "notifications": [
            notification_json(1, true, "2025-06-01T10:00:00Z"),
            notification_json(2, false, "2025-06-01T09:00:00Z"),
        ],
        "unread_count": 1,
    }))
    .await?;
    let state = wait_for(&store, |s| s.notifications.len() == 2).await;
    assert_eq!(state.unread_count, 1);

    conn.send_json(json!({
        "type": "new_notification",
        "notification": notification_json(3, false, "2025-06-01T11:00:00Z"),
    }))
    .await?;
    let state = wait_for(&store, |s| s.notifications.len() == 3).await;
    assert_eq!(state.unread_count, 2);
    let ids: Vec<i64> = state.notifications.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![3, 1, 2]);

    // Applies locally before the server has said anything
    store.mark_as_read(3).await?;
    let state = store.snapshot();
    assert_eq!(state.unread_count, 1);
    assert!(state.notifications[0].is_read);

    let frame = conn.recv_json().await?;
    assert_eq!(frame["type"], "mark_as_read");
    assert_eq!(frame["notification_id"], 3);
    assert!(frame["correlation_id"].is_string());
    Ok(())
}

#[tokio::test]
async fn abnormal_close_reconnects_and_requests_a_count() -> Result<()> {
    let mut server = MockPushServer::start().await;
    let config = test_config(&server.url);
    let (store, connection) = build_store(&config);
    sign_in(&store).await;
    let conn = server.next_conn().await;
    assert!(connection.is_connected());

    // TCP reset, no close handshake
    drop(conn);

    let mut replacement = server.next_conn().await;
    let frame = replacement.recv_json().await?;
    assert_eq!(frame["type"], "get_unread_count");
    let state = wait_for(&store, |s| s.connected).await;
    assert!(state.connected);
    Ok(())
}

#[tokio::test]
async fn settles_disconnected_after_exhausting_reconnect_attempts() {
    let mut server = MockPushServer::start().await;
    let config = test_config(&server.url);
    let (store, connection) = build_store(&config);
    sign_in(&store).await;
    let conn = server.next_conn().await;

    // Every reopen from here on is refused
    server.shut_down();
    drop(conn);

    let mut rx = connection.watch_state();
    let mut backoff_seen = false;
    timeout(Duration::from_secs(5), async {
        loop {
            let state = *rx.borrow();
            if matches!(state, ConnectionState::Reconnecting(_)) {
                backoff_seen = true;
            }
            if backoff_seen && state == ConnectionState::Disconnected {
                break;
            }
            rx.changed().await.expect("manager dropped");
        }
    })
    .await
    .expect("never settled into Disconnected");

    // Silent give-up: no further attempt fires
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    drop(store);
}

#[tokio::test]
async fn manual_disconnect_leaves_no_reconnect_pending() {
    let mut server = MockPushServer::start().await;
    let config = test_config(&server.url);
    let (store, connection) = build_store(&config);
    sign_in(&store).await;
    let _conn = server.next_conn().await;

    store.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    server.expect_no_conn(Duration::from_millis(400)).await;

    // A later connect opens a fresh epoch, attempt counter at zero
    store.connect().await.expect("reconnect after manual close");
    let _conn2 = server.next_conn().await;
    assert!(connection.is_connected());
}

#[tokio::test]
async fn disconnect_during_backoff_cancels_the_retry() {
    let mut server = MockPushServer::start().await;
    let mut config = test_config(&server.url);
    // Long enough that the test acts inside the backoff window
    config.base_delay_ms = 500;
    let (store, connection) = build_store(&config);
    sign_in(&store).await;
    let conn = server.next_conn().await;
    drop(conn);

    let mut rx = connection.watch_state();
    timeout(WAIT, async {
        loop {
            if matches!(*rx.borrow(), ConnectionState::Reconnecting(_)) {
                break;
            }
            rx.changed().await.expect("manager dropped");
        }
    })
    .await
    .expect("never entered Reconnecting");

    store.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    server.expect_no_conn(Duration::from_millis(700)).await;
}

#[tokio::test]
async fn connect_is_idempotent_while_connected() {
    let mut server = MockPushServer::start().await;
    let config = test_config(&server.url);
    let (store, connection) = build_store(&config);
    sign_in(&store).await;
    let _conn = server.next_conn().await;

    store.connect().await.expect("no-op connect");
    assert!(connection.is_connected());
    server.expect_no_conn(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn handshake_carries_the_bearer_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (query_tx, query_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let callback = move |req: &Request, resp: Response| {
            let _ = query_tx.send(req.uri().query().map(str::to_string));
            Ok(resp)
        };
        if let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
            // Keep the socket alive until the assertion has run
            let _ = timeout(WAIT, ws.next()).await;
        }
    });

    let config = test_config(&format!("ws://{addr}/ws/notifications"));
    let (store, _connection) = build_store(&config);
    sign_in(&store).await;

    let query = timeout(WAIT, query_rx)
        .await
        .expect("handshake never arrived")
        .expect("callback dropped");
    assert_eq!(query.as_deref(), Some("token=itinerary-token"));
}
