//! End-to-end socket tests against an in-process WebSocket server.

use fervent::prelude::*;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// Minimal channels server: confirms joins, acks leaves and heartbeats,
/// echoes everything else as an ok reply. Records every received envelope.
async fn spawn_server() -> (SocketAddr, Arc<Mutex<Vec<Value>>>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&received);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut write, mut read) = ws.split();
                while let Some(Ok(message)) = read.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let envelope: Value = serde_json::from_str(&text).unwrap();
                    log.lock().push(envelope.clone());

                    let topic = envelope["topic"].as_str().unwrap_or_default();
                    let reference = envelope["ref"].clone();
                    let reply = match envelope["event"].as_str().unwrap_or_default() {
                        "phx_join" => json!({
                            "topic": topic, "event": "phx_join",
                            "ref": reference, "status": "ok",
                        }),
                        "phx_leave" => json!({
                            "topic": topic, "event": "phx_close",
                            "ref": reference, "status": "ok",
                        }),
                        "heartbeat" => json!({
                            "topic": "phoenix", "event": "phx_reply",
                            "ref": reference, "status": "ok",
                        }),
                        _ => json!({
                            "topic": topic, "event": "phx_reply",
                            "ref": reference, "status": "ok",
                            "payload": {"response": envelope["payload"]},
                        }),
                    };
                    write.send(Message::Text(reply.to_string().into())).await.unwrap();
                }
            });
        }
    });

    (addr, received)
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Listener recording the connection state, as a Phoenix client test would.
#[derive(Default)]
struct TestListener {
    state: Mutex<String>,
    messages: AtomicUsize,
}

impl SocketEventListener for TestListener {
    fn on_open(&self) {
        *self.state.lock() = "open".to_string();
    }

    fn on_closing(&self) {
        *self.state.lock() = "closing".to_string();
    }

    fn on_closed(&self) {
        *self.state.lock() = "closed".to_string();
    }

    fn on_failure(&self, _error: &SocketError) {
        *self.state.lock() = "failure".to_string();
    }

    fn on_message(&self, _raw: &str) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_notifies_listener() {
    init_tracing();
    let (addr, _received) = spawn_server().await;

    let socket = Socket::new(format!("ws://{addr}/socket/websocket"));
    let listener = Arc::new(TestListener::default());
    socket.register_event_listener(listener.clone());

    socket.connect().await.unwrap();
    assert!(socket.is_connected());
    assert_eq!(*listener.state.lock(), "open");
}

#[tokio::test(flavor = "multi_thread")]
async fn channel_lookup_is_idempotent() {
    let socket = Socket::new("ws://localhost:4000/socket/websocket");

    let first = socket.channel("/api:topic1");
    let second = socket.channel("/api:topic1");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.topic(), "/api:topic1");

    let other = socket.channel("/api:topic2");
    assert!(!Arc::ptr_eq(&first, &other));
}

#[tokio::test(flavor = "multi_thread")]
async fn join_round_trip() {
    init_tracing();
    let (addr, _received) = spawn_server().await;

    let socket = Socket::new(format!("ws://{addr}/socket/websocket"));
    socket.connect().await.unwrap();

    let channel = socket.channel("room:lobby");
    let joins = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&joins);
    channel
        .join(
            Some(json!({"nick": "jane"})),
            callback(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }, |_, _| {}),
        )
        .unwrap();

    wait_until("join confirmation", || {
        channel.state() == ChannelState::Joined
    })
    .await;
    assert_eq!(joins.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn push_reply_round_trip() {
    init_tracing();
    let (addr, received) = spawn_server().await;

    let socket = Socket::with_config(
        format!("ws://{addr}/socket/websocket"),
        SocketConfig {
            heartbeat_interval: None,
        },
    );
    socket.connect().await.unwrap();

    let channel = socket.channel("room:lobby");
    channel.join(None::<Value>, on_message(|_| {})).unwrap();
    wait_until("join confirmation", || {
        channel.state() == ChannelState::Joined
    })
    .await;

    let replies = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&replies);
    channel
        .push(
            "new_msg",
            Some(json!({"text": "hi"})),
            Some(Duration::from_secs(5)),
            Some(callback(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }, |_, _| {})),
        )
        .unwrap();

    wait_until("push reply", || replies.load(Ordering::Relaxed) == 1).await;
    assert!(
        received
            .lock()
            .iter()
            .any(|e| e["event"] == "new_msg" && e["topic"] == "room:lobby")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn push_before_join_is_rejected() {
    let (addr, received) = spawn_server().await;

    let socket = Socket::new(format!("ws://{addr}/socket/websocket"));
    socket.connect().await.unwrap();

    let channel = socket.channel("room:lobby");
    let result = channel.push("new_msg", Some(json!({"text": "hi"})), None, None);
    assert!(matches!(result, Err(ChannelError::NotJoined)));
    assert!(received.lock().iter().all(|e| e["event"] != "new_msg"));
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_is_sent_on_reserved_topic() {
    init_tracing();
    let (addr, received) = spawn_server().await;

    let socket = Socket::with_config(
        format!("ws://{addr}/socket/websocket"),
        SocketConfig {
            heartbeat_interval: Some(Duration::from_millis(50)),
        },
    );
    socket.connect().await.unwrap();

    wait_until("heartbeat frame", || {
        received
            .lock()
            .iter()
            .any(|e| e["event"] == "heartbeat" && e["topic"] == "phoenix")
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn server_close_errors_cached_channels() {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws.split();
        // Confirm the join, then close the connection cleanly.
        if let Some(Ok(Message::Text(text))) = read.next().await {
            let envelope: Value = serde_json::from_str(&text).unwrap();
            let reply = json!({
                "topic": envelope["topic"], "event": "phx_join",
                "ref": envelope["ref"], "status": "ok",
            });
            write.send(Message::Text(reply.to_string().into())).await.unwrap();
        }
        write.send(Message::Close(None)).await.unwrap();
    });

    let socket = Socket::with_config(
        format!("ws://{addr}/socket/websocket"),
        SocketConfig {
            heartbeat_interval: None,
        },
    );
    let events = Arc::new(TestListener::default());
    socket.register_event_listener(events.clone());
    socket.connect().await.unwrap();

    let channel = socket.channel("room:lobby");
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    channel.on(
        "new_msg",
        callback(|_| {}, move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        }),
    );

    let joins = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&joins);
    channel
        .join(
            None::<Value>,
            callback(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }, |_, _| {}),
        )
        .unwrap();
    wait_until("join confirmation", || joins.load(Ordering::Relaxed) == 1).await;

    // The clean close must reach the cached channel, not just the listeners.
    wait_until("channel errored", || {
        channel.state() == ChannelState::Errored
    })
    .await;
    assert_eq!(failures.load(Ordering::Relaxed), 1);
    assert!(!socket.is_connected());
    wait_until("closed listener", || *events.state.lock() == "closed").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_loss_surfaces_failure() {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Read one frame, then drop the connection without a close handshake.
        let _ = ws.next().await;
    });

    let socket = Socket::with_config(
        format!("ws://{addr}/socket/websocket"),
        SocketConfig {
            heartbeat_interval: None,
        },
    );
    let events = Arc::new(TestListener::default());
    socket.register_event_listener(events.clone());
    socket.connect().await.unwrap();

    let channel = socket.channel("room:lobby");
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    channel
        .join(
            None::<Value>,
            callback(|_| {}, move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .unwrap();

    wait_until("failure listener", || *events.state.lock() == "failure").await;
    wait_until("channel errored", || {
        channel.state() == ChannelState::Errored
    })
    .await;
    // The join one-shot hears about the lost connection too.
    wait_until("join failure", || failures.load(Ordering::Relaxed) == 1).await;
    assert!(!socket.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_connects_open_one_connection() {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                let _ws = tokio_tungstenite::accept_async(stream).await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    let socket = Socket::new(format!("ws://{addr}/socket/websocket"));
    let (first, second) = tokio::join!(socket.connect(), socket.connect());
    first.unwrap();
    second.unwrap();
    assert!(socket.is_connected());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(accepts.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_closes_cleanly() {
    init_tracing();
    let (addr, _received) = spawn_server().await;

    let socket = Socket::new(format!("ws://{addr}/socket/websocket"));
    let listener = Arc::new(TestListener::default());
    socket.register_event_listener(listener.clone());
    socket.connect().await.unwrap();

    socket.disconnect();
    assert!(!socket.is_connected());
    wait_until("close handshake", || *listener.state.lock() == "closed").await;
}
