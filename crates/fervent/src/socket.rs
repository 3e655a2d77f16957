//! WebSocket connection, channel registry, and heartbeat.
//!
//! A [`Socket`] owns the one persistent connection every channel is
//! multiplexed over. It plays both collaborator roles the channel layer
//! expects:
//!
//! - **Transport** ([`RequestSender`]): generates correlation references,
//!   writes envelopes through a dedicated writer task, and reports
//!   backpressure via `can_send`.
//! - **Registry**: caches one [`Channel`] per topic ([`Socket::channel`] is
//!   idempotent) and routes every inbound envelope to the matching channel's
//!   `deliver`.
//!
//! # Tasks
//!
//! `connect` spawns three tasks: a writer draining an unbounded queue into
//! the WebSocket sink, a reader parsing frames and routing them, and an
//! optional heartbeat pushing the reserved `"phoenix"` topic keepalive.
//!
//! The socket does not reconnect. When the connection drops, listeners are
//! notified, every cached channel receives the failure fanout, and a higher
//! layer decides whether to build a new socket and rejoin.
//!
//! # Example
//!
//! ```ignore
//! use fervent::Socket;
//!
//! let socket = Socket::new("ws://localhost:4000/socket/websocket");
//! socket.connect().await?;
//!
//! let lobby = socket.channel("room:lobby");
//! assert!(std::sync::Arc::ptr_eq(&lobby, &socket.channel("room:lobby")));
//! ```

use crate::channel::Channel;
use crate::error::{ChannelError, SendError, SocketError};
use crate::message::Envelope;
use crate::transport::RequestSender;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// The topic the server reserves for connection-level traffic.
const PHOENIX_TOPIC: &str = "phoenix";

/// Observer of socket-level connection events.
///
/// All methods have empty defaults; implement only what you care about.
/// Invoked from the socket's reader task.
pub trait SocketEventListener: Send + Sync {
    /// The connection was established.
    fn on_open(&self) {}

    /// A local disconnect was requested; the close frame is on its way out.
    fn on_closing(&self) {}

    /// The connection finished closing.
    fn on_closed(&self) {}

    /// The connection failed.
    fn on_failure(&self, _error: &SocketError) {}

    /// A raw text frame arrived, before envelope parsing.
    fn on_message(&self, _raw: &str) {}
}

/// Socket configuration.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Heartbeat interval, or `None` to disable heartbeats.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Some(Duration::from_secs(7)),
        }
    }
}

/// A client socket multiplexing channels over one WebSocket connection.
pub struct Socket {
    shared: Arc<Shared>,
}

/// State shared between the socket handle and its tasks. Also the
/// [`RequestSender`] the channels send through.
struct Shared {
    url: String,
    config: SocketConfig,
    channels: DashMap<String, Arc<Channel>>,
    listeners: RwLock<Vec<Arc<dyn SocketEventListener>>>,
    outbound: RwLock<Option<mpsc::UnboundedSender<WsMessage>>>,
    /// Claimed by the one `connect` call allowed to run the handshake.
    connecting: AtomicBool,
    connected: AtomicBool,
    ref_counter: AtomicU64,
}

impl Socket {
    /// Create a socket for a WebSocket URL. Does not connect yet.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(url, SocketConfig::default())
    }

    /// Create a socket with explicit configuration.
    pub fn with_config(url: impl Into<String>, config: SocketConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                config,
                channels: DashMap::new(),
                listeners: RwLock::new(Vec::new()),
                outbound: RwLock::new(None),
                connecting: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                ref_counter: AtomicU64::new(1),
            }),
        }
    }

    /// The URL this socket connects to.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Whether the connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Register a listener for connection events.
    pub fn register_event_listener(&self, listener: Arc<dyn SocketEventListener>) {
        self.shared.listeners.write().push(listener);
    }

    /// Unregister a previously registered listener.
    pub fn unregister_event_listener(&self, listener: &Arc<dyn SocketEventListener>) {
        self.shared
            .listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// The channel for a topic, creating it on first use.
    ///
    /// Idempotent: the same `Arc` is returned for the lifetime of the socket,
    /// so a topic never has two channel instances.
    pub fn channel(&self, topic: impl Into<String>) -> Arc<Channel> {
        let topic = topic.into();
        self.shared
            .channels
            .entry(topic.clone())
            .or_insert_with(|| {
                let sender = Arc::clone(&self.shared) as Arc<dyn RequestSender>;
                Arc::new(Channel::new(sender, topic))
            })
            .clone()
    }

    /// Establish the WebSocket connection and start the socket tasks.
    ///
    /// A socket connects at most once: racing calls no-op while the winner
    /// performs the handshake, and a socket whose connection ended stays
    /// ended. Build a new socket to reconnect. A failed handshake releases
    /// the guard so `connect` may be retried.
    pub async fn connect(&self) -> Result<(), SocketError> {
        if self.shared.connecting.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(error) = self.open().await {
            self.shared.connecting.store(false, Ordering::Release);
            return Err(error);
        }
        Ok(())
    }

    /// Run the handshake and spawn the socket tasks. Sole caller is the
    /// `connect` that claimed the `connecting` guard.
    async fn open(&self) -> Result<(), SocketError> {
        let (stream, _response) = connect_async(self.shared.url.as_str())
            .await
            .map_err(|e| SocketError::Connect(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (outbound, mut queue) = mpsc::unbounded_channel::<WsMessage>();
        *self.shared.outbound.write() = Some(outbound);
        self.shared.connected.store(true, Ordering::Release);
        tracing::debug!(url = %self.shared.url, "socket connected");

        // Writer: drain the outbound queue into the sink.
        let writer = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                if let Err(error) = write.send(message).await {
                    tracing::warn!(error = %error, "websocket write failed");
                    writer.connected.store(false, Ordering::Release);
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Reader: parse frames, route envelopes, surface failures.
        let reader = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(WsMessage::Text(text)) => reader.route(&text),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {} // ping/pong/binary
                    Err(error) => {
                        reader.connected.store(false, Ordering::Release);
                        // Release the writer so it drains and exits.
                        reader.outbound.write().take();
                        let failure = SocketError::Connection(error.to_string());
                        tracing::warn!(error = %failure, "socket failed");
                        reader.each_listener(|l| l.on_failure(&failure));
                        reader
                            .fail_channels(&ChannelError::Send(SendError::ConnectionClosed));
                        return;
                    }
                }
            }
            // Clean close: the connection is gone all the same, so cached
            // channels get the failure fanout here too.
            reader.connected.store(false, Ordering::Release);
            reader.outbound.write().take();
            reader.fail_channels(&ChannelError::Send(SendError::ConnectionClosed));
            reader.each_listener(|l| l.on_closed());
        });

        // Heartbeat on the reserved connection topic.
        if let Some(interval) = self.shared.config.heartbeat_interval {
            let heart = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // first tick is immediate
                loop {
                    ticker.tick().await;
                    if !heart.connected.load(Ordering::Acquire) {
                        break;
                    }
                    let envelope = Envelope::new(PHOENIX_TOPIC, "heartbeat", None)
                        .with_ref(heart.make_ref());
                    if heart.push_message(envelope).is_err() {
                        break;
                    }
                }
            });
        }

        self.shared.each_listener(|l| l.on_open());
        Ok(())
    }

    /// Close the connection.
    ///
    /// Queues a close frame, stops accepting writes, and lets the reader task
    /// notify `on_closed` when the server acknowledges.
    pub fn disconnect(&self) {
        if !self.shared.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.each_listener(|l| l.on_closing());
        if let Some(outbound) = self.shared.outbound.write().take() {
            let _ = outbound.send(WsMessage::Close(None));
        }
    }
}

impl Shared {
    /// Route one inbound text frame.
    fn route(&self, text: &str) {
        self.each_listener(|l| l.on_message(text));

        let envelope = match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(error = %error, "dropping malformed frame");
                return;
            }
        };

        // Heartbeat replies live on the reserved topic and have no channel.
        if envelope.topic == PHOENIX_TOPIC {
            return;
        }

        let channel = self
            .channels
            .get(&envelope.topic)
            .map(|entry| Arc::clone(entry.value()));
        match channel {
            Some(channel) => channel.deliver(&envelope),
            None => {
                tracing::debug!(topic = %envelope.topic, event = %envelope.event,
                    "no channel for inbound envelope");
            }
        }
    }

    /// Invoke `f` on a snapshot of the listeners, outside the lock.
    fn each_listener(&self, f: impl Fn(&dyn SocketEventListener)) {
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            f(listener.as_ref());
        }
    }

    /// Fan a transport-level failure out to every cached channel.
    fn fail_channels(&self, error: &ChannelError) {
        let channels: Vec<_> = self
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for channel in channels {
            channel.deliver_failure(Some(error), None);
        }
    }
}

impl RequestSender for Shared {
    fn make_ref(&self) -> String {
        self.ref_counter.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn push_message(&self, request: Envelope) -> Result<(), SendError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(SendError::NotConnected);
        }
        let text =
            serde_json::to_string(&request).map_err(|e| SendError::Transport(e.to_string()))?;
        let outbound = self.outbound.read();
        let sender = outbound.as_ref().ok_or(SendError::NotConnected)?;
        sender
            .send(WsMessage::Text(text.into()))
            .map_err(|_| SendError::ConnectionClosed)
    }

    fn can_send(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("url", &self.shared.url)
            .field("connected", &self.is_connected())
            .field("channels", &self.shared.channels.len())
            .finish()
    }
}
