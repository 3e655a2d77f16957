//! # Fervent - Phoenix Channels client
//!
//! Fervent is a client for topic-multiplexed, request/reply messaging over a
//! single persistent WebSocket connection, speaking the Phoenix Channels
//! wire protocol.
//!
//! # Overview
//!
//! - **Socket**: owns the connection, generates correlation references,
//!   caches one channel per topic, and routes inbound envelopes.
//! - **Channel**: the per-topic state machine (`CLOSED → JOINING → JOINED`,
//!   with `ERRORED` on failure) and its two dispatch tables: one-shot
//!   callbacks keyed by correlation reference, and persistent subscriptions
//!   keyed by event name.
//! - **Envelope**: the JSON message unit carrying topic, event, payload,
//!   optional reference, optional status.
//! - **MessageCallback**: the two-path capability (`on_message`,
//!   `on_failure`) every consumer registers.
//!
//! # Quick Start
//!
//! ```ignore
//! use fervent::{callback, Socket};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = Socket::new("ws://localhost:4000/socket/websocket");
//! socket.connect().await?;
//!
//! let channel = socket.channel("room:lobby");
//! channel.on("new_msg", callback(
//!     |envelope| println!("<- {:?}", envelope.payload),
//!     |error, _| eprintln!("!! {:?}", error),
//! ));
//!
//! channel.join(Some(json!({"nick": "jane"})), callback(
//!     |_| println!("joined"),
//!     |error, _| eprintln!("join failed: {:?}", error),
//! ))?;
//!
//! channel.push("new_msg", Some(json!({"text": "hi"})), None, None)?;
//! # Ok(())
//! # }
//! ```
//!
//! # What this crate does not do
//!
//! No reconnection or backoff, no persistence across restarts, no delivery
//! guarantees, and no automatic rejoin after an error. Observe
//! [`channel::ChannelState`] transitions from a higher layer and apply your
//! own policy.

#![deny(warnings)]
#![deny(missing_docs)]

/// Callback capability handed to channel operations.
pub mod callback;

/// Per-topic channel state machine and dispatch tables.
pub mod channel;

/// Error taxonomy for channel, transport, and socket operations.
pub mod error;

/// Wire envelope and reserved protocol events.
pub mod message;

/// WebSocket connection, channel registry, and heartbeat.
pub mod socket;

/// Transport collaborator trait consumed by channels.
pub mod transport;

pub use callback::{Callback, MessageCallback, callback, on_message};
pub use channel::{Channel, ChannelState};
pub use error::{ChannelError, SendError, SocketError};
pub use message::{Envelope, PhoenixEvent};
pub use socket::{Socket, SocketConfig, SocketEventListener};
pub use transport::RequestSender;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use fervent::prelude::*;
/// ```
pub mod prelude {
    pub use crate::callback::{Callback, MessageCallback, callback, on_message};
    pub use crate::channel::{Channel, ChannelState};
    pub use crate::error::{ChannelError, SendError, SocketError};
    pub use crate::message::{Envelope, PhoenixEvent};
    pub use crate::socket::{Socket, SocketConfig, SocketEventListener};
    pub use crate::transport::RequestSender;
}
