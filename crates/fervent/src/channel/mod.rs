//! Per-topic channel state machine and dispatch tables.
//!
//! A [`Channel`] multiplexes one topic over the shared connection. It owns
//! two dispatch tables:
//!
//! - **pending**: correlation reference -> one-shot callback, resolved exactly
//!   once when the matching reply arrives (or the timeout fires).
//! - **subscriptions**: ordered (event name, callback) pairs that persist
//!   until removed with [`Channel::off`]; delivery fans out to every match.
//!
//! # Lifecycle
//!
//! ```text
//! CLOSED ──join──▶ JOINING ──phx_join──▶ JOINED ──phx_close──▶ CLOSED
//!                                          │
//!                              phx_error / transport failure
//!                                          ▼
//!                                       ERRORED
//! ```
//!
//! There is no automatic recovery from `ERRORED`: a higher layer observes the
//! state and re-invokes [`Channel::join`] with its own backoff policy.
//!
//! # Example
//!
//! ```ignore
//! use fervent::{callback, Socket};
//! use serde_json::json;
//!
//! let socket = Socket::new("ws://localhost:4000/socket/websocket");
//! socket.connect().await?;
//!
//! let channel = socket.channel("room:lobby");
//! channel.on("new_msg", callback(
//!     |envelope| println!("got: {:?}", envelope.payload),
//!     |error, _| eprintln!("failed: {:?}", error),
//! ));
//!
//! channel.join(Some(json!({"nick": "jane"})), on_join_callback)?;
//! ```

mod core;

pub use core::*;
