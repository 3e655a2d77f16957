//! Error types for channel and socket operations.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by channel operations.
///
/// Precondition violations ([`ChannelError::AlreadyJoined`],
/// [`ChannelError::NotJoined`], [`ChannelError::Serialization`]) are returned
/// synchronously and never mutate channel state. Asynchronous failures
/// ([`ChannelError::Timeout`], [`ChannelError::Protocol`]) are surfaced only
/// through a callback's failure path.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// `join` was called while the channel is already joining or joined.
    #[error("channel {0} is already joining or joined; 'join' can only be invoked once")]
    AlreadyJoined(String),

    /// `push` was called before the channel was joined.
    #[error("cannot push before the channel has been joined")]
    NotJoined,

    /// The payload could not be serialized to JSON.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport could not accept the write.
    #[error("send failed: {0}")]
    Send(#[from] SendError),

    /// No reply arrived within the configured window.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The server reported a channel-level error.
    #[error("protocol error on topic {0}")]
    Protocol(String),
}

/// Errors that can occur when handing a message to the transport.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection is not open.
    #[error("not connected")]
    NotConnected,

    /// The connection was closed while the message was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors that can occur while establishing or running a socket connection.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The WebSocket handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection failed after it was established.
    #[error("connection failure: {0}")]
    Connection(String),
}
