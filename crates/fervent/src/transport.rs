//! Transport collaborator trait consumed by channels.
//!
//! A channel never owns the connection. It asks a [`RequestSender`] for a
//! correlation reference, hands it an [`Envelope`] to write, and checks
//! [`RequestSender::can_send`] for backpressure. The built-in WebSocket
//! implementation lives in [`crate::socket`]; tests substitute a recording
//! mock.

use crate::error::SendError;
use crate::message::Envelope;

/// The connection-side collaborator a [`crate::channel::Channel`] sends
/// through.
pub trait RequestSender: Send + Sync {
    /// Generate a correlation reference, unique for the lifetime of the
    /// connection.
    fn make_ref(&self) -> String;

    /// Hand an envelope to the connection for writing.
    ///
    /// Fire-and-forget from the channel's perspective: a successful return
    /// means the transport accepted the write, not that the server received
    /// it. Completion is signaled later through the reply matching the
    /// envelope's reference.
    fn push_message(&self, request: Envelope) -> Result<(), SendError>;

    /// Whether the connection can currently accept writes.
    fn can_send(&self) -> bool;
}
