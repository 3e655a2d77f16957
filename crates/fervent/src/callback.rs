//! The callback capability handed to channel operations.
//!
//! A [`MessageCallback`] has two paths: `on_message` for successful delivery
//! and `on_failure` for errors, timeouts, and failed replies. One-shot
//! callbacks (registered per correlation reference) fire at most once;
//! persistent subscriptions (registered per event name via `Channel::on`)
//! fire zero or more times.
//!
//! Callbacks are invoked on whatever task delivers the inbound message, which
//! is generally not the task that registered them. Callback bodies must be
//! safe to call from any thread; that is what the `Send + Sync` bounds
//! enforce.

use crate::error::ChannelError;
use crate::message::Envelope;
use std::sync::Arc;

/// Receiver for the outcome of a channel operation or a subscribed event.
pub trait MessageCallback: Send + Sync {
    /// A message arrived: a successful reply, or a broadcast for a
    /// subscribed event.
    fn on_message(&self, envelope: &Envelope);

    /// Delivery failed: an error reply, a protocol error, a timeout, or a
    /// dropped connection. Either argument may be absent depending on what
    /// context the failure carries.
    fn on_failure(&self, error: Option<&ChannelError>, envelope: Option<&Envelope>);
}

/// A shared, type-erased callback handle.
pub type Callback = Arc<dyn MessageCallback>;

/// Adapter pairing two closures into a [`MessageCallback`].
struct FnCallback<M, F> {
    message: M,
    failure: F,
}

impl<M, F> MessageCallback for FnCallback<M, F>
where
    M: Fn(&Envelope) + Send + Sync,
    F: Fn(Option<&ChannelError>, Option<&Envelope>) + Send + Sync,
{
    fn on_message(&self, envelope: &Envelope) {
        (self.message)(envelope)
    }

    fn on_failure(&self, error: Option<&ChannelError>, envelope: Option<&Envelope>) {
        (self.failure)(error, envelope)
    }
}

/// Build a callback from a success closure and a failure closure.
pub fn callback<M, F>(message: M, failure: F) -> Callback
where
    M: Fn(&Envelope) + Send + Sync + 'static,
    F: Fn(Option<&ChannelError>, Option<&Envelope>) + Send + Sync + 'static,
{
    Arc::new(FnCallback { message, failure })
}

/// Build a callback that only cares about the success path.
///
/// Failures are logged at `warn` level and otherwise dropped.
pub fn on_message<M>(message: M) -> Callback
where
    M: Fn(&Envelope) + Send + Sync + 'static,
{
    callback(message, |error, envelope| {
        tracing::warn!(
            error = error.map(|e| e.to_string()).as_deref(),
            event = envelope.map(|e| e.event.as_str()),
            "unhandled channel failure"
        );
    })
}
