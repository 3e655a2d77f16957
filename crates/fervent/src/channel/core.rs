//! Core channel state machine.

use crate::callback::Callback;
use crate::error::ChannelError;
use crate::message::{Envelope, PhoenixEvent};
use crate::transport::RequestSender;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

// ============================================================================
// Channel State
// ============================================================================

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Not joined. The initial state, and the state after a server close.
    Closed = 0,
    /// A join request is in flight.
    Joining = 1,
    /// The server confirmed the join; pushes are accepted.
    Joined = 2,
    /// A protocol or transport failure occurred. No automatic recovery.
    Errored = 3,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Closed,
            1 => ChannelState::Joining,
            2 => ChannelState::Joined,
            _ => ChannelState::Errored,
        }
    }
}

/// The single authoritative state field, with compare-and-swap for the
/// join guard.
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: ChannelState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn compare_exchange(&self, current: ChannelState, new: ChannelState) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// ============================================================================
// Channel
// ============================================================================

/// A persistent subscription: event name plus callback, in insertion order.
struct EventBinding {
    event: String,
    callback: Callback,
}

/// A client-side channel bound to a single topic.
///
/// Created once per topic by [`crate::socket::Socket::channel`] and shared
/// behind an `Arc`. All methods take `&self`; the channel is safe to use from
/// multiple tasks concurrently.
pub struct Channel {
    topic: String,
    sender: Arc<dyn RequestSender>,
    state: StateCell,
    /// One-shot callbacks keyed by correlation reference. `DashMap::remove`
    /// is the atomic claim: the first remover resolves, later deliveries for
    /// the same reference are no-ops.
    pending: Arc<DashMap<String, Callback>>,
    /// Ordered event bindings. Locked for mutation and for snapshotting; the
    /// lock is never held while a callback runs.
    subscriptions: Mutex<Vec<EventBinding>>,
}

impl Channel {
    /// Create a channel for a topic, sending through the given transport.
    pub fn new(sender: Arc<dyn RequestSender>, topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sender,
            state: StateCell::new(ChannelState::Closed),
            pending: Arc::new(DashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// The topic this channel is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state.load()
    }

    /// Whether a push would currently be accepted: the channel is joined and
    /// the transport can take the write.
    pub fn can_push(&self) -> bool {
        self.state.load() == ChannelState::Joined && self.sender.can_send()
    }

    // ------------------------------------------------------------------
    // Outbound operations
    // ------------------------------------------------------------------

    /// Join the channel's topic.
    ///
    /// Sends the reserved join event with `payload` and registers `callback`
    /// as the one-shot resolver for the join reply. Returns the correlation
    /// reference of the join request.
    ///
    /// # Errors
    ///
    /// [`ChannelError::AlreadyJoined`] if a join is in flight or confirmed;
    /// the state is left untouched. [`ChannelError::Serialization`] if the
    /// payload is not valid structured data, checked before any state change.
    /// [`ChannelError::Send`] if the transport refuses the write; the channel
    /// moves to [`ChannelState::Errored`] so a later join may retry.
    pub fn join<P: Serialize>(
        &self,
        payload: Option<P>,
        callback: Callback,
    ) -> Result<String, ChannelError> {
        let payload = payload.map(serde_json::to_value).transpose()?;

        loop {
            let current = self.state.load();
            match current {
                ChannelState::Joining | ChannelState::Joined => {
                    return Err(ChannelError::AlreadyJoined(self.topic.clone()));
                }
                ChannelState::Closed | ChannelState::Errored => {
                    if self.state.compare_exchange(current, ChannelState::Joining) {
                        break;
                    }
                    // Lost a race with another join or with deliver; re-check.
                }
            }
        }

        match self.send_request(PhoenixEvent::Join.as_str(), payload, None, Some(callback)) {
            Ok(reference) => Ok(reference),
            Err(error) => {
                self.state.store(ChannelState::Errored);
                Err(error)
            }
        }
    }

    /// Leave the channel's topic.
    ///
    /// Sends the reserved leave event. The state does not change here; it
    /// moves to [`ChannelState::Closed`] only when the server confirms with
    /// its close event, so the channel is never declared closed before the
    /// far end acknowledges.
    pub fn leave(&self, callback: Callback) -> Result<String, ChannelError> {
        self.send_request(PhoenixEvent::Leave.as_str(), None, None, Some(callback))
    }

    /// Push an event to the server.
    ///
    /// `callback` is optional: pushes without one are fire-and-forget and
    /// never occupy the pending table. With `timeout` set, the callback is
    /// guaranteed exactly one resolution: the reply, or a
    /// [`ChannelError::Timeout`] failure once the window elapses. Timeouts
    /// require a running tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotJoined`] unless the channel is joined; nothing is
    /// sent.
    pub fn push<P: Serialize>(
        &self,
        event: &str,
        payload: Option<P>,
        timeout: Option<Duration>,
        callback: Option<Callback>,
    ) -> Result<String, ChannelError> {
        if self.state.load() != ChannelState::Joined {
            return Err(ChannelError::NotJoined);
        }
        let payload = payload.map(serde_json::to_value).transpose()?;
        self.send_request(event, payload, timeout, callback)
    }

    /// Subscribe `callback` to an event name. Returns `&self` for chaining.
    ///
    /// No uniqueness check is made: duplicate bindings are legal and all
    /// fire, in registration order.
    pub fn on(&self, event: impl Into<String>, callback: Callback) -> &Self {
        self.subscriptions.lock().push(EventBinding {
            event: event.into(),
            callback,
        });
        self
    }

    /// Remove the first subscription bound to `event`, if any.
    pub fn off(&self, event: &str) -> &Self {
        let mut bindings = self.subscriptions.lock();
        if let Some(position) = bindings.iter().position(|b| b.event == event) {
            bindings.remove(position);
        }
        self
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Deliver an inbound envelope addressed to this channel's topic.
    ///
    /// The sole inbound entry point, invoked by the socket's reader task for
    /// every frame routed here. Never panics or returns an error; failures
    /// are surfaced through callbacks.
    pub fn deliver(&self, envelope: &Envelope) {
        let event = envelope.event.as_str();
        if PhoenixEvent::Join.matches(event) {
            self.state.store(ChannelState::Joined);
            self.confirm_pending(envelope);
        } else if PhoenixEvent::Close.matches(event) {
            self.state.store(ChannelState::Closed);
            self.confirm_pending(envelope);
        } else if PhoenixEvent::Error.matches(event) {
            let error = ChannelError::Protocol(self.topic.clone());
            self.deliver_failure(Some(&error), Some(envelope));
        } else {
            // A reply to a push is both the resolution of that call and a
            // same-named broadcast other subscribers may care about; the
            // wire does not distinguish the two, so both dispatches run.
            self.resolve_pending(envelope);
            for callback in self.matching_subscriptions(event) {
                callback.on_message(envelope);
            }
        }
    }

    /// Deliver a failure: a reserved error envelope or a transport-level
    /// fault.
    ///
    /// Moves the channel to [`ChannelState::Errored`], fails every pending
    /// one-shot, and invokes the failure path of every subscription bound to
    /// the envelope's event, or of all subscriptions when no envelope
    /// context exists.
    pub fn deliver_failure(&self, error: Option<&ChannelError>, envelope: Option<&Envelope>) {
        self.state.store(ChannelState::Errored);

        // Pending replies can no longer arrive; resolve the one-shots so
        // callers without a timeout still hear about it. Removal is the
        // atomic claim, so a racing reply or timer finds nothing.
        let references: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for reference in references {
            if let Some((_, callback)) = self.pending.remove(&reference) {
                callback.on_failure(error, envelope);
            }
        }

        let callbacks = match envelope {
            Some(envelope) => self.matching_subscriptions(&envelope.event),
            None => {
                let bindings = self.subscriptions.lock();
                bindings.iter().map(|b| Arc::clone(&b.callback)).collect()
            }
        };
        tracing::debug!(
            topic = %self.topic,
            event = envelope.map(|e| e.event.as_str()),
            fanout = callbacks.len(),
            "channel errored"
        );
        for callback in callbacks {
            callback.on_failure(error, envelope);
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Issue a correlated send: take a fresh reference, register the one-shot
    /// callback, hand the envelope to the transport, arm the timeout.
    ///
    /// The callback is registered before the write so a reply racing the
    /// send always finds its entry; it is withdrawn again if the transport
    /// refuses the write.
    fn send_request(
        &self,
        event: &str,
        payload: Option<Value>,
        timeout: Option<Duration>,
        callback: Option<Callback>,
    ) -> Result<String, ChannelError> {
        let reference = self.sender.make_ref();
        let request =
            Envelope::new(self.topic.clone(), event, payload).with_ref(reference.clone());

        match callback {
            Some(callback) => {
                self.pending.insert(reference.clone(), callback);
                if let Err(error) = self.sender.push_message(request) {
                    self.pending.remove(&reference);
                    return Err(error.into());
                }
                if let Some(window) = timeout {
                    self.arm_timeout(reference.clone(), window);
                }
            }
            None => self.sender.push_message(request)?,
        }

        Ok(reference)
    }

    /// Expire a pending entry after `window` unless a reply claims it first.
    fn arm_timeout(&self, reference: String, window: Duration) {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some((_, callback)) = pending.remove(&reference) {
                tracing::debug!(reference = %reference, "pending request timed out");
                callback.on_failure(Some(&ChannelError::Timeout(window)), None);
            }
        });
    }

    /// Resolve a pending one-shot by the envelope's reference, success iff
    /// the status is "ok". Unmatched references are silently dropped.
    fn resolve_pending(&self, envelope: &Envelope) {
        let Some(reference) = &envelope.reference else {
            return;
        };
        let Some((_, callback)) = self.pending.remove(reference) else {
            return;
        };
        if envelope.is_ok() {
            callback.on_message(envelope);
        } else {
            callback.on_failure(None, Some(envelope));
        }
    }

    /// Resolve a pending one-shot for a lifecycle confirmation (join/close),
    /// which carries no status and always means success.
    fn confirm_pending(&self, envelope: &Envelope) {
        let Some(reference) = &envelope.reference else {
            return;
        };
        if let Some((_, callback)) = self.pending.remove(reference) {
            callback.on_message(envelope);
        }
    }

    /// Snapshot the callbacks bound to `event` so fanout runs without the
    /// subscription lock held.
    fn matching_subscriptions(&self, event: &str) -> Vec<Callback> {
        let bindings = self.subscriptions.lock();
        bindings
            .iter()
            .filter(|b| b.event == event)
            .map(|b| Arc::clone(&b.callback))
            .collect()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.topic)
            .field("state", &self.state.load())
            .field("pending", &self.pending.len())
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
