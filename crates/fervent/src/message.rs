//! Wire envelope and reserved protocol events.
//!
//! Every frame exchanged with the server is a JSON object:
//!
//! ```text
//! { "topic": "room:lobby", "event": "new_msg", "payload": {...},
//!   "ref": "42", "status": "ok" }
//! ```
//!
//! `ref` correlates a request with its eventual reply; `status` carries the
//! server's verdict on a reply. Phoenix nests the status inside the reply
//! payload (`{"status": "ok", "response": {...}}`), so [`Envelope::status`]
//! reads it from either place.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single protocol message, incoming or outgoing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The topic this message belongs to (e.g., "room:lobby").
    pub topic: String,
    /// The event name (e.g., "phx_join", "new_msg").
    pub event: String,
    /// The payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Correlation reference for request/reply matching.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Reply status ("ok" or an error tag), when sent at the top level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Envelope {
    /// Create a new envelope with no reference or status.
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            reference: None,
            status: None,
        }
    }

    /// Set the correlation reference.
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Set the reply status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// The reply status, wherever the server put it.
    ///
    /// Checks the top-level `status` field first, then `payload.status`.
    pub fn status(&self) -> Option<&str> {
        if let Some(status) = &self.status {
            return Some(status);
        }
        self.payload
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(Value::as_str)
    }

    /// Whether this reply carries an "ok" status.
    pub fn is_ok(&self) -> bool {
        self.status() == Some("ok")
    }
}

/// Reserved event names consumed by the channel state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoenixEvent {
    /// Join a channel topic.
    Join,
    /// Leave a channel topic.
    Leave,
    /// Server closed the channel.
    Close,
    /// Server-side channel error.
    Error,
    /// Reply to a client request.
    Reply,
}

impl PhoenixEvent {
    /// The wire name of this event.
    pub const fn as_str(self) -> &'static str {
        match self {
            PhoenixEvent::Join => "phx_join",
            PhoenixEvent::Leave => "phx_leave",
            PhoenixEvent::Close => "phx_close",
            PhoenixEvent::Error => "phx_error",
            PhoenixEvent::Reply => "phx_reply",
        }
    }

    /// Check whether an event name is this reserved event.
    pub fn matches(self, event: &str) -> bool {
        self.as_str() == event
    }
}

impl std::fmt::Display for PhoenixEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope::new("room:lobby", "new_msg", Some(json!({"text": "hi"})))
            .with_ref("7")
            .with_status("ok");

        let text = serde_json::to_string(&envelope).unwrap();
        assert!(text.contains(r#""ref":"7""#));

        let parsed: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_status_nested_in_payload() {
        let envelope = Envelope::new(
            "room:lobby",
            "phx_reply",
            Some(json!({"status": "error", "response": {}})),
        );
        assert_eq!(envelope.status(), Some("error"));
        assert!(!envelope.is_ok());
    }

    #[test]
    fn test_top_level_status_wins() {
        let envelope = Envelope::new("room:lobby", "phx_reply", Some(json!({"status": "error"})))
            .with_status("ok");
        assert!(envelope.is_ok());
    }

    #[test]
    fn test_reserved_event_names() {
        assert!(PhoenixEvent::Join.matches("phx_join"));
        assert!(PhoenixEvent::Reply.matches("phx_reply"));
        assert!(!PhoenixEvent::Close.matches("phx_error"));
    }
}
