//! Campaign event types and the producer handle.
//!
//! Events are immutable notifications of something that happened; they are
//! created by a producer (delivery pool, capture/tracking handlers),
//! enqueued once, and consumed exactly once by the aggregator.

pub mod aggregator;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EmailSent,
    Click,
    Credential,
    BecReply,
    BecTransfer,
}

/// An immutable campaign event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Campaign the event belongs to
    pub campaign: String,

    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Optional producer-supplied context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(campaign: impl Into<String>, kind: EventKind) -> Self {
        Self {
            campaign: campaign.into(),
            kind,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Clonable producer handle for the aggregator's event queue.
///
/// Ownership of an event transfers to the aggregator at `emit` time.
#[derive(Clone)]
pub struct EventSender {
    tx: UnboundedSender<Event>,
}

impl EventSender {
    pub fn new(tx: UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Enqueue an event. A closed channel is logged, not surfaced: the
    /// aggregator only closes after producers are meant to be stopped.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.tx.send(event) {
            warn!(campaign = %e.0.campaign, "event_channel_closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_serialization() {
        let json = serde_json::to_string(&EventKind::BecReply).unwrap();
        assert_eq!(json, "\"bec_reply\"");

        let parsed: EventKind = serde_json::from_str("\"email_sent\"").unwrap();
        assert_eq!(parsed, EventKind::EmailSent);
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new("demo", EventKind::Click)
            .with_payload(serde_json::json!({"url": "https://example.com"}));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"click\""));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.campaign, "demo");
        assert_eq!(parsed.kind, EventKind::Click);
        assert!(parsed.payload.is_some());
    }
}
