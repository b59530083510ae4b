//! Open-tracking state.
//!
//! The delivery pool registers a pixel token for every accepted message;
//! the tracking handler maps the token back to the recipient on the first
//! pixel hit and records when the message was opened.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-recipient open record.
#[derive(Debug, Clone, Serialize)]
pub struct OpenRecord {
    pub recipient: String,
    pub campaign: String,
    pub sent_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Shared token → recipient map.
#[derive(Clone, Default)]
pub struct TrackingState {
    inner: Arc<RwLock<HashMap<String, OpenRecord>>>,
}

impl TrackingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pixel token at message accept time.
    pub fn register(&self, token: &str, recipient: &str, campaign: &str) {
        let mut inner = self.inner.write().expect("tracking map poisoned");
        inner.insert(
            token.to_string(),
            OpenRecord {
                recipient: recipient.to_string(),
                campaign: campaign.to_string(),
                sent_at: Utc::now(),
                opened_at: None,
            },
        );
    }

    /// Record a pixel hit. Returns the record plus whether this was the
    /// first hit, or `None` for an unrecognized token.
    pub fn mark_opened(&self, token: &str) -> Option<(OpenRecord, bool)> {
        let mut inner = self.inner.write().expect("tracking map poisoned");
        let record = inner.get_mut(token)?;
        let first = record.opened_at.is_none();
        if first {
            record.opened_at = Some(Utc::now());
        }
        Some((record.clone(), first))
    }

    pub fn get(&self, token: &str) -> Option<OpenRecord> {
        let inner = self.inner.read().expect("tracking map poisoned");
        inner.get(token).cloned()
    }
}
