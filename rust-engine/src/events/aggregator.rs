//! Event aggregator - the single consumer that owns campaign stats.
//!
//! One consumer task per process pulls events off an in-process queue and
//! folds them into campaign records through the store. Running exactly one
//! consumer guarantees at most one concurrent stat mutation per campaign
//! without cross-process locks; sharding by campaign name is the scaling
//! path if multiple instances are ever needed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::campaign::store::CampaignStore;
use crate::error::Error;
use crate::events::{Event, EventSender};

/// Handle to the running aggregator task.
pub struct Aggregator {
    tx: UnboundedSender<Event>,
    handle: JoinHandle<()>,
    dropped: Arc<AtomicU64>,
}

impl Aggregator {
    /// Spawn the consumer task.
    pub fn start(store: Arc<CampaignStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(consume(store, rx, Arc::clone(&dropped)));

        Self {
            tx,
            handle,
            dropped,
        }
    }

    /// Producer handle for this aggregator's queue.
    pub fn sender(&self) -> EventSender {
        EventSender::new(self.tx.clone())
    }

    /// Events dropped because their campaign was unknown.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain outstanding events, then stop.
    ///
    /// The consumer exits once the queue is empty and every producer
    /// handle has been dropped, so stop producers (e.g. shut the delivery
    /// pool down) before awaiting this.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!(error = %e, "aggregator_join_failed");
        }
        info!("aggregator_shutdown_complete");
    }
}

/// Consumer loop: block on the queue, apply each event, exit after the
/// channel is closed and drained.
async fn consume(store: Arc<CampaignStore>, mut rx: UnboundedReceiver<Event>, dropped: Arc<AtomicU64>) {
    info!("aggregator_started");

    while let Some(event) = rx.recv().await {
        apply_event(&store, event, &dropped).await;
    }

    info!("aggregator_drained");
}

/// Fold one event into its campaign's stats and persist.
///
/// Events for unknown campaigns are dropped: producers may race with an
/// administrative campaign deletion. Drops are counted rather than silent.
async fn apply_event(store: &CampaignStore, event: Event, dropped: &AtomicU64) {
    let kind = event.kind;
    let result = store
        .update(&event.campaign, |campaign| {
            let campaign_type = campaign.campaign_type;
            campaign.stats.record(kind);
            campaign.stats.recompute(campaign_type);
            campaign.stats.last_activity = Some(Utc::now());
        })
        .await;

    match result {
        Ok(campaign) => {
            debug!(
                campaign = %campaign.name,
                kind = ?kind,
                success_rate = campaign.stats.success_rate,
                "event_applied"
            );
        }
        Err(Error::CampaignNotFound(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            debug!(campaign = %event.campaign, kind = ?kind, "event_dropped_unknown_campaign");
        }
        Err(e) => {
            error!(campaign = %event.campaign, kind = ?kind, error = %e, "event_apply_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{CampaignType, Settings};
    use crate::events::EventKind;

    async fn store_with(name: &str, campaign_type: CampaignType) -> (tempfile::TempDir, Arc<CampaignStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CampaignStore::new(dir.path().join("campaigns")).await.unwrap());
        store
            .create(name, campaign_type, Settings::default())
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_counts_are_exact_after_drain() {
        let (_dir, store) = store_with("demo", CampaignType::Phishing).await;
        let aggregator = Aggregator::start(Arc::clone(&store));
        let sender = aggregator.sender();

        // Interleave every kind from two producer clones.
        let other = sender.clone();
        for i in 0..10 {
            let s = if i % 2 == 0 { &sender } else { &other };
            s.emit(Event::new("demo", EventKind::EmailSent));
            s.emit(Event::new("demo", EventKind::Click));
            s.emit(Event::new("demo", EventKind::Credential));
            s.emit(Event::new("demo", EventKind::BecReply));
            s.emit(Event::new("demo", EventKind::BecTransfer));
        }

        drop(sender);
        drop(other);
        aggregator.shutdown().await;

        let campaign = store.get("demo").await.unwrap();
        assert_eq!(campaign.stats.emails_sent, 10);
        assert_eq!(campaign.stats.clicks, 10);
        assert_eq!(campaign.stats.credentials_captured, 10);
        assert_eq!(campaign.stats.bec_replies, 10);
        assert_eq!(campaign.stats.bec_transfers, 10);
        assert_eq!(campaign.stats.success_rate, 1.0);
        assert!(campaign.stats.last_activity.is_some());
    }

    #[tokio::test]
    async fn test_bec_success_rate_scenario() {
        // 5 sends, 2 replies, 1 transfer: success_rate == 0.5.
        let (_dir, store) = store_with("wire", CampaignType::Bec).await;
        let aggregator = Aggregator::start(Arc::clone(&store));
        let sender = aggregator.sender();

        for _ in 0..5 {
            sender.emit(Event::new("wire", EventKind::EmailSent));
        }
        for _ in 0..2 {
            sender.emit(Event::new("wire", EventKind::BecReply));
        }
        sender.emit(Event::new("wire", EventKind::BecTransfer));

        drop(sender);
        aggregator.shutdown().await;

        let campaign = store.get("wire").await.unwrap();
        assert_eq!(campaign.stats.emails_sent, 5);
        assert_eq!(campaign.stats.bec_replies, 2);
        assert_eq!(campaign.stats.bec_transfers, 1);
        assert_eq!(campaign.stats.success_rate, 0.5);
    }

    #[tokio::test]
    async fn test_unknown_campaign_events_are_counted_not_applied() {
        let (_dir, store) = store_with("known", CampaignType::Phishing).await;
        let aggregator = Aggregator::start(Arc::clone(&store));
        let sender = aggregator.sender();

        sender.emit(Event::new("known", EventKind::EmailSent));
        sender.emit(Event::new("ghost", EventKind::EmailSent));
        sender.emit(Event::new("ghost", EventKind::Click));

        drop(sender);
        // Keep the handle around to read the counter after the drain.
        let dropped = Arc::clone(&aggregator.dropped);
        aggregator.shutdown().await;

        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        let campaign = store.get("known").await.unwrap();
        assert_eq!(campaign.stats.emails_sent, 1);
    }
}
