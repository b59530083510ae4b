//! Bounded delivery worker pool.
//!
//! Messages are rendered synchronously at submit time, placed on a bounded
//! queue, and dispatched by a fixed-size set of workers with bounded retry
//! and exponential backoff. Shutdown closes the queue and joins every
//! worker, so accepted items are never lost.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::campaign::Target;
use crate::delivery::render::Renderer;
use crate::delivery::transport::Transport;
use crate::delivery::OutboundEmail;
use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventSender};
use crate::tracking::TrackingState;

/// Pool sizing and retry policy. All of it is explicit configuration;
/// nothing is sized implicitly at construction.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Number of concurrent dispatch workers
    pub workers: usize,

    /// Capacity of the submit queue; `submit` waits when it is full
    pub queue_capacity: usize,

    /// Dispatch attempts per message before it is dropped
    pub max_attempts: u32,

    /// Delay before the first retry, doubling each attempt
    pub backoff_base: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 64,
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

pub struct DeliveryPool {
    tx: mpsc::Sender<OutboundEmail>,
    workers: Vec<JoinHandle<()>>,
    renderer: Renderer,
    tracking: TrackingState,
}

impl DeliveryPool {
    /// Start the workers and return the pool handle.
    pub fn start(
        transport: Arc<dyn Transport>,
        events: EventSender,
        tracking: TrackingState,
        renderer: Renderer,
        options: PoolOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..options.workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&transport),
                    events.clone(),
                    options.max_attempts,
                    options.backoff_base,
                ))
            })
            .collect();

        info!(
            workers = options.workers,
            queue_capacity = options.queue_capacity,
            max_attempts = options.max_attempts,
            "delivery_pool_started"
        );

        Self {
            tx,
            workers,
            renderer,
            tracking,
        }
    }

    /// Render a message and enqueue it for dispatch.
    ///
    /// Render failures are returned immediately and never enter the
    /// queue. On acceptance the recipient's pixel token is registered
    /// with the tracking state.
    pub async fn submit(
        &self,
        template_html: &str,
        target: &Target,
        campaign: &str,
        attachments: &[PathBuf],
    ) -> Result<()> {
        let (email, token) = self
            .renderer
            .render(template_html, target, campaign, attachments)?;

        self.tracking.register(&token, &target.email, campaign);

        let recipient = email.recipient.clone();
        self.tx
            .send(email)
            .await
            .map_err(|_| Error::Transport("delivery queue closed".to_string()))?;

        debug!(campaign = campaign, recipient = %recipient, "message_accepted");
        Ok(())
    }

    /// Close the queue, then wait for the workers to finish queued and
    /// in-flight items.
    pub async fn shutdown(self) {
        drop(self.tx);
        for (id, handle) in self.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker = id, error = %e, "delivery_worker_join_failed");
            }
        }
        info!("delivery_pool_drained");
    }
}

/// Worker: pull from the shared queue until it is closed and empty.
async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<Receiver<OutboundEmail>>>,
    transport: Arc<dyn Transport>,
    events: EventSender,
    max_attempts: u32,
    backoff_base: Duration,
) {
    debug!(worker = id, "delivery_worker_started");

    loop {
        let email = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(email) = email else { break };

        dispatch(id, &*transport, &events, email, max_attempts, backoff_base).await;
    }

    debug!(worker = id, "delivery_worker_stopped");
}

/// Dispatch one message with bounded retry and exponential backoff.
///
/// Success emits exactly one `email_sent` event; exhausting the attempts
/// logs the failure and drops the item.
async fn dispatch(
    worker: usize,
    transport: &dyn Transport,
    events: &EventSender,
    email: OutboundEmail,
    max_attempts: u32,
    backoff_base: Duration,
) {
    let mut backoff = backoff_base;

    for attempt in 1..=max_attempts {
        match transport.send(&email).await {
            Ok(()) => {
                info!(
                    worker = worker,
                    campaign = %email.campaign,
                    recipient = %email.recipient,
                    attempt = attempt,
                    "email_dispatched"
                );
                events.emit(Event::new(email.campaign.as_str(), EventKind::EmailSent));
                return;
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    worker = worker,
                    campaign = %email.campaign,
                    recipient = %email.recipient,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "dispatch_retry"
                );
                sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                error!(
                    worker = worker,
                    campaign = %email.campaign,
                    recipient = %email.recipient,
                    attempts = max_attempts,
                    error = %e,
                    "dispatch_failed"
                );
            }
        }
    }
}
