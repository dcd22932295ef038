/// Change notification publisher
///
/// Called by the write path after a mutation has been committed. Publishing
/// is best effort: the call never blocks on broker I/O and never reports an
/// error to the caller. When the broker is unavailable the notification is
/// logged and dropped; viewers recover through a snapshot re-pull once the
/// bridge reconnects.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::bridge::{BridgeError, BrokerBridge};
use crate::envelope::Envelope;

/// Trait for publishing change notifications
pub trait EventPublisher: Send + Sync {
    /// Hand `envelope` off for delivery; returns without waiting on the broker
    fn publish(&self, envelope: Envelope);
}

/// Publisher counters
#[derive(Debug, Default)]
pub struct PublisherMetrics {
    published: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl PublisherMetrics {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Dropped because the broker was unavailable or the buffer was full
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Publishes through the [`BrokerBridge`] from a single background worker
///
/// One worker keeps notifications in the order they were handed over.
pub struct BrokerPublisher {
    bridge: Arc<BrokerBridge>,
    tx: mpsc::Sender<Envelope>,
    metrics: Arc<PublisherMetrics>,
}

impl BrokerPublisher {
    /// Create the publisher and spawn its worker
    ///
    /// The worker exits once every clone of the publisher has been dropped
    /// and the buffer is drained.
    pub fn spawn(bridge: Arc<BrokerBridge>, buffer: usize) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer);
        let metrics = Arc::new(PublisherMetrics::default());

        let worker = tokio::spawn(Self::worker(
            Arc::clone(&bridge),
            rx,
            Arc::clone(&metrics),
        ));

        let publisher = Arc::new(Self {
            bridge,
            tx,
            metrics,
        });

        (publisher, worker)
    }

    pub fn metrics(&self) -> &PublisherMetrics {
        &self.metrics
    }

    async fn worker(
        bridge: Arc<BrokerBridge>,
        mut rx: mpsc::Receiver<Envelope>,
        metrics: Arc<PublisherMetrics>,
    ) {
        while let Some(envelope) = rx.recv().await {
            match bridge.publish_envelope(&envelope).await {
                Ok(()) => {
                    metrics.published.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        topic = %envelope.topic(),
                        entity_id = %envelope.entity_id(),
                        "Published change notification"
                    );
                }
                Err(BridgeError::NotConnected) => {
                    metrics.skipped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = %envelope.topic(),
                        entity_id = %envelope.entity_id(),
                        "Broker disconnected before publish, change notification dropped"
                    );
                }
                Err(e) => {
                    metrics.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        error = %e,
                        topic = %envelope.topic(),
                        entity_id = %envelope.entity_id(),
                        "Failed to publish change notification"
                    );
                }
            }
        }

        debug!("Publisher worker stopped");
    }

    fn skip(&self, envelope: &Envelope, reason: &'static str) {
        self.metrics.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(
            topic = %envelope.topic(),
            entity_id = %envelope.entity_id(),
            reason,
            "Change notification dropped"
        );
    }
}

impl EventPublisher for BrokerPublisher {
    fn publish(&self, envelope: Envelope) {
        if !self.bridge.is_connected() {
            self.skip(&envelope, "broker not connected");
            return;
        }

        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => self.skip(&envelope, "publish buffer full"),
            Err(TrySendError::Closed(envelope)) => self.skip(&envelope, "publisher stopped"),
        }
    }
}
