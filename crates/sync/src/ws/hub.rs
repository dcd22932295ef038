/// Connection hub for fanning change notifications out to live viewers
///
/// Tracks every attached viewer connection and delivers each broadcast to all
/// of them. A connection that cannot take a frame is detached and asked to
/// close; the others are unaffected.
use dashmap::DashMap;
use fishlog_core::ShutdownHandle;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::broker::EnvelopeHandler;
use crate::envelope::{Envelope, EnvelopeError, ViewerFrame};
use crate::BROKER_RECONNECTED;

/// Unique identifier for an attached viewer connection
pub type ConnectionId = Uuid;

/// Per-connection send failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("connection buffer is full")]
    Full,

    #[error("connection is closed")]
    Closed,
}

/// Outbound side of one viewer connection
///
/// `send` must not block: it either queues the frame or fails.
pub trait ConnectionSink: Send + Sync {
    fn send(&self, frame: Arc<str>) -> Result<(), SinkError>;

    /// Ask the connection to shut down after it has been detached
    fn close(&self) {}
}

/// Broadcast errors
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] EnvelopeError),
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Default)]
struct HubMetrics {
    frames_sent: parking_lot::RwLock<u64>,
    evictions: parking_lot::RwLock<u64>,
}

/// Registry of live viewer connections
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Arc<dyn ConnectionSink>>,
    metrics: HubMetrics,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            metrics: HubMetrics::default(),
        }
    }

    /// Register a connection; safe to call while broadcasts are running
    pub fn attach(&self, sink: Arc<dyn ConnectionSink>) -> ConnectionId {
        let conn_id = Uuid::new_v4();
        self.connections.insert(conn_id, sink);

        tracing::info!(
            conn_id = %conn_id,
            connections = self.connections.len(),
            "Viewer connection attached"
        );

        conn_id
    }

    /// Remove a connection; unknown or already detached ids are ignored
    pub fn detach(&self, conn_id: ConnectionId) -> bool {
        let removed = self.connections.remove(&conn_id).is_some();

        if removed {
            tracing::info!(
                conn_id = %conn_id,
                connections = self.connections.len(),
                "Viewer connection detached"
            );
        }

        removed
    }

    /// Detach a connection and ask it to close; the viewer will reconnect and resync
    pub fn evict(&self, conn_id: ConnectionId) -> bool {
        let Some((_, sink)) = self.connections.remove(&conn_id) else {
            return false;
        };

        *self.metrics.evictions.write() += 1;
        tracing::warn!(conn_id = %conn_id, "Evicting viewer connection");
        sink.close();
        true
    }

    /// Ids of every attached connection
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Serialize `envelope` once and send it to every attached connection
    pub fn broadcast(&self, envelope: &Envelope) -> Result<BroadcastReport, BroadcastError> {
        let frame: Arc<str> = Arc::from(envelope.to_frame()?);
        let report = self.broadcast_frame(frame);

        tracing::debug!(
            topic = %envelope.topic(),
            entity_id = %envelope.entity_id(),
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast change"
        );

        Ok(report)
    }

    /// Tell every viewer to re-pull its snapshot
    pub fn broadcast_resync(&self, reason: &str) -> Result<BroadcastReport, BroadcastError> {
        let frame: Arc<str> = Arc::from(ViewerFrame::resync_frame(reason)?);
        let report = self.broadcast_frame(frame);

        tracing::info!(
            reason = %reason,
            delivered = report.delivered,
            "Broadcast resync request"
        );

        Ok(report)
    }

    /// Send an already serialized frame to every attached connection
    pub fn broadcast_frame(&self, frame: Arc<str>) -> BroadcastReport {
        // Snapshot so no map shard is locked while sinks run
        let targets: Vec<(ConnectionId, Arc<dyn ConnectionSink>)> = self
            .connections
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for (conn_id, sink) in targets {
            match sink.send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => failed.push((conn_id, sink, e)),
            }
        }

        for (conn_id, sink, error) in failed {
            if self.connections.remove(&conn_id).is_some() {
                report.evicted += 1;
                tracing::warn!(
                    conn_id = %conn_id,
                    error = %error,
                    "Evicting viewer connection after failed send"
                );
            }
            sink.close();
        }

        *self.metrics.frames_sent.write() += report.delivered as u64;
        *self.metrics.evictions.write() += report.evicted as u64;

        report
    }

    /// Get number of attached connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Total frames handed to connections
    pub fn frames_sent(&self) -> u64 {
        *self.metrics.frames_sent.read()
    }

    /// Total connections evicted after a failed send
    pub fn evictions(&self) -> u64 {
        *self.metrics.evictions.read()
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker subscriptions deliver straight into the hub
#[async_trait::async_trait]
impl EnvelopeHandler for ConnectionHub {
    async fn handle(&self, envelope: Envelope) {
        if let Err(e) = self.broadcast(&envelope) {
            tracing::warn!(
                error = %e,
                topic = %envelope.topic(),
                "Failed to broadcast change notification"
            );
        }
    }
}

/// Ask viewers to re-pull after every broker reconnect
///
/// Notifications published while the link was down were dropped, so each
/// generation received from `reconnected` becomes one resync frame. Runs until
/// shutdown or until the bridge goes away.
pub async fn forward_resyncs(
    mut reconnected: broadcast::Receiver<u64>,
    hub: Arc<ConnectionHub>,
    mut shutdown: ShutdownHandle,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            received = reconnected.recv() => received,
        };

        match received {
            Ok(generation) => {
                tracing::info!(generation, "Broker link restored, requesting viewer resync");
                if let Err(e) = hub.broadcast_resync(BROKER_RECONNECTED) {
                    tracing::warn!(error = %e, "Failed to broadcast resync request");
                }
            }
            // the newest generations are still buffered and resync on the next recv
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Skipped reconnect notifications");
            }
            Err(RecvError::Closed) => break,
        }
    }

    tracing::debug!("Resync forwarder stopped");
}
