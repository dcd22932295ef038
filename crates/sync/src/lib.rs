/// Fishlog Sync Service
///
/// Real-time change distribution for the fishing-trip activity log
///
/// Features:
/// - Typed change envelopes for trips, trip events and projects
/// - AMQP topic-exchange bridge with automatic reconnection
/// - Best-effort publisher called after every committed write
/// - WebSocket fan-out hub with per-connection failure isolation
/// - Client reconciliation store merging snapshots and pushed changes
/// - Viewer client that resyncs on every reconnect
pub mod broker;
pub mod envelope;
pub mod repository;
pub mod server;
pub mod service;
pub mod store;
pub mod viewer;

// WebSocket module for fan-out
pub mod ws;

pub use broker::{
    BridgeError, BridgeState, BrokerBridge, BrokerPublisher, EnvelopeHandler, EventPublisher,
    PublisherMetrics,
};
pub use envelope::{
    Action, Change, EntityRef, Envelope, EnvelopeError, Publishable, Topic, ViewerFrame,
    RESYNC_FRAME_TYPE,
};
pub use repository::{
    InMemoryRepository, InMemoryTripEventRepository, InMemoryTripRepository, Repository,
    TripEventRepository,
};
pub use server::{configure, start_server, ApiError, AppState};
pub use service::{EntityService, ProjectService, TripEventService, TripService};
pub use store::ReconciliationStore;
pub use viewer::{
    FrameOutcome, HttpSnapshotSource, SnapshotSource, ViewerClient, ViewerError, ViewerSession,
    ViewerState,
};
pub use ws::{
    forward_resyncs, ConnectionHub, ConnectionSink, SessionSettings, SinkError, ViewerSocket,
};

/// Reason carried by the resync frame sent after the broker link comes back
pub const BROKER_RECONNECTED: &str = "broker reconnected";
