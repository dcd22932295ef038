//! Viewer side of the pipeline
//!
//! [`ViewerState`] keeps one [`ReconciliationStore`] per entity kind. A
//! [`ViewerSession`] feeds it: full snapshots pulled from a [`SnapshotSource`]
//! whenever the socket (re)connects or the server asks for a resync, and
//! change frames in between. [`ViewerClient`] drives a session over a
//! WebSocket and reconnects until cancelled.
//!
//! While disconnected a viewer keeps its last snapshot; nothing is cleared.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::envelope::{Action, Envelope, EnvelopeError, Publishable, ViewerFrame};
use crate::store::ReconciliationStore;
use fishlog_core::models::{FishingTrip, Project, TripEvent};

/// Delay between WebSocket reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid frame: {0}")]
    Frame(#[from] EnvelopeError),
}

/// Entity kinds a viewer keeps a store for
pub trait Viewed: Publishable {
    fn store(state: &ViewerState) -> &ReconciliationStore<Self>;

    fn store_mut(state: &mut ViewerState) -> &mut ReconciliationStore<Self>;
}

impl Viewed for FishingTrip {
    fn store(state: &ViewerState) -> &ReconciliationStore<Self> {
        &state.trips
    }

    fn store_mut(state: &mut ViewerState) -> &mut ReconciliationStore<Self> {
        &mut state.trips
    }
}

impl Viewed for TripEvent {
    fn store(state: &ViewerState) -> &ReconciliationStore<Self> {
        &state.events
    }

    fn store_mut(state: &mut ViewerState) -> &mut ReconciliationStore<Self> {
        &mut state.events
    }
}

impl Viewed for Project {
    fn store(state: &ViewerState) -> &ReconciliationStore<Self> {
        &state.projects
    }

    fn store_mut(state: &mut ViewerState) -> &mut ReconciliationStore<Self> {
        &mut state.projects
    }
}

/// Result of applying one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Applied,
    /// The server may have missed changes; pull a fresh snapshot
    ResyncRequested,
}

/// Everything one viewer currently knows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewerState {
    pub trips: ReconciliationStore<FishingTrip>,
    /// Events of the selected trip, plus any pushed since
    pub events: ReconciliationStore<TripEvent>,
    pub projects: ReconciliationStore<Project>,
}

impl ViewerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store<E: Viewed>(&self) -> &ReconciliationStore<E> {
        E::store(self)
    }

    pub fn store_mut<E: Viewed>(&mut self) -> &mut ReconciliationStore<E> {
        E::store_mut(self)
    }

    pub fn apply_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::FishingTrip(change) => {
                let trip_id = change.id().to_string();
                let deleted = change.action() == Action::Deleted;
                self.trips.apply(change);

                // The server drops a trip's events with it without announcing them
                if deleted {
                    self.remove_trip_events(&trip_id);
                }
            }
            Envelope::TripEvent(change) => self.events.apply(change),
            Envelope::Project(change) => self.projects.apply(change),
        }
    }

    pub fn apply_frame(&mut self, frame: ViewerFrame) -> FrameOutcome {
        match frame {
            ViewerFrame::Change(envelope) => {
                self.apply_envelope(envelope);
                FrameOutcome::Applied
            }
            ViewerFrame::Resync { reason } => {
                info!(reason = %reason, "Server requested resync");
                FrameOutcome::ResyncRequested
            }
        }
    }

    /// Events of one trip in display order
    pub fn events_for_trip(&self, trip_id: &str) -> Vec<&TripEvent> {
        self.events
            .sorted()
            .into_iter()
            .filter(|event| event.trip_id == trip_id)
            .collect()
    }

    fn remove_trip_events(&mut self, trip_id: &str) {
        let orphaned: Vec<String> = self
            .events
            .items()
            .values()
            .filter(|event| event.trip_id == trip_id)
            .map(|event| event.id.clone())
            .collect();

        for id in orphaned {
            self.events.remove(&id);
        }
    }
}

/// Pull side of the data service
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_trips(&self) -> Result<Vec<FishingTrip>, ViewerError>;

    async fn fetch_trip_events(&self, trip_id: &str) -> Result<Vec<TripEvent>, ViewerError>;

    async fn fetch_projects(&self) -> Result<Vec<Project>, ViewerError>;
}

/// Transport-agnostic viewer: owns the state and knows when to re-pull
pub struct ViewerSession {
    source: Arc<dyn SnapshotSource>,
    state: RwLock<ViewerState>,
}

impl ViewerSession {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            source,
            state: RwLock::new(ViewerState::new()),
        }
    }

    /// Read the current state; do not hold across an await
    pub fn state(&self) -> RwLockReadGuard<'_, ViewerState> {
        self.state.read()
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, ViewerState> {
        self.state.write()
    }

    /// Pull a full snapshot of every store
    pub async fn refresh(&self) {
        self.load(self.source.fetch_trips()).await;
        self.load(self.source.fetch_projects()).await;
        self.refresh_events().await;
    }

    /// Select a trip and pull its events
    pub async fn select_trip(&self, trip_id: Option<String>) {
        self.state.write().trips.set_selected_id(trip_id);
        self.refresh_events().await;
    }

    async fn refresh_events(&self) {
        let selected = self.state.read().trips.selected_id().map(str::to_string);

        match selected {
            Some(trip_id) => self.load(self.source.fetch_trip_events(&trip_id)).await,
            None => {
                self.state.write().events.set_items(Vec::new());
            }
        }
    }

    async fn load<E, F>(&self, fetch: F)
    where
        E: Viewed,
        F: Future<Output = Result<Vec<E>, ViewerError>>,
    {
        E::store_mut(&mut self.state.write()).set_loading(true);

        let result = fetch.await;

        let mut state = self.state.write();
        let store = E::store_mut(&mut state);
        match result {
            Ok(items) => {
                debug!(kind = %E::KIND, count = items.len(), "Loaded snapshot");
                store.set_items(items);
                store.set_error(None);
            }
            Err(e) => {
                warn!(kind = %E::KIND, error = %e, "Snapshot pull failed, keeping last snapshot");
                store.set_error(Some(e.to_string()));
            }
        }
        store.set_loading(false);
    }

    /// Apply one socket message, re-pulling if the server asked for it
    pub async fn handle_text(&self, text: &str) {
        let frame = match ViewerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable frame");
                return;
            }
        };

        let outcome = self.state.write().apply_frame(frame);
        if outcome == FrameOutcome::ResyncRequested {
            self.refresh().await;
        }
    }
}

/// Keeps a [`ViewerSession`] connected to the server's `/ws` endpoint
pub struct ViewerClient {
    ws_url: Url,
    session: Arc<ViewerSession>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
}

impl ViewerClient {
    pub fn new(ws_url: Url, session: Arc<ViewerSession>) -> Self {
        Self {
            ws_url,
            session,
            reconnect_delay: RECONNECT_DELAY,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn session(&self) -> &Arc<ViewerSession> {
        &self.session
    }

    /// Cancelling the token stops [`ViewerClient::run`]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Connect, resync and follow changes; reconnects after every drop
    pub async fn run(&self) {
        while !self.cancel.is_cancelled() {
            match self.run_connection().await {
                Ok(()) => debug!(url = %self.ws_url, "Viewer socket closed"),
                Err(e) => warn!(url = %self.ws_url, error = %e, "Viewer socket failed"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {
                    info!(url = %self.ws_url, "Reconnecting viewer socket");
                }
            }
        }
    }

    async fn run_connection(&self) -> Result<(), ViewerError> {
        let (socket, _) = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            result = connect_async(self.ws_url.as_str()) => result?,
        };
        info!(url = %self.ws_url, "Viewer socket connected");

        // Frames arriving meanwhile wait in the socket and land on top of the snapshot
        self.session.refresh().await;

        let (mut sink, mut stream) = socket.split();
        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => self.session.handle_text(&text).await,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Server closed viewer socket");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`SnapshotSource`] backed by the HTTP API
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSnapshotSource {
    /// `base_url` is the API root, e.g. `http://localhost:4001/api/v1`
    pub fn new(base_url: &str) -> Result<Self, ViewerError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ViewerError> {
        let url = self.base_url.join(path)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(ViewerError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_trips(&self) -> Result<Vec<FishingTrip>, ViewerError> {
        self.get_json("trips").await
    }

    async fn fetch_trip_events(&self, trip_id: &str) -> Result<Vec<TripEvent>, ViewerError> {
        self.get_json(&format!("trips/{}/events", trip_id)).await
    }

    async fn fetch_projects(&self) -> Result<Vec<Project>, ViewerError> {
        self.get_json("projects").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Change, EntityRef};
    use chrono::{NaiveDate, TimeZone, Utc};
    use fishlog_core::models::EventType;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn trip(id: &str, location: &str) -> FishingTrip {
        let now = Utc.with_ymd_and_hms(2024, 5, 18, 6, 0, 0).unwrap();
        FishingTrip {
            id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 18).unwrap(),
            location_name: location.to_string(),
            latitude: 39.74,
            longitude: -105.51,
            water_conditions: None,
            weather: None,
            notes: None,
            catch_count: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn event(id: &str, trip_id: &str) -> TripEvent {
        let now = Utc.with_ymd_and_hms(2024, 5, 18, 6, 30, 0).unwrap();
        TripEvent {
            id: id.to_string(),
            trip_id: trip_id.to_string(),
            event_type: EventType::Catch,
            species: Some("Brown trout".to_string()),
            latitude: 39.74,
            longitude: -105.51,
            timestamp: now,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[derive(Default)]
    struct FakeSource {
        trips: Mutex<Vec<FishingTrip>>,
        events: Mutex<Vec<TripEvent>>,
        failing: AtomicBool,
        pulls: AtomicUsize,
    }

    impl FakeSource {
        fn check(&self) -> Result<(), ViewerError> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(ViewerError::Status {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SnapshotSource for FakeSource {
        async fn fetch_trips(&self) -> Result<Vec<FishingTrip>, ViewerError> {
            self.check()?;
            Ok(self.trips.lock().clone())
        }

        async fn fetch_trip_events(&self, trip_id: &str) -> Result<Vec<TripEvent>, ViewerError> {
            self.check()?;
            Ok(self
                .events
                .lock()
                .iter()
                .filter(|e| e.trip_id == trip_id)
                .cloned()
                .collect())
        }

        async fn fetch_projects(&self) -> Result<Vec<Project>, ViewerError> {
            self.check()?;
            Ok(Vec::new())
        }
    }

    fn session_with(trips: Vec<FishingTrip>) -> (ViewerSession, Arc<FakeSource>) {
        let source = Arc::new(FakeSource::default());
        *source.trips.lock() = trips;
        (ViewerSession::new(source.clone()), source)
    }

    #[tokio::test]
    async fn test_refresh_loads_snapshot() {
        let (session, _) = session_with(vec![trip("t1", "Clear Creek"), trip("t2", "Bear Lake")]);

        session.refresh().await;

        let state = session.state();
        assert_eq!(state.trips.len(), 2);
        assert!(!state.trips.is_loading());
        assert_eq!(state.trips.error(), None);
        assert!(state.events.is_empty());
    }

    #[tokio::test]
    async fn test_failed_pull_keeps_last_snapshot() {
        let (session, source) = session_with(vec![trip("t1", "Clear Creek")]);
        session.refresh().await;

        source.failing.store(true, Ordering::SeqCst);
        session.refresh().await;

        let state = session.state();
        assert!(state.trips.contains("t1"));
        assert!(state.trips.error().is_some());
        assert!(!state.trips.is_loading());
    }

    #[tokio::test]
    async fn test_push_frame_applies_without_pull() {
        let (session, source) = session_with(Vec::new());
        let frame = Envelope::FishingTrip(Change::Created(trip("t1", "Clear Creek")))
            .to_frame()
            .unwrap();

        session.handle_text(&frame).await;

        assert!(session.state().trips.contains("t1"));
        assert_eq!(source.pulls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resync_frame_pulls_snapshot() {
        let (session, source) = session_with(vec![trip("t1", "Clear Creek")]);

        let frame = ViewerFrame::resync_frame("broker reconnected").unwrap();
        session.handle_text(&frame).await;

        assert!(session.state().trips.contains("t1"));
        assert!(source.pulls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_garbage_frame_is_ignored() {
        let (session, _) = session_with(Vec::new());
        session.handle_text("not json").await;
        session.handle_text(r#"{"type":"boat.sunk","data":{}}"#).await;
        assert_eq!(*session.state(), ViewerState::new());
    }

    #[tokio::test]
    async fn test_select_trip_pulls_its_events() {
        let (session, source) = session_with(vec![trip("t1", "Clear Creek")]);
        *source.events.lock() = vec![event("e1", "t1"), event("e2", "t2")];

        session.select_trip(Some("t1".to_string())).await;

        let state = session.state();
        assert_eq!(state.trips.selected_id(), Some("t1"));
        assert_eq!(state.events.len(), 1);
        assert!(state.events.contains("e1"));
    }

    #[test]
    fn test_trip_delete_clears_selection_and_events() {
        let mut state = ViewerState::new();
        state.trips.set_items(vec![trip("t1", "Clear Creek")]);
        state.trips.set_selected_id(Some("t1".to_string()));
        state.events.set_items(vec![event("e1", "t1"), event("e2", "t2")]);

        state.apply_envelope(Envelope::FishingTrip(Change::Deleted(EntityRef::new("t1"))));

        assert!(!state.trips.contains("t1"));
        assert_eq!(state.trips.selected_id(), None);
        assert!(!state.events.contains("e1"));
        assert!(state.events.contains("e2"));
        assert_eq!(state.events_for_trip("t2").len(), 1);
    }

    #[test]
    fn test_http_source_normalizes_base_url() {
        let source = HttpSnapshotSource::new("http://localhost:4001/api/v1").unwrap();
        assert_eq!(
            source.base_url.join("trips").unwrap().as_str(),
            "http://localhost:4001/api/v1/trips"
        );

        assert!(matches!(
            HttpSnapshotSource::new("not a url"),
            Err(ViewerError::InvalidUrl(_))
        ));
    }
}
