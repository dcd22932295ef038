/// Integration tests for the change pipeline with in-process viewers
///
/// Tests the complete flow: service write → publisher → hub → viewer stores,
/// with the broker hop replaced by a loopback publisher.
use chrono::NaiveDate;
use fishlog_core::models::{FishingTrip, NewFishingTrip, Project, UpdateFishingTrip};
use fishlog_core::BrokerConfig;
use fishlog_sync::{
    BrokerBridge, BrokerPublisher, ConnectionHub, ConnectionSink, Envelope, EventPublisher,
    InMemoryRepository, Repository, SinkError, TripService, ViewerFrame, ViewerState,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// Stands in for the broker round trip: publishes straight into the hub
struct LoopbackPublisher {
    hub: Arc<ConnectionHub>,
}

impl EventPublisher for LoopbackPublisher {
    fn publish(&self, envelope: Envelope) {
        self.hub
            .broadcast(&envelope)
            .expect("envelope serializes");
    }
}

/// A viewer whose socket feeds straight into its state
#[derive(Default)]
struct InProcessViewer {
    state: Mutex<ViewerState>,
    frames: Mutex<Vec<String>>,
    broken: AtomicBool,
    closed: AtomicBool,
}

impl ConnectionSink for InProcessViewer {
    fn send(&self, frame: Arc<str>) -> Result<(), SinkError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }

        self.frames.lock().push(frame.to_string());
        let frame = ViewerFrame::parse(&frame).expect("server frames parse");
        self.state.lock().apply_frame(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn clear_creek() -> NewFishingTrip {
    NewFishingTrip {
        date: NaiveDate::from_ymd_opt(2024, 5, 18).unwrap(),
        location_name: "Clear Creek".to_string(),
        latitude: 39.74,
        longitude: -105.51,
        water_conditions: None,
        weather: None,
        notes: None,
        catch_count: None,
    }
}

fn setup() -> (Arc<ConnectionHub>, TripService) {
    let hub = Arc::new(ConnectionHub::new());
    let publisher = Arc::new(LoopbackPublisher {
        hub: Arc::clone(&hub),
    });
    let service = TripService::new(
        Arc::new(InMemoryRepository::<FishingTrip>::new()),
        publisher,
    );
    (hub, service)
}

fn attach_viewer(hub: &ConnectionHub) -> Arc<InProcessViewer> {
    let viewer = Arc::new(InProcessViewer::default());
    hub.attach(viewer.clone());
    viewer
}

#[tokio::test]
async fn test_created_trip_reaches_other_viewer_without_pull() {
    let (hub, service) = setup();
    let viewer_b = attach_viewer(&hub);

    let trip = service.create(clear_creek()).await.unwrap();

    let frames = viewer_b.frames.lock().clone();
    assert_eq!(frames.len(), 1);
    let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(frame["type"], "fishingTrip.created");
    assert_eq!(frame["data"]["id"], trip.id.as_str());
    assert_eq!(frame["data"]["locationName"], "Clear Creek");

    let state = viewer_b.state.lock();
    assert_eq!(state.trips.get(&trip.id), Some(&trip));
}

#[tokio::test]
async fn test_deleted_trip_clears_selection_on_other_viewer() {
    let (hub, service) = setup();
    let viewer_a = attach_viewer(&hub);
    let viewer_b = attach_viewer(&hub);

    let trip = service.create(clear_creek()).await.unwrap();
    viewer_a
        .state
        .lock()
        .trips
        .set_selected_id(Some(trip.id.clone()));

    // viewer B deletes it
    assert_ok!(service.delete(&trip.id).await);

    let last_frame = viewer_a.frames.lock().last().cloned().unwrap();
    let frame: serde_json::Value = serde_json::from_str(&last_frame).unwrap();
    assert_eq!(
        frame,
        serde_json::json!({ "type": "fishingTrip.deleted", "data": { "id": trip.id } })
    );

    for viewer in [&viewer_a, &viewer_b] {
        let state = viewer.state.lock();
        assert!(!state.trips.contains(&trip.id));
        assert_eq!(state.trips.selected_id(), None);
    }
}

#[tokio::test]
async fn test_updates_converge_on_every_viewer() {
    let (hub, service) = setup();
    let viewers: Vec<_> = (0..5).map(|_| attach_viewer(&hub)).collect();

    let trip = service.create(clear_creek()).await.unwrap();
    let updated = service
        .update(
            &trip.id,
            UpdateFishingTrip {
                notes: Some(Some("high water".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for viewer in &viewers {
        assert_eq!(viewer.state.lock().trips.get(&trip.id), Some(&updated));
    }
}

#[tokio::test]
async fn test_broken_viewer_is_evicted_and_others_keep_receiving() {
    let (hub, service) = setup();
    let healthy = attach_viewer(&hub);
    let broken = attach_viewer(&hub);
    broken.broken.store(true, Ordering::SeqCst);

    let first = service.create(clear_creek()).await.unwrap();
    assert_eq!(hub.connection_count(), 1);
    assert!(broken.closed.load(Ordering::SeqCst));

    let second = service.create(clear_creek()).await.unwrap();

    let state = healthy.state.lock();
    assert!(state.trips.contains(&first.id));
    assert!(state.trips.contains(&second.id));
    assert!(broken.state.lock().trips.is_empty());
}

#[tokio::test]
async fn test_resync_does_not_touch_viewer_state() {
    let (hub, service) = setup();
    let viewer = attach_viewer(&hub);
    service.create(clear_creek()).await.unwrap();
    let before = viewer.state.lock().clone();

    hub.broadcast_resync(fishlog_sync::BROKER_RECONNECTED).unwrap();

    assert_eq!(*viewer.state.lock(), before);
    let frames = viewer.frames.lock();
    assert_eq!(
        ViewerFrame::parse(frames.last().unwrap()).unwrap(),
        ViewerFrame::Resync {
            reason: "broker reconnected".to_string()
        }
    );
}

#[tokio::test]
async fn test_broker_outage_keeps_viewers_and_writes_working() {
    let hub = Arc::new(ConnectionHub::new());
    let viewers: Vec<_> = (0..3).map(|_| attach_viewer(&hub)).collect();

    let bridge = BrokerBridge::new(BrokerConfig {
        // nothing listens on port 1
        url: "amqp://127.0.0.1:1".to_string(),
        connect_timeout: Duration::from_secs(2),
        reconnect_interval: Duration::from_millis(50),
        close_timeout: Duration::from_millis(200),
        ..BrokerConfig::default()
    });
    assert_ok!(bridge.subscribe("project.*", Arc::clone(&hub)).await);
    assert_err!(bridge.connect().await);
    let supervisor = bridge.start().unwrap();

    let (publisher, worker) = BrokerPublisher::spawn(Arc::clone(&bridge), 16);
    let repository = Arc::new(InMemoryRepository::<Project>::new());
    let service = fishlog_sync::ProjectService::new(repository.clone(), publisher.clone());

    let project = service
        .create(
            serde_json::from_value(serde_json::json!({
                "name": "Delta survey",
                "latitude": 38.0,
                "longitude": -121.5
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    // The write landed even though nobody heard about it
    assert_eq!(repository.find_by_id(&project.id).await.unwrap(), Some(project));
    assert_eq!(publisher.metrics().skipped(), 1);

    // A few reconnect attempts go by; no viewer is dropped
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hub.connection_count(), 3);
    for viewer in &viewers {
        assert!(!viewer.closed.load(Ordering::SeqCst));
    }

    bridge.close().await;
    assert_ok!(supervisor.await);

    drop(service);
    drop(publisher);
    assert_ok!(tokio::time::timeout(Duration::from_secs(1), worker).await);
}
