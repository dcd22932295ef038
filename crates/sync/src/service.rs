/// Write path for trips, trip events and projects
///
/// Every mutation is validated, committed through the repository, and only
/// then announced to viewers through the [`EventPublisher`]. Publishing is
/// fire-and-forget; its outcome never changes the result returned here.
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

use crate::broker::EventPublisher;
use crate::envelope::{Change, EntityRef, Publishable};
use crate::repository::{Repository, TripEventRepository};
use fishlog_core::models::{EventCounts, FishingTrip, Project, TripEvent};
use fishlog_core::{FishlogError, ValidateInput};

/// CRUD service for one entity kind
pub struct EntityService<E, R = dyn Repository<E>>
where
    E: Publishable,
    R: Repository<E> + ?Sized,
{
    repository: Arc<R>,
    publisher: Arc<dyn EventPublisher>,
    _entity: PhantomData<fn() -> E>,
}

pub type TripService = EntityService<FishingTrip>;
pub type TripEventService = EntityService<TripEvent, dyn TripEventRepository>;
pub type ProjectService = EntityService<Project>;

impl<E, R> EntityService<E, R>
where
    E: Publishable,
    R: Repository<E> + ?Sized,
{
    pub fn new(repository: Arc<R>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            repository,
            publisher,
            _entity: PhantomData,
        }
    }

    fn not_found(id: &str) -> FishlogError {
        FishlogError::not_found(E::KIND.label(), id)
    }

    fn announce(&self, change: Change<E>) {
        debug!(
            kind = %E::KIND,
            action = change.action().as_str(),
            entity_id = %change.id(),
            "Publishing change"
        );
        self.publisher.publish(E::into_envelope(change));
    }

    /// All entities in display order
    pub async fn list(&self) -> Result<Vec<E>, FishlogError> {
        self.repository.find_all().await
    }

    pub async fn get(&self, id: &str) -> Result<E, FishlogError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| Self::not_found(id))
    }

    pub async fn create(&self, draft: E::Draft) -> Result<E, FishlogError> {
        draft.validate_input()?;

        let entity = self.repository.create(draft).await?;
        info!(kind = %E::KIND, entity_id = %entity.id(), "Created entity");

        self.announce(Change::Created(entity.clone()));
        Ok(entity)
    }

    pub async fn update(&self, id: &str, patch: E::Patch) -> Result<E, FishlogError> {
        patch.validate_input()?;

        let entity = self
            .repository
            .update(id, patch)
            .await?
            .ok_or_else(|| Self::not_found(id))?;
        info!(kind = %E::KIND, entity_id = %entity.id(), "Updated entity");

        self.announce(Change::Updated(entity.clone()));
        Ok(entity)
    }

    pub async fn delete(&self, id: &str) -> Result<(), FishlogError> {
        if !self.repository.delete(id).await? {
            return Err(Self::not_found(id));
        }
        info!(kind = %E::KIND, entity_id = %id, "Deleted entity");

        self.announce(Change::Deleted(EntityRef::new(id)));
        Ok(())
    }
}

impl EntityService<TripEvent, dyn TripEventRepository> {
    /// Events recorded on one trip, oldest first
    pub async fn list_by_trip(&self, trip_id: &str) -> Result<Vec<TripEvent>, FishlogError> {
        self.repository.list_by_trip(trip_id).await
    }

    pub async fn count_by_trip(&self, trip_id: &str) -> Result<EventCounts, FishlogError> {
        self.repository.count_by_trip(trip_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Action, Envelope};
    use crate::repository::{InMemoryRepository, InMemoryTripRepository};
    use chrono::{NaiveDate, TimeZone, Utc};
    use fishlog_core::models::{
        EventType, NewFishingTrip, NewTripEvent, UpdateFishingTrip,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Envelope>>,
    }

    impl RecordingPublisher {
        fn topics(&self) -> Vec<String> {
            self.published
                .lock()
                .iter()
                .map(|e| e.topic().to_string())
                .collect()
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, envelope: Envelope) {
            self.published.lock().push(envelope);
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
            catch_count: Some(0),
        }
    }

    fn trip_service() -> (TripService, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let service = TripService::new(
            Arc::new(InMemoryRepository::<FishingTrip>::new()),
            publisher.clone(),
        );
        (service, publisher)
    }

    #[tokio::test]
    async fn test_create_publishes_once_after_write() {
        let (service, publisher) = trip_service();

        let trip = service.create(clear_creek()).await.unwrap();

        assert_eq!(service.get(&trip.id).await.unwrap(), trip);
        let published = publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].action(), Action::Created);
        assert_eq!(published[0].entity_id(), trip.id);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_and_not_published() {
        let (service, publisher) = trip_service();

        let mut draft = clear_creek();
        draft.latitude = 120.0;

        let err = service.create(draft).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(publisher.published.lock().is_empty());
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (service, publisher) = trip_service();
        let trip = service.create(clear_creek()).await.unwrap();

        let updated = service
            .update(
                &trip.id,
                UpdateFishingTrip {
                    catch_count: Some(Some(3)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.catch_count, Some(3));

        service.delete(&trip.id).await.unwrap();
        assert!(service.get(&trip.id).await.unwrap_err().is_not_found());

        assert_eq!(
            publisher.topics(),
            vec![
                "fishingTrip.created",
                "fishingTrip.updated",
                "fishingTrip.deleted"
            ]
        );
        match &publisher.published.lock()[2] {
            Envelope::FishingTrip(Change::Deleted(entity_ref)) => assert_eq!(entity_ref.id, trip.id),
            other => panic!("unexpected envelope: {other:?}"),
        };
    }

    #[tokio::test]
    async fn test_missing_id_is_not_found_and_not_published() {
        let (service, publisher) = trip_service();

        let err = service
            .update("missing", UpdateFishingTrip::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Fishing trip not found: missing");

        assert!(service.delete("missing").await.unwrap_err().is_not_found());
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_trip_event_queries() {
        let publisher = Arc::new(RecordingPublisher::default());
        let trips = InMemoryTripRepository::new();
        let trip = trips.create(clear_creek()).await.unwrap();
        let repository: Arc<dyn TripEventRepository> = Arc::new(trips.events());
        let service = TripEventService::new(repository, publisher.clone());

        for (minute, event_type) in [(5, EventType::Catch), (1, EventType::Miss), (3, EventType::Catch)] {
            service
                .create(NewTripEvent {
                    trip_id: trip.id.clone(),
                    event_type,
                    species: None,
                    latitude: 39.74,
                    longitude: -105.51,
                    timestamp: Utc.with_ymd_and_hms(2024, 5, 18, 6, minute, 0).unwrap(),
                    notes: None,
                })
                .await
                .unwrap();
        }

        let events = service.list_by_trip(&trip.id).await.unwrap();
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::Miss, EventType::Catch, EventType::Catch]);

        let counts = service.count_by_trip(&trip.id).await.unwrap();
        assert_eq!(counts.catches, 2);
        assert_eq!(counts.misses, 1);
        assert_eq!(counts.hooked, 0);

        assert!(service.list_by_trip("t2").await.unwrap().is_empty());
        assert_eq!(publisher.published.lock().len(), 3);
    }
}
