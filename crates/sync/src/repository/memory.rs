//! In-process repositories
//!
//! Used when no database is configured, and by tests. Trips and their events
//! share tables through [`InMemoryTripRepository`] so that a trip delete
//! cascades and an event can only reference a stored trip.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Repository, TripEventRepository};
use fishlog_core::models::{Entity, EventCounts, FishingTrip, NewTripEvent, TripEvent};
use fishlog_core::FishlogError;

pub struct InMemoryRepository<E: Entity> {
    items: RwLock<HashMap<String, E>>,
}

impl<E: Entity> InMemoryRepository<E> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Seed with existing entities, keyed by their ids
    pub fn with_items(items: impl IntoIterator<Item = E>) -> Self {
        Self {
            items: RwLock::new(
                items
                    .into_iter()
                    .map(|item| (item.id().to_string(), item))
                    .collect(),
            ),
        }
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    async fn find_all(&self) -> Result<Vec<E>, FishlogError> {
        let mut items: Vec<E> = self.items.read().await.values().cloned().collect();
        items.sort_by(E::display_order);
        Ok(items)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<E>, FishlogError> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn create(&self, draft: E::Draft) -> Result<E, FishlogError> {
        let entity = E::from_draft(Uuid::new_v4().to_string(), draft, Utc::now());
        self.items
            .write()
            .await
            .insert(entity.id().to_string(), entity.clone());
        Ok(entity)
    }

    async fn update(&self, id: &str, patch: E::Patch) -> Result<Option<E>, FishlogError> {
        let mut items = self.items.write().await;
        Ok(items.get_mut(id).map(|entity| {
            entity.apply_patch(patch, Utc::now());
            entity.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool, FishlogError> {
        Ok(self.items.write().await.remove(id).is_some())
    }
}

/// Fishing trips owning the events recorded against them
///
/// Locks are always taken trips first, then events.
pub struct InMemoryTripRepository {
    trips: Arc<InMemoryRepository<FishingTrip>>,
    events: Arc<InMemoryRepository<TripEvent>>,
}

impl InMemoryTripRepository {
    pub fn new() -> Self {
        Self {
            trips: Arc::new(InMemoryRepository::new()),
            events: Arc::new(InMemoryRepository::new()),
        }
    }

    /// Event repository over this repository's event table
    pub fn events(&self) -> InMemoryTripEventRepository {
        InMemoryTripEventRepository {
            trips: Arc::clone(&self.trips),
            events: Arc::clone(&self.events),
        }
    }
}

impl Default for InMemoryTripRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository<FishingTrip> for InMemoryTripRepository {
    async fn find_all(&self) -> Result<Vec<FishingTrip>, FishlogError> {
        self.trips.find_all().await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<FishingTrip>, FishlogError> {
        self.trips.find_by_id(id).await
    }

    async fn create(
        &self,
        draft: <FishingTrip as Entity>::Draft,
    ) -> Result<FishingTrip, FishlogError> {
        self.trips.create(draft).await
    }

    async fn update(
        &self,
        id: &str,
        patch: <FishingTrip as Entity>::Patch,
    ) -> Result<Option<FishingTrip>, FishlogError> {
        self.trips.update(id, patch).await
    }

    async fn delete(&self, id: &str) -> Result<bool, FishlogError> {
        let mut trips = self.trips.items.write().await;
        if trips.remove(id).is_none() {
            return Ok(false);
        }

        let mut events = self.events.items.write().await;
        let before = events.len();
        events.retain(|_, event| event.trip_id != id);

        tracing::debug!(
            trip_id = %id,
            events_removed = before - events.len(),
            "Deleted trip and its events"
        );
        Ok(true)
    }
}

/// Trip events that must reference a stored trip
pub struct InMemoryTripEventRepository {
    trips: Arc<InMemoryRepository<FishingTrip>>,
    events: Arc<InMemoryRepository<TripEvent>>,
}

#[async_trait]
impl Repository<TripEvent> for InMemoryTripEventRepository {
    async fn find_all(&self) -> Result<Vec<TripEvent>, FishlogError> {
        self.events.find_all().await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TripEvent>, FishlogError> {
        self.events.find_by_id(id).await
    }

    async fn create(&self, draft: NewTripEvent) -> Result<TripEvent, FishlogError> {
        // held until the insert so a concurrent trip delete cannot orphan the event
        let trips = self.trips.items.read().await;
        if !trips.contains_key(&draft.trip_id) {
            return Err(FishlogError::validation_field("trip does not exist", "tripId"));
        }

        let event = TripEvent::from_draft(Uuid::new_v4().to_string(), draft, Utc::now());
        self.events
            .items
            .write()
            .await
            .insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn update(
        &self,
        id: &str,
        patch: <TripEvent as Entity>::Patch,
    ) -> Result<Option<TripEvent>, FishlogError> {
        self.events.update(id, patch).await
    }

    async fn delete(&self, id: &str) -> Result<bool, FishlogError> {
        self.events.delete(id).await
    }
}

#[async_trait]
impl TripEventRepository for InMemoryTripEventRepository {
    async fn list_by_trip(&self, trip_id: &str) -> Result<Vec<TripEvent>, FishlogError> {
        let mut events: Vec<TripEvent> = self
            .events
            .items
            .read()
            .await
            .values()
            .filter(|event| event.trip_id == trip_id)
            .cloned()
            .collect();
        events.sort_by(TripEvent::display_order);
        Ok(events)
    }

    async fn count_by_trip(&self, trip_id: &str) -> Result<EventCounts, FishlogError> {
        let items = self.events.items.read().await;
        Ok(EventCounts::tally(
            items.values().filter(|event| event.trip_id == trip_id),
        ))
    }
}
