//! Authoritative storage for trips, trip events and projects
//!
//! Repositories return `Ok(None)` / `Ok(false)` for a missing id so callers
//! can tell "not found" apart from a storage failure.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use fishlog_core::models::{Entity, EventCounts, TripEvent};
use fishlog_core::FishlogError;

pub use memory::{InMemoryRepository, InMemoryTripEventRepository, InMemoryTripRepository};
pub use postgres::{
    connect_pool, run_migrations, PgFishingTripRepository, PgProjectRepository,
    PgTripEventRepository,
};

/// CRUD over one entity kind
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Every entity, in the kind's display order
    async fn find_all(&self) -> Result<Vec<E>, FishlogError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<E>, FishlogError>;

    /// Store a validated draft, assigning id and timestamps
    async fn create(&self, draft: E::Draft) -> Result<E, FishlogError>;

    /// Apply a validated patch; `None` if the id does not exist
    async fn update(&self, id: &str, patch: E::Patch) -> Result<Option<E>, FishlogError>;

    /// `false` if the id does not exist
    async fn delete(&self, id: &str) -> Result<bool, FishlogError>;
}

/// Trip event queries scoped to one trip
#[async_trait]
pub trait TripEventRepository: Repository<TripEvent> {
    /// Events of one trip, oldest first
    async fn list_by_trip(&self, trip_id: &str) -> Result<Vec<TripEvent>, FishlogError>;

    async fn count_by_trip(&self, trip_id: &str) -> Result<EventCounts, FishlogError>;
}
