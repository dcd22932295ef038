//! PostgreSQL repositories
//!
//! Updates read the current row under `FOR UPDATE`, apply the patch with the
//! same rules as the in-memory store, and write the full row back in one
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use super::{Repository, TripEventRepository};
use fishlog_core::config::DatabaseConfig;
use fishlog_core::models::{
    Entity, EventCounts, EventType, FishingTrip, NewFishingTrip, NewProject, NewTripEvent,
    Project, ProjectStatus, TripEvent, UpdateFishingTrip, UpdateProject, UpdateTripEvent,
    WaterConditions, Weather,
};
use fishlog_core::FishlogError;

const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Open a connection pool for `config.url`
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool, FishlogError> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| FishlogError::ConfigurationError {
            message: "database URL is not set".to_string(),
            key: Some("FISHLOG_DATABASE_URL".to_string()),
        })?;

    info!(
        max_connections = config.max_connections,
        "Connecting to database"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .connect(url)
        .await
        .map_err(db_err("connect to database"))?;

    info!("Database connection pool established");
    Ok(pool)
}

/// Apply the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), FishlogError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| FishlogError::database(format!("Failed to run migrations: {}", e)))
}

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> FishlogError {
    move |e| FishlogError::database(format!("Failed to {}: {}", context, e))
}

fn decode_err(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

/// Current time at `TIMESTAMPTZ` precision, so a published entity matches a later read
fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Ids are UUIDs in storage; anything else cannot exist
fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Fishing trips
// ---------------------------------------------------------------------------

pub struct PgFishingTripRepository {
    pool: PgPool,
}

impl PgFishingTripRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<FishingTrip, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;

        let water_conditions: Option<String> = row.try_get("water_conditions")?;
        let water_conditions = water_conditions
            .map(|value| {
                WaterConditions::parse(&value)
                    .ok_or_else(|| decode_err(format!("unknown water conditions: {}", value)))
            })
            .transpose()?;

        let weather: Option<String> = row.try_get("weather")?;
        let weather = weather
            .map(|value| {
                Weather::parse(&value).ok_or_else(|| decode_err(format!("unknown weather: {}", value)))
            })
            .transpose()?;

        Ok(FishingTrip {
            id: id.to_string(),
            date: row.try_get("date")?,
            location_name: row.try_get("location_name")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            water_conditions,
            weather,
            notes: row.try_get("notes")?,
            catch_count: row.try_get("catch_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Repository<FishingTrip> for PgFishingTripRepository {
    async fn find_all(&self) -> Result<Vec<FishingTrip>, FishlogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, date, location_name, latitude, longitude, water_conditions,
                   weather, notes, catch_count, created_at, updated_at
            FROM fishing_trips
            ORDER BY date DESC, created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list fishing trips"))?;

        rows.iter()
            .map(Self::from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode fishing trip"))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<FishingTrip>, FishlogError> {
        let Some(uuid) = parse_id(id) else {
            return Ok(None);
        };

        let row = sqlx::query(
            r#"
            SELECT id, date, location_name, latitude, longitude, water_conditions,
                   weather, notes, catch_count, created_at, updated_at
            FROM fishing_trips
            WHERE id = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("load fishing trip"))?;

        row.as_ref()
            .map(Self::from_row)
            .transpose()
            .map_err(db_err("decode fishing trip"))
    }

    async fn create(&self, draft: NewFishingTrip) -> Result<FishingTrip, FishlogError> {
        let row = sqlx::query(
            r#"
            INSERT INTO fishing_trips (
                date, location_name, latitude, longitude,
                water_conditions, weather, notes, catch_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, date, location_name, latitude, longitude, water_conditions,
                      weather, notes, catch_count, created_at, updated_at
            "#,
        )
        .bind(draft.date)
        .bind(&draft.location_name)
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(draft.water_conditions.map(|w| w.as_str()))
        .bind(draft.weather.map(|w| w.as_str()))
        .bind(&draft.notes)
        .bind(draft.catch_count)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("insert fishing trip"))?;

        Self::from_row(&row).map_err(db_err("decode fishing trip"))
    }

    async fn update(
        &self,
        id: &str,
        patch: UpdateFishingTrip,
    ) -> Result<Option<FishingTrip>, FishlogError> {
        let Some(uuid) = parse_id(id) else {
            return Ok(None);
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("begin transaction"))?;

        let row = sqlx::query(
            r#"
            SELECT id, date, location_name, latitude, longitude, water_conditions,
                   weather, notes, catch_count, created_at, updated_at
            FROM fishing_trips
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("load fishing trip"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut trip = Self::from_row(&row).map_err(db_err("decode fishing trip"))?;
        let before = trip.updated_at;
        trip.apply_patch(patch, stored_now());
        if trip.updated_at == before {
            return Ok(Some(trip));
        }

        sqlx::query(
            r#"
            UPDATE fishing_trips
            SET date = $2, location_name = $3, latitude = $4, longitude = $5,
                water_conditions = $6, weather = $7, notes = $8, catch_count = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(uuid)
        .bind(trip.date)
        .bind(&trip.location_name)
        .bind(trip.latitude)
        .bind(trip.longitude)
        .bind(trip.water_conditions.map(|w| w.as_str()))
        .bind(trip.weather.map(|w| w.as_str()))
        .bind(&trip.notes)
        .bind(trip.catch_count)
        .bind(trip.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("update fishing trip"))?;

        tx.commit().await.map_err(db_err("commit fishing trip"))?;
        Ok(Some(trip))
    }

    async fn delete(&self, id: &str) -> Result<bool, FishlogError> {
        let Some(uuid) = parse_id(id) else {
            return Ok(false);
        };

        // trip events go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM fishing_trips WHERE id = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete fishing trip"))?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Trip events
// ---------------------------------------------------------------------------

pub struct PgTripEventRepository {
    pool: PgPool,
}

impl PgTripEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<TripEvent, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        let trip_id: Uuid = row.try_get("trip_id")?;
        let event_type: String = row.try_get("event_type")?;

        Ok(TripEvent {
            id: id.to_string(),
            trip_id: trip_id.to_string(),
            event_type: EventType::parse(&event_type)
                .ok_or_else(|| decode_err(format!("unknown event type: {}", event_type)))?,
            species: row.try_get("species")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            timestamp: row.try_get("occurred_at")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Repository<TripEvent> for PgTripEventRepository {
    async fn find_all(&self) -> Result<Vec<TripEvent>, FishlogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, trip_id, event_type, species, latitude, longitude,
                   occurred_at, notes, created_at, updated_at
            FROM trip_events
            ORDER BY occurred_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list trip events"))?;

        rows.iter()
            .map(Self::from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode trip event"))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TripEvent>, FishlogError> {
        let Some(uuid) = parse_id(id) else {
            return Ok(None);
        };

        let row = sqlx::query(
            r#"
            SELECT id, trip_id, event_type, species, latitude, longitude,
                   occurred_at, notes, created_at, updated_at
            FROM trip_events
            WHERE id = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("load trip event"))?;

        row.as_ref()
            .map(Self::from_row)
            .transpose()
            .map_err(db_err("decode trip event"))
    }

    async fn create(&self, draft: NewTripEvent) -> Result<TripEvent, FishlogError> {
        let trip_id = parse_id(&draft.trip_id).ok_or_else(|| {
            FishlogError::validation_field("trip does not exist", "tripId")
        })?;

        let row = sqlx::query(
            r#"
            INSERT INTO trip_events (
                trip_id, event_type, species, latitude, longitude, occurred_at, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, trip_id, event_type, species, latitude, longitude,
                      occurred_at, notes, created_at, updated_at
            "#,
        )
        .bind(trip_id)
        .bind(draft.event_type.as_str())
        .bind(&draft.species)
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(draft.timestamp)
        .bind(&draft.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                FishlogError::validation_field("trip does not exist", "tripId")
            } else {
                db_err("insert trip event")(e)
            }
        })?;

        Self::from_row(&row).map_err(db_err("decode trip event"))
    }

    async fn update(
        &self,
        id: &str,
        patch: UpdateTripEvent,
    ) -> Result<Option<TripEvent>, FishlogError> {
        let Some(uuid) = parse_id(id) else {
            return Ok(None);
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("begin transaction"))?;

        let row = sqlx::query(
            r#"
            SELECT id, trip_id, event_type, species, latitude, longitude,
                   occurred_at, notes, created_at, updated_at
            FROM trip_events
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("load trip event"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut event = Self::from_row(&row).map_err(db_err("decode trip event"))?;
        let before = event.updated_at;
        event.apply_patch(patch, stored_now());
        if event.updated_at == before {
            return Ok(Some(event));
        }

        sqlx::query(
            r#"
            UPDATE trip_events
            SET event_type = $2, species = $3, latitude = $4, longitude = $5,
                occurred_at = $6, notes = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(uuid)
        .bind(event.event_type.as_str())
        .bind(&event.species)
        .bind(event.latitude)
        .bind(event.longitude)
        .bind(event.timestamp)
        .bind(&event.notes)
        .bind(event.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("update trip event"))?;

        tx.commit().await.map_err(db_err("commit trip event"))?;
        Ok(Some(event))
    }

    async fn delete(&self, id: &str) -> Result<bool, FishlogError> {
        let Some(uuid) = parse_id(id) else {
            return Ok(false);
        };

        let result = sqlx::query("DELETE FROM trip_events WHERE id = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete trip event"))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TripEventRepository for PgTripEventRepository {
    async fn list_by_trip(&self, trip_id: &str) -> Result<Vec<TripEvent>, FishlogError> {
        let Some(trip_uuid) = parse_id(trip_id) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT id, trip_id, event_type, species, latitude, longitude,
                   occurred_at, notes, created_at, updated_at
            FROM trip_events
            WHERE trip_id = $1
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(trip_uuid)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list trip events"))?;

        rows.iter()
            .map(Self::from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode trip event"))
    }

    async fn count_by_trip(&self, trip_id: &str) -> Result<EventCounts, FishlogError> {
        let mut counts = EventCounts::default();
        let Some(trip_uuid) = parse_id(trip_id) else {
            return Ok(counts);
        };

        let rows = sqlx::query(
            r#"
            SELECT event_type, COUNT(*) AS count
            FROM trip_events
            WHERE trip_id = $1
            GROUP BY event_type
            "#,
        )
        .bind(trip_uuid)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("count trip events"))?;

        for row in rows {
            let event_type: String = row
                .try_get("event_type")
                .map_err(db_err("decode event count"))?;
            let count: i64 = row.try_get("count").map_err(db_err("decode event count"))?;

            if let Some(event_type) = EventType::parse(&event_type) {
                counts.record(event_type, count.max(0) as u64);
            }
        }

        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

pub struct PgProjectRepository {
    pool: PgPool,
}

impl PgProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<Project, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        let status: String = row.try_get("status")?;

        Ok(Project {
            id: id.to_string(),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            status: ProjectStatus::parse(&status)
                .ok_or_else(|| decode_err(format!("unknown project status: {}", status)))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Repository<Project> for PgProjectRepository {
    async fn find_all(&self) -> Result<Vec<Project>, FishlogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, latitude, longitude, status, created_at, updated_at
            FROM projects
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list projects"))?;

        rows.iter()
            .map(Self::from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode project"))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Project>, FishlogError> {
        let Some(uuid) = parse_id(id) else {
            return Ok(None);
        };

        let row = sqlx::query(
            r#"
            SELECT id, name, description, latitude, longitude, status, created_at, updated_at
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("load project"))?;

        row.as_ref()
            .map(Self::from_row)
            .transpose()
            .map_err(db_err("decode project"))
    }

    async fn create(&self, draft: NewProject) -> Result<Project, FishlogError> {
        let row = sqlx::query(
            r#"
            INSERT INTO projects (name, description, latitude, longitude, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, description, latitude, longitude, status, created_at, updated_at
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(draft.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("insert project"))?;

        Self::from_row(&row).map_err(db_err("decode project"))
    }

    async fn update(&self, id: &str, patch: UpdateProject) -> Result<Option<Project>, FishlogError> {
        let Some(uuid) = parse_id(id) else {
            return Ok(None);
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("begin transaction"))?;

        let row = sqlx::query(
            r#"
            SELECT id, name, description, latitude, longitude, status, created_at, updated_at
            FROM projects
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("load project"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut project = Self::from_row(&row).map_err(db_err("decode project"))?;
        let before = project.updated_at;
        project.apply_patch(patch, stored_now());
        if project.updated_at == before {
            return Ok(Some(project));
        }

        sqlx::query(
            r#"
            UPDATE projects
            SET name = $2, description = $3, latitude = $4, longitude = $5,
                status = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(uuid)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.latitude)
        .bind(project.longitude)
        .bind(project.status.as_str())
        .bind(project.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("update project"))?;

        tx.commit().await.map_err(db_err("commit project"))?;
        Ok(Some(project))
    }

    async fn delete(&self, id: &str) -> Result<bool, FishlogError> {
        let Some(uuid) = parse_id(id) else {
            return Ok(false);
        };

        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete project"))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert!(parse_id("t1").is_none());
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()), Some(id));
    }

    #[test]
    fn test_stored_now_has_microsecond_precision() {
        let now = stored_now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
        assert!(Utc::now() >= now);
    }

    #[test]
    fn test_non_database_errors_are_not_fk_violations() {
        assert!(!is_foreign_key_violation(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn test_connect_pool_requires_url() {
        let config = DatabaseConfig {
            url: None,
            ..DatabaseConfig::default()
        };

        match connect_pool(&config).await {
            Err(FishlogError::ConfigurationError { key, .. }) => {
                assert_eq!(key.as_deref(), Some("FISHLOG_DATABASE_URL"))
            }
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }
}
