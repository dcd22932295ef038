//! Timestamped sub-events recorded during a trip (catches, hooks, misses)

use super::{patch_field, present, Entity, EntityKind};
use crate::error::FishlogError;
use crate::validation::{
    from_validator, validate_latitude, validate_length, validate_longitude, ValidateInput,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Catch,
    Hooked,
    Miss,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Catch => "catch",
            EventType::Hooked => "hooked",
            EventType::Miss => "miss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "catch" => Some(EventType::Catch),
            "hooked" => Some(EventType::Hooked),
            "miss" => Some(EventType::Miss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripEvent {
    pub id: String,
    pub trip_id: String,
    pub event_type: EventType,
    pub species: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewTripEvent {
    #[validate(length(min = 1))]
    pub trip_id: String,

    pub event_type: EventType,

    #[serde(default)]
    #[validate(length(max = 100))]
    pub species: Option<String>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub notes: Option<String>,
}

impl ValidateInput for NewTripEvent {
    fn validate_input(&self) -> Result<(), FishlogError> {
        from_validator(self.validate())
    }
}

/// Partial update; the owning trip cannot be changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTripEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub species: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl UpdateTripEvent {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl ValidateInput for UpdateTripEvent {
    fn validate_input(&self) -> Result<(), FishlogError> {
        if let Some(Some(species)) = &self.species {
            validate_length(species, "species", 0, 100)?;
        }
        if let Some(latitude) = self.latitude {
            validate_latitude(latitude)?;
        }
        if let Some(longitude) = self.longitude {
            validate_longitude(longitude)?;
        }
        Ok(())
    }
}

/// Per-type tally of a trip's events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub catches: u64,
    pub hooked: u64,
    pub misses: u64,
}

impl EventCounts {
    pub fn record(&mut self, event_type: EventType, count: u64) {
        match event_type {
            EventType::Catch => self.catches += count,
            EventType::Hooked => self.hooked += count,
            EventType::Miss => self.misses += count,
        }
    }

    pub fn tally<'a>(events: impl IntoIterator<Item = &'a TripEvent>) -> Self {
        let mut counts = Self::default();
        for event in events {
            counts.record(event.event_type, 1);
        }
        counts
    }
}

impl Entity for TripEvent {
    const KIND: EntityKind = EntityKind::TripEvent;

    type Draft = NewTripEvent;
    type Patch = UpdateTripEvent;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn from_draft(id: String, draft: NewTripEvent, now: DateTime<Utc>) -> Self {
        Self {
            id,
            trip_id: draft.trip_id,
            event_type: draft.event_type,
            species: draft.species,
            latitude: draft.latitude,
            longitude: draft.longitude,
            timestamp: draft.timestamp,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: UpdateTripEvent, now: DateTime<Utc>) {
        let mut changed = false;
        patch_field(&mut self.event_type, patch.event_type, &mut changed);
        patch_field(&mut self.species, patch.species, &mut changed);
        patch_field(&mut self.latitude, patch.latitude, &mut changed);
        patch_field(&mut self.longitude, patch.longitude, &mut changed);
        patch_field(&mut self.timestamp, patch.timestamp, &mut changed);
        patch_field(&mut self.notes, patch.notes, &mut changed);
        if changed {
            self.updated_at = now;
        }
    }

    /// Chronological, as events happened on the water
    fn display_order(a: &Self, b: &Self) -> Ordering {
        a.timestamp.cmp(&b.timestamp)
    }
}
