//! Domain models for the activity log
//!
//! Three entity kinds share the [`Entity`] contract: fishing trips, the
//! timestamped events recorded during a trip, and projects. Entities are
//! immutable snapshots assigned by the authoritative store; a new version
//! replaces the old one wholesale.

pub mod fishing_trip;
pub mod project;
pub mod trip_event;

use crate::validation::ValidateInput;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub use fishing_trip::{FishingTrip, NewFishingTrip, UpdateFishingTrip, WaterConditions, Weather};
pub use project::{NewProject, Project, ProjectStatus, UpdateProject};
pub use trip_event::{EventCounts, EventType, NewTripEvent, TripEvent, UpdateTripEvent};

/// Entity kind, also the first segment of every topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    FishingTrip,
    TripEvent,
    Project,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::FishingTrip,
        EntityKind::TripEvent,
        EntityKind::Project,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::FishingTrip => "fishingTrip",
            EntityKind::TripEvent => "tripEvent",
            EntityKind::Project => "project",
        }
    }

    /// Human readable name used in not-found messages
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::FishingTrip => "Fishing trip",
            EntityKind::TripEvent => "Trip event",
            EntityKind::Project => "Project",
        }
    }

    /// Binding pattern matching every action on this kind
    pub fn wildcard(&self) -> String {
        format!("{}.*", self.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind: {}", s))
    }
}

/// Contract shared by every entity kind
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// Input accepted by `create`
    type Draft: ValidateInput + Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync;

    /// Partial input accepted by `update`
    type Patch: ValidateInput
        + Serialize
        + DeserializeOwned
        + Clone
        + fmt::Debug
        + Default
        + Send
        + Sync;

    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    fn updated_at(&self) -> DateTime<Utc>;

    /// Build a stored entity from validated input
    fn from_draft(id: String, draft: Self::Draft, now: DateTime<Utc>) -> Self;

    /// Apply a validated patch, bumping `updated_at` only if something changed
    fn apply_patch(&mut self, patch: Self::Patch, now: DateTime<Utc>);

    /// Default ordering for list views
    fn display_order(a: &Self, b: &Self) -> Ordering {
        b.created_at().cmp(&a.created_at())
    }
}

/// Deserialize a present field (including explicit `null`) as `Some(value)`
///
/// Paired with `#[serde(default)]` this lets patches distinguish an absent
/// field (`None`) from an explicit clear (`Some(None)`).
pub(crate) fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Replace `slot` when the patch carries a value, recording whether anything changed
pub(crate) fn patch_field<T: PartialEq>(slot: &mut T, value: Option<T>, changed: &mut bool) {
    if let Some(value) = value {
        if *slot != value {
            *slot = value;
            *changed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("trip".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(EntityKind::FishingTrip.wildcard(), "fishingTrip.*");
    }

    #[test]
    fn test_patch_field_tracks_changes() {
        let mut changed = false;
        let mut name = "a".to_string();

        patch_field(&mut name, None, &mut changed);
        assert!(!changed);

        patch_field(&mut name, Some("a".to_string()), &mut changed);
        assert!(!changed);

        patch_field(&mut name, Some("b".to_string()), &mut changed);
        assert!(changed);
        assert_eq!(name, "b");
    }
}
