//! Fishing trip records

use super::{patch_field, present, Entity, EntityKind};
use crate::error::FishlogError;
use crate::validation::{
    from_validator, validate_latitude, validate_length, validate_longitude, validate_non_negative,
    ValidateInput,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterConditions {
    Clear,
    Murky,
    Stained,
    Muddy,
}

impl WaterConditions {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaterConditions::Clear => "clear",
            WaterConditions::Murky => "murky",
            WaterConditions::Stained => "stained",
            WaterConditions::Muddy => "muddy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clear" => Some(WaterConditions::Clear),
            "murky" => Some(WaterConditions::Murky),
            "stained" => Some(WaterConditions::Stained),
            "muddy" => Some(WaterConditions::Muddy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    Sunny,
    Cloudy,
    Overcast,
    Rainy,
    Stormy,
}

impl Weather {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weather::Sunny => "sunny",
            Weather::Cloudy => "cloudy",
            Weather::Overcast => "overcast",
            Weather::Rainy => "rainy",
            Weather::Stormy => "stormy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sunny" => Some(Weather::Sunny),
            "cloudy" => Some(Weather::Cloudy),
            "overcast" => Some(Weather::Overcast),
            "rainy" => Some(Weather::Rainy),
            "stormy" => Some(Weather::Stormy),
            _ => None,
        }
    }
}

/// A single fishing trip at one location on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FishingTrip {
    pub id: String,
    pub date: NaiveDate,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub water_conditions: Option<WaterConditions>,
    pub weather: Option<Weather>,
    pub notes: Option<String>,
    pub catch_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a fishing trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewFishingTrip {
    pub date: NaiveDate,

    #[validate(length(min = 1, max = 255))]
    pub location_name: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    #[serde(default)]
    pub water_conditions: Option<WaterConditions>,

    #[serde(default)]
    pub weather: Option<Weather>,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default)]
    #[validate(range(min = 0))]
    pub catch_count: Option<i32>,
}

impl ValidateInput for NewFishingTrip {
    fn validate_input(&self) -> Result<(), FishlogError> {
        from_validator(self.validate())
    }
}

/// Partial update; nullable fields use `Some(None)` to clear
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFishingTrip {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub water_conditions: Option<Option<WaterConditions>>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub weather: Option<Option<Weather>>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub catch_count: Option<Option<i32>>,
}

impl UpdateFishingTrip {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl ValidateInput for UpdateFishingTrip {
    fn validate_input(&self) -> Result<(), FishlogError> {
        if let Some(name) = &self.location_name {
            validate_length(name, "locationName", 1, 255)?;
        }
        if let Some(latitude) = self.latitude {
            validate_latitude(latitude)?;
        }
        if let Some(longitude) = self.longitude {
            validate_longitude(longitude)?;
        }
        if let Some(Some(count)) = self.catch_count {
            validate_non_negative(count, "catchCount")?;
        }
        Ok(())
    }
}

impl Entity for FishingTrip {
    const KIND: EntityKind = EntityKind::FishingTrip;

    type Draft = NewFishingTrip;
    type Patch = UpdateFishingTrip;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn from_draft(id: String, draft: NewFishingTrip, now: DateTime<Utc>) -> Self {
        Self {
            id,
            date: draft.date,
            location_name: draft.location_name,
            latitude: draft.latitude,
            longitude: draft.longitude,
            water_conditions: draft.water_conditions,
            weather: draft.weather,
            notes: draft.notes,
            catch_count: draft.catch_count,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: UpdateFishingTrip, now: DateTime<Utc>) {
        let mut changed = false;
        patch_field(&mut self.date, patch.date, &mut changed);
        patch_field(&mut self.location_name, patch.location_name, &mut changed);
        patch_field(&mut self.latitude, patch.latitude, &mut changed);
        patch_field(&mut self.longitude, patch.longitude, &mut changed);
        patch_field(&mut self.water_conditions, patch.water_conditions, &mut changed);
        patch_field(&mut self.weather, patch.weather, &mut changed);
        patch_field(&mut self.notes, patch.notes, &mut changed);
        patch_field(&mut self.catch_count, patch.catch_count, &mut changed);
        if changed {
            self.updated_at = now;
        }
    }

    /// Most recent trip first, ties broken by creation time
    fn display_order(a: &Self, b: &Self) -> Ordering {
        b.date
            .cmp(&a.date)
            .then_with(|| b.created_at.cmp(&a.created_at))
    }
}
