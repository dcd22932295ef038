//! Location-tagged projects grouping related activity

use super::{patch_field, present, Entity, EntityKind};
use crate::error::FishlogError;
use crate::validation::{
    from_validator, validate_latitude, validate_length, validate_longitude, ValidateInput,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use validator::Validate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Inactive => "inactive",
            ProjectStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ProjectStatus::Active),
            "inactive" => Some(ProjectStatus::Inactive),
            "archived" => Some(ProjectStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    #[serde(default)]
    pub status: ProjectStatus,
}

impl ValidateInput for NewProject {
    fn validate_input(&self) -> Result<(), FishlogError> {
        from_validator(self.validate())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
}

impl ValidateInput for UpdateProject {
    fn validate_input(&self) -> Result<(), FishlogError> {
        if let Some(name) = &self.name {
            validate_length(name, "name", 1, 255)?;
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

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;

    type Draft = NewProject;
    type Patch = UpdateProject;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn from_draft(id: String, draft: NewProject, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            description: draft.description,
            latitude: draft.latitude,
            longitude: draft.longitude,
            status: draft.status,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: UpdateProject, now: DateTime<Utc>) {
        let mut changed = false;
        patch_field(&mut self.name, patch.name, &mut changed);
        patch_field(&mut self.description, patch.description, &mut changed);
        patch_field(&mut self.latitude, patch.latitude, &mut changed);
        patch_field(&mut self.longitude, patch.longitude, &mut changed);
        patch_field(&mut self.status, patch.status, &mut changed);
        if changed {
            self.updated_at = now;
        }
    }

    fn display_order(a: &Self, b: &Self) -> Ordering {
        a.name.cmp(&b.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_defaults_to_active() {
        let draft: NewProject =
            serde_json::from_str(r#"{"name": "Delta survey", "latitude": 38.0, "longitude": -121.5}"#)
                .unwrap();

        assert_eq!(draft.status, ProjectStatus::Active);
        assert!(draft.validate_input().is_ok());
    }

    #[test]
    fn test_name_required() {
        let patch = UpdateProject {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(patch.validate_input().is_err());
    }
}
