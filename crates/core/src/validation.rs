//! Validation utilities for entity drafts and patches
//!
//! Drafts derive [`validator::Validate`]; patches carry nullable fields that
//! the derive cannot express, so they are checked with the helpers below.

use crate::error::FishlogError;
use validator::ValidationErrors;

/// Input accepted by the write path
pub trait ValidateInput {
    /// # Errors
    ///
    /// Returns `ValidationError` naming the first offending field.
    fn validate_input(&self) -> Result<(), FishlogError>;
}

/// Convert `validator` output into a [`FishlogError`]
pub fn from_validator(result: Result<(), ValidationErrors>) -> Result<(), FishlogError> {
    let errors = match result {
        Ok(()) => return Ok(()),
        Err(errors) => errors,
    };

    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    match fields.first() {
        Some((field, errs)) => {
            let detail = errs
                .first()
                .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                .unwrap_or_else(|| {
                    errs.first()
                        .map(|e| e.code.to_string())
                        .unwrap_or_else(|| "invalid".to_string())
                });
            Err(FishlogError::validation_field(
                format!("{}: {}", field, detail),
                field.to_string(),
            ))
        }
        None => Err(FishlogError::validation(errors.to_string())),
    }
}

/// Validate latitude is within [-90, 90]
///
/// # Examples
///
/// ```
/// use fishlog_core::validation::validate_latitude;
///
/// assert!(validate_latitude(45.0).is_ok());
/// assert!(validate_latitude(91.0).is_err());
/// ```
pub fn validate_latitude(latitude: f64) -> Result<(), FishlogError> {
    if (-90.0..=90.0).contains(&latitude) {
        Ok(())
    } else {
        Err(FishlogError::validation_field(
            "latitude must be between -90 and 90",
            "latitude",
        ))
    }
}

/// Validate longitude is within [-180, 180]
pub fn validate_longitude(longitude: f64) -> Result<(), FishlogError> {
    if (-180.0..=180.0).contains(&longitude) {
        Ok(())
    } else {
        Err(FishlogError::validation_field(
            "longitude must be between -180 and 180",
            "longitude",
        ))
    }
}

/// Validate a string's character count is within `min..=max`
pub fn validate_length(value: &str, field: &str, min: usize, max: usize) -> Result<(), FishlogError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(FishlogError::validation_field(
            format!("{} must be between {} and {} characters", field, min, max),
            field,
        ));
    }
    Ok(())
}

pub fn validate_non_negative(value: i32, field: &str) -> Result<(), FishlogError> {
    if value < 0 {
        return Err(FishlogError::validation_field(
            format!("{} must not be negative", field),
            field,
        ));
    }
    Ok(())
}
