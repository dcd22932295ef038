//! Error types shared by the fishlog services
//!
//! Write-path failures are surfaced to the caller through [`FishlogError`];
//! infrastructure failures in the real-time pipeline are handled where they
//! occur and never reach this type.

use thiserror::Error;

/// Errors returned by configuration loading and the data-access write path
#[derive(Debug, Error)]
pub enum FishlogError {
    /// Invalid or missing configuration value
    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        key: Option<String>,
    },

    /// Input entity failed validation
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Entity absent from the authoritative store
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Relational store failure
    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FishlogError {
    /// Validation error without a specific field
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Validation error attributed to a field
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::DatabaseError {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status code used when the error crosses the request/response boundary
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationError { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::ConfigurationError { .. } | Self::DatabaseError { .. } | Self::Internal(_) => {
                500
            }
        }
    }
}
