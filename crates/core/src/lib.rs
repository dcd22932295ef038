//! # Fishlog Core
//!
//! Shared building blocks for the fishlog services.
//!
//! ## Modules
//!
//! - `models`: trip, trip event and project entities plus their drafts and patches
//! - `validation`: input validation for the write path
//! - `error`: the `FishlogError` type
//! - `config`: environment-driven configuration loaders
//! - `observability`: structured logging initialisation
//! - `shutdown`: graceful shutdown signalling

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod shutdown;
pub mod validation;

pub use config::{load_dotenv, BrokerConfig, ConfigLoader, DatabaseConfig, ServiceConfig};
pub use error::FishlogError;
pub use models::{
    Entity, EntityKind, EventCounts, EventType, FishingTrip, NewFishingTrip, NewProject,
    NewTripEvent, Project, ProjectStatus, TripEvent, UpdateFishingTrip, UpdateProject,
    UpdateTripEvent, WaterConditions, Weather,
};
pub use observability::{init_logging, LogConfig, LogFormat, ObservabilityError};
pub use shutdown::{ShutdownCoordinator, ShutdownHandle};
pub use validation::ValidateInput;

/// Result type alias for fishlog operations
pub type Result<T> = std::result::Result<T, FishlogError>;
