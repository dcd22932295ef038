//! Structured logging initialisation
//!
//! Services call [`init_logging`] once at startup. The filter comes from
//! `RUST_LOG` when set, otherwise from the configured default directive.

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, for local development
    Pretty,
    /// One JSON object per line, for log shipping
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub service_name: String,
    /// Default filter directive used when `RUST_LOG` is unset
    pub default_filter: String,
    pub format: LogFormat,
}

impl LogConfig {
    pub fn new(service_name: impl Into<String>, default_filter: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            default_filter: default_filter.into(),
            format: LogFormat::Pretty,
        }
    }

    /// Read the output format from `FISHLOG_LOG_FORMAT`
    pub fn with_env_format(mut self) -> Self {
        if let Ok(format) = std::env::var("FISHLOG_LOG_FORMAT") {
            self.format = LogFormat::parse(&format);
        }
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> Result<EnvFilter, ObservabilityError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.default_filter).map_err(|e| {
                ObservabilityError::InvalidFilter {
                    filter: self.default_filter.clone(),
                    reason: e.to_string(),
                }
            }),
        }
    }
}

/// Install the global tracing subscriber
///
/// # Errors
///
/// Fails if the filter directive is malformed or a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<(), ObservabilityError> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    result.map_err(|e| ObservabilityError::SubscriberInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        format = ?config.format,
        "Logging initialized"
    );

    Ok(())
}
