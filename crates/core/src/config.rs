//! Environment-driven configuration for the fishlog services
//!
//! Every value is read from a `FISHLOG_` prefixed variable, falling back to
//! the conventional unprefixed name where one exists (`DATABASE_URL`,
//! `RABBITMQ_URL`, `PORT`, `CORS_ORIGIN`). Override order is
//! defaults < .env < environment.
//!
//! # Example
//!
//! ```no_run
//! use fishlog_core::config::{load_dotenv, BrokerConfig, ConfigLoader};
//!
//! # fn example() -> Result<(), fishlog_core::FishlogError> {
//! load_dotenv();
//! let broker = BrokerConfig::from_env()?;
//! broker.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::FishlogError;
use std::time::Duration;
use url::Url;

/// Configuration loader trait
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables, applying defaults for
    /// anything optional
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a value is present but cannot be parsed.
    fn from_env() -> Result<Self, FishlogError>;

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` naming the offending key.
    fn validate(&self) -> Result<(), FishlogError>;
}

/// Relational store configuration
///
/// # Environment Variables
///
/// - `FISHLOG_DATABASE_URL` / `DATABASE_URL` (optional): PostgreSQL URL. When
///   unset the service runs on in-memory repositories.
/// - `FISHLOG_DATABASE_MAX_CONNECTIONS` (optional): pool size (default: 10)
/// - `FISHLOG_DATABASE_CONNECT_TIMEOUT` (optional): seconds (default: 5)
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ConfigLoader for DatabaseConfig {
    fn from_env() -> Result<Self, FishlogError> {
        let url = std::env::var("FISHLOG_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok();

        let max_connections = parse_env_var(
            "FISHLOG_DATABASE_MAX_CONNECTIONS",
            DatabaseConfig::default().max_connections,
        )?;

        let connect_timeout_secs = parse_env_var("FISHLOG_DATABASE_CONNECT_TIMEOUT", 5u64)?;

        Ok(Self {
            url,
            max_connections,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), FishlogError> {
        if let Some(url) = &self.url {
            Url::parse(url).map_err(|e| FishlogError::ConfigurationError {
                message: format!("Invalid DATABASE_URL: {}", e),
                key: Some("FISHLOG_DATABASE_URL".to_string()),
            })?;
        }

        if self.max_connections == 0 {
            return Err(FishlogError::ConfigurationError {
                message: "max_connections must be greater than 0".to_string(),
                key: Some("FISHLOG_DATABASE_MAX_CONNECTIONS".to_string()),
            });
        }

        Ok(())
    }
}

/// Message broker configuration
///
/// # Environment Variables
///
/// - `FISHLOG_BROKER_URL` / `RABBITMQ_URL` (optional): AMQP URL (default: `amqp://localhost:5672`)
/// - `FISHLOG_BROKER_EXCHANGE` (optional): topic exchange name (default: `ff_events`)
/// - `FISHLOG_BROKER_RECONNECT_INTERVAL` (optional): seconds between reconnect attempts (default: 5)
/// - `FISHLOG_BROKER_CONNECT_TIMEOUT` (optional): seconds (default: 5)
/// - `FISHLOG_BROKER_CLOSE_TIMEOUT` (optional): seconds allowed for a graceful close (default: 5)
/// - `FISHLOG_BROKER_PUBLISH_BUFFER` (optional): queued outbound envelopes (default: 1024)
/// - `FISHLOG_BROKER_INBOX_CAPACITY` (optional): queued inbound envelopes per subscription (default: 256)
/// - `FISHLOG_BROKER_PATTERNS` (optional): comma separated binding patterns
///   (default: `fishingTrip.*,tripEvent.*,project.*`)
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub exchange: String,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
    pub publish_buffer: usize,
    pub inbox_capacity: usize,
    pub patterns: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: "ff_events".to_string(),
            reconnect_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
            publish_buffer: 1024,
            inbox_capacity: 256,
            patterns: vec![
                "fishingTrip.*".to_string(),
                "tripEvent.*".to_string(),
                "project.*".to_string(),
            ],
        }
    }
}

impl ConfigLoader for BrokerConfig {
    fn from_env() -> Result<Self, FishlogError> {
        let defaults = BrokerConfig::default();

        let url = std::env::var("FISHLOG_BROKER_URL")
            .or_else(|_| std::env::var("RABBITMQ_URL"))
            .unwrap_or(defaults.url);

        let exchange = std::env::var("FISHLOG_BROKER_EXCHANGE").unwrap_or(defaults.exchange);

        let reconnect_secs = parse_env_var("FISHLOG_BROKER_RECONNECT_INTERVAL", 5u64)?;
        let connect_secs = parse_env_var("FISHLOG_BROKER_CONNECT_TIMEOUT", 5u64)?;
        let close_secs = parse_env_var("FISHLOG_BROKER_CLOSE_TIMEOUT", 5u64)?;

        let publish_buffer = parse_env_var("FISHLOG_BROKER_PUBLISH_BUFFER", defaults.publish_buffer)?;
        let inbox_capacity = parse_env_var("FISHLOG_BROKER_INBOX_CAPACITY", defaults.inbox_capacity)?;

        let patterns = match std::env::var("FISHLOG_BROKER_PATTERNS") {
            Ok(raw) => parse_list(&raw),
            Err(_) => defaults.patterns,
        };

        Ok(Self {
            url,
            exchange,
            reconnect_interval: Duration::from_secs(reconnect_secs),
            connect_timeout: Duration::from_secs(connect_secs),
            close_timeout: Duration::from_secs(close_secs),
            publish_buffer,
            inbox_capacity,
            patterns,
        })
    }

    fn validate(&self) -> Result<(), FishlogError> {
        let parsed = Url::parse(&self.url).map_err(|e| FishlogError::ConfigurationError {
            message: format!("Invalid broker URL: {}", e),
            key: Some("FISHLOG_BROKER_URL".to_string()),
        })?;

        if !matches!(parsed.scheme(), "amqp" | "amqps") {
            return Err(FishlogError::ConfigurationError {
                message: format!("Broker URL scheme must be amqp or amqps, got {}", parsed.scheme()),
                key: Some("FISHLOG_BROKER_URL".to_string()),
            });
        }

        if self.exchange.trim().is_empty() {
            return Err(FishlogError::ConfigurationError {
                message: "exchange must not be empty".to_string(),
                key: Some("FISHLOG_BROKER_EXCHANGE".to_string()),
            });
        }

        if self.reconnect_interval.is_zero() {
            return Err(FishlogError::ConfigurationError {
                message: "reconnect_interval must be greater than 0 seconds".to_string(),
                key: Some("FISHLOG_BROKER_RECONNECT_INTERVAL".to_string()),
            });
        }

        if self.publish_buffer == 0 || self.inbox_capacity == 0 {
            return Err(FishlogError::ConfigurationError {
                message: "publish_buffer and inbox_capacity must be greater than 0".to_string(),
                key: Some("FISHLOG_BROKER_PUBLISH_BUFFER".to_string()),
            });
        }

        if self.patterns.is_empty() {
            return Err(FishlogError::ConfigurationError {
                message: "at least one binding pattern is required".to_string(),
                key: Some("FISHLOG_BROKER_PATTERNS".to_string()),
            });
        }

        Ok(())
    }
}

/// HTTP / WebSocket service configuration
///
/// # Environment Variables
///
/// - `FISHLOG_SERVICE_HOST` / `HOST` (optional): bind host (default: "0.0.0.0")
/// - `FISHLOG_SERVICE_PORT` / `PORT` (optional): bind port (default: 4001)
/// - `FISHLOG_SERVICE_WORKERS` (optional): worker threads (default: CPU count)
/// - `FISHLOG_SERVICE_LOG_LEVEL` / `RUST_LOG` (optional): log level (default: "info")
/// - `FISHLOG_CORS_ORIGIN` / `CORS_ORIGIN` (optional): allowed origin (default: `http://localhost:5173`)
/// - `FISHLOG_WS_OUTBOUND_BUFFER` (optional): frames buffered per viewer (default: 64)
/// - `FISHLOG_WS_HEARTBEAT_INTERVAL` (optional): seconds between pings (default: 30)
/// - `FISHLOG_WS_CLIENT_TIMEOUT` (optional): seconds without a pong before dropping (default: 60)
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub log_level: String,
    pub cors_origin: String,
    pub ws_outbound_buffer: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4001,
            workers: num_cpus::get(),
            log_level: "info".to_string(),
            cors_origin: "http://localhost:5173".to_string(),
            ws_outbound_buffer: 64,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(60),
        }
    }
}

impl ConfigLoader for ServiceConfig {
    fn from_env() -> Result<Self, FishlogError> {
        let defaults = ServiceConfig::default();

        let host = std::env::var("FISHLOG_SERVICE_HOST")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or(defaults.host);

        let port = if std::env::var("FISHLOG_SERVICE_PORT").is_ok() {
            parse_env_var("FISHLOG_SERVICE_PORT", defaults.port)?
        } else {
            parse_env_var("PORT", defaults.port)?
        };

        let workers = parse_env_var("FISHLOG_SERVICE_WORKERS", defaults.workers)?;

        let log_level = std::env::var("FISHLOG_SERVICE_LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(defaults.log_level);

        let cors_origin = std::env::var("FISHLOG_CORS_ORIGIN")
            .or_else(|_| std::env::var("CORS_ORIGIN"))
            .unwrap_or(defaults.cors_origin);

        let ws_outbound_buffer =
            parse_env_var("FISHLOG_WS_OUTBOUND_BUFFER", defaults.ws_outbound_buffer)?;
        let heartbeat_secs = parse_env_var("FISHLOG_WS_HEARTBEAT_INTERVAL", 30u64)?;
        let client_timeout_secs = parse_env_var("FISHLOG_WS_CLIENT_TIMEOUT", 60u64)?;

        Ok(Self {
            host,
            port,
            workers,
            log_level,
            cors_origin,
            ws_outbound_buffer,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            client_timeout: Duration::from_secs(client_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), FishlogError> {
        if self.port == 0 {
            return Err(FishlogError::ConfigurationError {
                message: "port must be greater than 0".to_string(),
                key: Some("FISHLOG_SERVICE_PORT".to_string()),
            });
        }

        if self.workers == 0 {
            return Err(FishlogError::ConfigurationError {
                message: "workers must be greater than 0".to_string(),
                key: Some("FISHLOG_SERVICE_WORKERS".to_string()),
            });
        }

        // RUST_LOG may carry a full filter directive; only a bare level is checked
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        let level = self.log_level.to_lowercase();
        if !level.contains('=') && !valid_log_levels.contains(&level.as_str()) {
            return Err(FishlogError::ConfigurationError {
                message: format!(
                    "Invalid log_level '{}'. Must be one of: {}",
                    self.log_level,
                    valid_log_levels.join(", ")
                ),
                key: Some("FISHLOG_SERVICE_LOG_LEVEL".to_string()),
            });
        }

        if self.ws_outbound_buffer == 0 {
            return Err(FishlogError::ConfigurationError {
                message: "ws_outbound_buffer must be greater than 0".to_string(),
                key: Some("FISHLOG_WS_OUTBOUND_BUFFER".to_string()),
            });
        }

        if self.client_timeout <= self.heartbeat_interval {
            return Err(FishlogError::ConfigurationError {
                message: "client_timeout must exceed heartbeat_interval".to_string(),
                key: Some("FISHLOG_WS_CLIENT_TIMEOUT".to_string()),
            });
        }

        Ok(())
    }
}

/// Parse an environment variable, returning `default` when it is unset
///
/// # Errors
///
/// Returns a `ConfigurationError` if the value is set but cannot be parsed.
fn parse_env_var<T>(key: &str, default: T) -> Result<T, FishlogError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|v| {
            v.parse::<T>().map_err(|e| FishlogError::ConfigurationError {
                message: format!("Failed to parse {}: {}", key, e),
                key: Some(key.to_string()),
            })
        })
        .unwrap_or(Ok(default))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load a `.env` file if present
///
/// A missing file is not an error.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}
