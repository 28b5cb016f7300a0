//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The
//! `.env` file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub question_model: String,
    /// Buffer size the refill scheduler tops partitions back up to.
    pub buffer_target_size: usize,
    /// Batch size generated on a cold start (1 served + rest buffered).
    pub initial_batch_size: usize,
    /// Probability of trying the shared cache before generating fresh.
    pub cache_hit_probability: f64,
    /// Minutes an unconsumed buffer entry stays servable.
    pub buffer_ttl_minutes: i64,
    /// Minutes between periodic sweeps of expired buffer entries.
    pub sweep_interval_minutes: u64,
    /// Size, in characters, of the content chunks fed to generation.
    pub chunk_size: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for
    /// development, but this is skipped in test environments to ensure
    /// tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Generation Backend Settings ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let question_model =
            std::env::var("QUESTION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        // --- Engine Tuning Knobs ---
        let buffer_target_size = parse_var("BUFFER_TARGET_SIZE", 3usize)?;
        let initial_batch_size = parse_var("INITIAL_BATCH_SIZE", 5usize)?;
        let cache_hit_probability = parse_var("CACHE_HIT_PROBABILITY", 0.60f64)?;
        let buffer_ttl_minutes = parse_var("BUFFER_TTL_MINUTES", 30i64)?;
        let sweep_interval_minutes = parse_var("SWEEP_INTERVAL_MINUTES", 10u64)?;
        let chunk_size = parse_var("CHUNK_SIZE", 1200usize)?;

        if !(0.0..=1.0).contains(&cache_hit_probability) {
            return Err(ConfigError::InvalidValue(
                "CACHE_HIT_PROBABILITY".to_string(),
                format!("{} is not a probability", cache_hit_probability),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            question_model,
            buffer_target_size,
            initial_batch_size,
            cache_hit_probability,
            buffer_ttl_minutes,
            sweep_interval_minutes,
            chunk_size,
        })
    }

    pub fn buffer_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.buffer_ttl_minutes)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_minutes * 60)
    }
}

/// Parses an optional environment variable, falling back to `default`.
fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
