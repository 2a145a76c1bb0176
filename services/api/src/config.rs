//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use argon2::PasswordHash;
use chrono::Duration;
use std::net::SocketAddr;
use tracing::Level;

/// Longest session lifetime accepted from `SESSION_TTL_HOURS` (one year).
pub const MAX_SESSION_TTL_HOURS: u64 = 24 * 365;

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
    pub database_max_connections: u32,
    pub log_level: Level,
    pub session_ttl: Duration,
    pub sweep_interval: std::time::Duration,
    pub cors_allowed_origin: String,
    pub cookie_secure: bool,
    /// Argon2 PHC string; admin accounts cannot sign in while this is unset.
    pub admin_password_hash: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let database_max_connections = parse_positive(&lookup, "DATABASE_MAX_CONNECTIONS", 5)? as u32;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Session Lifecycle ---
        let ttl_hours = parse_positive(&lookup, "SESSION_TTL_HOURS", 24 * 30)?;
        if ttl_hours > MAX_SESSION_TTL_HOURS {
            return Err(ConfigError::InvalidValue(
                "SESSION_TTL_HOURS".to_string(),
                format!("must be at most {}", MAX_SESSION_TTL_HOURS),
            ));
        }
        let session_ttl = Duration::hours(ttl_hours as i64);

        let sweep_secs = parse_positive(&lookup, "SESSION_SWEEP_INTERVAL_SECS", 24 * 60 * 60)?;
        let sweep_interval = std::time::Duration::from_secs(sweep_secs);

        // --- Browser-facing Settings ---
        let cors_allowed_origin =
            lookup("CORS_ALLOWED_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        let cookie_secure = match lookup("COOKIE_SECURE").as_deref() {
            None => true,
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "COOKIE_SECURE".to_string(),
                    format!("'{}' is not a boolean", other),
                ))
            }
        };

        // --- Admin Sign-in ---
        let admin_password_hash = lookup("ADMIN_PASSWORD_HASH").filter(|h| !h.trim().is_empty());
        if let Some(hash) = &admin_password_hash {
            PasswordHash::new(hash).map_err(|e| {
                ConfigError::InvalidValue("ADMIN_PASSWORD_HASH".to_string(), e.to_string())
            })?;
        }

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            log_level,
            session_ttl,
            sweep_interval,
            cors_allowed_origin,
            cookie_secure,
            admin_password_hash,
        })
    }
}

fn parse_positive<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        )),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue(key.to_string(), e.to_string())),
    }
}
