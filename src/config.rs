//! Authentication Configuration
//!
//! All configuration values are loaded from environment variables.
//! Every value has a default so the service starts with in-memory stores.

use crate::error::AuthError;
use std::env;
use std::time::Duration;

/// Longest accepted token or snapshot lifetime, in seconds (one year)
pub const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Authentication configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// PostgreSQL connection string (from DATABASE_URL env var).
    /// In-memory stores are used when unset.
    pub database_url: Option<String>,

    /// Maximum pooled database connections (from DATABASE_MAX_CONNECTIONS env var)
    pub database_max_connections: u32,

    /// Redis connection string for the session cache (from REDIS_URL env var).
    /// The cache stays in process memory when unset.
    pub redis_url: Option<String>,

    /// Listen address for the HTTP server (from AUTH_BIND_ADDR env var)
    pub bind_address: String,

    /// Access token lifetime in seconds (from ACCESS_TOKEN_TTL env var)
    pub token_ttl: i64,

    /// Lifetime of cached user snapshots in seconds (from USER_CACHE_TTL env var)
    pub user_cache_ttl: i64,

    /// Upper bound for a single store call in milliseconds (from STORE_TIMEOUT_MS env var)
    pub store_timeout_ms: u64,

    /// Argon2 memory cost in KiB (from ARGON2_MEMORY_COST env var)
    pub argon2_memory_cost: u32,

    /// Argon2 time cost (iterations) (from ARGON2_TIME_COST env var)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (from ARGON2_PARALLELISM env var)
    pub argon2_parallelism: u32,

    /// Minimum password length (from MIN_PASSWORD_LENGTH env var)
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            redis_url: None,
            bind_address: "0.0.0.0:3000".to_string(),
            token_ttl: 3600,      // 1 hour
            user_cache_ttl: 7200, // 2 hours
            store_timeout_ms: 5000,
            argon2_memory_cost: 65536, // 64 MiB
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            min_password_length: 6,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl AuthConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),

            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),

            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),

            bind_address: env::var("AUTH_BIND_ADDR").unwrap_or(defaults.bind_address),

            token_ttl: env_parse("ACCESS_TOKEN_TTL").unwrap_or(defaults.token_ttl),

            user_cache_ttl: env_parse("USER_CACHE_TTL").unwrap_or(defaults.user_cache_ttl),

            store_timeout_ms: env_parse("STORE_TIMEOUT_MS").unwrap_or(defaults.store_timeout_ms),

            argon2_memory_cost: env_parse("ARGON2_MEMORY_COST")
                .unwrap_or(defaults.argon2_memory_cost),

            argon2_time_cost: env_parse("ARGON2_TIME_COST").unwrap_or(defaults.argon2_time_cost),

            argon2_parallelism: env_parse("ARGON2_PARALLELISM")
                .unwrap_or(defaults.argon2_parallelism),

            min_password_length: env_parse("MIN_PASSWORD_LENGTH")
                .unwrap_or(defaults.min_password_length),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.token_ttl <= 0 {
            return Err(AuthError::Config(
                "ACCESS_TOKEN_TTL must be positive".to_string(),
            ));
        }

        if self.token_ttl > MAX_TTL_SECS || self.user_cache_ttl > MAX_TTL_SECS {
            return Err(AuthError::Config(format!(
                "ACCESS_TOKEN_TTL and USER_CACHE_TTL must not exceed {} seconds",
                MAX_TTL_SECS
            )));
        }

        // Login's fast path needs the user snapshot to outlive the token it vouches for.
        if self.user_cache_ttl < self.token_ttl {
            return Err(AuthError::Config(
                "USER_CACHE_TTL must not be shorter than ACCESS_TOKEN_TTL".to_string(),
            ));
        }

        if self.store_timeout_ms == 0 {
            return Err(AuthError::Config(
                "STORE_TIMEOUT_MS must be positive".to_string(),
            ));
        }

        if self.min_password_length < 6 {
            return Err(AuthError::Config(
                "MIN_PASSWORD_LENGTH must be at least 6".to_string(),
            ));
        }

        if self.database_max_connections == 0 {
            return Err(AuthError::Config(
                "DATABASE_MAX_CONNECTIONS must be positive".to_string(),
            ));
        }

        self.argon2_params()?;

        Ok(())
    }

    /// Argon2 parameters derived from the configured costs
    pub fn argon2_params(&self) -> Result<argon2::Params, AuthError> {
        argon2::Params::new(
            self.argon2_memory_cost,
            self.argon2_time_cost,
            self.argon2_parallelism,
            None,
        )
        .map_err(|e| AuthError::Config(format!("Invalid Argon2 parameters: {}", e)))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl)
    }

    pub fn user_cache_lifetime(&self) -> Duration {
        Duration::from_secs(self.user_cache_ttl.max(0) as u64)
    }
}
