//! Cached Session Authentication
//!
//! Token-backed session authentication service providing:
//! - User registration with Argon2id password hashing
//! - Login returning an opaque bearer token (idempotent while the token is live)
//! - Token verification with single-use rotation
//! - Logout revoking every token of the user
//! - A write-through session cache in front of the durable stores
//!
//! # Configuration
//!
//! All configuration is loaded from environment variables, see [`AuthConfig`]:
//! - `DATABASE_URL` - PostgreSQL connection string (in-memory stores when unset)
//! - `REDIS_URL` - Redis connection string for the session cache (process memory when unset)
//! - `ACCESS_TOKEN_TTL` - Token lifetime in seconds (default: 3600)
//! - `USER_CACHE_TTL` - Cached user snapshot lifetime in seconds (default: 7200)
//! - `STORE_TIMEOUT_MS` - Upper bound for a single store call (default: 5000)
//!
//! # Usage
//!
//! ```rust,ignore
//! use cached_auth::{build_service, create_app, AuthConfig};
//!
//! let config = AuthConfig::from_env();
//! let auth = build_service(config).await?;
//! let app = create_app(auth);
//! axum::serve(listener, app).await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheBackend, MemoryCache, RedisCache, SessionCache};
pub use config::AuthConfig;
pub use error::AuthError;
pub use extractors::{AuthUser, BearerToken, ValidatedJson};
pub use handlers::AuthState;
pub use models::*;
pub use service::AuthService;
pub use store::{CredentialStore, TokenStore};

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Which durable backend a service was built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl StoreBackend {
    pub fn for_config(config: &AuthConfig) -> Self {
        if config.database_url.is_some() {
            StoreBackend::Postgres
        } else {
            StoreBackend::Memory
        }
    }
}

/// Build the authentication service for `config`.
///
/// Connects to PostgreSQL and runs migrations when `DATABASE_URL` is set,
/// otherwise keeps users and tokens in process memory.
pub async fn build_service(config: AuthConfig) -> Result<Arc<AuthService>, AuthError> {
    config.validate()?;

    let cache = match &config.redis_url {
        Some(url) => {
            let redis = RedisCache::from_url(url)?;
            if let Err(err) = redis.ping().await {
                tracing::warn!(error = %err, "Redis unreachable, session cache reads will miss");
            }
            SessionCache::new(Arc::new(redis), config.user_cache_lifetime())
        }
        None => SessionCache::in_memory(config.user_cache_lifetime()),
    };

    let (credentials, tokens): (Arc<dyn CredentialStore>, Arc<dyn TokenStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.database_max_connections)
                    .acquire_timeout(config.store_timeout())
                    .connect(url)
                    .await?;

                store::run_migrations(&pool).await?;

                (
                    Arc::new(store::PgCredentialStore::new(pool.clone())),
                    Arc::new(store::PgTokenStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, users and tokens will not survive a restart");
                (
                    Arc::new(store::MemoryCredentialStore::new()),
                    Arc::new(store::MemoryTokenStore::new()),
                )
            }
        };

    tracing::info!(
        backend = ?StoreBackend::for_config(&config),
        shared_cache = config.redis_url.is_some(),
        token_ttl = config.token_ttl,
        user_cache_ttl = config.user_cache_ttl,
        "Authentication service ready"
    );

    Ok(Arc::new(AuthService::new(config, credentials, tokens, cache)?))
}

/// Create authentication routes
pub fn create_routes(auth_service: Arc<AuthService>) -> Router {
    handlers::create_routes(auth_service)
}

/// Authentication routes with request tracing and CORS
pub fn create_app(auth_service: Arc<AuthService>) -> Router {
    create_routes(auth_service)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================
// Module Tests
// ============================================
