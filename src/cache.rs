//! Session Cache
//!
//! Expiring overlay in front of the durable stores. Holds a snapshot of each
//! recently seen user and that user's live bearer token:
//!
//! ```text
//! user_{email}   -> user snapshot JSON   (USER_CACHE_TTL, default 2h)
//! token_{email}  -> cached token JSON    (ACCESS_TOKEN_TTL, default 1h)
//! ```
//!
//! Entries expire lazily: a read of an expired entry evicts it and reports a
//! miss. Nothing sweeps the map in the background.
//!
//! [`MemoryCache`] keeps entries in process memory; [`RedisCache`] shares them
//! between every instance pointed at the same Redis.
//!
//! The cache is an accelerator only. Backend failures are logged and read as
//! misses, and callers confirm anything state-changing against the stores.

use crate::error::AuthError;
use crate::models::User;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

// ============================================
// Backend
// ============================================

/// Expiring string key/value store
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Value under `key`, or `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError>;

    /// Store `value` under `key` for `ttl`, replacing any previous entry
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), AuthError>;

    /// Remove `key`. Returns whether a live entry was removed.
    async fn forget(&self, key: &str) -> Result<bool, AuthError>;
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Process-local cache backend
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let now = Instant::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: evict unless a writer refreshed it in the meantime
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }

        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), AuthError> {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool, AuthError> {
        let now = Instant::now();
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }
}

/// Cache backend on a Redis connection pool
#[derive(Clone)]
pub struct RedisCache {
    pool: deadpool_redis::Pool,
}

impl RedisCache {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }

    /// Build a pool for `url`. Connections are opened on first use.
    pub fn from_url(url: &str) -> Result<Self, AuthError> {
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| AuthError::Config(format!("Invalid REDIS_URL: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Round-trip a PING
    pub async fn ping(&self) -> Result<(), AuthError> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), AuthError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut conn = self.pool.get().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool, AuthError> {
        let mut conn = self.pool.get().await?;
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }
}

// ============================================
// Per-key locks
// ============================================

/// Named async mutexes, created on demand and dropped once unused
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `key`
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Only the map holds these: nobody owns or awaits them.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }

    /// Number of keys with an owner or a waiter
    pub async fn active(&self) -> usize {
        self.locks
            .lock()
            .await
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}

// ============================================
// Typed session cache
// ============================================

/// Cached copy of a user record, including the password hash
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserSnapshot {
    id: Uuid,
    email: String,
    name: String,
    password_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&User> for UserSnapshot {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            password_hash: user.password_hash.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<UserSnapshot> for User {
    fn from(snapshot: UserSnapshot) -> Self {
        Self {
            id: snapshot.id,
            email: snapshot.email,
            name: snapshot.name,
            password_hash: snapshot.password_hash,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }
}

/// Live bearer token remembered for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Typed view over a [`CacheBackend`]
pub struct SessionCache {
    backend: Arc<dyn CacheBackend>,
    locks: KeyedLocks,
    user_ttl: Duration,
}

impl SessionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, user_ttl: Duration) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
            user_ttl,
        }
    }

    /// Session cache over a fresh [`MemoryCache`]
    pub fn in_memory(user_ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCache::new()), user_ttl)
    }

    fn user_key(email: &str) -> String {
        format!("user_{}", email)
    }

    fn token_key(email: &str) -> String {
        format!("token_{}", email)
    }

    /// Serialize all state changes for one user
    pub async fn lock(&self, email: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(email).await
    }

    async fn read<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(key, error = %err, "Session cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "Discarding undecodable session cache entry");
                self.forget(key).await;
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to encode session cache entry");
                return;
            }
        };

        if let Err(err) = self.backend.put(key, raw, ttl).await {
            tracing::warn!(key, error = %err, "Session cache write failed");
        }
    }

    async fn forget(&self, key: &str) {
        if let Err(err) = self.backend.forget(key).await {
            tracing::warn!(key, error = %err, "Session cache invalidation failed");
        }
    }

    /// Cached user record for `email`
    pub async fn user_snapshot(&self, email: &str) -> Option<User> {
        self.read::<UserSnapshot>(&Self::user_key(email))
            .await
            .map(User::from)
    }

    /// Write a user record through to the cache
    pub async fn put_user(&self, user: &User) {
        self.write(
            &Self::user_key(&user.email),
            &UserSnapshot::from(user),
            self.user_ttl,
        )
        .await;
    }

    /// Cached live token for `email`
    pub async fn active_token(&self, email: &str) -> Option<CachedToken> {
        let cached: CachedToken = self.read(&Self::token_key(email)).await?;

        if cached.expires_at <= Utc::now() {
            self.forget(&Self::token_key(email)).await;
            return None;
        }

        Some(cached)
    }

    /// Remember `token` for `email` until the token itself expires
    pub async fn put_token(&self, email: &str, token: &CachedToken) {
        let remaining = match (token.expires_at - Utc::now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => remaining,
            _ => return,
        };

        self.write(&Self::token_key(email), token, remaining).await;
    }

    /// Drop the cached token for `email`
    pub async fn invalidate_token(&self, email: &str) {
        self.forget(&Self::token_key(email)).await;
    }

    /// Drop both entries for `email`
    pub async fn invalidate(&self, email: &str) {
        self.forget(&Self::user_key(email)).await;
        self.forget(&Self::token_key(email)).await;
    }
}
