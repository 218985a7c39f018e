//! Durable stores for users and access tokens.
//!
//! Two interchangeable backends implement both traits:
//!
//! - [`memory`] - process-local maps, used when no `DATABASE_URL` is configured and in tests
//! - [`postgres`] - SQLx/PostgreSQL tables created by [`postgres::run_migrations`]
//!
//! Each method is atomic per key. `TokenStore::rotate_for_user` revokes and
//! inserts in one step so a user never ends up with two active tokens. It also
//! drops the user's already inactive records, so at most the token it just
//! revoked and its replacement remain.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryCredentialStore, MemoryTokenStore};
pub use postgres::{run_migrations, PgCredentialStore, PgTokenStore};

use crate::error::AuthError;
use crate::models::{AccessToken, NewUser, User};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Durable record of users
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new user. Fails with `EmailExists` when the email is taken.
    async fn create(&self, user: NewUser) -> Result<User, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;

    /// Replace the stored password hash, returning the updated user
    async fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<Option<User>, AuthError>;
}

/// Durable record of issued access tokens
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Delete the inactive tokens of `user_id`, revoke the rest and insert
    /// `token`, atomically
    async fn rotate_for_user(&self, user_id: Uuid, token: &AccessToken) -> Result<(), AuthError>;

    /// Look a token up by the digest of its bearer string
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<AccessToken>, AuthError>;

    /// Delete one token. Returns false when it did not exist.
    async fn delete(&self, id: Uuid) -> Result<bool, AuthError>;

    /// Delete all tokens of a user, returning how many were removed
    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, AuthError>;

    /// All tokens of a user, newest first
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<AccessToken>, AuthError>;

    /// Record that a token was used to authenticate a request
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;
}
