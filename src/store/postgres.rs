//! PostgreSQL store backends

use super::{CredentialStore, TokenStore};
use crate::error::AuthError;
use crate::models::{AccessToken, NewUser, User};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Create the authentication tables
pub async fn run_migrations(db: &PgPool) -> Result<(), AuthError> {
    tracing::info!("Running authentication database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            email VARCHAR(255) NOT NULL UNIQUE,
            name VARCHAR(255) NOT NULL,
            password_hash VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS access_tokens (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token_hash VARCHAR(64) NOT NULL UNIQUE,
            issued_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            revoked_at TIMESTAMPTZ,
            last_used_at TIMESTAMPTZ
        );
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_access_tokens_user ON access_tokens(user_id);")
        .execute(db)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_access_tokens_expires ON access_tokens(expires_at);",
    )
    .execute(db)
    .await?;

    tracing::info!("Authentication migrations completed successfully");
    Ok(())
}

/// Credential store backed by the `users` table
#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create(&self, user: NewUser) -> Result<User, AuthError> {
        // The unique index on email is the arbiter between concurrent registrations.
        let created: Option<User> = sqlx::query_as(
            r#"
            INSERT INTO users (email, name, password_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .fetch_optional(&self.db)
        .await?;

        created.ok_or(AuthError::EmailExists)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as(
            "UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(password_hash)
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }
}

/// Token store backed by the `access_tokens` table
#[derive(Clone)]
pub struct PgTokenStore {
    db: PgPool,
}

impl PgTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn rotate_for_user(&self, user_id: Uuid, token: &AccessToken) -> Result<(), AuthError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM access_tokens
            WHERE user_id = $1 AND (revoked_at IS NOT NULL OR expires_at <= NOW())
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE access_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO access_tokens (id, user_id, token_hash, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<AccessToken>, AuthError> {
        let token = sqlx::query_as("SELECT * FROM access_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.db)
            .await?;
        Ok(token)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<AccessToken>, AuthError> {
        let tokens = sqlx::query_as(
            "SELECT * FROM access_tokens WHERE user_id = $1 ORDER BY issued_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(tokens)
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        let result = sqlx::query("UPDATE access_tokens SET last_used_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(token_id = %id, "Failed to record token use");
        }

        Ok(())
    }
}
