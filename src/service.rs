//! Authentication Service
//!
//! Register, login, logout and token verification over the credential store,
//! the token store and the session cache.
//!
//! Token rotation follows two distinct policies:
//!
//! - **login** is idempotent while a token is live: repeated logins return the
//!   cached token and only issue a new one when none is cached.
//! - **verify** is single-use: every successful verification revokes the
//!   presented token and hands back a fresh one.

use crate::cache::{CachedToken, SessionCache};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::*;
use crate::store::{CredentialStore, TokenStore};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Authentication service
pub struct AuthService {
    config: AuthConfig,
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<dyn TokenStore>,
    cache: SessionCache,
    argon2: Argon2<'static>,
    // Verified against when the email is unknown, so both rejections cost one Argon2 run
    dummy_hash: String,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(
        config: AuthConfig,
        credentials: Arc<dyn CredentialStore>,
        tokens: Arc<dyn TokenStore>,
        cache: SessionCache,
    ) -> Result<Self, AuthError> {
        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            config.argon2_params()?,
        );

        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(Uuid::new_v4().as_bytes(), &salt)?
            .to_string();

        Ok(Self {
            config,
            credentials,
            tokens,
            cache,
            argon2,
            dummy_hash,
        })
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Run a store call under the configured timeout
    async fn store<T, F>(&self, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, AuthError>>,
    {
        match tokio::time::timeout(self.config.store_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::StoreTimeout(self.config.store_timeout_ms)),
        }
    }

    // ============================================
    // Password Hashing
    // ============================================

    /// Hash a password using Argon2id
    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)?
            .to_string();

        Ok(hash)
    }

    /// Verify a password against a hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed_hash = PasswordHash::new(hash)?;

        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    fn validate_password(&self, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < self.config.min_password_length {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                self.config.min_password_length
            )));
        }
        Ok(())
    }

    // ============================================
    // Token Issuing
    // ============================================

    /// Hash a bearer token for storage (SHA256)
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate random token
    fn generate_random_token() -> String {
        let bytes: [u8; 32] = rand::thread_rng().gen();
        hex::encode(bytes)
    }

    /// Revoke the user's tokens and issue a new one. Caller holds the user's lock.
    async fn issue_token(&self, user: &User) -> Result<IssuedToken, AuthError> {
        let token = Self::generate_random_token();
        let now = Utc::now();

        let record = AccessToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: Self::hash_token(&token),
            issued_at: now,
            expires_at: now + self.config.token_lifetime(),
            revoked_at: None,
            last_used_at: None,
        };

        self.store(self.tokens.rotate_for_user(user.id, &record))
            .await?;

        tracing::debug!(user_id = %user.id, token_id = %record.id, "Access token issued");

        Ok(IssuedToken { record, token })
    }

    async fn cache_token(&self, email: &str, issued: &IssuedToken) {
        let cached = CachedToken {
            token: issued.token.clone(),
            token_id: issued.record.id,
            expires_at: issued.record.expires_at,
        };
        self.cache.put_token(email, &cached).await;
    }

    // ============================================
    // Registration
    // ============================================

    /// Register a new user
    pub async fn register(&self, req: RegisterRequest) -> Result<User, AuthError> {
        self.validate_password(&req.password)?;

        // Users are never deleted and snapshots are only written after a
        // successful store write, so a cached user is a definite duplicate.
        if self.cache.user_snapshot(&req.email).await.is_some() {
            return Err(AuthError::EmailExists);
        }

        let password_hash = self.hash_password(&req.password)?;

        let user = self
            .store(self.credentials.create(NewUser {
                email: req.email,
                name: req.name,
                password_hash,
            }))
            .await?;

        self.cache.put_user(&user).await;

        tracing::info!(user_id = %user.id, email = %user.email, "User registered");

        Ok(user)
    }

    // ============================================
    // Login / Logout
    // ============================================

    /// Authenticate with email and password.
    ///
    /// Returns the cached token while it is live; issues a new one otherwise.
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AuthError> {
        let _guard = self.cache.lock(&req.email).await;

        if let Some(response) = self.login_from_cache(&req).await? {
            return Ok(response);
        }

        let user = match self
            .store(self.credentials.find_by_email(&req.email))
            .await?
        {
            Some(user) => user,
            None => {
                self.verify_password(&req.password, &self.dummy_hash)?;
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !self.verify_password(&req.password, &user.password_hash)? {
            tracing::debug!(user_id = %user.id, "Login rejected: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        if let Some(cached) = self.cache.active_token(&user.email).await {
            self.cache.put_user(&user).await;
            return Ok(Self::already_logged_in(&user.email, cached));
        }

        let issued = self.issue_token(&user).await?;
        self.cache.put_user(&user).await;
        self.cache_token(&user.email, &issued).await;

        tracing::info!(user_id = %user.id, "User logged in");

        Ok(Self::logged_in(&user.email, issued))
    }

    /// Fast path: answer from the cached snapshot when it matches.
    ///
    /// `None` means fall through to the credential store. That happens on a
    /// cache miss, on a password mismatch (the stored hash may be newer than
    /// the snapshot), and when the snapshot no longer agrees with the store.
    async fn login_from_cache(&self, req: &LoginRequest) -> Result<Option<LoginResponse>, AuthError> {
        let snapshot = match self.cache.user_snapshot(&req.email).await {
            Some(snapshot) => snapshot,
            None => return Ok(None),
        };

        if snapshot.email != req.email
            || !self.verify_password(&req.password, &snapshot.password_hash)?
        {
            tracing::debug!(user_id = %snapshot.id, "Cached credentials did not match, checking store");
            return Ok(None);
        }

        if let Some(cached) = self.cache.active_token(&snapshot.email).await {
            return Ok(Some(Self::already_logged_in(&snapshot.email, cached)));
        }

        // Issuing a token changes state: the store must agree with the snapshot.
        let user = match self
            .store(self.credentials.find_by_email(&snapshot.email))
            .await?
        {
            Some(user) if user.id == snapshot.id && user.password_hash == snapshot.password_hash => {
                user
            }
            _ => {
                tracing::debug!(user_id = %snapshot.id, "Stale user snapshot, checking store");
                self.cache.invalidate(&snapshot.email).await;
                return Ok(None);
            }
        };

        let issued = self.issue_token(&user).await?;
        self.cache_token(&user.email, &issued).await;

        tracing::info!(user_id = %user.id, "User logged in");

        Ok(Some(Self::logged_in(&user.email, issued)))
    }

    fn already_logged_in(email: &str, cached: CachedToken) -> LoginResponse {
        LoginResponse {
            message: "User already logged in".to_string(),
            user: email.to_string(),
            token: cached.token,
            token_type: "Bearer".to_string(),
            expires_at: cached.expires_at,
            reused: true,
        }
    }

    fn logged_in(email: &str, issued: IssuedToken) -> LoginResponse {
        LoginResponse {
            message: "User logged in successfully".to_string(),
            user: email.to_string(),
            token: issued.token,
            token_type: "Bearer".to_string(),
            expires_at: issued.record.expires_at,
            reused: false,
        }
    }

    /// Logout the owner of `token`.
    ///
    /// Deletes the presented token and every other token of its owner and drops
    /// both cache entries. Unknown, revoked and expired tokens are a no-op, so
    /// logout is idempotent and a stale token cannot end a live session.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let token_hash = Self::hash_token(token);

        let record = match self.store(self.tokens.find_by_hash(&token_hash)).await? {
            Some(record) => record,
            None => {
                tracing::debug!("Logout with unknown token, nothing to do");
                return Ok(());
            }
        };

        if !record.is_active() {
            tracing::debug!(token_id = %record.id, "Logout with inactive token, nothing to do");
            return Ok(());
        }

        let user = self
            .store(self.credentials.find_by_id(record.user_id))
            .await?;

        let _guard = match &user {
            Some(user) => Some(self.cache.lock(&user.email).await),
            None => None,
        };

        let deleted = self.store(self.tokens.delete(record.id)).await?;
        let removed = self
            .store(self.tokens.delete_all_for_user(record.user_id))
            .await?
            + u64::from(deleted);

        if let Some(user) = &user {
            self.cache.invalidate(&user.email).await;
        }

        tracing::info!(user_id = %record.user_id, removed, "User logged out");

        Ok(())
    }

    // ============================================
    // Token Verification
    // ============================================

    /// Look a bearer token up and check that it can still be used
    async fn resolve_token(&self, token: &str) -> Result<(AccessToken, User), AuthError> {
        let token_hash = Self::hash_token(token);

        let record = self
            .store(self.tokens.find_by_hash(&token_hash))
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if record.is_expired() {
            return Err(AuthError::TokenExpired);
        }

        if record.is_revoked() {
            return Err(AuthError::InvalidToken);
        }

        let user = self
            .store(self.credentials.find_by_id(record.user_id))
            .await?
            .ok_or(AuthError::InvalidToken)?;

        Ok((record, user))
    }

    /// Verify a token and rotate it.
    ///
    /// The presented token is revoked; the response carries its replacement.
    pub async fn verify_token(&self, token: &str) -> Result<VerifyTokenResponse, AuthError> {
        let (record, user) = self.resolve_token(token).await?;

        let _guard = self.cache.lock(&user.email).await;

        // A concurrent verify or logout may have consumed the token meanwhile.
        match self
            .store(self.tokens.find_by_hash(&record.token_hash))
            .await?
        {
            Some(current) if current.is_active() => {}
            Some(current) if current.is_expired() => return Err(AuthError::TokenExpired),
            _ => return Err(AuthError::InvalidToken),
        }

        let issued = self.issue_token(&user).await?;
        self.cache_token(&user.email, &issued).await;
        self.cache.put_user(&user).await;

        tracing::info!(user_id = %user.id, "Token verified and rotated");

        Ok(VerifyTokenResponse {
            valid: true,
            token: issued.token,
            expires_at: issued.record.expires_at,
        })
    }

    /// Resolve a bearer token to its owner without rotating it
    pub async fn authenticate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let (record, user) = self.resolve_token(token).await?;

        self.store(self.tokens.touch(record.id, Utc::now())).await?;

        Ok(AuthContext {
            user,
            token_id: record.id,
        })
    }

    // ============================================
    // Account Helpers
    // ============================================

    /// Tokens issued to the authenticated user
    pub async fn list_tokens(&self, ctx: &AuthContext) -> Result<Vec<TokenInfo>, AuthError> {
        let tokens = self
            .store(self.tokens.list_for_user(ctx.user.id))
            .await?;

        Ok(tokens
            .iter()
            .map(|record| TokenInfo::from_record(record, ctx.token_id))
            .collect())
    }

    /// Change password for authenticated user.
    ///
    /// Revokes every token; the new hash is written through to the cache.
    pub async fn change_password(
        &self,
        ctx: &AuthContext,
        req: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        let _guard = self.cache.lock(&ctx.user.email).await;

        let user = self
            .store(self.credentials.find_by_id(ctx.user.id))
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if !self.verify_password(&req.current_password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        self.validate_password(&req.new_password)?;
        let password_hash = self.hash_password(&req.new_password)?;

        let user = self
            .store(self.credentials.update_password_hash(user.id, &password_hash))
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let revoked = self.store(self.tokens.delete_all_for_user(user.id)).await?;

        self.cache.put_user(&user).await;
        self.cache.invalidate_token(&user.email).await;

        tracing::info!(user_id = %user.id, revoked, "Password changed");

        Ok(())
    }
}
