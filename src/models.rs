//! Authentication Models
//!
//! Data structures for authentication requests, responses, and stored entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

// ============================================
// Stored Entities
// ============================================

/// User record owned by the credential store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User data handed to the credential store on registration
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// Access token record owned by the token store.
///
/// Only the SHA-256 digest of the bearer string is kept.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AccessToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Check if token is expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check if token is revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Check if token can still authenticate
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && !self.is_revoked()
    }
}

/// A freshly issued token: the stored record plus the bearer string, which is
/// never persisted.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub record: AccessToken,
    pub token: String,
}

/// Authenticated request context resolved from a bearer token
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub token_id: Uuid,
}

// ============================================
// Request DTOs
// ============================================

/// Registration request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,

    #[validate(
        email(message = "Invalid email format"),
        length(max = 255, message = "Email must be at most 255 characters")
    )]
    pub email: String,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

/// Login request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Token verification request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyTokenRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

/// Change password request (for authenticated users)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 6, message = "New password must be at least 6 characters"))]
    pub new_password: String,
}

// ============================================
// Response DTOs
// ============================================

/// User response (public user data without the password hash)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            created_at: user.created_at,
        }
    }
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            created_at: user.created_at,
        }
    }
}

/// Login outcome
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub message: String,
    /// Email of the authenticated user
    pub user: String,
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    /// True when an existing live token was returned instead of a new one
    #[serde(skip)]
    pub reused: bool,
}

/// Successful token verification
#[derive(Debug, Clone, Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token metadata exposed to its owner
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub current: bool,
}

impl TokenInfo {
    pub fn from_record(record: &AccessToken, current_id: Uuid) -> Self {
        Self {
            id: record.id,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            revoked_at: record.revoked_at,
            last_used_at: record.last_used_at,
            current: record.id == current_id,
        }
    }
}

/// Simple message response
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires_in: Duration, revoked: bool) -> AccessToken {
        let now = Utc::now();
        AccessToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "abc".into(),
            issued_at: now,
            expires_at: now + expires_in,
            revoked_at: revoked.then_some(now),
            last_used_at: None,
        }
    }

    #[test]
    fn test_token_activity() {
        assert!(token(Duration::hours(1), false).is_active());
        assert!(!token(Duration::hours(1), true).is_active());
        assert!(token(Duration::seconds(-1), false).is_expired());
    }

    #[test]
    fn test_user_serialization_omits_password_hash() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            name: "A".into(),
            password_hash: "$argon2id$secret".into(),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "a@x.com");
    }

    #[test]
    fn test_register_request_validation() {
        let bad = RegisterRequest {
            name: "".into(),
            email: "not-an-email".into(),
            password: "123".into(),
        };
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));

        let good = RegisterRequest {
            name: "A".into(),
            email: "a@x.com".into(),
            password: "secret".into(),
        };
        assert!(good.validate().is_ok());
    }
}
