//! Authentication HTTP Handlers
//!
//! REST API endpoints for authentication operations.

use crate::error::AuthError;
use crate::extractors::{AuthUser, BearerToken, ValidatedJson};
use crate::middleware;
use crate::models::*;
use crate::service::AuthService;

use axum::{
    extract::State,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

/// Shared auth service state
pub type AuthState = Arc<AuthService>;

// ============================================
// Route Builder
// ============================================

/// Create authentication routes
pub fn create_routes(auth_service: Arc<AuthService>) -> Router {
    // Public routes (no authentication required)
    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/verify-token", post(verify_token))
        // Needs a bearer header, but stays idempotent for already-revoked tokens
        .route("/auth/logout", post(logout));

    // Protected routes (require an active token)
    let protected = Router::new()
        .route("/auth/me", get(get_current_user))
        .route("/auth/tokens", get(list_tokens))
        .route("/auth/change-password", post(change_password))
        .layer(axum_middleware::from_fn_with_state(
            auth_service.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(auth_service)
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================
// Registration
// ============================================

/// POST /auth/register
///
/// Register a new user account
pub async fn register(
    State(auth): State<AuthState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let user = auth.register(req).await?;

    Ok(Json(serde_json::json!({
        "message": "User registered successfully",
        "user": UserResponse::from(user)
    })))
}

// ============================================
// Login / Logout
// ============================================

/// POST /auth/login
///
/// Authenticate user and return a bearer token
pub async fn login(
    State(auth): State<AuthState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let response = auth.login(req).await?;

    Ok(Json(response))
}

/// POST /auth/logout
///
/// Revoke every token of the caller
pub async fn logout(
    State(auth): State<AuthState>,
    BearerToken(token): BearerToken,
) -> Result<impl IntoResponse, AuthError> {
    auth.logout(&token).await?;

    Ok(Json(MessageResponse::new("User logged out successfully")))
}

// ============================================
// Token Verification
// ============================================

/// POST /auth/verify-token
///
/// Validate a token and exchange it for a fresh one
pub async fn verify_token(
    State(auth): State<AuthState>,
    ValidatedJson(req): ValidatedJson<VerifyTokenRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let response = auth.verify_token(&req.token).await?;

    Ok(Json(response))
}

// ============================================
// Authenticated Account Routes
// ============================================

/// GET /auth/me
///
/// Get current user profile
pub async fn get_current_user(AuthUser(ctx): AuthUser) -> Result<impl IntoResponse, AuthError> {
    Ok(Json(serde_json::json!({
        "user": UserResponse::from(&ctx.user)
    })))
}

/// GET /auth/tokens
///
/// List the caller's tokens
pub async fn list_tokens(
    State(auth): State<AuthState>,
    AuthUser(ctx): AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    let tokens = auth.list_tokens(&ctx).await?;

    Ok(Json(serde_json::json!({
        "user_id": ctx.user.id,
        "current_token": ctx.token_id,
        "tokens": tokens
    })))
}

/// POST /auth/change-password
///
/// Change password for authenticated user
pub async fn change_password(
    State(auth): State<AuthState>,
    AuthUser(ctx): AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    auth.change_password(&ctx, req).await?;

    Ok(Json(MessageResponse::new(
        "Password changed successfully. Please login again.",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::harness;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, json)
    }

    fn app() -> Router {
        create_routes(harness().service)
    }

    #[tokio::test]
    async fn test_end_to_end_session_lifecycle() {
        let app = app();

        let (status, body) = call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(serde_json::json!({ "email": "a@x.com", "name": "A", "password": "secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "a@x.com");
        assert!(body["user"].get("password_hash").is_none());
        assert!(!body.to_string().contains("argon2"));

        let (status, body) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(serde_json::json!({ "email": "a@x.com", "password": "secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"], "a@x.com");
        let t1 = body["token"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "POST",
            "/auth/verify-token",
            None,
            Some(serde_json::json!({ "token": t1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        let t2 = body["token"].as_str().unwrap().to_string();
        assert_ne!(t1, t2);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(serde_json::json!({ "email": "a@x.com", "password": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_credentials");

        let (status, _) = call(&app, "POST", "/auth/logout", Some(&t2), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/verify-token",
            None,
            Some(serde_json::json!({ "token": t2 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["valid"], false);

        // Logging out again with the dead token is still fine
        let (status, _) = call(&app, "POST", "/auth/logout", Some(&t2), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_duplicate_and_validation() {
        let app = app();
        let body = serde_json::json!({ "email": "a@x.com", "name": "A", "password": "secret" });

        let (status, _) = call(&app, "POST", "/auth/register", None, Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = call(&app, "POST", "/auth/register", None, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "email_exists");

        let (status, json) = call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(serde_json::json!({ "email": "not-an-email", "name": "A", "password": "secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");

        let (status, _) = call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(serde_json::json!({ "email": "b@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_protected_routes_require_active_token() {
        let app = app();

        let (status, _) = call(&app, "GET", "/auth/tokens", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "GET", "/auth/me", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "POST", "/auth/logout", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(serde_json::json!({ "email": "a@x.com", "name": "A", "password": "secret" })),
        )
        .await;
        let (_, login) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(serde_json::json!({ "email": "a@x.com", "password": "secret" })),
        )
        .await;
        let token = login["token"].as_str().unwrap();

        let (status, me) = call(&app, "GET", "/auth/me", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["user"]["email"], "a@x.com");

        let (status, tokens) = call(&app, "GET", "/auth/tokens", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tokens["tokens"].as_array().unwrap().len(), 1);
        assert_eq!(tokens["tokens"][0]["current"], true);
        assert!(tokens["tokens"][0].get("token_hash").is_none());
    }

    #[tokio::test]
    async fn test_change_password_route() {
        let app = app();
        call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(serde_json::json!({ "email": "a@x.com", "name": "A", "password": "secret" })),
        )
        .await;
        let (_, login) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(serde_json::json!({ "email": "a@x.com", "password": "secret" })),
        )
        .await;
        let token = login["token"].as_str().unwrap();

        let (status, _) = call(
            &app,
            "POST",
            "/auth/change-password",
            Some(token),
            Some(serde_json::json!({ "current_password": "secret", "new_password": "new-secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "GET", "/auth/me", Some(token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(serde_json::json!({ "email": "a@x.com", "password": "new-secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&app(), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
