//! Authentication Middleware
//!
//! Bearer token validation against the token store.

use crate::error::AuthError;
use crate::extractors::BearerToken;
use crate::handlers::AuthState;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

/// Require authenticated user
///
/// Resolves the bearer token from the Authorization header and stores the
/// resulting `AuthContext` in request extensions for use by extractors.
/// The token is not rotated.
pub async fn require_auth(
    State(auth): State<AuthState>,
    BearerToken(token): BearerToken,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let ctx = auth.authenticate(&token).await?;

    tracing::debug!(user_id = %ctx.user.id, path = %req.uri().path(), "Authenticated request");

    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}
