use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use tracing::warn;

use crate::auth::claims::AccessClaims;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id supplied by the caller in `x-request-id`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| RequestId(v.to_string()))
            .ok_or((StatusCode::BAD_REQUEST, "missing request id".into()))
    }
}

/// Claims of a valid access token that carries the admin claim.
pub struct AdminUser(pub AccessClaims);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Read Authorization header
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing Authorization header".into()))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "invalid auth scheme".into()))?;

        let claims = state.tokens.parse_access(token).map_err(|_| {
            warn!("invalid or expired access token");
            (StatusCode::UNAUTHORIZED, "invalid or expired token".into())
        })?;

        if !claims.adm {
            warn!(user_id = %claims.sub, "admin route called without admin claim");
            return Err((StatusCode::FORBIDDEN, "admin privileges required".into()));
        }

        Ok(AdminUser(claims))
    }
}
