use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{post, put},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            ErrorBody, FlagRequest, FlagResponse, LoginRequest, RefreshRequest, RegisterRequest,
            RegisterResponse, TokenResponse,
        },
        extractors::{AdminUser, RequestId},
        repo_types::{UserFlag, UserId},
        services::AuthError,
    },
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Error returned by every endpoint; the body is `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

pub(crate) fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::UserAlreadyExists => StatusCode::CONFLICT,
        AuthError::InvalidLoginOrPassword | AuthError::InvalidRefreshToken => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::UserUnableToLogIn => StatusCode::FORBIDDEN,
        AuthError::UserDoesNotExist => StatusCode::NOT_FOUND,
        AuthError::Interrupted(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::RegistrationFailed
        | AuthError::LoginFailed
        | AuthError::RefreshFailed
        | AuthError::OperationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self {
            status: status_for(&err),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users/:id/banned", put(set_banned))
        .route("/admin/users/:id/deleted", put(set_deleted))
        .route("/admin/users/:id/admin", put(set_admin))
}

#[instrument(skip_all, fields(request_id = %request_id.0))]
pub async fn register(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let email = normalize_email(&payload.email);

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::bad_request("invalid email"));
    }

    let ctx = state.request_context();
    let user_id = state.auth.register(&ctx, &email, &payload.password).await?;
    Ok(Json(RegisterResponse { user_id }))
}

#[instrument(skip_all, fields(request_id = %request_id.0))]
pub async fn login(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let email = normalize_email(&payload.email);
    let ctx = state.request_context();
    let pair = state.auth.login(&ctx, &email, &payload.password).await?;
    Ok(Json(pair.into()))
}

#[instrument(skip_all, fields(request_id = %request_id.0))]
pub async fn refresh(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let ctx = state.request_context();
    let pair = state.auth.refresh(&ctx, &payload.refresh_token).await?;
    Ok(Json(pair.into()))
}

async fn update_flag(
    state: &AppState,
    admin: &AdminUser,
    user_id: UserId,
    flag: UserFlag,
    value: bool,
) -> Result<Json<FlagResponse>, ApiError> {
    let ctx = state.request_context();
    let value = match flag {
        UserFlag::Banned => state.auth.set_banned(&ctx, user_id, value).await,
        UserFlag::Deleted => state.auth.set_deleted(&ctx, user_id, value).await,
        UserFlag::Admin => state.auth.set_admin(&ctx, user_id, value).await,
    }?;
    info!(admin_id = %admin.0.sub, flag = %flag, value, "flag changed by admin");
    Ok(Json(FlagResponse { user_id, value }))
}

#[instrument(skip_all, fields(request_id = %request_id.0, user_id = id))]
pub async fn set_banned(
    State(state): State<AppState>,
    request_id: RequestId,
    admin: AdminUser,
    Path(id): Path<i64>,
    Json(payload): Json<FlagRequest>,
) -> Result<Json<FlagResponse>, ApiError> {
    update_flag(&state, &admin, UserId(id), UserFlag::Banned, payload.value).await
}

#[instrument(skip_all, fields(request_id = %request_id.0, user_id = id))]
pub async fn set_deleted(
    State(state): State<AppState>,
    request_id: RequestId,
    admin: AdminUser,
    Path(id): Path<i64>,
    Json(payload): Json<FlagRequest>,
) -> Result<Json<FlagResponse>, ApiError> {
    update_flag(&state, &admin, UserId(id), UserFlag::Deleted, payload.value).await
}

#[instrument(skip_all, fields(request_id = %request_id.0, user_id = id))]
pub async fn set_admin(
    State(state): State<AppState>,
    request_id: RequestId,
    admin: AdminUser,
    Path(id): Path<i64>,
    Json(payload): Json<FlagRequest>,
) -> Result<Json<FlagResponse>, ApiError> {
    update_flag(&state, &admin, UserId(id), UserFlag::Admin, payload.value).await
}
