//! Authentication request handlers.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::{Extension, Json};
use forge_core::auth::credentials::normalize_email;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{AuthResponse, CredentialsRequest, UserResponse};

/// `POST /auth/register`: create an account and return a session token.
pub async fn register_handler(
    State(state): State<AppState>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let Json(body) = body?;
    let id = state
        .credentials
        .register(&body.email, &body.password)
        .await?;
    let token = state.tokens.issue(id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            id,
            email: normalize_email(&body.email),
            token,
        }),
    ))
}

/// `POST /auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> AppResult<Json<AuthResponse>> {
    let Json(body) = body?;
    let id = state.credentials.verify(&body.email, &body.password).await?;
    let token = state.tokens.issue(id)?;
    Ok(Json(AuthResponse {
        id,
        email: normalize_email(&body.email),
        token,
    }))
}

/// `GET /auth/me`: the account behind the presented token.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> AppResult<Json<UserResponse>> {
    let user = state
        .credentials
        .user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(Json(user.into()))
}
