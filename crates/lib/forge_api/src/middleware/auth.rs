//! Authentication middleware: bearer token extraction and verification.

use std::collections::HashMap;

use axum::extract::{Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use forge_core::auth::token::bearer_value;
use forge_core::models::auth::UserId;
use tracing::debug;

use crate::AppState;
use crate::error::AppError;

/// Query parameters accepted when a client cannot set the header.
const QUERY_TOKEN_KEYS: [&str; 3] = ["authorization", "Authorization", "token"];

/// Key used to store the caller's id in request extensions.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub UserId);

/// Axum middleware: reads the token from `Authorization: Bearer <token>` or
/// the query fallback, verifies it, and injects [`AuthenticatedUser`] into
/// request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request_token(&request)
        .ok_or_else(|| AppError::Unauthorized("Missing authorization token".into()))?;

    let user_id = state.tokens.verify(&token).map_err(|e| {
        debug!(reason = ?e, "token rejected");
        AppError::from(e)
    })?;

    request.extensions_mut().insert(AuthenticatedUser(user_id));
    Ok(next.run(request).await)
}

/// Header first, then the query string.
fn request_token(request: &Request) -> Option<String> {
    if let Some(token) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_value)
    {
        return Some(token.to_string());
    }
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(request.uri()).ok()?;
    QUERY_TOKEN_KEYS
        .iter()
        .filter_map(|key| params.get(*key))
        .find_map(|raw| bearer_value(raw))
        .map(str::to_string)
}
