//! Application error types.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use forge_core::auth::AuthError;
use forge_core::pipeline::PipelineError;
use forge_core::store::StoreError;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Message returned for every generation failure; provider detail stays in
/// the logs.
pub const UPSTREAM_MESSAGE: &str = "Generation service unavailable";

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Locked out for {retry_after_secs}s")]
    LockedOut { retry_after_secs: u64 },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message, retry_after_secs) = match &self {
            AppError::Validation(m) => {
                (StatusCode::BAD_REQUEST, "validation_error", m.clone(), None)
            }
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone(), None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.clone(), None),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.clone(), None),
            AppError::LockedOut { retry_after_secs } => (
                StatusCode::UNAUTHORIZED,
                "locked_out",
                "Too many failed attempts, try again later".to_string(),
                Some(*retry_after_secs),
            ),
            AppError::Upstream(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream_error",
                UPSTREAM_MESSAGE.to_string(),
                None,
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error".to_string(),
                None,
            ),
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
            retry_after_secs,
        });
        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after_secs {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => AppError::NotFound(msg),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => {
                error!(error = %other, "store failure");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(msg) => AppError::Validation(msg),
            e @ AuthError::Conflict(_) => AppError::Conflict(e.to_string()),
            e @ AuthError::InvalidCredentials => AppError::Unauthorized(e.to_string()),
            AuthError::LockedOut { retry_after_secs } => AppError::LockedOut { retry_after_secs },
            e @ (AuthError::ExpiredToken | AuthError::InvalidToken) => {
                AppError::Unauthorized(e.to_string())
            }
            AuthError::Store(e) => AppError::from(e),
            AuthError::Internal(msg) => {
                error!(error = %msg, "auth failure");
                AppError::Internal(msg)
            }
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(msg) => AppError::Validation(msg),
            e @ PipelineError::Upstream { .. } => {
                warn!(error = %e, "generation failed");
                AppError::Upstream(e.to_string())
            }
            PipelineError::Store(e) => AppError::from(e),
        }
    }
}

/// Malformed or mistyped JSON bodies are client errors like any other
/// validation failure.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn lockout_carries_retry_after() {
        let resp = AppError::LockedOut {
            retry_after_secs: 840,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[RETRY_AFTER], "840");
        let json = body_json(resp).await;
        assert_eq!(json["error"], "locked_out");
        assert_eq!(json["retry_after_secs"], 840);
    }

    #[tokio::test]
    async fn upstream_detail_is_not_exposed() {
        let resp = AppError::Upstream("401 from provider: bad key sk-123".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["message"], UPSTREAM_MESSAGE);
        assert!(!json.to_string().contains("sk-123"));
        assert!(json.get("retry_after_secs").is_none());
    }

    #[test]
    fn credential_errors_share_one_message() {
        let wrong = AppError::from(AuthError::InvalidCredentials);
        assert!(matches!(wrong, AppError::Unauthorized(ref m) if m == "Invalid credentials"));
        let expired = AppError::from(AuthError::ExpiredToken).to_string();
        let invalid = AppError::from(AuthError::InvalidToken).to_string();
        assert_eq!(expired, invalid);
    }
}
