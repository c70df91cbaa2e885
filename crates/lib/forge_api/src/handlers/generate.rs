//! Generation handler.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::{Extension, Json};
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{GenerateRequest, GenerateResponse};

/// `POST /generate`: run the requested agents and return the bundle.
///
/// A run that stops on a contract violation still answers 200 with the
/// stages that passed and the `error` field set.
pub async fn generate_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> AppResult<Json<GenerateResponse>> {
    let Json(body) = body?;
    let request = body.into_generation(user_id).map_err(AppError::Validation)?;
    info!(%user_id, agents = request.agents.len(), "generation requested");

    // Detached so a dropped connection does not cancel a stage mid-flight;
    // the run still finishes and is persisted.
    let orchestrator = state.orchestrator.clone();
    let outcome = tokio::spawn(async move { orchestrator.run(request).await })
        .await
        .map_err(|e| AppError::Internal(format!("pipeline task: {e}")))??;

    Ok(Json(outcome.into()))
}
