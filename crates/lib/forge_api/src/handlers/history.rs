//! Run history handlers.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use forge_core::models::run::{RunDetail, RunId};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{HistoryQuery, RunSummary};

const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 100;

/// `GET /history`: the caller's most recent runs, newest first.
pub async fn list_runs_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<RunSummary>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let runs = state.runs.list_runs(user_id, limit).await?;
    Ok(Json(runs.into_iter().map(RunSummary::from).collect()))
}

/// `GET /history/{id}`: one run with its agent rows.
///
/// Another user's run is reported as missing.
pub async fn get_run_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> AppResult<Json<RunDetail>> {
    let not_found = || AppError::NotFound("Run not found".into());
    let run_id: RunId = id.parse().map_err(|_| not_found())?;
    let detail = state
        .runs
        .get_run(run_id, user_id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(detail))
}
