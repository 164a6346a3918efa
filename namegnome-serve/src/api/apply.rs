//! Apply and rollback endpoints

use crate::apply::{apply_plan, rollback_report, ApplyOptions};
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use namegnome_common::types::{ApplyMode, ApplyResult, CollisionStrategy, PlanReview};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub plan: PlanReview,
    pub root: PathBuf,
    #[serde(default)]
    pub mode: ApplyMode,
    #[serde(default)]
    pub collision: CollisionStrategy,
}

/// POST /apply
///
/// 200 when every item landed, 207 when any item failed or was skipped.
pub async fn apply(
    State(state): State<AppState>,
    Json(request): Json<ApplyRequest>,
) -> ApiResult<Response> {
    let job_id = state.jobs.create("apply");
    let result = apply_plan(
        &state.db,
        &request.plan,
        &request.root,
        ApplyOptions {
            mode: request.mode,
            collision: request.collision,
        },
        Some((state.jobs.bus(), job_id)),
    )
    .await;

    match result {
        Ok(report) => {
            state
                .jobs
                .complete(job_id, serde_json::to_value(&report).unwrap_or_default());
            Ok(respond_with_report(report))
        }
        Err(e) => {
            state.jobs.fail(job_id, e.to_string());
            Err(ApiError::from(e))
        }
    }
}

fn respond_with_report(report: ApplyResult) -> Response {
    let status = if report.failed_count > 0 || report.skipped_count > 0 {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub root: PathBuf,
    pub rollback_token: String,
}

/// POST /rollback
///
/// Undo the committed subset of a previous apply by its rollback token.
pub async fn rollback(
    State(state): State<AppState>,
    Json(request): Json<RollbackRequest>,
) -> ApiResult<Response> {
    let result = rollback_report(&state.db, &request.root, &request.rollback_token)
        .await
        .map_err(|e| match e {
            namegnome_common::Error::Validation(msg) if msg.contains("unknown rollback") => {
                ApiError::NotFound(msg)
            }
            other => ApiError::from(other),
        })?;
    Ok(respond_with_report(result))
}
