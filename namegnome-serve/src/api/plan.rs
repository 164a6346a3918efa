//! Plan endpoint: scan + deterministic/LLM planning

use crate::anthology::llm::OllamaAssist;
use crate::error::{ApiError, ApiResult};
use crate::plan::engine::{PlanEngine, PlanOutcome};
use crate::scanner::{MediaScanner, ScanOptions};
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use namegnome_common::types::{MediaType, ScanResult};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub root: PathBuf,
    pub media_type: String,
    #[serde(default)]
    pub anthology: bool,
    #[serde(default)]
    pub with_hash: bool,
    /// Respond 202 with a job id and stream progress over SSE
    #[serde(default)]
    pub async_mode: bool,
}

/// POST /plan
pub async fn plan(
    State(state): State<AppState>,
    Json(request): Json<PlanRequest>,
) -> ApiResult<Response> {
    let media_type = MediaType::parse(&request.media_type)
        .ok_or_else(|| ApiError::Validation(format!("unknown media type '{}'", request.media_type)))?;

    if request.async_mode {
        let job_id = state.jobs.create("plan");
        let task_state = state.clone();
        let task_request = request.clone();
        tokio::spawn(async move {
            match run_plan(&task_state, &task_request, media_type, Some(job_id)).await {
                Ok(PlanOutcome::Review(review)) => {
                    let value = serde_json::to_value(&*review).unwrap_or_default();
                    task_state.jobs.complete(job_id, value);
                }
                Ok(PlanOutcome::Disambiguation(pending)) => {
                    task_state
                        .jobs
                        .complete(job_id, disambiguation_body(&pending));
                }
                Err(e) => {
                    task_state.jobs.fail(job_id, e.to_string());
                }
            }
        });
        return Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response());
    }

    match run_plan(&state, &request, media_type, None).await? {
        PlanOutcome::Review(review) => Ok(Json(*review).into_response()),
        PlanOutcome::Disambiguation(pending) => Ok((
            StatusCode::CONFLICT,
            Json(disambiguation_body(&pending)),
        )
            .into_response()),
    }
}

fn disambiguation_body(pending: &crate::disambig::PendingDisambiguation) -> serde_json::Value {
    json!({
        "status": "disambiguation_required",
        "disambiguation_token": pending.token,
        "field": pending.field,
        "candidates": pending.candidates,
        "suggested": pending.suggested,
    })
}

async fn run_plan(
    state: &AppState,
    request: &PlanRequest,
    media_type: MediaType,
    job_id: Option<Uuid>,
) -> Result<PlanOutcome, ApiError> {
    let scan = scan_root(request, media_type).await?;

    let assist = OllamaAssist::new(
        state.config.ollama_url.clone(),
        state.config.ollama_model.clone(),
        state.config.llm_timeout,
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let engine = PlanEngine::new(&state.db, &state.gateway, Some(&assist));
    let events = job_id.map(|id| (state.jobs.bus(), id));

    engine.generate(&scan, events).await.map_err(ApiError::from)
}

async fn scan_root(request: &PlanRequest, media_type: MediaType) -> Result<ScanResult, ApiError> {
    let scanner = MediaScanner::new(
        media_type,
        ScanOptions {
            with_hash: request.with_hash,
            anthology: request.anthology,
        },
    );
    let root = request.root.clone();
    tokio::task::spawn_blocking(move || scanner.scan(&root))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Validation(e.to_string()))
}
