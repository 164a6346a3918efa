//! Disambiguation resolution endpoint

use crate::disambig::DisambigLedger;
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::State;
use axum::Json;
use namegnome_common::Error;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct DisambiguateRequest {
    pub token: String,
    pub choice_id: String,
}

/// POST /disambiguate
///
/// Writes the durable decision; the caller re-issues `/plan`, which now
/// resolves through the pinned entity without prompting again.
pub async fn disambiguate(
    State(state): State<AppState>,
    Json(request): Json<DisambiguateRequest>,
) -> ApiResult<Json<Value>> {
    let ledger = DisambigLedger::new(&state.db);
    let pending = ledger
        .resolve(&request.token, &request.choice_id)
        .await
        .map_err(|e| match e {
            Error::Validation(msg) if msg.contains("unknown token") => ApiError::NotFound(msg),
            other => ApiError::from(other),
        })?;

    Ok(Json(json!({
        "status": "resolved",
        "token": pending.token,
        "scan_id": pending.scan_id,
        "field": pending.field,
    })))
}
