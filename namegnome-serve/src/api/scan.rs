//! Scan endpoint

use crate::error::{ApiError, ApiResult};
use crate::scanner::{MediaScanner, ScanOptions};
use crate::AppState;
use axum::extract::State;
use axum::Json;
use namegnome_common::types::{MediaType, ScanResult};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub root: PathBuf,
    pub media_type: String,
    #[serde(default)]
    pub with_hash: bool,
    #[serde(default)]
    pub anthology: bool,
}

/// POST /scan
pub async fn scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<ScanResult>> {
    let media_type = MediaType::parse(&request.media_type)
        .ok_or_else(|| ApiError::Validation(format!("unknown media type '{}'", request.media_type)))?;

    let scanner = MediaScanner::new(
        media_type,
        ScanOptions {
            with_hash: request.with_hash,
            anthology: request.anthology,
        },
    );

    let root = request.root.clone();
    let result = tokio::task::spawn_blocking(move || scanner.scan(&root))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    tracing::info!(
        "Scan {}: {} files under {}",
        result.scan_id,
        result.file_count,
        state.config.display_path(&request.root)
    );
    Ok(Json(result))
}
