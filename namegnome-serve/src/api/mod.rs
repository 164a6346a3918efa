//! REST surface for the scan/plan/apply pipeline

pub mod apply;
pub mod disambiguate;
pub mod health;
pub mod jobs;
pub mod plan;
pub mod scan;

use crate::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Build the application router.
///
/// - `GET  /healthz` - liveness
/// - `POST /scan` - scan a root, return the snapshot
/// - `POST /plan` - scan + plan; 202 with a job id when `async_mode`
/// - `POST /disambiguate` - resolve a pending token
/// - `POST /apply` - execute an approved plan
/// - `POST /rollback` - undo a previous apply by report id
/// - `GET  /jobs/{id}/events` - SSE progress stream
/// - `GET  /jobs/{id}/status` - job state and buffered result
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/scan", post(scan::scan))
        .route("/plan", post(plan::plan))
        .route("/disambiguate", post(disambiguate::disambiguate))
        .route("/apply", post(apply::apply))
        .route("/rollback", post(apply::rollback))
        .route("/jobs/:id/events", get(jobs::job_events))
        .route("/jobs/:id/status", get(jobs::job_status))
        .with_state(state)
}
