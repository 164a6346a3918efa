//! Job status and SSE event stream endpoints
//!
//! SSE events are hints for progress UIs; the buffered result served by
//! `/jobs/{id}/status` stays authoritative.

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use namegnome_common::events::NgEvent;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// GET /jobs/{id}/status
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<crate::jobs::JobRecord>> {
    state
        .jobs
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown job {}", id)))
}

/// GET /jobs/{id}/events - SSE stream of `progress`, `llm_token`,
/// `warning`, and `done` events for one job.
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if state.jobs.get(id).is_none() {
        return Err(ApiError::NotFound(format!("unknown job {}", id)));
    }

    info!("New SSE client for job {}", id);
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: heartbeat for job {}", id);
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    let Ok(event) = received else {
                        warn!("SSE: event bus closed or lagged for job {}", id);
                        break;
                    };
                    if event.job_id() != id {
                        continue;
                    }

                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(payload) => {
                            yield Ok(Event::default().event(event_type).data(payload));
                        }
                        Err(e) => {
                            warn!("SSE: failed to serialize {}: {}", event_type, e);
                        }
                    }

                    if matches!(event, NgEvent::Done { .. }) {
                        break;
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
