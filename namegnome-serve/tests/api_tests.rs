//! HTTP surface tests: routing, status codes, and the disambiguation
//! round trip, driven through the router with oneshot requests.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use helpers::{app_state, StaticProvider};
use http_body_util::BodyExt;
use namegnome_common::db::locks;
use namegnome_common::types::MediaType;
use namegnome_serve::providers::MetadataProvider;
use namegnome_serve::build_router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"media").unwrap();
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn tv_chains(provider: StaticProvider) -> HashMap<MediaType, Vec<Arc<dyn MetadataProvider>>> {
    let mut chains: HashMap<MediaType, Vec<Arc<dyn MetadataProvider>>> = HashMap::new();
    chains.insert(MediaType::Tv, vec![Arc::new(provider)]);
    chains
}

#[tokio::test]
async fn healthz_returns_ok() {
    let state = app_state(HashMap::new()).await;
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn scan_returns_snapshot_with_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    touch(&dir.path().join("Show - S01E01 - Pilot.mkv"));

    let state = app_state(HashMap::new()).await;
    let app = build_router(state);

    let response = app
        .oneshot(post(
            "/scan",
            json!({ "root": dir.path(), "media_type": "tv" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["file_count"], 1);
    assert!(body["source_fingerprint"].as_str().unwrap().len() == 64);
}

#[tokio::test]
async fn scan_rejects_unknown_media_type() {
    let state = app_state(HashMap::new()).await;
    let app = build_router(state);

    let response = app
        .oneshot(post(
            "/scan",
            json!({ "root": "/tmp", "media_type": "podcast" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn plan_disambiguation_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    touch(&dir.path().join("Danger Mouse-S01E01-Pilot.mp4"));

    let provider = StaticProvider::tv("tvdb")
        .with_series("1981-id", "Danger Mouse", 1981)
        .with_series("2015-id", "Danger Mouse", 2015)
        .with_episode("2015-id", 1, 1, "Danger Mouse Begins Again");

    let state = app_state(tv_chains(provider)).await;
    let app = build_router(state);

    // First plan prompts with both candidates
    let response = app
        .clone()
        .oneshot(post(
            "/plan",
            json!({ "root": dir.path(), "media_type": "tv" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["status"], "disambiguation_required");
    assert_eq!(body["candidates"].as_array().unwrap().len(), 2);
    let token = body["disambiguation_token"].as_str().unwrap().to_string();

    // Resolve toward the 2015 series
    let response = app
        .clone()
        .oneshot(post(
            "/disambiguate",
            json!({ "token": token, "choice_id": "2015-id" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Re-plan emits the mapping without prompting again
    let response = app
        .oneshot(post(
            "/plan",
            json!({ "root": dir.path(), "media_type": "tv" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["items"][0]["sources"][0]["id"], "2015-id");
}

#[tokio::test]
async fn disambiguate_unknown_token_is_404() {
    let state = app_state(HashMap::new()).await;
    let app = build_router(state);

    let response = app
        .oneshot(post(
            "/disambiguate",
            json!({ "token": "dsk_nonexistent", "choice_id": "x" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn job_status_unknown_is_404() {
    let state = app_state(HashMap::new()).await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/jobs/00000000-0000-0000-0000-000000000000/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn async_plan_returns_job_id_and_buffered_result() {
    let dir = tempfile::tempdir().unwrap();
    touch(
        &dir.path()
            .join("Danger Mouse (2015)/Season 01/Danger Mouse 2015-S01E01-Danger Mouse Begins Again.mp4"),
    );

    let provider = StaticProvider::tv("tvdb")
        .with_series("78312", "Danger Mouse", 2015)
        .with_episode("78312", 1, 1, "Danger Mouse Begins Again");

    let state = app_state(tv_chains(provider)).await;
    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(post(
            "/plan",
            json!({ "root": dir.path(), "media_type": "tv", "async_mode": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // Poll until the buffered result lands
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{}/status", job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        if status["state"] == "done" {
            assert_eq!(status["result"]["summary"]["total_items"], 1);
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("async plan never completed");
}

#[tokio::test]
async fn apply_on_locked_root_is_423() {
    let dir = tempfile::tempdir().unwrap();
    touch(&dir.path().join("old.mkv"));

    let state = app_state(HashMap::new()).await;
    locks::acquire_lock(&state.db, &dir.path().to_string_lossy(), "job-held", 3600)
        .await
        .unwrap();
    let app = build_router(state);

    let plan = json!({
        "plan_id": "pln_x",
        "schema_version": "1.0",
        "generated_at": "2024-06-01T00:00:00Z",
        "scan_id": "scn_x",
        "source_fingerprint": "fp",
        "media_type": "tv",
        "summary": {
            "total_items": 0,
            "by_origin": {},
            "by_confidence": {},
            "warnings": 0,
            "anthology_candidates": 0,
            "disambiguations_required": 0
        },
        "groups": [],
        "items": [],
        "notes": []
    });

    let response = app
        .oneshot(post(
            "/apply",
            json!({ "plan": plan, "root": dir.path() }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::LOCKED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "LOCKED");
    assert_eq!(body["error"]["active_job_id"], "job-held");
}
