//! Tests for the dashboard API routes.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use benchstate::api::{AppState, router};
use benchstate::engine::types::*;
use benchstate::engine::{CaseRegistry, RunStateEngine};
use benchstate::storage::StateStore;
use benchstate::storage::memory_store::MemoryStateStore;

fn id(s: &str) -> CaseId {
    CaseId::new(s).unwrap()
}

fn build_test_app() -> (Router, Arc<RunStateEngine>, Arc<MemoryStateStore>) {
    let engine = Arc::new(RunStateEngine::new());
    let store = Arc::new(MemoryStateStore::new());
    let state = Arc::new(AppState {
        engine: engine.clone(),
        store: store.clone(),
    });
    (router(state), engine, store)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_reports_idle_engine() {
    let (app, _, _) = build_test_app();
    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["run_active"], false);
}

#[tokio::test]
async fn current_run_is_404_before_start() {
    let (app, _, _) = build_test_app();
    let (status, json) = get_json(app, "/run").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("No run"));
}

#[tokio::test]
async fn current_run_returns_live_document() {
    let (app, engine, _) = build_test_app();
    let mut reg = CaseRegistry::new();
    reg.register(id("power::rails"), vec![]).unwrap();
    engine.start_run("live", reg).await.unwrap();
    engine
        .apply_outcome(&id("power::rails"), Outcome::Passed, OutcomeDetails::default())
        .await
        .unwrap();

    let (status, json) = get_json(app, "/run").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["plan"], "live");
    assert_eq!(json["revision"], 1);
    assert_eq!(json["modules"][0]["name"], "power");
    assert_eq!(json["modules"][0]["cases"][0]["id"], "power::rails");
    assert_eq!(json["modules"][0]["cases"][0]["outcome"], "passed");
}

#[tokio::test]
async fn list_and_get_stored_runs() {
    let (app, engine, store) = build_test_app();
    let mut reg = CaseRegistry::new();
    reg.register(id("one"), vec![]).unwrap();
    engine.start_run("stored", reg).await.unwrap();
    let done = engine.abort_run("bench unplugged").await.unwrap();
    store.persist(&done).await.unwrap();

    let (status, json) = get_json(app.clone(), "/runs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["runs"][0]["status"], "failed");
    assert_eq!(json["runs"][0]["counts"]["skipped"], 1);

    let (status, json) = get_json(app.clone(), "/runs?status=passed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 0);

    let (status, _) = get_json(app.clone(), "/runs?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = get_json(app.clone(), &format!("/runs/{}", done.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["abort_reason"], "bench unplugged");

    let (status, _) = get_json(app, "/runs/0b6f1c5e-2f1a-4c55-9d0e-3d1c2b4a5f60").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn run_ids_must_be_uuids() {
    let (app, _, _) = build_test_app();

    for uri in ["/runs/does-not-exist", "/runs/..%2F..%2Fetc%2Frun", "/runs/..%2Foutside"] {
        let (status, json) = get_json(app.clone(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(json["error"].as_str().unwrap().contains("Invalid run id"));

        let req = Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn delete_refuses_active_run() {
    let (app, engine, store) = build_test_app();
    let mut reg = CaseRegistry::new();
    reg.register(id("one"), vec![]).unwrap();
    let live = engine.start_run("active", reg).await.unwrap();
    store.persist(&live).await.unwrap();

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/runs/{}", live.id))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    engine.abort_run("done").await.unwrap();
    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/runs/{}", live.id))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(store.load(&live.id).await.is_err());
}

#[tokio::test]
async fn events_stream_starts_with_current_document() {
    let (app, engine, _) = build_test_app();
    let mut reg = CaseRegistry::new();
    reg.register(id("one"), vec![]).unwrap();
    engine.start_run("sse", reg).await.unwrap();

    let req = Request::builder().uri("/events").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut body = resp.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: run_state"));
    assert!(text.contains("\"plan\":\"sse\""));
}

#[tokio::test]
async fn verdict_reflects_live_outcomes() {
    let (app, engine, _) = build_test_app();
    let mut reg = CaseRegistry::new();
    reg.register(id("one"), vec![]).unwrap();
    reg.register(id("two"), vec![id("one")]).unwrap();

    let (status, json) = get_json(app.clone(), "/run/cases/two/verdict").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "protocol");

    engine.start_run("verdicts", reg).await.unwrap();
    engine
        .apply_outcome(&id("one"), Outcome::Failed, OutcomeDetails::default())
        .await
        .unwrap();

    let (status, json) = get_json(app.clone(), "/run/cases/two/verdict").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["verdict"], "blocked");
    assert_eq!(json["dependency"], "one");

    let (status, _) = get_json(app.clone(), "/run/cases/ghost/verdict").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(app, "/run/cases/bad%20id/verdict").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
