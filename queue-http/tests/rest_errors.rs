use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use queue_core::backend::memory::MemoryBackend;
use queue_core::engine::QueueEngine;
use queue_http::state::AppState;
use queue_http::build_router;
use serde_json::Value;
use tower::ServiceExt;

fn test_app() -> (axum::Router, Arc<QueueEngine<MemoryBackend>>) {
    let engine = Arc::new(QueueEngine::new(MemoryBackend::new()));
    let state = AppState::standalone(Arc::clone(&engine));
    (build_router(state), engine)
}

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn unknown_job_id_returns_404() {
    let (app, _engine) = test_app();

    let res = app
        .oneshot(Request::builder().uri("/api/v1/queue/jobs/does-not-exist").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 404);
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn request_id_is_preserved_when_provided() {
    let (app, _engine) = test_app();

    let res = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/queue/stats")
                .header("x-request-id", "req-test-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.headers().get("x-request-id").unwrap(), "req-test-123");
}

#[tokio::test]
async fn retry_on_non_failed_job_is_a_conflict() {
    let (app, engine) = test_app();
    let job_id =
        engine.enqueue_job("cleanup", serde_json::json!({}), Default::default(), chrono::Duration::zero(), None, None).await.unwrap();

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/queue/jobs/{job_id}/retry"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 409);
}

#[tokio::test]
async fn create_job_rejects_out_of_range_priority() {
    let (app, _engine) = test_app();

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/queue/jobs")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "job_type": "cleanup", "payload": {}, "priority": 99 }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn create_then_list_then_stats_round_trip() {
    let (app, _engine) = test_app();

    let create = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/queue/jobs")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({ "job_type": "cleanup", "payload": {} }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create.status().as_u16(), 200);

    let list = app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/queue/jobs?status=pending").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(list).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["meta"]["count"], 1);

    let stats = app.oneshot(Request::builder().uri("/api/v1/queue/stats").body(Body::empty()).unwrap()).await.unwrap();
    let body = json_body(stats).await;
    assert_eq!(body["data"]["by_status"]["pending"], 1);
}

#[tokio::test]
async fn clear_rejects_non_terminal_status() {
    let (app, _engine) = test_app();

    let res = app
        .oneshot(Request::builder().method("POST").uri("/api/v1/queue/clear?status=pending").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn pause_then_resume_round_trip() {
    let (app, _engine) = test_app();

    let pause = app
        .clone()
        .oneshot(Request::builder().method("POST").uri("/api/v1/queue/pause").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(pause).await["data"]["paused"], true);

    let resume = app
        .oneshot(Request::builder().method("POST").uri("/api/v1/queue/resume").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(resume).await["data"]["paused"], false);
}
