//! HTTP API tests driving the router directly.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempo::{LogStatus, QueueBackend, TaskId, TaskLogStore};
use tower::ServiceExt;

use crate::common::{self, Fixture};

fn app() -> (Router, Fixture) {
    let fx = common::fixture();
    let router = tempo::api::build_router(tempo::api::create_api_state(fx.manager.clone()));
    (router, fx)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn interval_draft(name: &str) -> Value {
    json!({
        "name": name,
        "kind": "interval",
        "every_ms": 60_000,
        "service": "EchoJob.echo",
        "status": "activated",
    })
}

#[tokio::test]
async fn test_health() {
    let (app, _fx) = app();

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_create_and_get_task() {
    let (app, _fx) = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/tasks", interval_draft("sync")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let created = body_json(response).await;
    assert_eq!(created["name"], "sync");
    assert_eq!(created["status"], "activated");
    let id = created["id"].as_i64().unwrap();

    let response = app
        .oneshot(get(&format!("/api/tasks/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["id"], id);
    assert_eq!(fetched["service"], "EchoJob.echo");
}

#[tokio::test]
async fn test_get_missing_task_is_404() {
    let (app, _fx) = app();

    let response = app.oneshot(get("/api/tasks/999")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_rejects_unknown_service() {
    let (app, _fx) = app();

    let draft = json!({
        "name": "bad",
        "kind": "interval",
        "every_ms": 60_000,
        "service": "UnknownJob.run",
        "status": "activated",
    });
    let response = app.oneshot(post_json("/api/tasks", draft)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_list_tasks_with_status_filter() {
    let (app, _fx) = app();

    app.clone()
        .oneshot(post_json("/api/tasks", interval_draft("a")))
        .await
        .unwrap();
    let draft = json!({
        "name": "b",
        "kind": "interval",
        "every_ms": 60_000,
        "service": "EchoJob.echo",
        "status": "disabled",
    });
    app.clone()
        .oneshot(post_json("/api/tasks", draft))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/tasks?status=activated"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["tasks"][0]["name"], "a");

    let response = app.oneshot(get("/api/tasks")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_update_task_applies_status() {
    let (app, fx) = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/tasks", interval_draft("sync")))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    let draft = json!({
        "name": "sync",
        "kind": "interval",
        "every_ms": 120_000,
        "service": "EchoJob.echo",
        "status": "disabled",
    });
    let response = app
        .oneshot(put_json(&format!("/api/tasks/{}", id), draft))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "disabled");
    assert_eq!(body["every_ms"], 120_000);
    assert!(fx.queue.repeatable_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_start_and_once_endpoints() {
    let (app, fx) = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/tasks", interval_draft("sync")))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/tasks/{}/stop", id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(fx.queue.repeatable_jobs().await.unwrap().is_empty());

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/tasks/{}/start", id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fx.queue.repeatable_jobs().await.unwrap().len(), 1);

    let response = app
        .oneshot(post_json(&format!("/api/tasks/{}/once", id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("queued"));
}

#[tokio::test]
async fn test_delete_task() {
    let (app, _fx) = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/tasks", interval_draft("sync")))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/tasks/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get(&format!("/api/tasks/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_task_logs_listing() {
    let (app, fx) = app();

    fx.store
        .record(TaskId::new(1), LogStatus::Success, 12, None)
        .await
        .unwrap();
    fx.store
        .record(TaskId::new(1), LogStatus::Failure, 7, Some("boom".into()))
        .await
        .unwrap();

    let response = app.oneshot(get("/api/task-logs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["total"], 2);
    // Newest first.
    assert_eq!(body["logs"][0]["status"], "failure");
    assert_eq!(body["logs"][0]["detail"], "boom");
    assert_eq!(body["logs"][1]["status"], "success");
}
