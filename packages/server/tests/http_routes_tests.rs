//! HTTP surface tests against the assembled router.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header::AUTHORIZATION, HeaderValue, Request, StatusCode};
use axum::Router;
use common::{generic_webhook, github_push_payload, github_webhook};
use serde_json::{json, Value};
use server_core::domains::ingest::signature::GITHUB_SIGNATURE_HEADER;
use server_core::domains::jobs::{Job, JobKind};
use server_core::kernel::TestDependencies;
use server_core::server::{build_app, AppState};
use tower::ServiceExt;

fn app(deps: &TestDependencies, drain_secret: Option<&str>) -> Router {
    build_app(AppState::new(
        None,
        deps.server_deps(),
        drain_secret.map(str::to_string),
    ))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn drain_request(path: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(path);
    if let Some(auth) = auth {
        builder = builder.header(AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn inbound_webhook_accepts_then_reports_duplicate() {
    let deps = TestDependencies::new();
    let app = app(&deps, None);
    let webhook = || github_webhook("push", &github_push_payload("acme/api", "f00d"));

    let first = app.clone().oneshot(webhook().into_request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = json_body(first).await;
    assert_eq!(first["duplicate"], false);
    assert_eq!(first["source"], "github");

    let second = app.oneshot(webhook().into_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await["duplicate"], true);

    assert_eq!(deps.queue.len(&deps.settings.job_queue_name), 1);
}

#[tokio::test]
async fn inbound_webhook_rejects_bad_signature() {
    let deps = TestDependencies::new();
    let mut webhook = github_webhook("push", &github_push_payload("acme/api", "f00d"));
    webhook.headers.insert(
        GITHUB_SIGNATURE_HEADER,
        HeaderValue::from_static("sha256=deadbeef"),
    );

    let response = app(&deps, None)
        .oneshot(webhook.into_request())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "invalid signature");
    assert!(deps.event_log.entries().is_empty());
}

#[tokio::test]
async fn inbound_webhook_rejects_malformed_payload() {
    let deps = TestDependencies::new();
    // Signed correctly but missing the identifier
    let webhook = generic_webhook(&json!({"type": "invoice.paid"}));

    let response = app(&deps, None)
        .oneshot(webhook.into_request())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(deps.queue.is_empty(&deps.settings.job_queue_name));
}

#[tokio::test]
async fn unknown_source_is_rejected() {
    let deps = TestDependencies::new();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/inbound")
        .header("x-webhook-source", "gitlab")
        .body(Body::from("{}"))
        .unwrap();

    let response = app(&deps, None).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn drain_returns_batch_summary() {
    let deps = TestDependencies::new();
    let queue = deps.settings.job_queue_name.clone();
    let job = Job::new(JobKind::ExternalEvent, "order-5", json!({"id": "evt_5"}));
    let msg_id = deps.queue.push(&queue, serde_json::to_value(&job).unwrap());

    let response = app(&deps, None)
        .oneshot(drain_request("/jobs/drain?batchSize=5", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["processed"], 1);
    assert_eq!(body["results"][0]["msgId"], msg_id);
    assert_eq!(body["results"][0]["status"], "success");
    assert!(deps.queue.is_empty(&queue));
}

#[tokio::test]
async fn drain_requires_bearer_when_secret_configured() {
    let deps = TestDependencies::new();
    let app = app(&deps, Some("drain-secret"));

    let missing = app
        .clone()
        .oneshot(drain_request("/jobs/drain", None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .clone()
        .oneshot(drain_request("/jobs/drain", Some("Bearer nope")))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = app
        .oneshot(drain_request("/jobs/drain", Some("Bearer drain-secret")))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(json_body(ok).await["processed"], 0);
}

#[tokio::test]
async fn analytics_drain_inserts_rows() {
    let deps = TestDependencies::new();
    let queue = deps.settings.analytics_queue_name.clone();
    deps.queue.push(
        &queue,
        json!({
            "eventName": "page_view",
            "entityId": "acme/api",
            "properties": {"path": "/"},
            "occurredAt": "2026-03-01T12:00:00Z"
        }),
    );

    let response = app(&deps, None)
        .oneshot(drain_request("/jobs/analytics/drain", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["inserted"], 1);
    assert_eq!(body["deleted"], 1);
    assert_eq!(deps.records.analytics_rows().len(), 1);
}

#[tokio::test]
async fn health_without_database_reports_not_configured() {
    let deps = TestDependencies::new();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = app(&deps, None).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["database"]["status"], "not_configured");
}
