//! Signed webhook payloads and request builders.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request};
use chrono::Utc;
use serde_json::{json, Value};
use server_core::domains::ingest::signature::{
    GENERIC_SIGNATURE_HEADER, GITHUB_SIGNATURE_HEADER, SLACK_SIGNATURE_HEADER,
    SLACK_TIMESTAMP_HEADER,
};
use server_core::domains::ingest::source::SOURCE_HEADER;
use server_core::domains::ingest::{event::GITHUB_EVENT_HEADER, sign};
use server_core::kernel::test_dependencies::{
    TEST_GENERIC_SECRET, TEST_GITHUB_SECRET, TEST_SLACK_SECRET,
};

/// A signed inbound webhook: headers plus the exact body bytes that were signed.
pub struct SignedWebhook {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl SignedWebhook {
    pub fn into_request(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/inbound")
            .header("content-type", "application/json");
        for (name, value) in self.headers.iter() {
            builder = builder.header(name, value);
        }
        builder
            .body(Body::from(self.body))
            .expect("valid request")
    }
}

fn header(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).expect("valid header value")
}

pub fn github_push_payload(repository: &str, after: &str) -> Value {
    json!({
        "ref": "refs/heads/main",
        "after": after,
        "repository": { "full_name": repository },
        "pusher": { "name": "octocat" },
        "head_commit": { "message": "Fix flaky retry" }
    })
}

pub fn github_webhook(event: &str, payload: &Value) -> SignedWebhook {
    let body = serde_json::to_vec(payload).expect("serializable payload");
    let mut headers = HeaderMap::new();
    headers.insert(SOURCE_HEADER, header("github"));
    headers.insert(GITHUB_EVENT_HEADER, header(event));
    headers.insert(
        GITHUB_SIGNATURE_HEADER,
        header(&format!("sha256={}", sign(TEST_GITHUB_SECRET, &[&body]))),
    );
    SignedWebhook { headers, body }
}

pub fn slack_webhook(payload: &Value) -> SignedWebhook {
    let body = serde_json::to_vec(payload).expect("serializable payload");
    let timestamp = Utc::now().timestamp().to_string();
    let signature = sign(
        TEST_SLACK_SECRET,
        &[b"v0:", timestamp.as_bytes(), b":", &body],
    );
    let mut headers = HeaderMap::new();
    headers.insert(SOURCE_HEADER, header("slack"));
    headers.insert(SLACK_TIMESTAMP_HEADER, header(&timestamp));
    headers.insert(SLACK_SIGNATURE_HEADER, header(&format!("v0={}", signature)));
    SignedWebhook { headers, body }
}

pub fn generic_webhook(payload: &Value) -> SignedWebhook {
    let body = serde_json::to_vec(payload).expect("serializable payload");
    let mut headers = HeaderMap::new();
    headers.insert(SOURCE_HEADER, header("generic"));
    headers.insert(
        GENERIC_SIGNATURE_HEADER,
        header(&sign(TEST_GENERIC_SECRET, &[&body])),
    );
    SignedWebhook { headers, body }
}
