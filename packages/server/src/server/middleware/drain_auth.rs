use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, warn};

/// Bearer token check for the drain triggers.
///
/// With no secret configured every request passes.
pub async fn drain_auth_middleware(
    State(secret): State<Option<Arc<str>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(secret) = secret else {
        return next.run(request).await;
    };

    if bearer_matches(&request, &secret) {
        debug!("drain trigger authorized");
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "unauthorized drain trigger");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}

fn bearer_matches(request: &Request<Body>, secret: &str) -> bool {
    let Some(token) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };

    constant_time_eq(token.trim().as_bytes(), secret.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
