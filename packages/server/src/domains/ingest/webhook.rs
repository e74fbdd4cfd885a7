//! `POST /webhooks/inbound` for GitHub, Slack and generic senders.
//!
//! The raw body is taken as bytes: signatures cover the exact bytes sent.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use super::error::IngestError;
use super::ingestor::InboundWebhookIngestor;
use super::source::WebhookSource;
use crate::kernel::ServerDeps;

/// State shared with the webhook handler.
#[derive(Clone)]
pub struct WebhookState {
    pub ingestor: Arc<InboundWebhookIngestor>,
}

impl WebhookState {
    pub fn new(deps: ServerDeps) -> Self {
        Self {
            ingestor: Arc::new(InboundWebhookIngestor::new(deps)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub message: &'static str,
    pub source: WebhookSource,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
}

/// Build the axum router for webhook endpoints.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/inbound", post(handle_inbound))
        .with_state(state)
}

async fn handle_inbound(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, IngestError> {
    let receipt = state.ingestor.ingest(&body, &headers).await?;

    Ok(Json(IngestResponse {
        message: if receipt.duplicate {
            "duplicate event ignored"
        } else {
            "event accepted"
        },
        source: receipt.source,
        duplicate: receipt.duplicate,
        challenge: receipt.challenge,
    }))
}
