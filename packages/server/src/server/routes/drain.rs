//! Drain triggers for schedulers: each call processes one bounded batch.

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::server::app::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainParams {
    pub batch_size: Option<i64>,
}

pub async fn drain_jobs_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<DrainParams>,
) -> Response {
    let settings = &state.server_deps.settings;
    let batch_size = params.batch_size.unwrap_or(settings.batch_size);

    match state
        .consumer
        .drain_batch(&settings.job_queue_name, batch_size)
        .await
    {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => drain_failed(&settings.job_queue_name, e),
    }
}

pub async fn drain_analytics_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<DrainParams>,
) -> Response {
    let settings = &state.server_deps.settings;
    let batch_size = params.batch_size.unwrap_or(settings.batch_size);

    match state
        .analytics
        .drain_batch(&settings.analytics_queue_name, batch_size)
        .await
    {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => drain_failed(&settings.analytics_queue_name, e),
    }
}

fn drain_failed(queue: &str, e: anyhow::Error) -> Response {
    error!(queue = %queue, error = %format!("{:#}", e), "drain failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{:#}", e) })),
    )
        .into_response()
}
