use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Missing or invalid signature, or no secret configured for the source
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown source, malformed JSON or missing required fields
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl IngestError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        IngestError::Unauthorized(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        IngestError::BadRequest(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            IngestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let message = match &self {
            IngestError::Unauthorized(_) => "invalid signature".to_string(),
            IngestError::BadRequest(msg) => msg.clone(),
            IngestError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "webhook ingestion failed");
                "internal error".to_string()
            }
        };

        (self.status_code(), Json(json!({ "error": message }))).into_response()
    }
}
