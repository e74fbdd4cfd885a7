use std::fmt;
use std::str::FromStr;

use axum::http::HeaderMap;
use serde::Serialize;

use super::error::IngestError;

/// Header naming which integration sent the webhook.
pub const SOURCE_HEADER: &str = "x-webhook-source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookSource {
    Github,
    Slack,
    Generic,
}

impl WebhookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookSource::Github => "github",
            WebhookSource::Slack => "slack",
            WebhookSource::Generic => "generic",
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, IngestError> {
        let raw = header_str(headers, SOURCE_HEADER)
            .ok_or_else(|| IngestError::bad_request(format!("missing {} header", SOURCE_HEADER)))?;
        raw.parse()
    }
}

impl FromStr for WebhookSource {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(WebhookSource::Github),
            "slack" => Ok(WebhookSource::Slack),
            "generic" => Ok(WebhookSource::Generic),
            other => Err(IngestError::bad_request(format!("unknown webhook source '{}'", other))),
        }
    }
}

impl fmt::Display for WebhookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header value as a string, if present and valid UTF-8.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}
