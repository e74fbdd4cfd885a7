//! HMAC-SHA256 signature checks per webhook source.
//!
//! | source  | header                  | signed bytes              |
//! |---------|-------------------------|---------------------------|
//! | github  | `x-hub-signature-256`   | raw body                  |
//! | slack   | `x-slack-signature`     | `v0:{timestamp}:{body}`   |
//! | generic | `x-webhook-signature`   | raw body                  |
//!
//! Comparison is constant time. A source without a configured secret is
//! always rejected.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::IngestError;
use super::source::{header_str, WebhookSource};
use crate::config::WebhookSecrets;

type HmacSha256 = Hmac<Sha256>;

pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const SLACK_SIGNATURE_HEADER: &str = "x-slack-signature";
pub const SLACK_TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const GENERIC_SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Slack requests older (or newer) than this are treated as replays.
pub const SLACK_MAX_SKEW_SECS: i64 = 60 * 5;

/// Hex HMAC-SHA256 of the concatenated parts.
pub fn sign(secret: &str, parts: &[&[u8]]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    for part in parts {
        mac.update(part);
    }
    hex::encode(mac.finalize().into_bytes())
}

fn verify_hex(secret: &str, parts: &[&[u8]], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(&expected).is_ok()
}

fn secret_for<'a>(source: WebhookSource, secrets: &'a WebhookSecrets) -> Option<&'a str> {
    match source {
        WebhookSource::Github => secrets.github.as_deref(),
        WebhookSource::Slack => secrets.slack.as_deref(),
        WebhookSource::Generic => secrets.generic.as_deref(),
    }
}

/// Verify the request signature for `source`.
pub fn verify_signature(
    source: WebhookSource,
    secrets: &WebhookSecrets,
    headers: &HeaderMap,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<(), IngestError> {
    let secret = secret_for(source, secrets)
        .ok_or_else(|| IngestError::unauthorized(format!("no secret configured for {}", source)))?;

    let valid = match source {
        WebhookSource::Github => {
            let header = header_str(headers, GITHUB_SIGNATURE_HEADER)
                .ok_or_else(|| IngestError::unauthorized("missing signature"))?;
            let hex = header
                .strip_prefix("sha256=")
                .ok_or_else(|| IngestError::unauthorized("malformed signature"))?;
            verify_hex(secret, &[body], hex)
        }
        WebhookSource::Slack => {
            let header = header_str(headers, SLACK_SIGNATURE_HEADER)
                .ok_or_else(|| IngestError::unauthorized("missing signature"))?;
            let timestamp = header_str(headers, SLACK_TIMESTAMP_HEADER)
                .ok_or_else(|| IngestError::unauthorized("missing request timestamp"))?;
            let sent_at: i64 = timestamp
                .parse()
                .map_err(|_| IngestError::unauthorized("malformed request timestamp"))?;
            if now.timestamp().abs_diff(sent_at) > SLACK_MAX_SKEW_SECS.unsigned_abs() {
                return Err(IngestError::unauthorized("stale request timestamp"));
            }
            let hex = header
                .strip_prefix("v0=")
                .ok_or_else(|| IngestError::unauthorized("malformed signature"))?;
            verify_hex(
                secret,
                &[b"v0:", timestamp.as_bytes(), b":", body],
                hex,
            )
        }
        WebhookSource::Generic => {
            let header = header_str(headers, GENERIC_SIGNATURE_HEADER)
                .ok_or_else(|| IngestError::unauthorized("missing signature"))?;
            let hex = header.strip_prefix("sha256=").unwrap_or(header);
            verify_hex(secret, &[body], hex)
        }
    };

    if valid {
        Ok(())
    } else {
        Err(IngestError::unauthorized("signature mismatch"))
    }
}
