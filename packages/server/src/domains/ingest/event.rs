//! Parsing inbound payloads into events with a stable dedup key.
//!
//! The key identifies the logical event, not the HTTP delivery, so a sender's
//! retries of the same event collapse into one.

use axum::http::HeaderMap;
use serde_json::Value;

use super::error::IngestError;
use super::source::{header_str, WebhookSource};
use crate::common::utils::generate_payload_hash;

pub const GITHUB_EVENT_HEADER: &str = "x-github-event";

#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub source: WebhookSource,
    pub event_type: String,
    pub dedup_key: String,
    pub payload: Value,
}

fn str_field<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Strings and numbers both count as identifiers.
fn id_field(payload: &Value, pointer: &str) -> Option<String> {
    match payload.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, IngestError> {
    value.ok_or_else(|| IngestError::bad_request(format!("missing required field '{}'", field)))
}

pub fn parse_event(
    source: WebhookSource,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<InboundEvent, IngestError> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| IngestError::bad_request(format!("malformed JSON: {}", e)))?;
    if !payload.is_object() {
        return Err(IngestError::bad_request("payload must be a JSON object"));
    }

    let (event_type, dedup_key) = match source {
        WebhookSource::Github => github_key(headers, &payload, body)?,
        WebhookSource::Slack => slack_key(&payload)?,
        WebhookSource::Generic => generic_key(&payload)?,
    };

    Ok(InboundEvent {
        source,
        event_type,
        dedup_key,
        payload,
    })
}

fn github_key(headers: &HeaderMap, payload: &Value, body: &[u8]) -> Result<(String, String), IngestError> {
    let event = required(header_str(headers, GITHUB_EVENT_HEADER), GITHUB_EVENT_HEADER)?.to_string();

    let key = match event.as_str() {
        "ping" => format!("hook:{}:ping", required(id_field(payload, "/hook_id"), "hook_id")?),
        "push" => {
            let repo = required(str_field(payload, "/repository/full_name"), "repository.full_name")?;
            let after = required(str_field(payload, "/after"), "after")?;
            format!("{}:push:{}", repo, after)
        }
        "pull_request" => {
            let repo = required(str_field(payload, "/repository/full_name"), "repository.full_name")?;
            let number = required(id_field(payload, "/number"), "number")?;
            let action = required(str_field(payload, "/action"), "action")?;
            let updated_at = required(
                str_field(payload, "/pull_request/updated_at"),
                "pull_request.updated_at",
            )?;
            format!("{}:pull_request:{}:{}:{}", repo, number, action, updated_at)
        }
        other => {
            let repo = str_field(payload, "/repository/full_name").unwrap_or("unknown");
            format!("{}:{}:{}", repo, other, generate_payload_hash(body))
        }
    };

    Ok((event, key))
}

fn slack_key(payload: &Value) -> Result<(String, String), IngestError> {
    let envelope = required(str_field(payload, "/type"), "type")?;

    if envelope == "url_verification" {
        let challenge = required(str_field(payload, "/challenge"), "challenge")?;
        return Ok((envelope.to_string(), challenge.to_string()));
    }

    let event_id = required(str_field(payload, "/event_id"), "event_id")?;
    let event_type = str_field(payload, "/event/type").unwrap_or(envelope);
    Ok((event_type.to_string(), event_id.to_string()))
}

fn generic_key(payload: &Value) -> Result<(String, String), IngestError> {
    let id = required(id_field(payload, "/id"), "id")?;
    let event_type = str_field(payload, "/type").unwrap_or("event");
    Ok((event_type.to_string(), id))
}
