use serde_json::{json, Value};

use super::event::InboundEvent;
use super::source::WebhookSource;
use crate::domains::jobs::{Job, JobKind};

fn pick(payload: &Value, pointer: &str) -> Value {
    payload.pointer(pointer).cloned().unwrap_or(Value::Null)
}

/// Map an inbound event to the job it should start, if any.
///
/// Events with no route (pings, Slack URL verification, GitHub events the
/// pipeline does not act on) are acknowledged without a job.
pub fn route_event(event: &InboundEvent) -> Option<Job> {
    let payload = &event.payload;

    match (event.source, event.event_type.as_str()) {
        (WebhookSource::Github, "push") => {
            let repository = payload.pointer("/repository/full_name")?.as_str()?;
            Some(Job::new(
                JobKind::RepositoryPush,
                repository,
                json!({
                    "repository": repository,
                    "ref": pick(payload, "/ref"),
                    "after": pick(payload, "/after"),
                    "pusher": pick(payload, "/pusher/name"),
                    "message": pick(payload, "/head_commit/message"),
                }),
            ))
        }
        (WebhookSource::Github, "pull_request") => {
            let repository = payload.pointer("/repository/full_name")?.as_str()?;
            let number = payload.pointer("/number")?;
            Some(Job::new(
                JobKind::PullRequestActivity,
                format!("{}#{}", repository, number),
                json!({
                    "repository": repository,
                    "number": number,
                    "action": pick(payload, "/action"),
                    "title": pick(payload, "/pull_request/title"),
                    "state": pick(payload, "/pull_request/state"),
                    "url": pick(payload, "/pull_request/html_url"),
                }),
            ))
        }
        (WebhookSource::Github, _) => None,
        (WebhookSource::Slack, "url_verification") => None,
        (WebhookSource::Slack, _) => Some(Job::new(
            JobKind::ExternalEvent,
            format!("slack:{}", event.dedup_key),
            json!({
                "source": "slack",
                "type": event.event_type,
                "text": pick(payload, "/event/text"),
                "channel": pick(payload, "/event/channel"),
                "team": pick(payload, "/team_id"),
            }),
        )),
        (WebhookSource::Generic, _) => {
            let entity_id = payload
                .get("entityId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| event.dedup_key.clone());
            Some(Job::new(JobKind::ExternalEvent, entity_id, payload.clone()))
        }
    }
}
