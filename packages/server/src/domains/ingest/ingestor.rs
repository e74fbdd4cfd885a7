//! Authenticated, deduplicated intake of third-party webhooks.
//!
//! ```text
//! source header ──► signature ──► parse + dedup key ──► processed before? ──yes──► duplicate
//!                                                          │ no
//!                                                          ▼
//!                                  record inbound entry ──► route ──► enqueue job ──► finalize
//! ```

use axum::http::HeaderMap;
use serde::Serialize;
use tracing::{info, warn};

use super::error::IngestError;
use super::event::{parse_event, InboundEvent};
use super::routing::route_event;
use super::signature::verify_signature;
use super::source::WebhookSource;
use crate::kernel::{EventCompletion, EventDirection, NewEventLogEntry, ServerDeps};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    pub source: WebhookSource,
    pub duplicate: bool,
    /// Queue message id of the enqueued job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
    /// Echo for Slack URL verification handshakes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
}

pub struct InboundWebhookIngestor {
    deps: ServerDeps,
}

impl InboundWebhookIngestor {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }

    pub async fn ingest(&self, body: &[u8], headers: &HeaderMap) -> Result<IngestReceipt, IngestError> {
        let source = WebhookSource::from_headers(headers)?;

        if let Err(e) = verify_signature(
            source,
            &self.deps.settings.secrets,
            headers,
            body,
            self.deps.clock.now(),
        ) {
            warn!(source = %source, error = %e, "rejected webhook");
            return Err(e);
        }

        let event = parse_event(source, headers, body)?;
        let challenge = (event.event_type == "url_verification").then(|| event.dedup_key.clone());

        let existing = self
            .deps
            .event_log
            .find_processed(source.as_str(), &event.dedup_key, &event.event_type)
            .await?;
        if existing.is_some() {
            info!(source = %source, dedup_key = %event.dedup_key, "duplicate webhook ignored");
            return Ok(IngestReceipt {
                source,
                duplicate: true,
                job_id: None,
                challenge,
            });
        }

        let job_id = self.accept(&event).await?;

        Ok(IngestReceipt {
            source,
            duplicate: false,
            job_id,
            challenge,
        })
    }

    /// Record the event, enqueue its job and finalize the entry.
    async fn accept(&self, event: &InboundEvent) -> Result<Option<i64>, IngestError> {
        let entry = self
            .deps
            .event_log
            .record_attempt(
                NewEventLogEntry::builder()
                    .source(event.source.as_str())
                    .direction(EventDirection::Inbound)
                    .event_type(event.event_type.as_str())
                    .payload(event.payload.clone())
                    .related_id(event.dedup_key.as_str())
                    .build(),
            )
            .await?;

        let job_id = match route_event(event) {
            None => None,
            Some(job) => {
                let message = serde_json::to_value(&job).map_err(anyhow::Error::from)?;
                let queue = &self.deps.settings.job_queue_name;
                match self.deps.queue.send(queue, &message).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        let completion = EventCompletion::failed(None, format!("enqueue failed: {:#}", e), 0);
                        if let Err(finalize_err) = self.deps.event_log.finalize(entry.id, completion).await {
                            warn!(event_id = %entry.id, error = %finalize_err, "failed to finalize inbound event");
                        }
                        return Err(IngestError::Internal(e));
                    }
                }
            }
        };

        // The job is already queued; a lost finalize only weakens dedup.
        if let Err(e) = self
            .deps
            .event_log
            .finalize(entry.id, EventCompletion::succeeded(None, 0))
            .await
        {
            warn!(event_id = %entry.id, error = %e, "failed to finalize inbound event");
        }

        info!(
            source = %event.source,
            event_type = %event.event_type,
            dedup_key = %event.dedup_key,
            job_id = ?job_id,
            "webhook accepted"
        );
        Ok(job_id)
    }
}
