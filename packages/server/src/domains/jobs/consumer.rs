//! Drains one bounded batch from the job queue.
//!
//! ```text
//! read(batch, vt) ──► for each message (sequential)
//!                        decode Job ──fail──► status=error, message stays
//!                        process    ──critical step failed──► status=failed, message stays
//!                        delete     ──fail──► status=error
//!                        status=success
//! ```
//!
//! Messages that are not deleted reappear after the visibility timeout.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::job::Job;
use super::processor::{JobContext, JobProcessor};
use super::registry::JobRegistry;
use super::steps::PipelineSteps;
use crate::kernel::{QueueMessage, ReadOptions, ServerDeps};

pub const MIN_BATCH_SIZE: i64 = 1;
pub const MAX_BATCH_SIZE: i64 = 500;

/// Clamp a requested batch size into the supported range.
pub fn clamp_batch_size(requested: i64) -> i64 {
    requested.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Job succeeded and the message was deleted
    Success,
    /// The job's critical step failed
    Failed,
    /// Undecodable payload or the delete failed
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResult {
    pub msg_id: i64,
    pub status: MessageStatus,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub results: Vec<MessageResult>,
}

impl BatchSummary {
    pub fn count(&self, status: MessageStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

#[derive(Clone)]
pub struct QueueConsumer {
    deps: ServerDeps,
    processor: JobProcessor,
}

impl QueueConsumer {
    pub fn new(deps: ServerDeps, processor: JobProcessor) -> Self {
        Self { deps, processor }
    }

    /// Consumer wired with the standard registry and pipeline steps.
    pub fn standard(deps: ServerDeps) -> Self {
        let processor = JobProcessor::new(
            Arc::new(JobRegistry::standard()),
            Arc::new(PipelineSteps::new(deps.clone())),
        );
        Self::new(deps, processor)
    }

    /// Process one batch and return. Fails only when the queue cannot be read.
    pub async fn drain_batch(&self, queue_name: &str, max_batch_size: i64) -> Result<BatchSummary> {
        let batch_size = clamp_batch_size(max_batch_size);
        let messages = self
            .deps
            .queue
            .read(
                queue_name,
                ReadOptions {
                    sleep_seconds: 0,
                    batch_size,
                    visibility_timeout: self.deps.settings.visibility_timeout,
                },
            )
            .await?;

        if messages.is_empty() {
            debug!(queue = %queue_name, "queue empty");
            return Ok(BatchSummary::default());
        }

        info!(queue = %queue_name, count = messages.len(), batch_size, "draining batch");

        let mut results = Vec::with_capacity(messages.len());
        for message in &messages {
            results.push(self.handle_message(queue_name, message).await);
        }

        let summary = BatchSummary {
            processed: messages.len(),
            results,
        };
        info!(
            queue = %queue_name,
            processed = summary.processed,
            succeeded = summary.count(MessageStatus::Success),
            failed = summary.count(MessageStatus::Failed),
            errored = summary.count(MessageStatus::Error),
            "batch finished"
        );
        Ok(summary)
    }

    async fn handle_message(&self, queue_name: &str, message: &QueueMessage) -> MessageResult {
        let job: Job = match serde_json::from_value(message.payload.clone()) {
            Ok(job) => job,
            Err(e) => {
                warn!(msg_id = message.id, read_count = message.read_count, error = %e, "undecodable job payload");
                return MessageResult {
                    msg_id: message.id,
                    status: MessageStatus::Error,
                    errors: vec![format!("invalid job payload: {}", e)],
                };
            }
        };

        let outcome = self
            .processor
            .process(
                &job,
                JobContext {
                    message_id: Some(message.id),
                    attempt: message.read_count,
                },
            )
            .await;

        if !outcome.success {
            warn!(
                msg_id = message.id,
                read_count = message.read_count,
                entity_id = %job.entity_id,
                "job failed, leaving message for redelivery"
            );
            return MessageResult {
                msg_id: message.id,
                status: MessageStatus::Failed,
                errors: outcome.errors,
            };
        }

        match self.deps.queue.delete(queue_name, message.id).await {
            Ok(true) => MessageResult {
                msg_id: message.id,
                status: MessageStatus::Success,
                errors: outcome.errors,
            },
            Ok(false) => {
                warn!(msg_id = message.id, "message already gone when deleting");
                MessageResult {
                    msg_id: message.id,
                    status: MessageStatus::Success,
                    errors: outcome.errors,
                }
            }
            Err(e) => {
                warn!(msg_id = message.id, error = %e, "failed to delete processed message");
                let mut errors = outcome.errors;
                errors.push(format!("delete failed: {:#}", e));
                MessageResult {
                    msg_id: message.id,
                    status: MessageStatus::Error,
                    errors,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_batch_size() {
        assert_eq!(clamp_batch_size(0), 1);
        assert_eq!(clamp_batch_size(-5), 1);
        assert_eq!(clamp_batch_size(50), 50);
        assert_eq!(clamp_batch_size(10_000), 500);
    }

    #[test]
    fn test_summary_serializes_msg_id_in_camel_case() {
        let summary = BatchSummary {
            processed: 1,
            results: vec![MessageResult {
                msg_id: 7,
                status: MessageStatus::Failed,
                errors: vec!["persist_record: boom".into()],
            }],
        };

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["results"][0]["msgId"], 7);
        assert_eq!(value["results"][0]["status"], "failed");
    }
}
