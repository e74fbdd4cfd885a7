//! Analytics batch consumer.
//!
//! Decodable rows of a batch go to the record store in one atomic insert.
//! When the insert reports any inserted rows, every message of the batch is
//! deleted, including rows that failed to decode or insert. Those rows are
//! lost rather than redelivered forever; the summary lists them.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::consumer::clamp_batch_size;
use crate::common::{AnalyticsRow, RowFailure};
use crate::kernel::{ReadOptions, ServerDeps};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub read: usize,
    pub inserted: u64,
    pub deleted: usize,
    pub failed_rows: Vec<RowFailure>,
}

pub struct AnalyticsBatchConsumer {
    deps: ServerDeps,
}

impl AnalyticsBatchConsumer {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }

    pub async fn drain_batch(&self, queue_name: &str, max_batch_size: i64) -> Result<AnalyticsSummary> {
        let messages = self
            .deps
            .queue
            .read(
                queue_name,
                ReadOptions {
                    sleep_seconds: 0,
                    batch_size: clamp_batch_size(max_batch_size),
                    visibility_timeout: self.deps.settings.visibility_timeout,
                },
            )
            .await?;

        if messages.is_empty() {
            return Ok(AnalyticsSummary::default());
        }

        let mut rows = Vec::with_capacity(messages.len());
        // Batch position of each decoded row
        let mut positions = Vec::with_capacity(messages.len());
        let mut failed_rows = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            match serde_json::from_value::<AnalyticsRow>(message.payload.clone()) {
                Ok(row) => {
                    rows.push(row);
                    positions.push(index);
                }
                Err(e) => failed_rows.push(RowFailure {
                    index,
                    error: format!("msg {}: {}", message.id, e),
                }),
            }
        }

        let outcome = self
            .deps
            .records
            .insert_analytics_batch(&rows)
            .await
            .context("analytics batch insert failed")?;
        failed_rows.extend(outcome.failed.into_iter().map(|failure| RowFailure {
            index: positions.get(failure.index).copied().unwrap_or(failure.index),
            error: failure.error,
        }));
        failed_rows.sort_by_key(|failure| failure.index);

        let mut summary = AnalyticsSummary {
            read: messages.len(),
            inserted: outcome.inserted,
            deleted: 0,
            failed_rows,
        };

        if outcome.inserted == 0 {
            warn!(queue = %queue_name, read = summary.read, "no analytics rows inserted, leaving batch for redelivery");
            return Ok(summary);
        }

        for message in &messages {
            match self.deps.queue.delete(queue_name, message.id).await {
                Ok(_) => summary.deleted += 1,
                Err(e) => warn!(msg_id = message.id, error = %e, "failed to delete analytics message"),
            }
        }

        if !summary.failed_rows.is_empty() {
            warn!(
                queue = %queue_name,
                dropped = summary.failed_rows.len(),
                "analytics rows dropped with their batch"
            );
        }
        info!(
            queue = %queue_name,
            read = summary.read,
            inserted = summary.inserted,
            deleted = summary.deleted,
            "analytics batch finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BatchInsertOutcome;
    use crate::kernel::TestDependencies;
    use serde_json::json;

    fn row(name: &str) -> serde_json::Value {
        json!({"eventName": name, "entityId": "acme/api", "occurredAt": "2026-01-01T00:00:00Z"})
    }

    #[tokio::test]
    async fn test_whole_batch_deleted_when_some_rows_inserted() {
        let test_deps = TestDependencies::new();
        let queue = test_deps.settings.analytics_queue_name.clone();
        test_deps.queue.push(&queue, row("page_view"));
        test_deps.queue.push(&queue, json!({"garbage": true}));
        test_deps.queue.push(&queue, row("click"));

        let summary = AnalyticsBatchConsumer::new(test_deps.server_deps())
            .drain_batch(&queue, 10)
            .await
            .unwrap();

        assert_eq!(summary.read, 3);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.deleted, 3);
        assert_eq!(summary.failed_rows.len(), 1);
        assert_eq!(summary.failed_rows[0].index, 1);
        assert!(test_deps.queue.is_empty(&queue));
        assert_eq!(test_deps.records.analytics_rows().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failures_report_batch_positions() {
        let test_deps = TestDependencies::new();
        let queue = test_deps.settings.analytics_queue_name.clone();
        test_deps.queue.push(&queue, json!({"garbage": true}));
        test_deps.queue.push(&queue, row("page_view"));
        test_deps.queue.push(&queue, row("click"));
        // The store sees only the two decoded rows and refuses its second one
        test_deps.records.with_analytics_outcome(BatchInsertOutcome {
            inserted: 1,
            failed: vec![RowFailure {
                index: 1,
                error: "constraint violation".into(),
            }],
        });

        let summary = AnalyticsBatchConsumer::new(test_deps.server_deps())
            .drain_batch(&queue, 10)
            .await
            .unwrap();

        let indices: Vec<usize> = summary.failed_rows.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(summary.failed_rows[1].error, "constraint violation");
        assert_eq!(summary.deleted, 3);
    }

    #[tokio::test]
    async fn test_batch_kept_when_nothing_inserted() {
        let test_deps = TestDependencies::new();
        let queue = test_deps.settings.analytics_queue_name.clone();
        test_deps.queue.push(&queue, row("page_view"));
        test_deps.records.with_analytics_outcome(BatchInsertOutcome {
            inserted: 0,
            failed: vec![RowFailure {
                index: 0,
                error: "constraint violation".into(),
            }],
        });

        let summary = AnalyticsBatchConsumer::new(test_deps.server_deps())
            .drain_batch(&queue, 10)
            .await
            .unwrap();

        assert_eq!(summary.deleted, 0);
        assert_eq!(test_deps.queue.len(&queue), 1);
    }
}
