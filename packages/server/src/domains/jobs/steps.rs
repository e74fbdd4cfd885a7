//! Concrete side effects behind each [`JobStep`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::job::{Job, JobStep};
use super::processor::StepExecutor;
use crate::domains::delivery::{DeliveryOutcome, OutboundDeliveryClient, SendOptions};
use crate::kernel::{is_transient, CircuitError, ServerDeps};

/// Breaker key for the commit history API.
pub const COMMIT_HISTORY_ENDPOINT: &str = "github:commits";

const COMMIT_HISTORY_LIMIT: u32 = 20;

/// Step implementations over [`ServerDeps`].
pub struct PipelineSteps {
    deps: ServerDeps,
    delivery: OutboundDeliveryClient,
}

impl PipelineSteps {
    pub fn new(deps: ServerDeps) -> Self {
        let delivery = OutboundDeliveryClient::from_deps(&deps);
        Self { deps, delivery }
    }

    async fn persist_record(&self, job: &Job) -> Result<()> {
        self.deps
            .records
            .upsert_record(job.kind.collection(), &job.entity_id, &job.payload)
            .await
    }

    /// Fetch through retry → breaker → hard timeout, so every attempt counts
    /// against the breaker and an open breaker stops the retries.
    async fn sync_commit_history(&self, job: &Job) -> Result<()> {
        let repository = job
            .payload
            .get("repository")
            .and_then(Value::as_str)
            .unwrap_or(&job.entity_id)
            .to_string();

        let breaker = self.deps.circuit_breaker();
        let timeout = self.deps.settings.http_timeout;
        let commits = self.deps.commits.clone();

        let outcome = self
            .deps
            .retry_executor()
            .run(
                |_| {
                    let breaker = breaker.clone();
                    let commits = commits.clone();
                    let repository = repository.clone();
                    async move {
                        breaker
                            .call(COMMIT_HISTORY_ENDPOINT, || async {
                                let fetch =
                                    commits.fetch_recent_commits(&repository, COMMIT_HISTORY_LIMIT);
                                match tokio::time::timeout(timeout, fetch).await {
                                    Ok(result) => result,
                                    Err(elapsed) => Err(anyhow::Error::from(elapsed)),
                                }
                            })
                            .await
                    }
                },
                |e: &CircuitError<anyhow::Error>| match e {
                    CircuitError::Open { .. } => false,
                    CircuitError::Inner(inner) => is_transient(inner),
                },
            )
            .await;

        let commits = outcome.result.map_err(|e| match e {
            CircuitError::Inner(inner) => inner.context("failed to fetch commit history"),
            open => anyhow!("{}", open),
        })?;

        debug!(
            repository = %repository,
            commits = commits.len(),
            retries = outcome.retry_count,
            "fetched commit history"
        );

        self.deps
            .records
            .upsert_record(
                "commit_history",
                &job.entity_id,
                &json!({ "repository": repository, "commits": commits }),
            )
            .await
    }

    /// Edit the entity's existing chat message, or post a new one.
    async fn notify_channel(&self, job: &Job) -> Result<()> {
        let Some(endpoint) = self.deps.settings.chat_webhook_url.as_deref() else {
            debug!(entity_id = %job.entity_id, "no chat webhook configured, skipping notification");
            return Ok(());
        };

        let message = self
            .deps
            .renderer
            .render_notification(job.kind.as_str(), &job.entity_id, &job.payload)?;
        let event_type = format!("notify.{}", job.kind);

        let existing = self
            .deps
            .records
            .find_message_ref(&job.entity_id, endpoint)
            .await
            .context("failed to look up chat message reference")?;

        let mut outcome = match existing.as_deref() {
            Some(message_id) => {
                self.delivery
                    .update(endpoint, message_id, &message, &event_type)
                    .await?
            }
            None => DeliveryOutcome::Deleted { retry_count: 0 },
        };

        if let DeliveryOutcome::Deleted { .. } = outcome {
            if existing.is_some() {
                info!(entity_id = %job.entity_id, "chat message was deleted, posting a new one");
            }
            outcome = self
                .delivery
                .send(
                    endpoint,
                    &message,
                    &event_type,
                    SendOptions::related_to(job.entity_id.clone())
                        .with_metadata(json!({ "kind": job.kind })),
                )
                .await?;
        }

        match outcome {
            DeliveryOutcome::Delivered { resource_id, .. } => {
                if let Some(message_id) = resource_id {
                    self.deps
                        .records
                        .save_message_ref(&job.entity_id, endpoint, &message_id)
                        .await?;
                }
                Ok(())
            }
            DeliveryOutcome::Deleted { .. } => Err(anyhow!("chat endpoint reported the new message as deleted")),
            DeliveryOutcome::Failed { error, .. } => Err(anyhow!("notification failed: {}", error)),
        }
    }

    async fn invalidate_cache(&self, job: &Job) -> Result<()> {
        self.deps
            .cache
            .invalidate(&format!("{}:{}", job.kind.collection(), job.entity_id))
            .await
    }

    async fn trigger_recompute(&self, job: &Job) -> Result<()> {
        self.deps
            .recompute
            .trigger(&job.entity_id, job.kind.as_str())
            .await
    }
}

#[async_trait]
impl StepExecutor for PipelineSteps {
    async fn execute(&self, step: JobStep, job: &Job) -> Result<()> {
        match step {
            JobStep::PersistRecord => self.persist_record(job).await,
            JobStep::SyncCommitHistory => self.sync_commit_history(job).await,
            JobStep::NotifyChannel => self.notify_channel(job).await,
            JobStep::InvalidateCache => self.invalidate_cache(job).await,
            JobStep::TriggerRecompute => self.trigger_recompute(job).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::jobs::job::JobKind;
    use crate::kernel::test_dependencies::{
        MockCommitSource, ScriptedFetch, ScriptedReply, TransportMethod, TEST_CHAT_WEBHOOK_URL,
    };
    use crate::kernel::{CircuitState, TestDependencies};

    fn push_job() -> Job {
        Job::new(JobKind::RepositoryPush, "acme/api", json!({"repository": "acme/api"}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_sync_retries_transient_failures() {
        let test_deps = TestDependencies::new().mock_commits(
            MockCommitSource::new()
                .then(ScriptedFetch::Status(503))
                .then(ScriptedFetch::Commits(vec![json!({"sha": "abc"})])),
        );
        let steps = PipelineSteps::new(test_deps.server_deps());

        steps.execute(JobStep::SyncCommitHistory, &push_job()).await.unwrap();

        assert_eq!(test_deps.commits.call_count(), 2);
        let record = test_deps.records.record("commit_history", "acme/api").unwrap();
        assert_eq!(record["commits"][0]["sha"], "abc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_sync_times_out_and_opens_breaker() {
        let commits = MockCommitSource::new();
        for _ in 0..8 {
            commits.push(ScriptedFetch::Hang);
        }
        let mut settings = crate::kernel::test_dependencies::test_settings();
        settings.circuit.failure_threshold = 2;
        let test_deps = TestDependencies::new().settings(settings).mock_commits(commits);
        let steps = PipelineSteps::new(test_deps.server_deps());

        let err = steps.execute(JobStep::SyncCommitHistory, &push_job()).await.unwrap_err();

        // Two timed-out attempts open the breaker; the open breaker ends the retries
        assert!(err.to_string().contains("circuit open"));
        assert_eq!(test_deps.commits.call_count(), 2);
        let snapshot = test_deps.server_deps().circuit_breaker().snapshot(COMMIT_HISTORY_ENDPOINT).await;
        assert_eq!(snapshot.state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_sync_client_error_is_not_retried() {
        let test_deps = TestDependencies::new()
            .mock_commits(MockCommitSource::new().then(ScriptedFetch::Status(404)));
        let steps = PipelineSteps::new(test_deps.server_deps());

        assert!(steps.execute(JobStep::SyncCommitHistory, &push_job()).await.is_err());
        assert_eq!(test_deps.commits.call_count(), 1);
    }

    #[tokio::test]
    async fn test_notify_posts_then_edits_existing_message() {
        let test_deps = TestDependencies::new();
        let steps = PipelineSteps::new(test_deps.server_deps());
        let job = push_job();

        steps.execute(JobStep::NotifyChannel, &job).await.unwrap();
        let message_id = test_deps.records.message_ref("acme/api", TEST_CHAT_WEBHOOK_URL).unwrap();

        steps.execute(JobStep::NotifyChannel, &job).await.unwrap();

        let calls = test_deps.transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, TransportMethod::Create);
        assert_eq!(calls[1].method, TransportMethod::Update);
        assert_eq!(calls[1].resource_id.as_deref(), Some(message_id.as_str()));
    }

    #[tokio::test]
    async fn test_notify_recreates_deleted_message() {
        let test_deps = TestDependencies::new();
        test_deps
            .server_deps()
            .records
            .save_message_ref("acme/api", TEST_CHAT_WEBHOOK_URL, "gone-1")
            .await
            .unwrap();
        test_deps.transport.push(ScriptedReply::Status(404));
        let steps = PipelineSteps::new(test_deps.server_deps());

        steps.execute(JobStep::NotifyChannel, &push_job()).await.unwrap();

        let calls = test_deps.transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].method, TransportMethod::Create);
        let new_ref = test_deps.records.message_ref("acme/api", TEST_CHAT_WEBHOOK_URL).unwrap();
        assert_ne!(new_ref, "gone-1");
    }

    #[tokio::test]
    async fn test_notify_without_webhook_is_a_no_op() {
        let mut settings = crate::kernel::test_dependencies::test_settings();
        settings.chat_webhook_url = None;
        let test_deps = TestDependencies::new().settings(settings);
        let steps = PipelineSteps::new(test_deps.server_deps());

        steps.execute(JobStep::NotifyChannel, &push_job()).await.unwrap();
        assert!(test_deps.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cache_and_recompute_steps() {
        let test_deps = TestDependencies::new();
        let steps = PipelineSteps::new(test_deps.server_deps());

        steps.execute(JobStep::InvalidateCache, &push_job()).await.unwrap();
        steps.execute(JobStep::TriggerRecompute, &push_job()).await.unwrap();

        assert_eq!(test_deps.cache.invalidated(), vec!["repositories:acme/api".to_string()]);
        assert_eq!(
            test_deps.recompute.calls(),
            vec![("acme/api".to_string(), "repository_push".to_string())]
        );
    }
}
