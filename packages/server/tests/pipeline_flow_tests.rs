//! End-to-end flow over in-memory dependencies: webhook intake, queueing,
//! batch draining and step side effects.

mod common;

use common::{generic_webhook, github_push_payload, github_webhook, slack_webhook};
use serde_json::json;
use server_core::domains::ingest::InboundWebhookIngestor;
use server_core::domains::jobs::{clamp_batch_size, Job, JobKind, MessageStatus, QueueConsumer};
use server_core::kernel::test_dependencies::{ScriptedReply, TransportMethod, TEST_CHAT_WEBHOOK_URL};
use server_core::kernel::TestDependencies;

#[tokio::test]
async fn push_webhook_runs_every_step_once() {
    let deps = TestDependencies::new();
    let ingestor = InboundWebhookIngestor::new(deps.server_deps());
    let consumer = QueueConsumer::standard(deps.server_deps());
    let queue = deps.settings.job_queue_name.clone();

    let webhook = github_webhook("push", &github_push_payload("acme/api", "abc123"));
    let first = ingestor.ingest(&webhook.body, &webhook.headers).await.unwrap();
    let resend = ingestor.ingest(&webhook.body, &webhook.headers).await.unwrap();

    assert!(!first.duplicate);
    assert!(resend.duplicate);
    assert_eq!(deps.queue.len(&queue), 1);

    let summary = consumer.drain_batch(&queue, 10).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.results[0].status, MessageStatus::Success);
    assert!(summary.results[0].errors.is_empty(), "{:?}", summary.results[0].errors);
    assert!(deps.queue.is_empty(&queue));

    let record = deps.records.record("repositories", "acme/api").unwrap();
    assert_eq!(record["after"], "abc123");
    assert!(deps.records.record("commit_history", "acme/api").is_some());
    assert_eq!(deps.cache.invalidated(), vec!["repositories:acme/api".to_string()]);
    assert_eq!(
        deps.recompute.calls(),
        vec![("acme/api".to_string(), "repository_push".to_string())]
    );

    let calls = deps.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, TransportMethod::Create);
    assert!(deps
        .records
        .message_ref("acme/api", TEST_CHAT_WEBHOOK_URL)
        .is_some());
}

#[tokio::test]
async fn second_push_edits_the_posted_message() {
    let deps = TestDependencies::new();
    let ingestor = InboundWebhookIngestor::new(deps.server_deps());
    let consumer = QueueConsumer::standard(deps.server_deps());
    let queue = deps.settings.job_queue_name.clone();

    let first = github_webhook("push", &github_push_payload("acme/api", "aaa"));
    ingestor.ingest(&first.body, &first.headers).await.unwrap();
    consumer.drain_batch(&queue, 10).await.unwrap();
    let posted = deps
        .records
        .message_ref("acme/api", TEST_CHAT_WEBHOOK_URL)
        .unwrap();

    let second = github_webhook("push", &github_push_payload("acme/api", "bbb"));
    ingestor.ingest(&second.body, &second.headers).await.unwrap();
    consumer.drain_batch(&queue, 10).await.unwrap();

    let calls = deps.transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].method, TransportMethod::Update);
    assert_eq!(calls[1].resource_id.as_deref(), Some(posted.as_str()));
}

#[tokio::test]
async fn failed_notification_does_not_fail_the_job() {
    let deps = TestDependencies::new();
    deps.transport.push(ScriptedReply::Status(400));
    let consumer = QueueConsumer::standard(deps.server_deps());
    let queue = deps.settings.job_queue_name.clone();

    let job = Job::new(JobKind::PullRequestActivity, "acme/api#7", json!({"title": "Retry"}));
    deps.queue.push(&queue, serde_json::to_value(&job).unwrap());

    let summary = consumer.drain_batch(&queue, 10).await.unwrap();
    let result = &summary.results[0];

    assert_eq!(result.status, MessageStatus::Success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("notify_channel"), "{}", result.errors[0]);
    assert!(deps.queue.is_empty(&queue));
    assert!(deps.records.record("pull_requests", "acme/api#7").is_some());
}

#[tokio::test]
async fn failed_critical_step_keeps_the_message() {
    let deps = TestDependencies::new();
    deps.records.fail_collection("external_events");
    let consumer = QueueConsumer::standard(deps.server_deps());
    let queue = deps.settings.job_queue_name.clone();

    let job = Job::new(JobKind::ExternalEvent, "order-1", json!({"id": "evt_1"}));
    let id = deps.queue.push(&queue, serde_json::to_value(&job).unwrap());

    let summary = consumer.drain_batch(&queue, 10).await.unwrap();

    assert_eq!(summary.results[0].msg_id, id);
    assert_eq!(summary.results[0].status, MessageStatus::Failed);
    assert_eq!(deps.queue.len(&queue), 1);

    // Visible again once the timeout lapses, for another attempt
    deps.queue.expire_visibility(&queue);
    let retry = consumer.drain_batch(&queue, 10).await.unwrap();
    assert_eq!(retry.processed, 1);
    assert_eq!(deps.queue.messages(&queue)[0].read_count, 2);
}

#[tokio::test]
async fn one_bad_message_does_not_stop_the_batch() {
    let deps = TestDependencies::new();
    let consumer = QueueConsumer::standard(deps.server_deps());
    let queue = deps.settings.job_queue_name.clone();

    deps.queue.push(&queue, json!({"not": "a job"}));
    let good = Job::new(JobKind::ExternalEvent, "order-2", json!({"id": "evt_2"}));
    deps.queue.push(&queue, serde_json::to_value(&good).unwrap());

    let summary = consumer.drain_batch(&queue, 10).await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.count(MessageStatus::Error), 1);
    assert_eq!(summary.count(MessageStatus::Success), 1);
    assert_eq!(deps.queue.len(&queue), 1);
}

#[tokio::test]
async fn batch_size_is_clamped() {
    let deps = TestDependencies::new();
    let consumer = QueueConsumer::standard(deps.server_deps());
    let queue = deps.settings.job_queue_name.clone();

    for n in 0..3 {
        let job = Job::new(JobKind::ExternalEvent, format!("order-{}", n), json!({}));
        deps.queue.push(&queue, serde_json::to_value(&job).unwrap());
    }

    assert_eq!(clamp_batch_size(0), 1);
    assert_eq!(clamp_batch_size(10_000), 500);

    let one = consumer.drain_batch(&queue, 0).await.unwrap();
    assert_eq!(one.processed, 1);

    let rest = consumer.drain_batch(&queue, 10_000).await.unwrap();
    assert_eq!(rest.processed, 2);
    assert!(deps.queue.is_empty(&queue));
}

#[tokio::test]
async fn slack_and_generic_events_become_external_jobs() {
    let deps = TestDependencies::new();
    let ingestor = InboundWebhookIngestor::new(deps.server_deps());
    let queue = deps.settings.job_queue_name.clone();

    let slack = slack_webhook(&json!({
        "type": "event_callback",
        "event_id": "Ev123",
        "team_id": "T1",
        "event": {"type": "message", "text": "deploy done", "channel": "C1"}
    }));
    let generic = generic_webhook(&json!({"id": 991, "type": "invoice.paid", "entityId": "invoice-9"}));

    ingestor.ingest(&slack.body, &slack.headers).await.unwrap();
    ingestor.ingest(&generic.body, &generic.headers).await.unwrap();

    let jobs: Vec<Job> = deps
        .queue
        .messages(&queue)
        .into_iter()
        .map(|m| serde_json::from_value(m.payload).unwrap())
        .collect();

    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.kind == JobKind::ExternalEvent));
    assert_eq!(jobs[0].entity_id, "slack:Ev123");
    assert_eq!(jobs[1].entity_id, "invoice-9");
}

#[tokio::test]
async fn slack_url_verification_echoes_challenge_without_job() {
    let deps = TestDependencies::new();
    let ingestor = InboundWebhookIngestor::new(deps.server_deps());

    let webhook = slack_webhook(&json!({"type": "url_verification", "challenge": "c-42"}));
    let receipt = ingestor.ingest(&webhook.body, &webhook.headers).await.unwrap();

    assert_eq!(receipt.challenge.as_deref(), Some("c-42"));
    assert!(receipt.job_id.is_none());
    assert!(deps.queue.is_empty(&deps.settings.job_queue_name));
}
