//! Outbound webhook delivery with retry and an audit trail.
//!
//! ```text
//! record intent (processed=false)
//!     │   fails → error, nothing sent
//!     ▼
//! attempt ──5xx / timeout / network──► backoff ──► attempt ...
//!     │ 2xx            │ 4xx (404 on update → Deleted)
//!     ▼                ▼
//! finalize entry exactly once, return DeliveryOutcome
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::outcome::{DeliveryOutcome, SendOptions};
use crate::kernel::{
    BaseEventLog, BaseWebhookTransport, EventCompletion, EventDirection, NewEventLogEntry,
    RetryExecutor, ServerDeps, TransportError, TransportResponse,
};

/// Event log source for everything this client sends.
pub const DELIVERY_SOURCE: &str = "chat_webhook";

/// Why a single delivery attempt did not succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryAttemptError {
    #[error("endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("attempt timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl DeliveryAttemptError {
    /// 5xx, timeouts and network errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryAttemptError::Status { status } => *status >= 500,
            DeliveryAttemptError::Timeout | DeliveryAttemptError::Network(_) => true,
            DeliveryAttemptError::Invalid(_) => false,
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            DeliveryAttemptError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<TransportError> for DeliveryAttemptError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => DeliveryAttemptError::Timeout,
            TransportError::Network(msg) => DeliveryAttemptError::Network(msg),
            TransportError::Invalid(msg) => DeliveryAttemptError::Invalid(msg),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation<'a> {
    Create,
    Update { resource_id: &'a str },
}

/// Keep only scheme and host: webhook paths carry credentials.
pub fn redact_endpoint(endpoint: &str) -> String {
    match reqwest::Url::parse(endpoint) {
        Ok(url) => format!("{}://{}/…", url.scheme(), url.host_str().unwrap_or("unknown")),
        Err(_) => "<invalid url>".to_string(),
    }
}

#[derive(Clone)]
pub struct OutboundDeliveryClient {
    transport: Arc<dyn BaseWebhookTransport>,
    event_log: Arc<dyn BaseEventLog>,
    retry: RetryExecutor,
    attempt_timeout: Duration,
}

impl OutboundDeliveryClient {
    pub fn new(
        transport: Arc<dyn BaseWebhookTransport>,
        event_log: Arc<dyn BaseEventLog>,
        retry: RetryExecutor,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            event_log,
            retry,
            attempt_timeout,
        }
    }

    pub fn from_deps(deps: &ServerDeps) -> Self {
        Self::new(
            deps.transport.clone(),
            deps.event_log.clone(),
            deps.retry_executor(),
            deps.settings.http_timeout,
        )
    }

    /// Create a new resource at `endpoint`.
    ///
    /// Errors only when the intent cannot be recorded; every delivery
    /// failure is reported as [`DeliveryOutcome::Failed`].
    pub async fn send(
        &self,
        endpoint: &str,
        payload: &Value,
        event_type: &str,
        options: SendOptions,
    ) -> Result<DeliveryOutcome> {
        self.deliver(Operation::Create, endpoint, payload, event_type, options)
            .await
    }

    /// Edit the resource `resource_id`. A 404 yields [`DeliveryOutcome::Deleted`].
    pub async fn update(
        &self,
        endpoint: &str,
        resource_id: &str,
        payload: &Value,
        event_type: &str,
    ) -> Result<DeliveryOutcome> {
        self.deliver(
            Operation::Update { resource_id },
            endpoint,
            payload,
            event_type,
            SendOptions::related_to(resource_id),
        )
        .await
    }

    async fn deliver(
        &self,
        operation: Operation<'_>,
        endpoint: &str,
        payload: &Value,
        event_type: &str,
        options: SendOptions,
    ) -> Result<DeliveryOutcome> {
        let target = redact_endpoint(endpoint);

        let mut entry = NewEventLogEntry::builder()
            .source(DELIVERY_SOURCE)
            .direction(EventDirection::Outbound)
            .event_type(event_type)
            .payload(json!({
                "body": payload,
                "metadata": options.metadata,
                "operation": match operation {
                    Operation::Create => "create",
                    Operation::Update { .. } => "update",
                },
            }))
            .build();
        entry.related_id = options.related_id;

        let entry = self
            .event_log
            .record_attempt(entry)
            .await
            .context("failed to record delivery intent")?;

        let outcome = self
            .retry
            .run(
                |attempt| self.attempt(operation, endpoint, payload, attempt),
                DeliveryAttemptError::is_retryable,
            )
            .await;
        let retry_count = outcome.retry_count;

        let (result, completion) = match outcome.result {
            Ok(response) => (
                DeliveryOutcome::Delivered {
                    status: response.status,
                    retry_count,
                    resource_id: response.resource_id,
                },
                EventCompletion::succeeded(Some(response.status), retry_count),
            ),
            Err(DeliveryAttemptError::Status { status: 404 })
                if matches!(operation, Operation::Update { .. }) =>
            {
                (
                    DeliveryOutcome::Deleted { retry_count },
                    EventCompletion::failed(Some(404), "target resource deleted", retry_count),
                )
            }
            Err(error) => (
                DeliveryOutcome::Failed {
                    status: error.status(),
                    error: error.to_string(),
                    retry_count,
                },
                EventCompletion::failed(error.status(), error.to_string(), retry_count),
            ),
        };

        match &result {
            DeliveryOutcome::Delivered { status, .. } => {
                info!(endpoint = %target, event_type, status, retry_count, "delivery succeeded")
            }
            DeliveryOutcome::Deleted { .. } => {
                info!(endpoint = %target, event_type, "delivery target no longer exists")
            }
            DeliveryOutcome::Failed { error, .. } => {
                warn!(endpoint = %target, event_type, retry_count, error = %error, "delivery failed")
            }
        }

        match self.event_log.finalize(entry.id, completion).await {
            Ok(true) => {}
            Ok(false) => warn!(event_id = %entry.id, "delivery event was already finalized"),
            Err(e) => warn!(event_id = %entry.id, error = %e, "failed to finalize delivery event"),
        }

        Ok(result)
    }

    async fn attempt(
        &self,
        operation: Operation<'_>,
        endpoint: &str,
        payload: &Value,
        attempt: u32,
    ) -> Result<TransportResponse, DeliveryAttemptError> {
        let call = async {
            match operation {
                Operation::Create => self.transport.create(endpoint, payload).await,
                Operation::Update { resource_id } => {
                    self.transport.update(endpoint, resource_id, payload).await
                }
            }
        };

        let response = match tokio::time::timeout(self.attempt_timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::debug!(attempt, "delivery attempt timed out");
                return Err(DeliveryAttemptError::Timeout);
            }
        };

        if (200..300).contains(&response.status) {
            Ok(response)
        } else {
            Err(DeliveryAttemptError::Status {
                status: response.status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{
        InMemoryEventLog, ScriptedReply, ScriptedTransport, TEST_CHAT_WEBHOOK_URL,
    };
    use crate::kernel::RetryPolicy;

    fn client(transport: Arc<ScriptedTransport>, log: Arc<InMemoryEventLog>) -> OutboundDeliveryClient {
        OutboundDeliveryClient::new(
            transport,
            log,
            RetryExecutor::new(RetryPolicy::new(3, Duration::from_millis(100))),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_retries_5xx_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_all([ScriptedReply::Status(502), ScriptedReply::Timeout]);
        let log = Arc::new(InMemoryEventLog::new());

        let outcome = client(transport.clone(), log.clone())
            .send(TEST_CHAT_WEBHOOK_URL, &json!({"content": "hi"}), "notify", SendOptions::default())
            .await
            .unwrap();

        assert!(outcome.is_delivered());
        assert_eq!(outcome.retry_count(), 2);
        assert_eq!(transport.calls().len(), 3);

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].processed);
        assert_eq!(entries[0].http_status, Some(200));
        assert_eq!(entries[0].retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(ScriptedReply::Status(400));
        let log = Arc::new(InMemoryEventLog::new());

        let outcome = client(transport.clone(), log.clone())
            .send(TEST_CHAT_WEBHOOK_URL, &json!({}), "notify", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DeliveryOutcome::Failed {
                status: Some(400),
                error: "endpoint returned HTTP 400".into(),
                retry_count: 0,
            }
        );
        assert_eq!(transport.calls().len(), 1);
        let entry = &log.entries()[0];
        assert!(!entry.processed);
        assert!(entry.processed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_404_is_deleted_not_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(ScriptedReply::Status(404));
        let log = Arc::new(InMemoryEventLog::new());

        let outcome = client(transport.clone(), log.clone())
            .update(TEST_CHAT_WEBHOOK_URL, "123", &json!({}), "notify")
            .await
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Deleted { retry_count: 0 });
        assert_eq!(log.entries()[0].http_status, Some(404));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_attempts_time_out_and_are_finalized() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_all((0..4).map(|_| ScriptedReply::Hang(Duration::from_secs(60))));
        let log = Arc::new(InMemoryEventLog::new());

        let outcome = client(transport.clone(), log.clone())
            .send(TEST_CHAT_WEBHOOK_URL, &json!({}), "notify", SendOptions::default())
            .await
            .unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Failed { status: None, retry_count: 3, .. }));
        let entry = &log.entries()[0];
        assert!(entry.processed_at.is_some());
        assert_eq!(entry.retry_count, 3);
    }

    #[tokio::test]
    async fn test_nothing_sent_when_intent_cannot_be_recorded() {
        let transport = Arc::new(ScriptedTransport::new());
        let log = Arc::new(InMemoryEventLog::new());
        log.fail_writes(true);

        let result = client(transport.clone(), log)
            .send(TEST_CHAT_WEBHOOK_URL, &json!({}), "notify", SendOptions::default())
            .await;

        assert!(result.is_err());
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_redact_endpoint_drops_path() {
        assert_eq!(redact_endpoint(TEST_CHAT_WEBHOOK_URL), "https://chat.test/…");
        assert_eq!(redact_endpoint("not a url"), "<invalid url>");
    }
}
