//! Server dependencies for the pipeline (using traits for testability)
//!
//! This module provides the central dependency container used by every
//! pipeline component. All external services use trait abstractions so tests
//! can swap them for the in-memory versions in `test_dependencies`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chat_webhook::{ChatWebhookError, ChatWebhookOptions, ChatWebhookService, WebhookResponse};
use serde_json::Value;
use sqlx::PgPool;

use crate::config::{BreakerStoreKind, Config, PipelineSettings};
use crate::kernel::circuit::{
    CircuitBreaker, CircuitStore, InMemoryCircuitStore, PostgresCircuitStore,
};
use crate::kernel::clock::{Clock, SystemClock};
use crate::kernel::event_log::PostgresEventLog;
use crate::kernel::github_client::GithubCommitsClient;
use crate::kernel::queue::{PgmqQueue, QueueRecomputeTrigger};
use crate::kernel::renderer::ChatMessageRenderer;
use crate::kernel::retry::RetryExecutor;
use crate::kernel::stores::{PostgresCache, PostgresRecordStore};
use crate::kernel::{
    BaseCache, BaseCommitHistorySource, BaseEventLog, BaseNotificationRenderer, BaseQueue,
    BaseRecomputeTrigger, BaseRecordStore, BaseWebhookTransport, TransportError,
    TransportResponse,
};

// =============================================================================
// ChatWebhookService Adapter (implements BaseWebhookTransport trait)
// =============================================================================

/// Wrapper around ChatWebhookService that implements BaseWebhookTransport trait
pub struct ChatWebhookAdapter(pub Arc<ChatWebhookService>);

impl ChatWebhookAdapter {
    pub fn new(service: Arc<ChatWebhookService>) -> Self {
        Self(service)
    }
}

fn to_transport(result: Result<WebhookResponse, ChatWebhookError>) -> Result<TransportResponse, TransportError> {
    match result {
        Ok(response) => Ok(TransportResponse {
            status: response.status,
            body: response.body,
            resource_id: response.message_id,
        }),
        Err(ChatWebhookError::Timeout) => Err(TransportError::Timeout),
        Err(ChatWebhookError::Network(e)) => Err(TransportError::Network(e)),
        Err(e) => Err(TransportError::Invalid(e.to_string())),
    }
}

#[async_trait]
impl BaseWebhookTransport for ChatWebhookAdapter {
    async fn create(&self, endpoint: &str, payload: &Value) -> Result<TransportResponse, TransportError> {
        to_transport(self.0.create_message(endpoint, payload).await)
    }

    async fn update(
        &self,
        endpoint: &str,
        resource_id: &str,
        payload: &Value,
    ) -> Result<TransportResponse, TransportError> {
        to_transport(self.0.edit_message(endpoint, resource_id, payload).await)
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Dependencies shared by the ingestor, the consumers and the job steps
#[derive(Clone)]
pub struct ServerDeps {
    pub queue: Arc<dyn BaseQueue>,
    pub event_log: Arc<dyn BaseEventLog>,
    pub transport: Arc<dyn BaseWebhookTransport>,
    pub records: Arc<dyn BaseRecordStore>,
    pub cache: Arc<dyn BaseCache>,
    pub recompute: Arc<dyn BaseRecomputeTrigger>,
    pub commits: Arc<dyn BaseCommitHistorySource>,
    pub renderer: Arc<dyn BaseNotificationRenderer>,
    /// Breaker state; Postgres-backed when several instances run
    pub circuit_store: Arc<dyn CircuitStore>,
    pub clock: Arc<dyn Clock>,
    pub settings: PipelineSettings,
}

impl ServerDeps {
    /// Wire the production adapters from a pool and the loaded config.
    pub fn from_config(pool: PgPool, config: &Config) -> Result<Self> {
        let settings = config.pipeline_settings();

        let chat = ChatWebhookService::new(ChatWebhookOptions {
            timeout: settings.http_timeout,
            ..Default::default()
        })
        .context("Failed to create chat webhook client")?;

        let commits = GithubCommitsClient::new(config.github_token.clone(), settings.http_timeout)?;

        let circuit_store: Arc<dyn CircuitStore> = match config.breaker_store {
            BreakerStoreKind::Postgres => Arc::new(PostgresCircuitStore::new(pool.clone())),
            BreakerStoreKind::Memory => Arc::new(InMemoryCircuitStore::new()),
        };

        let queue: Arc<dyn BaseQueue> = Arc::new(PgmqQueue::new(pool.clone()));
        let recompute = Arc::new(QueueRecomputeTrigger::new(
            queue.clone(),
            settings.recompute_queue_name.clone(),
        ));

        Ok(Self {
            queue,
            event_log: Arc::new(PostgresEventLog::new(pool.clone())),
            transport: Arc::new(ChatWebhookAdapter::new(Arc::new(chat))),
            records: Arc::new(PostgresRecordStore::new(pool.clone())),
            cache: Arc::new(PostgresCache::new(pool)),
            recompute,
            commits: Arc::new(commits),
            renderer: Arc::new(ChatMessageRenderer),
            circuit_store,
            clock: Arc::new(SystemClock),
            settings,
        })
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            self.circuit_store.clone(),
            self.settings.circuit,
            self.clock.clone(),
        )
    }

    pub fn retry_executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.settings.retry_policy)
    }
}
