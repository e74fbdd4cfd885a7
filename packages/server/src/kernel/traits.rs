// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Pipeline logic (consume, process, deliver, ingest) lives in domains/ and
// reaches the outside world only through these seams.
//
// Naming convention: Base* for trait names (e.g., BaseQueue, BaseEventLog)

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::common::{AnalyticsRow, BatchInsertOutcome};
use crate::kernel::event_log::{EventCompletion, EventLogEntry, NewEventLogEntry};
use crate::kernel::queue::QueueMessage;

// =============================================================================
// Durable Queue Trait (Infrastructure)
// =============================================================================

/// Options for a single queue read.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// How long to wait for messages when the queue is empty (0 = return at once)
    pub sleep_seconds: u32,
    pub batch_size: i64,
    /// How long read messages stay hidden from other readers
    pub visibility_timeout: Duration,
}

#[async_trait]
pub trait BaseQueue: Send + Sync {
    /// Read up to `batch_size` visible messages, hiding them for the visibility timeout.
    async fn read(&self, queue: &str, options: ReadOptions) -> Result<Vec<QueueMessage>>;

    /// Delete a message. Returns false when it no longer exists.
    async fn delete(&self, queue: &str, message_id: i64) -> Result<bool>;

    /// Enqueue a message, returning its id.
    async fn send(&self, queue: &str, payload: &Value) -> Result<i64>;
}

// =============================================================================
// Event Log Trait (Infrastructure - audit + dedup)
// =============================================================================

#[async_trait]
pub trait BaseEventLog: Send + Sync {
    /// Record an attempt before any side effect happens (processed = false).
    async fn record_attempt(&self, entry: NewEventLogEntry) -> Result<EventLogEntry>;

    /// Move an entry to its terminal state.
    ///
    /// Returns false when the entry was already terminal; the first
    /// finalization wins.
    async fn finalize(&self, id: Uuid, completion: EventCompletion) -> Result<bool>;

    /// Find a successfully processed entry for the logical event.
    async fn find_processed(
        &self,
        source: &str,
        related_id: &str,
        event_type: &str,
    ) -> Result<Option<EventLogEntry>>;
}

// =============================================================================
// Webhook Transport Trait (Infrastructure - outbound HTTP)
// =============================================================================

/// What came back from an outbound webhook call.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<Value>,
    /// Id of the remote resource (message) the call created or edited
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait BaseWebhookTransport: Send + Sync {
    /// Create a resource (POST).
    async fn create(&self, endpoint: &str, payload: &Value)
        -> Result<TransportResponse, TransportError>;

    /// Update an existing resource by id (PATCH).
    async fn update(
        &self,
        endpoint: &str,
        resource_id: &str,
        payload: &Value,
    ) -> Result<TransportResponse, TransportError>;
}

// =============================================================================
// External Collaborators (thin glue, reached through narrow interfaces)
// =============================================================================

#[async_trait]
pub trait BaseRecordStore: Send + Sync {
    /// Upsert the canonical record for an entity. Idempotent per (collection, entity).
    async fn upsert_record(&self, collection: &str, entity_id: &str, payload: &Value)
        -> Result<()>;

    /// Id of the chat message last posted for an entity on an endpoint.
    async fn find_message_ref(&self, entity_id: &str, endpoint: &str) -> Result<Option<String>>;

    async fn save_message_ref(&self, entity_id: &str, endpoint: &str, message_id: &str)
        -> Result<()>;

    /// Insert analytics rows, atomically when the store supports it.
    async fn insert_analytics_batch(&self, rows: &[AnalyticsRow]) -> Result<BatchInsertOutcome>;
}

#[async_trait]
pub trait BaseCache: Send + Sync {
    async fn invalidate(&self, key: &str) -> Result<()>;
}

#[async_trait]
pub trait BaseRecomputeTrigger: Send + Sync {
    /// Ask downstream to recompute derived data for an entity.
    async fn trigger(&self, entity_id: &str, reason: &str) -> Result<()>;
}

#[async_trait]
pub trait BaseCommitHistorySource: Send + Sync {
    /// Most recent commits for `owner/name`, newest first.
    async fn fetch_recent_commits(&self, repository: &str, limit: u32) -> Result<Vec<Value>>;
}

pub trait BaseNotificationRenderer: Send + Sync {
    /// Render the chat payload announcing an event about an entity.
    fn render_notification(&self, kind: &str, entity_id: &str, payload: &Value) -> Result<Value>;
}
