// TestDependencies - in-memory implementations for testing
//
// Provides fake services that can be injected into ServerDeps so the
// pipeline runs end to end without Postgres or the network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::circuit::InMemoryCircuitStore;
use super::clock::{Clock, SystemClock};
use super::event_log::{EventCompletion, EventLogEntry, NewEventLogEntry};
use super::queue::QueueMessage;
use super::renderer::ChatMessageRenderer;
use super::retry::{HttpStatusError, RetryPolicy};
use super::{
    BaseCache, BaseCommitHistorySource, BaseEventLog, BaseQueue, BaseRecomputeTrigger,
    BaseRecordStore, BaseWebhookTransport, ReadOptions, ServerDeps, TransportError,
    TransportResponse,
};
use crate::common::{AnalyticsRow, BatchInsertOutcome};
use crate::config::{PipelineSettings, WebhookSecrets};

pub const TEST_CHAT_WEBHOOK_URL: &str = "https://chat.test/api/webhooks/42/s3cr3t";
pub const TEST_GITHUB_SECRET: &str = "github-test-secret";
pub const TEST_SLACK_SECRET: &str = "slack-test-secret";
pub const TEST_GENERIC_SECRET: &str = "generic-test-secret";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// In-memory Queue (visibility timeout semantics)
// =============================================================================

pub struct InMemoryQueue {
    messages: Mutex<HashMap<String, Vec<QueueMessage>>>,
    next_id: Mutex<i64>,
    failing_deletes: Mutex<HashSet<i64>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
            failing_deletes: Mutex::new(HashSet::new()),
            clock,
        }
    }

    /// Enqueue without going through the async trait (test setup).
    pub fn push(&self, queue: &str, payload: Value) -> i64 {
        let mut next_id = lock(&self.next_id);
        let id = *next_id;
        *next_id += 1;

        let now = self.clock.now();
        lock(&self.messages)
            .entry(queue.to_string())
            .or_default()
            .push(QueueMessage {
                id,
                payload,
                read_count: 0,
                enqueued_at: now,
                visible_at: now,
            });
        id
    }

    /// Messages still in the queue, visible or not.
    pub fn messages(&self, queue: &str) -> Vec<QueueMessage> {
        lock(&self.messages).get(queue).cloned().unwrap_or_default()
    }

    pub fn len(&self, queue: &str) -> usize {
        lock(&self.messages).get(queue).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Expire every visibility timeout, as if the timeout had elapsed.
    pub fn expire_visibility(&self, queue: &str) {
        let now = self.clock.now();
        if let Some(messages) = lock(&self.messages).get_mut(queue) {
            for message in messages.iter_mut() {
                message.visible_at = now;
            }
        }
    }

    /// Make deletes of this message fail.
    pub fn fail_delete_of(&self, message_id: i64) {
        lock(&self.failing_deletes).insert(message_id);
    }
}

#[async_trait]
impl BaseQueue for InMemoryQueue {
    async fn read(&self, queue: &str, options: ReadOptions) -> Result<Vec<QueueMessage>> {
        let now = self.clock.now();
        let hidden_until = now
            + chrono::Duration::from_std(options.visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let limit = options.batch_size.max(0) as usize;

        let mut all = lock(&self.messages);
        let Some(messages) = all.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut batch = Vec::new();
        for message in messages.iter_mut().filter(|m| m.visible_at <= now).take(limit) {
            message.read_count += 1;
            message.visible_at = hidden_until;
            batch.push(message.clone());
        }
        Ok(batch)
    }

    async fn delete(&self, queue: &str, message_id: i64) -> Result<bool> {
        if lock(&self.failing_deletes).contains(&message_id) {
            anyhow::bail!("delete of message {} failed", message_id);
        }
        let mut all = lock(&self.messages);
        let Some(messages) = all.get_mut(queue) else {
            return Ok(false);
        };
        let before = messages.len();
        messages.retain(|m| m.id != message_id);
        Ok(messages.len() < before)
    }

    async fn send(&self, queue: &str, payload: &Value) -> Result<i64> {
        Ok(self.push(queue, payload.clone()))
    }
}

// =============================================================================
// In-memory Event Log
// =============================================================================

#[derive(Default)]
pub struct InMemoryEventLog {
    entries: Mutex<Vec<EventLogEntry>>,
    fail_writes: Mutex<bool>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<EventLogEntry> {
        lock(&self.entries).clone()
    }

    /// Make `record_attempt` fail, as when the database is unreachable.
    pub fn fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }
}

#[async_trait]
impl BaseEventLog for InMemoryEventLog {
    async fn record_attempt(&self, entry: NewEventLogEntry) -> Result<EventLogEntry> {
        if *lock(&self.fail_writes) {
            anyhow::bail!("event log unavailable");
        }
        let stored = EventLogEntry {
            id: Uuid::new_v4(),
            source: entry.source,
            direction: entry.direction,
            event_type: entry.event_type,
            payload: entry.payload,
            processed: false,
            processed_at: None,
            http_status: None,
            error: None,
            retry_count: 0,
            related_id: entry.related_id,
            created_at: Utc::now(),
        };
        lock(&self.entries).push(stored.clone());
        Ok(stored)
    }

    async fn finalize(&self, id: Uuid, completion: EventCompletion) -> Result<bool> {
        let mut entries = lock(&self.entries);
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow::anyhow!("event {} not found", id))?;
        Ok(entry.complete(&completion, Utc::now()))
    }

    async fn find_processed(
        &self,
        source: &str,
        related_id: &str,
        event_type: &str,
    ) -> Result<Option<EventLogEntry>> {
        Ok(lock(&self.entries)
            .iter()
            .rev()
            .find(|e| {
                e.processed
                    && e.source == source
                    && e.event_type == event_type
                    && e.related_id.as_deref() == Some(related_id)
            })
            .cloned())
    }
}

// =============================================================================
// Mock Record Store
// =============================================================================

#[derive(Default)]
pub struct MockRecordStore {
    records: Mutex<HashMap<(String, String), Value>>,
    message_refs: Mutex<HashMap<(String, String), String>>,
    analytics: Mutex<Vec<AnalyticsRow>>,
    failing_collections: Mutex<HashSet<String>>,
    analytics_outcome: Mutex<Option<BatchInsertOutcome>>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, collection: &str, entity_id: &str) -> Option<Value> {
        lock(&self.records)
            .get(&(collection.to_string(), entity_id.to_string()))
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn message_ref(&self, entity_id: &str, endpoint: &str) -> Option<String> {
        lock(&self.message_refs)
            .get(&(entity_id.to_string(), endpoint.to_string()))
            .cloned()
    }

    pub fn analytics_rows(&self) -> Vec<AnalyticsRow> {
        lock(&self.analytics).clone()
    }

    /// Make upserts into `collection` fail.
    pub fn fail_collection(&self, collection: &str) {
        lock(&self.failing_collections).insert(collection.to_string());
    }

    /// Report this outcome from the next analytics insert instead of inserting.
    pub fn with_analytics_outcome(&self, outcome: BatchInsertOutcome) {
        *lock(&self.analytics_outcome) = Some(outcome);
    }
}

#[async_trait]
impl BaseRecordStore for MockRecordStore {
    async fn upsert_record(&self, collection: &str, entity_id: &str, payload: &Value) -> Result<()> {
        if lock(&self.failing_collections).contains(collection) {
            anyhow::bail!("record store rejected {} upsert", collection);
        }
        lock(&self.records).insert(
            (collection.to_string(), entity_id.to_string()),
            payload.clone(),
        );
        Ok(())
    }

    async fn find_message_ref(&self, entity_id: &str, endpoint: &str) -> Result<Option<String>> {
        Ok(self.message_ref(entity_id, endpoint))
    }

    async fn save_message_ref(&self, entity_id: &str, endpoint: &str, message_id: &str) -> Result<()> {
        lock(&self.message_refs).insert(
            (entity_id.to_string(), endpoint.to_string()),
            message_id.to_string(),
        );
        Ok(())
    }

    async fn insert_analytics_batch(&self, rows: &[AnalyticsRow]) -> Result<BatchInsertOutcome> {
        if let Some(outcome) = lock(&self.analytics_outcome).take() {
            return Ok(outcome);
        }
        lock(&self.analytics).extend(rows.iter().cloned());
        Ok(BatchInsertOutcome::all_inserted(rows.len()))
    }
}

// =============================================================================
// Mock Cache / Recompute Trigger
// =============================================================================

#[derive(Default)]
pub struct MockCache {
    invalidated: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidated(&self) -> Vec<String> {
        lock(&self.invalidated).clone()
    }

    pub fn fail(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }
}

#[async_trait]
impl BaseCache for MockCache {
    async fn invalidate(&self, key: &str) -> Result<()> {
        if *lock(&self.fail) {
            anyhow::bail!("cache unavailable");
        }
        lock(&self.invalidated).push(key.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockRecomputeTrigger {
    calls: Mutex<Vec<(String, String)>>,
    fail: Mutex<bool>,
}

impl MockRecomputeTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// (entity_id, reason) pairs in call order
    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }

    pub fn fail(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }
}

#[async_trait]
impl BaseRecomputeTrigger for MockRecomputeTrigger {
    async fn trigger(&self, entity_id: &str, reason: &str) -> Result<()> {
        if *lock(&self.fail) {
            anyhow::bail!("recompute queue unavailable");
        }
        lock(&self.calls).push((entity_id.to_string(), reason.to_string()));
        Ok(())
    }
}

// =============================================================================
// Mock Commit History Source
// =============================================================================

/// A scripted answer for one fetch.
#[derive(Debug, Clone)]
pub enum ScriptedFetch {
    Commits(Vec<Value>),
    Status(u16),
    /// Never answers within any reasonable timeout
    Hang,
}

#[derive(Default)]
pub struct MockCommitSource {
    script: Mutex<VecDeque<ScriptedFetch>>,
    calls: Mutex<Vec<String>>,
}

impl MockCommitSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, fetch: ScriptedFetch) -> Self {
        lock(&self.script).push_back(fetch);
        self
    }

    pub fn push(&self, fetch: ScriptedFetch) {
        lock(&self.script).push_back(fetch);
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl BaseCommitHistorySource for MockCommitSource {
    async fn fetch_recent_commits(&self, repository: &str, _limit: u32) -> Result<Vec<Value>> {
        lock(&self.calls).push(repository.to_string());
        let next = lock(&self.script).pop_front();
        match next {
            None => Ok(Vec::new()),
            Some(ScriptedFetch::Commits(commits)) => Ok(commits),
            Some(ScriptedFetch::Status(status)) => Err(HttpStatusError { status }.into()),
            Some(ScriptedFetch::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

// =============================================================================
// Scripted Webhook Transport
// =============================================================================

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Respond with this status; 2xx replies carry a generated message id
    Status(u16),
    Timeout,
    Network,
    /// Sleep before answering 200, to trip per-attempt timeouts
    Hang(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMethod {
    Create,
    Update,
}

#[derive(Debug, Clone)]
pub struct TransportCall {
    pub method: TransportMethod,
    pub endpoint: String,
    pub resource_id: Option<String>,
    pub payload: Value,
}

/// Transport that answers from a script. An empty script answers 200.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<TransportCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: ScriptedReply) {
        lock(&self.script).push_back(reply);
    }

    pub fn push_all(&self, replies: impl IntoIterator<Item = ScriptedReply>) {
        lock(&self.script).extend(replies);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    async fn answer(&self, call: TransportCall) -> Result<TransportResponse, TransportError> {
        let resource_id = call
            .resource_id
            .clone()
            .unwrap_or_else(|| format!("msg-{}", lock(&self.calls).len() + 1));
        lock(&self.calls).push(call);

        let reply = lock(&self.script).pop_front().unwrap_or(ScriptedReply::Status(200));
        let status = match reply {
            ScriptedReply::Status(status) => status,
            ScriptedReply::Timeout => return Err(TransportError::Timeout),
            ScriptedReply::Network => {
                return Err(TransportError::Network("connection refused".into()))
            }
            ScriptedReply::Hang(delay) => {
                tokio::time::sleep(delay).await;
                200
            }
        };

        let success = (200..300).contains(&status);
        Ok(TransportResponse {
            status,
            body: success.then(|| serde_json::json!({ "id": resource_id })),
            resource_id: success.then_some(resource_id),
        })
    }
}

#[async_trait]
impl BaseWebhookTransport for ScriptedTransport {
    async fn create(&self, endpoint: &str, payload: &Value) -> Result<TransportResponse, TransportError> {
        self.answer(TransportCall {
            method: TransportMethod::Create,
            endpoint: endpoint.to_string(),
            resource_id: None,
            payload: payload.clone(),
        })
        .await
    }

    async fn update(
        &self,
        endpoint: &str,
        resource_id: &str,
        payload: &Value,
    ) -> Result<TransportResponse, TransportError> {
        self.answer(TransportCall {
            method: TransportMethod::Update,
            endpoint: endpoint.to_string(),
            resource_id: Some(resource_id.to_string()),
            payload: payload.clone(),
        })
        .await
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Settings tuned for tests: short retry delays, every source secret set.
pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        chat_webhook_url: Some(TEST_CHAT_WEBHOOK_URL.to_string()),
        secrets: WebhookSecrets {
            github: Some(TEST_GITHUB_SECRET.to_string()),
            slack: Some(TEST_SLACK_SECRET.to_string()),
            generic: Some(TEST_GENERIC_SECRET.to_string()),
        },
        retry_policy: RetryPolicy::new(3, Duration::from_millis(10)),
        http_timeout: Duration::from_secs(2),
        ..PipelineSettings::default()
    }
}

/// In-memory dependencies. Keep the handles to inspect what the pipeline did.
pub struct TestDependencies {
    pub queue: Arc<InMemoryQueue>,
    pub event_log: Arc<InMemoryEventLog>,
    pub transport: Arc<ScriptedTransport>,
    pub records: Arc<MockRecordStore>,
    pub cache: Arc<MockCache>,
    pub recompute: Arc<MockRecomputeTrigger>,
    pub commits: Arc<MockCommitSource>,
    pub circuit_store: Arc<InMemoryCircuitStore>,
    pub clock: Arc<dyn Clock>,
    pub settings: PipelineSettings,
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDependencies {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Arc::new(InMemoryQueue::new(clock.clone())),
            event_log: Arc::new(InMemoryEventLog::new()),
            transport: Arc::new(ScriptedTransport::new()),
            records: Arc::new(MockRecordStore::new()),
            cache: Arc::new(MockCache::new()),
            recompute: Arc::new(MockRecomputeTrigger::new()),
            commits: Arc::new(MockCommitSource::new()),
            circuit_store: Arc::new(InMemoryCircuitStore::new()),
            clock,
            settings: test_settings(),
        }
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn mock_commits(mut self, commits: MockCommitSource) -> Self {
        self.commits = Arc::new(commits);
        self
    }

    /// Build a ServerDeps sharing this instance's fakes.
    pub fn server_deps(&self) -> ServerDeps {
        ServerDeps {
            queue: self.queue.clone(),
            event_log: self.event_log.clone(),
            transport: self.transport.clone(),
            records: self.records.clone(),
            cache: self.cache.clone(),
            recompute: self.recompute.clone(),
            commits: self.commits.clone(),
            renderer: Arc::new(ChatMessageRenderer),
            circuit_store: self.circuit_store.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
        }
    }
}
