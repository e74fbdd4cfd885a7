//! Durable audit trail of every inbound and outbound event attempt.
//!
//! An entry is written before the side effect it describes and finalized
//! exactly once afterwards. Successful entries double as the dedup index:
//! a `(source, related_id, type)` tuple that is already processed is never
//! executed again.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::kernel::BaseEventLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_direction", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventDirection {
    Inbound,
    Outbound,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Uuid,
    pub source: String,
    pub direction: EventDirection,
    #[sqlx(rename = "type")]
    pub event_type: String,
    #[sqlx(rename = "data")]
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    #[sqlx(rename = "http_status_code")]
    pub http_status: Option<i32>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub related_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    /// True once the entry reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Apply a completion to an in-flight entry. Terminal entries are left as is.
    pub fn complete(&mut self, completion: &EventCompletion, at: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.processed = completion.processed;
        self.processed_at = Some(at);
        self.http_status = completion.http_status.map(i32::from);
        self.error = completion.error.clone();
        self.retry_count = completion.retry_count.min(i32::MAX as u32) as i32;
        true
    }
}

/// A pending attempt, recorded with `processed = false`.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewEventLogEntry {
    pub source: String,
    pub direction: EventDirection,
    pub event_type: String,
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,
    #[builder(default, setter(strip_option))]
    pub related_id: Option<String>,
}

/// Terminal status for an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCompletion {
    pub processed: bool,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl EventCompletion {
    pub fn succeeded(http_status: Option<u16>, retry_count: u32) -> Self {
        Self {
            processed: true,
            http_status,
            error: None,
            retry_count,
        }
    }

    pub fn failed(http_status: Option<u16>, error: impl Into<String>, retry_count: u32) -> Self {
        Self {
            processed: false,
            http_status,
            error: Some(error.into()),
            retry_count,
        }
    }
}

pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<EventLogEntry>> {
        let entry = sqlx::query_as::<_, EventLogEntry>("SELECT * FROM event_log WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }
}

#[async_trait]
impl BaseEventLog for PostgresEventLog {
    async fn record_attempt(&self, entry: NewEventLogEntry) -> Result<EventLogEntry> {
        sqlx::query_as::<_, EventLogEntry>(
            r#"
            INSERT INTO event_log (id, source, direction, type, data, related_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&entry.source)
        .bind(entry.direction)
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(&entry.related_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to record event attempt")
    }

    async fn finalize(&self, id: Uuid, completion: EventCompletion) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE event_log
            SET processed = $2,
                processed_at = NOW(),
                http_status_code = $3,
                error = $4,
                retry_count = $5
            WHERE id = $1 AND processed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(completion.processed)
        .bind(completion.http_status.map(i32::from))
        .bind(&completion.error)
        .bind(completion.retry_count.min(i32::MAX as u32) as i32)
        .execute(&self.pool)
        .await
        .context("failed to finalize event")?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_processed(
        &self,
        source: &str,
        related_id: &str,
        event_type: &str,
    ) -> Result<Option<EventLogEntry>> {
        let entry = sqlx::query_as::<_, EventLogEntry>(
            r#"
            SELECT *
            FROM event_log
            WHERE source = $1
              AND related_id = $2
              AND type = $3
              AND processed = true
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(source)
        .bind(related_id)
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }
}
