//! Durable queue backed by the pgmq Postgres extension.
//!
//! A read hides messages for the requested visibility timeout. Messages that
//! are not deleted before it expires become visible again with a higher
//! `read_count`, which is how failed work gets retried.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::kernel::{BaseQueue, BaseRecomputeTrigger, ReadOptions};

#[derive(Debug, Clone, Serialize)]
pub struct QueueMessage {
    pub id: i64,
    pub payload: serde_json::Value,
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
}

/// Row shape returned by `pgmq.read`.
#[derive(Debug, FromRow)]
struct PgmqRow {
    msg_id: i64,
    read_ct: i32,
    enqueued_at: DateTime<Utc>,
    vt: DateTime<Utc>,
    message: serde_json::Value,
}

impl From<PgmqRow> for QueueMessage {
    fn from(row: PgmqRow) -> Self {
        Self {
            id: row.msg_id,
            payload: row.message,
            read_count: row.read_ct,
            enqueued_at: row.enqueued_at,
            visible_at: row.vt,
        }
    }
}

pub struct PgmqQueue {
    pool: PgPool,
}

impl PgmqQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn visibility_secs(options: &ReadOptions) -> i32 {
    options.visibility_timeout.as_secs().clamp(1, i32::MAX as u64) as i32
}

#[async_trait]
impl BaseQueue for PgmqQueue {
    async fn read(&self, queue: &str, options: ReadOptions) -> Result<Vec<QueueMessage>> {
        let vt = visibility_secs(&options);
        let qty = options.batch_size.clamp(1, i32::MAX as i64) as i32;

        let result = if options.sleep_seconds == 0 {
            sqlx::query_as::<_, PgmqRow>(
                "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, $3)",
            )
            .bind(queue)
            .bind(vt)
            .bind(qty)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, PgmqRow>(
                "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read_with_poll($1, $2, $3, $4)",
            )
            .bind(queue)
            .bind(vt)
            .bind(qty)
            .bind(options.sleep_seconds.min(i32::MAX as u32) as i32)
            .fetch_all(&self.pool)
            .await
        };
        let rows = result.with_context(|| format!("failed to read from queue {}", queue))?;

        debug!(queue = %queue, count = rows.len(), vt_secs = vt, "read queue batch");
        Ok(rows.into_iter().map(QueueMessage::from).collect())
    }

    async fn delete(&self, queue: &str, message_id: i64) -> Result<bool> {
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1, $2)")
            .bind(queue)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to delete message {} from {}", message_id, queue))?;
        Ok(deleted)
    }

    async fn send(&self, queue: &str, payload: &serde_json::Value) -> Result<i64> {
        let id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2)")
            .bind(queue)
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to send to queue {}", queue))?;
        Ok(id)
    }
}

/// Recompute requests are plain messages on their own queue.
pub struct QueueRecomputeTrigger {
    queue: Arc<dyn BaseQueue>,
    queue_name: String,
}

impl QueueRecomputeTrigger {
    pub fn new(queue: Arc<dyn BaseQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl BaseRecomputeTrigger for QueueRecomputeTrigger {
    async fn trigger(&self, entity_id: &str, reason: &str) -> Result<()> {
        let payload = serde_json::json!({
            "entityId": entity_id,
            "reason": reason,
            "requestedAt": Utc::now(),
        });
        let msg_id = self.queue.send(&self.queue_name, &payload).await?;
        debug!(queue = %self.queue_name, msg_id, entity_id = %entity_id, "recompute requested");
        Ok(())
    }
}
