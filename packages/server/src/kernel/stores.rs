//! Postgres adapters for the record store and cache seams.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::common::utils::short_payload_hash;
use crate::common::{AnalyticsRow, BatchInsertOutcome};
use crate::kernel::{BaseCache, BaseRecordStore};

/// Webhook URLs embed their credentials, so only a hash of the endpoint is stored.
fn endpoint_key(endpoint: &str) -> String {
    short_payload_hash(endpoint.as_bytes())
}

pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseRecordStore for PostgresRecordStore {
    async fn upsert_record(&self, collection: &str, entity_id: &str, payload: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_records (collection, entity_id, payload, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (collection, entity_id) DO UPDATE
            SET payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(entity_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert {} record {}", collection, entity_id))?;

        Ok(())
    }

    async fn find_message_ref(&self, entity_id: &str, endpoint: &str) -> Result<Option<String>> {
        let message_id: Option<String> = sqlx::query_scalar(
            "SELECT message_id FROM chat_message_refs WHERE entity_id = $1 AND endpoint_key = $2",
        )
        .bind(entity_id)
        .bind(endpoint_key(endpoint))
        .fetch_optional(&self.pool)
        .await?;

        Ok(message_id)
    }

    async fn save_message_ref(&self, entity_id: &str, endpoint: &str, message_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_message_refs (entity_id, endpoint_key, message_id, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (entity_id, endpoint_key) DO UPDATE
            SET message_id = EXCLUDED.message_id,
                updated_at = NOW()
            "#,
        )
        .bind(entity_id)
        .bind(endpoint_key(endpoint))
        .bind(message_id)
        .execute(&self.pool)
        .await
        .context("failed to save chat message reference")?;

        Ok(())
    }

    /// One INSERT over unnested arrays: either every row lands or none does.
    async fn insert_analytics_batch(&self, rows: &[AnalyticsRow]) -> Result<BatchInsertOutcome> {
        if rows.is_empty() {
            return Ok(BatchInsertOutcome::default());
        }

        let names: Vec<String> = rows.iter().map(|r| r.event_name.clone()).collect();
        let entities: Vec<Option<String>> = rows.iter().map(|r| r.entity_id.clone()).collect();
        let properties: Vec<Value> = rows.iter().map(|r| r.properties.clone()).collect();
        let occurred: Vec<DateTime<Utc>> = rows.iter().map(|r| r.occurred_at).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO analytics_events (event_name, entity_id, properties, occurred_at)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::jsonb[], $4::timestamptz[])
            "#,
        )
        .bind(&names)
        .bind(&entities)
        .bind(&properties)
        .bind(&occurred)
        .execute(&self.pool)
        .await
        .context("failed to insert analytics batch")?;

        Ok(BatchInsertOutcome {
            inserted: result.rows_affected(),
            failed: Vec::new(),
        })
    }
}

pub struct PostgresCache {
    pool: PgPool,
}

impl PostgresCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseCache for PostgresCache {
    async fn invalidate(&self, key: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE cache_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to invalidate cache key {}", key))?;

        tracing::debug!(cache_key = %key, removed = result.rows_affected(), "cache invalidated");
        Ok(())
    }
}
