use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::breaker::{CircuitConfig, CircuitSnapshot, CircuitState};

/// Storage for breaker state, keyed by endpoint.
///
/// Only the breaker writes through this trait.
#[async_trait]
pub trait CircuitStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<CircuitSnapshot>>;

    async fn save(&self, key: &str, snapshot: &CircuitSnapshot) -> Result<()>;

    /// Apply a failure at `at` to the stored state and return the result.
    ///
    /// Read and write happen as one step, so concurrent failures against the
    /// same key all count.
    async fn record_failure(
        &self,
        key: &str,
        at: DateTime<Utc>,
        config: &CircuitConfig,
    ) -> Result<CircuitSnapshot>;
}

/// Process-local store. Correct only while a single instance runs.
#[derive(Default)]
pub struct InMemoryCircuitStore {
    states: RwLock<HashMap<String, CircuitSnapshot>>,
}

impl InMemoryCircuitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CircuitStore for InMemoryCircuitStore {
    async fn load(&self, key: &str) -> Result<Option<CircuitSnapshot>> {
        Ok(self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn save(&self, key: &str, snapshot: &CircuitSnapshot) -> Result<()> {
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    async fn record_failure(
        &self,
        key: &str,
        at: DateTime<Utc>,
        config: &CircuitConfig,
    ) -> Result<CircuitSnapshot> {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        let entry = states.entry(key.to_string()).or_default();
        *entry = entry.on_failure(at, config);
        Ok(entry.clone())
    }
}

#[derive(Debug, FromRow)]
struct CircuitStateRow {
    state: String,
    consecutive_failures: i32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_until: Option<DateTime<Utc>>,
}

impl TryFrom<CircuitStateRow> for CircuitSnapshot {
    type Error = anyhow::Error;

    fn try_from(row: CircuitStateRow) -> Result<Self> {
        Ok(CircuitSnapshot {
            state: row.state.parse::<CircuitState>()?,
            consecutive_failures: row.consecutive_failures.max(0) as u32,
            last_failure_at: row.last_failure_at,
            opened_until: row.opened_until,
        })
    }
}

/// Shared store in the `circuit_breaker_state` table.
///
/// Plain saves are last-writer-wins. Failures lock the endpoint's row so
/// concurrent workers never lose an increment.
pub struct PostgresCircuitStore {
    pool: PgPool,
}

impl PostgresCircuitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CircuitStore for PostgresCircuitStore {
    async fn load(&self, key: &str) -> Result<Option<CircuitSnapshot>> {
        let row = sqlx::query_as::<_, CircuitStateRow>(
            r#"
            SELECT state, consecutive_failures, last_failure_at, opened_until
            FROM circuit_breaker_state
            WHERE endpoint_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load circuit state")?;

        row.map(CircuitSnapshot::try_from).transpose()
    }

    async fn save(&self, key: &str, snapshot: &CircuitSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO circuit_breaker_state (
                endpoint_key, state, consecutive_failures, last_failure_at, opened_until, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (endpoint_key) DO UPDATE
            SET state = EXCLUDED.state,
                consecutive_failures = EXCLUDED.consecutive_failures,
                last_failure_at = EXCLUDED.last_failure_at,
                opened_until = EXCLUDED.opened_until,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(snapshot.state.as_str())
        .bind(snapshot.consecutive_failures.min(i32::MAX as u32) as i32)
        .bind(snapshot.last_failure_at)
        .bind(snapshot.opened_until)
        .execute(&self.pool)
        .await
        .context("failed to save circuit state")?;

        Ok(())
    }

    async fn record_failure(
        &self,
        key: &str,
        at: DateTime<Utc>,
        config: &CircuitConfig,
    ) -> Result<CircuitSnapshot> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin circuit transaction")?;

        sqlx::query(
            r#"
            INSERT INTO circuit_breaker_state (endpoint_key)
            VALUES ($1)
            ON CONFLICT (endpoint_key) DO NOTHING
            "#,
        )
        .bind(key)
        .execute(&mut *tx)
        .await
        .context("failed to create circuit state")?;

        let row = sqlx::query_as::<_, CircuitStateRow>(
            r#"
            SELECT state, consecutive_failures, last_failure_at, opened_until
            FROM circuit_breaker_state
            WHERE endpoint_key = $1
            FOR UPDATE
            "#,
        )
        .bind(key)
        .fetch_one(&mut *tx)
        .await
        .context("failed to lock circuit state")?;

        let next = CircuitSnapshot::try_from(row)?.on_failure(at, config);

        sqlx::query(
            r#"
            UPDATE circuit_breaker_state
            SET state = $2,
                consecutive_failures = $3,
                last_failure_at = $4,
                opened_until = $5,
                updated_at = NOW()
            WHERE endpoint_key = $1
            "#,
        )
        .bind(key)
        .bind(next.state.as_str())
        .bind(next.consecutive_failures.min(i32::MAX as u32) as i32)
        .bind(next.last_failure_at)
        .bind(next.opened_until)
        .execute(&mut *tx)
        .await
        .context("failed to record circuit failure")?;

        tx.commit().await.context("failed to commit circuit failure")?;

        Ok(next)
    }
}
