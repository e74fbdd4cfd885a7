use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

use crate::kernel::circuit::CircuitConfig;
use crate::kernel::retry::RetryPolicy;

/// Where circuit breaker state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStoreKind {
    /// Shared table, correct with more than one instance
    Postgres,
    /// Process-local, only correct for a single instance
    Memory,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub job_queue_name: String,
    pub analytics_queue_name: String,
    pub recompute_queue_name: String,
    pub batch_size: i64,
    pub visibility_timeout_secs: u64,
    pub chat_webhook_url: Option<String>,
    pub github_webhook_secret: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub generic_webhook_secret: Option<String>,
    pub github_token: Option<String>,
    pub delivery_max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub http_timeout_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub breaker_failure_window_secs: u64,
    pub breaker_store: BreakerStoreKind,
    pub drain_trigger_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: parse_or("PORT", 8080)?,
            job_queue_name: env::var("JOB_QUEUE_NAME")
                .unwrap_or_else(|_| "pipeline_jobs".to_string()),
            analytics_queue_name: env::var("ANALYTICS_QUEUE_NAME")
                .unwrap_or_else(|_| "analytics_events".to_string()),
            recompute_queue_name: env::var("RECOMPUTE_QUEUE_NAME")
                .unwrap_or_else(|_| "recompute_requests".to_string()),
            batch_size: parse_or("BATCH_SIZE", 50)?,
            visibility_timeout_secs: parse_or("VISIBILITY_TIMEOUT_SECS", 300)?,
            chat_webhook_url: optional("CHAT_WEBHOOK_URL"),
            github_webhook_secret: optional("GITHUB_WEBHOOK_SECRET"),
            slack_signing_secret: optional("SLACK_SIGNING_SECRET"),
            generic_webhook_secret: optional("GENERIC_WEBHOOK_SECRET"),
            github_token: optional("GITHUB_TOKEN"),
            delivery_max_retries: parse_or("DELIVERY_MAX_RETRIES", 3)?,
            retry_base_delay_ms: parse_or("RETRY_BASE_DELAY_MS", 500)?,
            http_timeout_ms: parse_or("HTTP_TIMEOUT_MS", 10_000)?,
            breaker_failure_threshold: parse_or("BREAKER_FAILURE_THRESHOLD", 5)?,
            breaker_cooldown_secs: parse_or("BREAKER_COOLDOWN_SECS", 60)?,
            breaker_failure_window_secs: parse_or("BREAKER_FAILURE_WINDOW_SECS", 300)?,
            breaker_store: match env::var("BREAKER_STORE")
                .unwrap_or_else(|_| "postgres".to_string())
                .as_str()
            {
                "memory" => BreakerStoreKind::Memory,
                "postgres" => BreakerStoreKind::Postgres,
                other => anyhow::bail!("BREAKER_STORE must be 'postgres' or 'memory', got '{}'", other),
            },
            drain_trigger_secret: optional("DRAIN_TRIGGER_SECRET"),
        })
    }

    /// Settings the pipeline components read at run time.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            job_queue_name: self.job_queue_name.clone(),
            analytics_queue_name: self.analytics_queue_name.clone(),
            recompute_queue_name: self.recompute_queue_name.clone(),
            batch_size: self.batch_size,
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            chat_webhook_url: self.chat_webhook_url.clone(),
            secrets: WebhookSecrets {
                github: self.github_webhook_secret.clone(),
                slack: self.slack_signing_secret.clone(),
                generic: self.generic_webhook_secret.clone(),
            },
            retry_policy: RetryPolicy::new(
                self.delivery_max_retries,
                Duration::from_millis(self.retry_base_delay_ms),
            ),
            http_timeout: Duration::from_millis(self.http_timeout_ms),
            circuit: CircuitConfig {
                failure_threshold: self.breaker_failure_threshold,
                cooldown: Duration::from_secs(self.breaker_cooldown_secs),
                failure_window: Duration::from_secs(self.breaker_failure_window_secs),
            },
        }
    }
}

/// Shared secrets for inbound webhook sources. A missing secret rejects the source.
#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    pub github: Option<String>,
    pub slack: Option<String>,
    pub generic: Option<String>,
}

/// Runtime settings for the pipeline, detached from the environment.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub job_queue_name: String,
    pub analytics_queue_name: String,
    pub recompute_queue_name: String,
    /// Requested batch size; clamped to the queue's bounds when used
    pub batch_size: i64,
    pub visibility_timeout: Duration,
    pub chat_webhook_url: Option<String>,
    pub secrets: WebhookSecrets,
    pub retry_policy: RetryPolicy,
    pub http_timeout: Duration,
    pub circuit: CircuitConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            job_queue_name: "pipeline_jobs".to_string(),
            analytics_queue_name: "analytics_events".to_string(),
            recompute_queue_name: "recompute_requests".to_string(),
            batch_size: 50,
            visibility_timeout: Duration::from_secs(300),
            chat_webhook_url: None,
            secrets: WebhookSecrets::default(),
            retry_policy: RetryPolicy::default(),
            http_timeout: Duration::from_secs(10),
            circuit: CircuitConfig::default(),
        }
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}
