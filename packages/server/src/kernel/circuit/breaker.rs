use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::store::CircuitStore;
use crate::kernel::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl FromStr for CircuitState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            other => Err(anyhow::anyhow!("unknown circuit state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call
    pub cooldown: Duration,
    /// Failures further apart than this do not count as consecutive
    pub failure_window: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            failure_window: Duration::from_secs(300),
        }
    }
}

/// Persisted breaker state for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_until: Option<DateTime<Utc>>,
}

impl CircuitSnapshot {
    /// Decide whether a call may go through at `now`.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and lets
    /// the call through as the trial. Returns the reopen time when rejected.
    pub fn admit(&self, now: DateTime<Utc>) -> Result<CircuitSnapshot, DateTime<Utc>> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(self.clone()),
            CircuitState::Open => match self.opened_until {
                Some(until) if now < until => Err(until),
                _ => Ok(CircuitSnapshot {
                    state: CircuitState::HalfOpen,
                    ..self.clone()
                }),
            },
        }
    }

    pub fn on_success(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: self.last_failure_at,
            opened_until: None,
        }
    }

    pub fn on_failure(&self, now: DateTime<Utc>, config: &CircuitConfig) -> CircuitSnapshot {
        let reopen_at = now + to_chrono(config.cooldown);

        match self.state {
            CircuitState::HalfOpen | CircuitState::Open => CircuitSnapshot {
                state: CircuitState::Open,
                consecutive_failures: self.consecutive_failures.saturating_add(1),
                last_failure_at: Some(now),
                opened_until: Some(reopen_at),
            },
            CircuitState::Closed => {
                let within_window = self
                    .last_failure_at
                    .map(|last| now - last <= to_chrono(config.failure_window))
                    .unwrap_or(true);
                let failures = if within_window {
                    self.consecutive_failures.saturating_add(1)
                } else {
                    1
                };

                if failures >= config.failure_threshold {
                    CircuitSnapshot {
                        state: CircuitState::Open,
                        consecutive_failures: failures,
                        last_failure_at: Some(now),
                        opened_until: Some(reopen_at),
                    }
                } else {
                    CircuitSnapshot {
                        state: CircuitState::Closed,
                        consecutive_failures: failures,
                        last_failure_at: Some(now),
                        opened_until: None,
                    }
                }
            }
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit open for '{key}' until {retry_at}")]
    Open { key: String, retry_at: DateTime<Utc> },

    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }
}

/// Circuit breaker over a shared [`CircuitStore`].
///
/// Store failures never block a call: an unreadable state is treated as
/// closed and an unwritable transition is logged and dropped.
#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn CircuitStore>,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn CircuitStore>, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Call `f` through the breaker for `key`.
    ///
    /// While the circuit is open `f` is not invoked and `CircuitError::Open`
    /// is returned immediately.
    pub async fn call<T, E, F, Fut>(&self, key: &str, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let current = self.snapshot(key).await;

        let admitted = match current.admit(self.clock.now()) {
            Ok(admitted) => admitted,
            Err(retry_at) => {
                return Err(CircuitError::Open {
                    key: key.to_string(),
                    retry_at,
                })
            }
        };

        if admitted.state != current.state {
            info!(endpoint = %key, "circuit half-open, allowing trial call");
            self.save(key, &admitted).await;
        }

        match f().await {
            Ok(value) => {
                let next = admitted.on_success();
                if next != admitted {
                    if admitted.state != CircuitState::Closed {
                        info!(endpoint = %key, "circuit closed after successful trial call");
                    }
                    self.save(key, &next).await;
                }
                Ok(value)
            }
            Err(error) => {
                let next = self.record_failure(key, &admitted).await;
                if next.state == CircuitState::Open {
                    warn!(
                        endpoint = %key,
                        consecutive_failures = next.consecutive_failures,
                        opened_until = ?next.opened_until,
                        error = %error,
                        "circuit opened"
                    );
                }
                Err(CircuitError::Inner(error))
            }
        }
    }

    /// Current state for `key`; closed when nothing is stored yet.
    pub async fn snapshot(&self, key: &str) -> CircuitSnapshot {
        match self.store.load(key).await {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(e) => {
                warn!(endpoint = %key, error = %e, "failed to load circuit state, assuming closed");
                CircuitSnapshot::default()
            }
        }
    }

    async fn record_failure(&self, key: &str, admitted: &CircuitSnapshot) -> CircuitSnapshot {
        let now = self.clock.now();
        match self.store.record_failure(key, now, &self.config).await {
            Ok(next) => next,
            Err(e) => {
                warn!(endpoint = %key, error = %e, "failed to record circuit failure");
                admitted.on_failure(now, &self.config)
            }
        }
    }

        async fn save(&self, key: &str, snapshot: &CircuitSnapshot) {
        if let Err(e) = self.store.save(key, snapshot).await {
            warn!(endpoint = %key, error = %e, "failed to persist circuit state");
        }
    }
}
