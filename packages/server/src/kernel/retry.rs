//! Bounded retry with exponential backoff.
//!
//! The executor knows nothing about what it is retrying. Callers supply the
//! operation and a predicate that says whether a given error is worth another
//! attempt; everything else (4xx, decode errors) surfaces after one try.
//!
//! ```text
//! attempt 0 ──fail──► sleep(base × 2^0) ──► attempt 1 ──fail──► sleep(base × 2^1) ──► ...
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Retry policy: how many extra attempts and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each following retry
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based): `base × 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Final result of a retried operation plus how many retries it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Retries performed (0 when the first attempt was terminal)
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. `op` receives the 0-based attempt index.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut retry_count = 0;

        loop {
            match op(retry_count).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        retry_count,
                    }
                }
                Err(error) => {
                    if retry_count >= self.policy.max_retries || !is_retryable(&error) {
                        return RetryOutcome {
                            result: Err(error),
                            retry_count,
                        };
                    }

                    let delay = self.policy.delay_for(retry_count);
                    debug!(
                        attempt = retry_count + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
            }
        }
    }
}

/// An upstream answered with a non-success HTTP status.
#[derive(Debug, thiserror::Error)]
#[error("upstream returned HTTP {status}")]
pub struct HttpStatusError {
    pub status: u16,
}

/// Classify an error from an upstream call.
///
/// Timeouts, connection failures and 5xx are transient. 4xx is not. Errors we
/// cannot classify are treated as transient; the retry ceiling bounds the cost.
pub fn is_transient(error: &anyhow::Error) -> bool {
    if let Some(status) = error.downcast_ref::<HttpStatusError>() {
        return status.status >= 500;
    }
    if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return true;
    }
    if let Some(e) = error.downcast_ref::<reqwest::Error>() {
        if let Some(status) = e.status() {
            return status.is_server_error();
        }
        return e.is_timeout() || e.is_connect() || e.is_request();
    }
    true
}
