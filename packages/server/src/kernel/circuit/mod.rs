//! Per-endpoint circuit breaker.
//!
//! ```text
//!            threshold consecutive failures
//!   Closed ─────────────────────────────────► Open
//!     ▲                                         │ cooldown elapsed
//!     │ success                                 ▼
//!     └──────────────────────────────────── HalfOpen ──failure──► Open (cooldown restarts)
//! ```
//!
//! State is keyed by endpoint and kept behind [`CircuitStore`] so several
//! instances of the worker can share it through Postgres.

mod breaker;
mod store;

pub use breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitSnapshot, CircuitState};
pub use store::{CircuitStore, InMemoryCircuitStore, PostgresCircuitStore};
