//! Kernel module - pipeline infrastructure and dependencies.

pub mod circuit;
pub mod clock;
pub mod deps;
pub mod event_log;
pub mod github_client;
pub mod queue;
pub mod renderer;
pub mod retry;
pub mod stores;
pub mod test_dependencies;
pub mod traits;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitError, CircuitState, CircuitStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use deps::{ChatWebhookAdapter, ServerDeps};
pub use event_log::{EventCompletion, EventDirection, EventLogEntry, NewEventLogEntry};
pub use queue::QueueMessage;
pub use retry::{is_transient, HttpStatusError, RetryExecutor, RetryOutcome, RetryPolicy};
pub use test_dependencies::TestDependencies;
pub use traits::*;
