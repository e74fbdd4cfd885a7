// Webhook Pipeline - Server Core
//
// Inbound webhooks are authenticated, deduplicated against the event log and
// turned into queued jobs. Batch consumers drain the queues and run each job's
// steps behind retries, timeouts and per-endpoint circuit breakers.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
