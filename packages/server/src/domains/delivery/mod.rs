//! Outbound delivery to chat/notification webhooks.

pub mod client;
pub mod outcome;

pub use client::{redact_endpoint, DeliveryAttemptError, OutboundDeliveryClient, DELIVERY_SOURCE};
pub use outcome::{DeliveryOutcome, SendOptions};
