//! Inbound webhook intake: authenticate, dedup, route to the job queue.

pub mod error;
pub mod event;
pub mod ingestor;
pub mod routing;
pub mod signature;
pub mod source;
pub mod webhook;

pub use error::IngestError;
pub use event::{parse_event, InboundEvent};
pub use ingestor::{InboundWebhookIngestor, IngestReceipt};
pub use routing::route_event;
pub use signature::{sign, verify_signature};
pub use source::WebhookSource;
pub use webhook::{router, WebhookState};
