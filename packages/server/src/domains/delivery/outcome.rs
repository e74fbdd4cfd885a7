use serde::Serialize;
use serde_json::Value;

/// Result of delivering one payload to an outbound endpoint.
///
/// `Deleted` is not an error: the message we tried to edit is gone and the
/// caller decides whether to create a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered {
        status: u16,
        retry_count: u32,
        resource_id: Option<String>,
    },
    Deleted {
        retry_count: u32,
    },
    Failed {
        status: Option<u16>,
        error: String,
        retry_count: u32,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn retry_count(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { retry_count, .. }
            | DeliveryOutcome::Deleted { retry_count }
            | DeliveryOutcome::Failed { retry_count, .. } => *retry_count,
        }
    }

    pub fn resource_id(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered { resource_id, .. } => resource_id.as_deref(),
            _ => None,
        }
    }
}

/// Extra context stored with the outbound event log entry.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Logical id the delivery is about (entity id, upstream event id)
    pub related_id: Option<String>,
    pub metadata: Option<Value>,
}

impl SendOptions {
    pub fn related_to(related_id: impl Into<String>) -> Self {
        Self {
            related_id: Some(related_id.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
