// Common types used across multiple domains and layers
//
// These types are shared between the kernel and domain layers to avoid
// circular dependencies while maintaining type safety.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One analytics event as produced onto the analytics queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRow {
    pub event_name: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// A row that a store refused during a batch insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    /// Position of the row in the submitted batch
    pub index: usize,
    pub error: String,
}

/// Result of submitting a batch of rows.
///
/// Stores that insert atomically report either every row or an error; stores
/// that fall back to row-level inserts report the rows they refused.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchInsertOutcome {
    pub inserted: u64,
    pub failed: Vec<RowFailure>,
}

impl BatchInsertOutcome {
    pub fn all_inserted(count: usize) -> Self {
        Self {
            inserted: count as u64,
            failed: Vec::new(),
        }
    }
}
