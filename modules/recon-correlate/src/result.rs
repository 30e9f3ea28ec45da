//! The batch correlator's output shape.

use serde::{Deserialize, Serialize};

/// One surviving bucket from a rule-document run: the rule that fired, the
/// rendered headline, its configured risk, and every contributing event's
/// hash (sorted, deduplicated).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationResult {
    pub rule_id: String,
    pub title: String,
    pub risk: u8,
    pub event_hashes: Vec<String>,
}
