//! Row shapes for the event store's backing tables.

use serde::{Deserialize, Serialize};

/// A `scan_results` row: one persisted event, scoped to a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    pub scan_id: String,
    pub hash: String,
    pub event_type: String,
    pub generated_ms: i64,
    pub confidence: i16,
    pub visibility: i16,
    pub risk: i16,
    pub module: String,
    pub data: String,
    pub source_event_hash: String,
    pub false_positive: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(StoredEvent {
            scan_id: row.try_get("scan_instance_id")?,
            hash: row.try_get("hash")?,
            event_type: row.try_get("type")?,
            generated_ms: row.try_get("generated_ms")?,
            confidence: row.try_get("confidence")?,
            visibility: row.try_get("visibility")?,
            risk: row.try_get("risk")?,
            module: row.try_get("module")?,
            data: row.try_get("data")?,
            source_event_hash: row.try_get("source_event_hash")?,
            false_positive: row.try_get("false_positive")?,
        })
    }
}

/// One `(event_type, count, last_seen_ms)` row of `result_summary`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventTypeSummary {
    pub event_type: String,
    pub count: i64,
    pub last_seen_ms: i64,
}

/// One `(data, type, count)` row of `result_event_unique`, the rarest
/// distinct `(data, type)` pairs first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UniqueEventCount {
    pub data: String,
    pub event_type: String,
    pub count: i64,
}

/// One bucket of the hourly/day-of-week activity histogram.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityBucket {
    pub day_of_week: i32,
    pub hour_of_day: i32,
    pub count: i64,
}

/// Filters accepted by `EventStore::search`.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub event_type: Option<String>,
    pub module: Option<String>,
    pub data_contains: Option<String>,
    pub min_risk: Option<i16>,
    pub max_risk: Option<i16>,
    /// Lower bound, auto-detected as seconds or milliseconds (>= 10^12 is
    /// treated as already-milliseconds).
    pub generated_after: Option<i64>,
    pub generated_before: Option<i64>,
}

/// Filters accepted by `EventStore::query_events`, the correlation engine's
/// primary read against the store. Narrowing is applied in-memory rather
/// than pushed into SQL, consistent with `search`'s risk-bound handling.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Option<std::collections::HashSet<String>>,
    pub modules: Option<std::collections::HashSet<String>>,
    pub data: Option<String>,
    pub source_hashes: Option<Vec<String>>,
    /// Restricts the result to events referenced by a prior correlation
    /// result for this rule id.
    pub correlation_id: Option<String>,
    pub filter_false_positive: Option<bool>,
}

/// Grouping key for `EventStore::result_summary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryGroupBy {
    Type,
    Module,
    /// Restricted to `ENTITY`-classified types and capped at 50 rows.
    Entity,
}

/// One row of a `result_summary` read, keyed by whichever grouping was
/// requested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupedSummary {
    pub key: String,
    pub count: i64,
    pub last_seen_ms: i64,
}

/// One entry of a `log_events` batch append. `generated_ms` is the entry's
/// own timestamp (seconds or milliseconds, auto-detected by magnitude like
/// `SearchQuery`'s bounds) rather than the time the batch happens to be
/// flushed, so that re-submitting the same batch after a failed write is a
/// no-op rather than a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub generated_ms: i64,
    pub component: String,
    pub log_type: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(
        generated_ms: i64,
        component: impl Into<String>,
        log_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            generated_ms,
            component: component.into(),
            log_type: log_type.into(),
            message: message.into(),
        }
    }
}
