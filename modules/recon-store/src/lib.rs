//! Postgres-backed durable event store, provenance traversal, and data
//! export for a scan's results.

mod export;
mod store;
mod types;

pub use export::{CsvExporter, ExportOptions, ExportRegistry, Exporter, JsonExporter, StixExporter, SummaryExporter};
pub use store::EventStore;
pub use types::{
    ActivityBucket, EventFilter, EventTypeSummary, GroupedSummary, LogEntry, SearchQuery,
    StoredEvent, SummaryGroupBy, UniqueEventCount,
};
