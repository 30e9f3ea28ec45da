//! The event store: the durable record of a scan's events and the graph
//! walks provenance and correlation are built on.

use std::collections::{HashMap, VecDeque};

use recon_core::{EngineError, EngineResult, Event, TypeRegistry};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{error, warn};

use crate::types::{
    ActivityBucket, EventFilter, EventTypeSummary, GroupedSummary, LogEntry, SearchQuery,
    StoredEvent, SummaryGroupBy, UniqueEventCount,
};

/// A bound >= 10^12 is already milliseconds; anything smaller is seconds.
fn normalize_bound_ms(bound: i64) -> i64 {
    if bound >= 1_000_000_000_000 {
        bound
    } else {
        bound * 1000
    }
}

fn is_valid_hash(hash: &str) -> bool {
    !hash.is_empty() && hash.chars().all(|c| c.is_ascii_alphanumeric())
}

fn to_generated_ms(generated_seconds: f64) -> i64 {
    (generated_seconds * 1000.0).round() as i64
}

/// Truncates `data` to at most `max_bytes` bytes, never splitting a
/// multi-byte UTF-8 character. A non-positive `max_bytes` is a no-op.
fn truncate_data(data: &str, max_bytes: i64) -> String {
    if max_bytes <= 0 || data.len() as i64 <= max_bytes {
        return data.to_string();
    }
    let mut end = max_bytes as usize;
    while end > 0 && !data.is_char_boundary(end) {
        end -= 1;
    }
    data[..end].to_string()
}

/// Append-only, scan-scoped event record backed by Postgres. Every public
/// method is independently safe for concurrent callers: the guarantee
/// comes from pool checkout, not an explicit mutex.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persists `event` under `scan_id`. Unlike `Event::build`, which
    /// allows a missing parent reference for tests/synthetic events,
    /// storage requires a real parent for every non-root event.
    ///
    /// `truncate_size`, if positive, caps `data` to that many bytes before
    /// it is written; non-positive or absent leaves `data` untouched.
    pub async fn store_event(
        &self,
        scan_id: &str,
        event: &Event,
        truncate_size: Option<i64>,
    ) -> EngineResult<()> {
        if !event.is_root() && event.source_event.is_none() {
            return Err(EngineError::Validation(
                "non-root event requires a real parent reference to be stored".to_string(),
            ));
        }

        let generated_ms = to_generated_ms(event.generated);
        let data = match truncate_size {
            Some(max_bytes) => truncate_data(&event.data, max_bytes),
            None => event.data.clone(),
        };

        let mut attempt = 0;
        loop {
            let result = sqlx::query(
                r#"
                INSERT INTO scan_results
                    (scan_instance_id, hash, type, generated_ms, confidence, visibility, risk, module, data, source_event_hash, false_positive)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, false)
                ON CONFLICT (scan_instance_id, hash) DO NOTHING
                "#,
            )
            .bind(scan_id)
            .bind(&event.hash)
            .bind(&event.event_type)
            .bind(generated_ms)
            .bind(event.confidence as i16)
            .bind(event.visibility as i16)
            .bind(event.risk as i16)
            .bind(&event.module)
            .bind(&data)
            .bind(&event.source_hash)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => return Ok(()),
                Err(e) if attempt == 0 => {
                    attempt += 1;
                    warn!(scan = %scan_id, hash = %event.hash, error = %e, "store_event failed, retrying once");
                }
                Err(e) => {
                    error!(scan = %scan_id, hash = %event.hash, error = %e, "store_event failed after retry");
                    return Err(EngineError::Storage(e.to_string()));
                }
            }
        }
    }

    pub async fn result_event(&self, scan_id: &str, hash: &str) -> EngineResult<Option<StoredEvent>> {
        if !is_valid_hash(hash) {
            return Ok(None);
        }
        sqlx::query_as::<_, StoredEvent>(
            r#"SELECT scan_instance_id, hash, type, generated_ms, confidence, visibility, risk, module, data, source_event_hash, false_positive
               FROM scan_results WHERE scan_instance_id = $1 AND hash = $2"#,
        )
        .bind(scan_id)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Distinct `(data, type)` pairs and how often each occurs, rarest
    /// first. `event_type` narrows to a single type; `filter_false_positive`
    /// narrows to (or excludes) flagged events.
    pub async fn result_event_unique(
        &self,
        scan_id: &str,
        event_type: Option<&str>,
        filter_false_positive: Option<bool>,
    ) -> EngineResult<Vec<UniqueEventCount>> {
        let mut sql = String::from(
            "SELECT data, type, COUNT(*) AS count FROM scan_results WHERE scan_instance_id = $1",
        );
        let mut next = 2;
        if event_type.is_some() {
            sql.push_str(&format!(" AND type = ${next}"));
            next += 1;
        }
        if filter_false_positive.is_some() {
            sql.push_str(&format!(" AND false_positive = ${next}"));
            next += 1;
        }
        let _ = next;
        sql.push_str(" GROUP BY type, data ORDER BY count ASC");

        let mut q = sqlx::query_as::<_, (String, String, i64)>(&sql).bind(scan_id);
        if let Some(event_type) = event_type {
            q = q.bind(event_type);
        }
        if let Some(filter_false_positive) = filter_false_positive {
            q = q.bind(filter_false_positive);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(data, event_type, count)| UniqueEventCount { data, event_type, count })
            .collect())
    }

    pub async fn result_summary(&self, scan_id: &str) -> EngineResult<Vec<EventTypeSummary>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"SELECT type, COUNT(*), MAX(generated_ms)
               FROM scan_results WHERE scan_instance_id = $1
               GROUP BY type ORDER BY type ASC"#,
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(event_type, count, last_seen_ms)| EventTypeSummary {
                event_type,
                count,
                last_seen_ms,
            })
            .collect())
    }

    /// Bulk-flags every hash in `hashes` in one statement. Idempotent:
    /// setting the same flag value twice (on the same set, or a subset) has
    /// the same effect as setting it once. Non-alphanumeric hashes are
    /// silently filtered out rather than failing the whole batch, matching
    /// every other hash-accepting method in this store.
    pub async fn update_false_positive(
        &self,
        scan_id: &str,
        hashes: &[String],
        flag: bool,
    ) -> EngineResult<()> {
        let valid: Vec<&String> = hashes.iter().filter(|h| is_valid_hash(h)).collect();
        if valid.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE scan_results SET false_positive = $1 WHERE scan_instance_id = $2 AND hash = ANY($3)",
        )
        .bind(flag)
        .bind(scan_id)
        .bind(valid.into_iter().map(String::as_str).collect::<Vec<_>>())
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Direct (one-hop) parent of `hash`, scan-bounded. A non-alphanumeric
    /// hash is silently filtered out rather than erroring.
    pub async fn sources_direct(&self, scan_id: &str, hash: &str) -> EngineResult<Vec<StoredEvent>> {
        if !is_valid_hash(hash) {
            return Ok(Vec::new());
        }
        let Some(event) = self.result_event(scan_id, hash).await? else {
            return Ok(Vec::new());
        };
        if !is_valid_hash(&event.source_event_hash) {
            return Ok(Vec::new());
        }
        match self.result_event(scan_id, &event.source_event_hash).await? {
            Some(parent) => Ok(vec![parent]),
            None => Ok(Vec::new()),
        }
    }

    /// Direct (one-hop) children of `hash`, scan-bounded.
    pub async fn children_direct(&self, scan_id: &str, hash: &str) -> EngineResult<Vec<StoredEvent>> {
        if !is_valid_hash(hash) {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, StoredEvent>(
            r#"SELECT scan_instance_id, hash, type, generated_ms, confidence, visibility, risk, module, data, source_event_hash, false_positive
               FROM scan_results WHERE scan_instance_id = $1 AND source_event_hash = $2
               ORDER BY data ASC"#,
        )
        .bind(scan_id)
        .bind(hash)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Walks every ancestor up to and including the root, scan-bounded.
    /// Any non-alphanumeric hash encountered mid-walk is silently dropped
    /// and ends that branch.
    pub async fn sources_all(&self, scan_id: &str, hash: &str) -> EngineResult<Vec<StoredEvent>> {
        let mut chain = Vec::new();
        let mut current = hash.to_string();
        loop {
            if !is_valid_hash(&current) || current == recon_core::ROOT_SENTINEL {
                break;
            }
            let Some(event) = self.result_event(scan_id, &current).await? else {
                break;
            };
            let next = event.source_event_hash.clone();
            chain.push(event);
            current = next;
        }
        Ok(chain)
    }

    /// Walks every descendant reachable from `hash`, scan-bounded, breadth
    /// first: the entire newly-discovered frontier is accumulated at each
    /// level before the next hop begins.
    pub async fn children_all(&self, scan_id: &str, hash: &str) -> EngineResult<Vec<StoredEvent>> {
        if !is_valid_hash(hash) {
            return Ok(Vec::new());
        }
        let mut result = Vec::new();
        let mut frontier: VecDeque<String> = VecDeque::from([hash.to_string()]);
        while let Some(current) = frontier.pop_front() {
            let children = self.children_direct(scan_id, &current).await?;
            for child in children {
                frontier.push_back(child.hash.clone());
                result.push(child);
            }
        }
        Ok(result)
    }

    /// Batch form of [`Self::sources_direct`]: one-hop parent of every hash
    /// in `child_hashes`, keyed by the child hash that resolved it.
    pub async fn sources_direct_batch(
        &self,
        scan_id: &str,
        child_hashes: &[String],
    ) -> EngineResult<HashMap<String, StoredEvent>> {
        let mut out = HashMap::with_capacity(child_hashes.len());
        for hash in child_hashes {
            if let Some(parent) = self.sources_direct(scan_id, hash).await?.into_iter().next() {
                out.insert(hash.clone(), parent);
            }
        }
        Ok(out)
    }

    /// Batch form of [`Self::children_direct`]: one-hop children of every
    /// hash in `parent_hashes`, keyed by the parent hash.
    pub async fn children_direct_batch(
        &self,
        scan_id: &str,
        parent_hashes: &[String],
    ) -> EngineResult<HashMap<String, Vec<StoredEvent>>> {
        let mut out = HashMap::with_capacity(parent_hashes.len());
        for hash in parent_hashes {
            out.insert(hash.clone(), self.children_direct(scan_id, hash).await?);
        }
        Ok(out)
    }

    /// Batch form of [`Self::sources_all`]: walks every ancestor chain for
    /// every hash in `child_hashes` and assembles two maps rather than one
    /// flat per-hash chain: `hash -> row` over every event seen in any walk,
    /// and `parent_hash -> [child_hash]`, the reverse of `source_event_hash`,
    /// covering every edge traversed. A thin wrapper over the existing
    /// single-hash walk; each starting hash's chain still excludes `ROOT`.
    pub async fn sources_all_batch(
        &self,
        scan_id: &str,
        child_hashes: &[String],
    ) -> EngineResult<(HashMap<String, StoredEvent>, HashMap<String, Vec<String>>)> {
        let mut rows: HashMap<String, StoredEvent> = HashMap::new();
        let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
        for hash in child_hashes {
            let chain = self.sources_all(scan_id, hash).await?;
            for event in chain {
                let parent = event.source_event_hash.clone();
                let child = event.hash.clone();
                if !rows.contains_key(&child) {
                    rows.insert(child.clone(), event);
                }
                let children = reverse.entry(parent).or_default();
                if !children.contains(&child) {
                    children.push(child);
                }
            }
        }
        Ok((rows, reverse))
    }

    /// Batch form of [`Self::children_all`]: every descendant reachable from
    /// each hash in `parent_hashes`, keyed by that starting hash.
    pub async fn children_all_batch(
        &self,
        scan_id: &str,
        parent_hashes: &[String],
    ) -> EngineResult<HashMap<String, Vec<StoredEvent>>> {
        let mut out = HashMap::with_capacity(parent_hashes.len());
        for hash in parent_hashes {
            out.insert(hash.clone(), self.children_all(scan_id, hash).await?);
        }
        Ok(out)
    }

    /// The correlation engine's primary read: every stored event matching
    /// `filter`, ordered by `data` ascending. Set membership (`event_types`,
    /// `modules`, `source_hashes`) and the false-positive flag are narrowed
    /// in-memory after a single scan-scoped fetch, the same approach
    /// `search` uses for its risk bounds.
    pub async fn query_events(&self, scan_id: &str, filter: &EventFilter) -> EngineResult<Vec<StoredEvent>> {
        let correlation_hashes = match &filter.correlation_id {
            Some(rule_id) => Some(self.correlation_event_hashes(scan_id, rule_id).await?),
            None => None,
        };

        let rows: Vec<StoredEvent> = sqlx::query_as(
            r#"SELECT scan_instance_id, hash, type, generated_ms, confidence, visibility, risk, module, data, source_event_hash, false_positive
               FROM scan_results WHERE scan_instance_id = $1 ORDER BY data ASC"#,
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter(|r| filter.event_types.as_ref().map_or(true, |t| t.contains(&r.event_type)))
            .filter(|r| filter.modules.as_ref().map_or(true, |m| m.contains(&r.module)))
            .filter(|r| filter.data.as_ref().map_or(true, |d| &r.data == d))
            .filter(|r| filter.source_hashes.as_ref().map_or(true, |hs| hs.contains(&r.source_event_hash)))
            .filter(|r| filter.filter_false_positive.map_or(true, |flag| r.false_positive == flag))
            .filter(|r| correlation_hashes.as_ref().map_or(true, |hs| hs.contains(&r.hash)))
            .collect())
    }

    async fn correlation_event_hashes(&self, scan_id: &str, rule_id: &str) -> EngineResult<Vec<String>> {
        let row: Option<(Vec<String>,)> = sqlx::query_as(
            "SELECT event_hashes FROM correlation_results WHERE scan_instance_id = $1 AND rule_id = $2",
        )
        .bind(scan_id)
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(row.map(|(hashes,)| hashes).unwrap_or_default())
    }

    /// Persists one correlation result row. Callers are expected to have
    /// already confirmed the scan is no longer running.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_correlation_result(
        &self,
        scan_id: &str,
        rule_id: &str,
        name: &str,
        description: &str,
        risk: i16,
        raw_yaml: Option<&str>,
        title: &str,
        event_hashes: &[String],
    ) -> EngineResult<()> {
        sqlx::query(
            r#"INSERT INTO correlation_results
                (scan_instance_id, rule_id, name, description, risk, raw_yaml, title, event_hashes)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(scan_id)
        .bind(rule_id)
        .bind(name)
        .bind(description)
        .bind(risk)
        .bind(raw_yaml)
        .bind(title)
        .bind(event_hashes)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Single-hash convenience read: the dict-shaped one-hop parent,
    /// narrower than `sources_direct`'s structured row.
    pub async fn get_sources(&self, scan_id: &str, hash: &str) -> EngineResult<Vec<Value>> {
        Ok(self
            .sources_direct(scan_id, hash)
            .await?
            .into_iter()
            .map(stored_event_to_dict)
            .collect())
    }

    /// Walks parents until an `ENTITY`-classified type is found. Narrower
    /// than the correlation engine's own `ENTITY ∪ INTERNAL` walk.
    pub async fn get_entities(
        &self,
        scan_id: &str,
        hash: &str,
        registry: &TypeRegistry,
    ) -> EngineResult<Vec<Value>> {
        let mut current = hash.to_string();
        loop {
            if !is_valid_hash(&current) {
                return Ok(Vec::new());
            }
            let Some(event) = self.result_event(scan_id, &current).await? else {
                return Ok(Vec::new());
            };
            if registry.is_entity(&event.event_type) {
                return Ok(vec![stored_event_to_dict(event)]);
            }
            if current == event.source_event_hash {
                return Ok(Vec::new());
            }
            current = event.source_event_hash;
        }
    }

    /// Ordered by `generated` descending (most recent first), the
    /// opposite default order from `query_events`/`result_event`.
    pub async fn search(&self, scan_id: &str, query: &SearchQuery) -> EngineResult<Vec<StoredEvent>> {
        let mut sql = String::from(
            r#"SELECT scan_instance_id, hash, type, generated_ms, confidence, visibility, risk, module, data, source_event_hash, false_positive
               FROM scan_results WHERE scan_instance_id = $1"#,
        );
        let mut binds: Vec<String> = Vec::new();
        let mut next = 2;

        if let Some(event_type) = &query.event_type {
            sql.push_str(&format!(" AND type = ${next}"));
            binds.push(event_type.clone());
            next += 1;
        }
        if let Some(module) = &query.module {
            sql.push_str(&format!(" AND module = ${next}"));
            binds.push(module.clone());
            next += 1;
        }
        if let Some(substr) = &query.data_contains {
            sql.push_str(&format!(" AND data ILIKE ${next}"));
            binds.push(format!("%{substr}%"));
            next += 1;
        }
        sql.push_str(" ORDER BY generated_ms DESC");
        let _ = next;

        let mut q = sqlx::query_as::<_, StoredEvent>(&sql).bind(scan_id);
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(|e| EngineError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter(|r| query.min_risk.map_or(true, |min| r.risk >= min))
            .filter(|r| query.max_risk.map_or(true, |max| r.risk <= max))
            .filter(|r| {
                query
                    .generated_after
                    .map_or(true, |bound| r.generated_ms >= normalize_bound_ms(bound))
            })
            .filter(|r| {
                query
                    .generated_before
                    .map_or(true, |bound| r.generated_ms <= normalize_bound_ms(bound))
            })
            .collect())
    }

    /// Aggregation row per grouping key. The `entity` grouping needs a
    /// `TypeRegistry` to classify types and is capped at 50 rows; `type`
    /// and `module` groupings are uncapped.
    pub async fn result_summary_by(
        &self,
        scan_id: &str,
        by: SummaryGroupBy,
        registry: Option<&TypeRegistry>,
    ) -> EngineResult<Vec<GroupedSummary>> {
        match by {
            SummaryGroupBy::Type => Ok(self
                .result_summary(scan_id)
                .await?
                .into_iter()
                .map(|s| GroupedSummary {
                    key: s.event_type,
                    count: s.count,
                    last_seen_ms: s.last_seen_ms,
                })
                .collect()),
            SummaryGroupBy::Module => {
                let rows: Vec<(String, i64, i64)> = sqlx::query_as(
                    r#"SELECT module, COUNT(*), MAX(generated_ms)
                       FROM scan_results WHERE scan_instance_id = $1
                       GROUP BY module ORDER BY module ASC"#,
                )
                .bind(scan_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EngineError::Storage(e.to_string()))?;
                Ok(rows
                    .into_iter()
                    .map(|(key, count, last_seen_ms)| GroupedSummary { key, count, last_seen_ms })
                    .collect())
            }
            SummaryGroupBy::Entity => {
                let registry = registry.ok_or_else(|| {
                    EngineError::Validation("entity grouping requires a type registry".to_string())
                })?;
                let rows: Vec<(String, i64, i64)> = sqlx::query_as(
                    r#"SELECT type, COUNT(*), MAX(generated_ms)
                       FROM scan_results WHERE scan_instance_id = $1
                       GROUP BY type ORDER BY type ASC"#,
                )
                .bind(scan_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EngineError::Storage(e.to_string()))?;
                let mut rows: Vec<GroupedSummary> = rows
                    .into_iter()
                    .filter(|(event_type, _, _)| registry.is_entity(event_type))
                    .map(|(key, count, last_seen_ms)| GroupedSummary { key, count, last_seen_ms })
                    .collect();
                rows.truncate(50);
                Ok(rows)
            }
        }
    }

    /// Appends a batch of scan-log entries in one statement. Idempotent:
    /// `scan_log` carries a `(scan_instance_id, generated_ms, component,
    /// type, message)` uniqueness constraint, so re-submitting the same
    /// batch (e.g. retrying a failed append) inserts nothing the second
    /// time rather than duplicating rows. Each entry's own `generated_ms`
    /// is normalized to milliseconds by magnitude, the same auto-detection
    /// `SearchQuery`'s bounds use.
    pub async fn log_events(&self, scan_id: &str, entries: &[LogEntry]) -> EngineResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut builder = sqlx::QueryBuilder::new(
            "INSERT INTO scan_log (scan_instance_id, generated_ms, component, type, message) ",
        );
        builder.push_values(entries, |mut row, entry| {
            row.push_bind(scan_id)
                .push_bind(normalize_bound_ms(entry.generated_ms))
                .push_bind(&entry.component)
                .push_bind(&entry.log_type)
                .push_bind(&entry.message);
        });
        builder.push(
            " ON CONFLICT (scan_instance_id, generated_ms, component, type, message) DO NOTHING",
        );

        let result = builder.build().execute(&self.pool).await;

        if let Err(e) = result {
            warn!(scan = %scan_id, error = %e, "failed to write scan_log batch");
            return Err(EngineError::Storage(e.to_string()));
        }
        Ok(())
    }

    /// Hourly/day-of-week activity histogram for dashboards.
    pub async fn result_history(&self, scan_id: &str) -> EngineResult<Vec<ActivityBucket>> {
        let rows: Vec<(f64, f64, i64)> = sqlx::query_as(
            r#"SELECT EXTRACT(DOW FROM to_timestamp(generated_ms / 1000.0)),
                      EXTRACT(HOUR FROM to_timestamp(generated_ms / 1000.0)),
                      COUNT(*)
               FROM scan_results WHERE scan_instance_id = $1
               GROUP BY 1, 2 ORDER BY 1, 2"#,
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(dow, hour, count)| ActivityBucket {
                day_of_week: dow as i32,
                hour_of_day: hour as i32,
                count,
            })
            .collect())
    }
}

fn stored_event_to_dict(event: StoredEvent) -> Value {
    json!({
        "hash": event.hash,
        "type": event.event_type,
        "module": event.module,
        "data": event.data,
        "source_event_hash": event.source_event_hash,
        "risk": event.risk,
    })
}

#[cfg(feature = "test-utils")]
impl EventStore {
    pub async fn delete_scan(&self, scan_id: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM scan_results WHERE scan_instance_id = $1")
            .bind(scan_id)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_validation_rejects_non_alphanumeric() {
        assert!(is_valid_hash("abc123"));
        assert!(is_valid_hash(recon_core::ROOT_SENTINEL));
        assert!(!is_valid_hash("abc-123"));
        assert!(!is_valid_hash(""));
    }

    #[test]
    fn generated_ms_rounds_to_nearest_millisecond() {
        assert_eq!(to_generated_ms(1.0005), 1001);
        assert_eq!(to_generated_ms(0.0), 0);
    }

    #[test]
    fn bound_normalization_detects_milliseconds_by_magnitude() {
        assert_eq!(normalize_bound_ms(1_700_000_000), 1_700_000_000_000);
        assert_eq!(normalize_bound_ms(1_700_000_000_000), 1_700_000_000_000);
    }
}
