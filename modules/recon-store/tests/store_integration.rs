//! Integration tests for `EventStore` against a real Postgres instance.
//! Requires `DATABASE_TEST_URL`; tests skip (not fail) when it is unset.

use std::collections::HashSet;

use recon_core::{Event, TypeClassification, TypeRegistry};
use recon_store::{EventFilter, EventStore, LogEntry, SearchQuery, SummaryGroupBy};
use sqlx::PgPool;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_results (
            scan_instance_id  TEXT    NOT NULL,
            hash              TEXT    NOT NULL,
            type              TEXT    NOT NULL,
            generated_ms      BIGINT  NOT NULL,
            confidence        SMALLINT NOT NULL,
            visibility        SMALLINT NOT NULL,
            risk              SMALLINT NOT NULL,
            module            TEXT    NOT NULL,
            data              TEXT    NOT NULL,
            source_event_hash TEXT    NOT NULL,
            false_positive    BOOLEAN NOT NULL DEFAULT false,
            PRIMARY KEY (scan_instance_id, hash)
        )
        "#,
    )
    .execute(&pool)
    .await
    .ok()?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS correlation_results (
            scan_instance_id TEXT  NOT NULL,
            rule_id          TEXT  NOT NULL,
            name             TEXT  NOT NULL,
            description      TEXT  NOT NULL,
            risk             SMALLINT NOT NULL,
            raw_yaml         TEXT,
            title            TEXT  NOT NULL,
            event_hashes     TEXT[] NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .ok()?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_log (
            scan_instance_id TEXT   NOT NULL,
            generated_ms     BIGINT NOT NULL,
            component        TEXT   NOT NULL,
            type             TEXT   NOT NULL,
            message          TEXT   NOT NULL,
            UNIQUE (scan_instance_id, generated_ms, component, type, message)
        )
        "#,
    )
    .execute(&pool)
    .await
    .ok()?;

    sqlx::query("TRUNCATE scan_results, correlation_results, scan_log").execute(&pool).await.ok()?;

    Some(pool)
}

fn child(event_type: &str, data: &str, module: &str, parent: &Event) -> Event {
    Event::child(module, event_type, data, parent).build().unwrap()
}

#[tokio::test]
async fn children_all_accumulates_breadth_first() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let scan_id = "scan-bfs";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();

    let a = child("DOMAIN_NAME", "a.example.com", "dns", &root);
    let b = child("DOMAIN_NAME", "b.example.com", "dns", &root);
    store.store_event(scan_id, &a, None).await.unwrap();
    store.store_event(scan_id, &b, None).await.unwrap();

    let a1 = child("IP_ADDRESS", "1.1.1.1", "dns", &a);
    store.store_event(scan_id, &a1, None).await.unwrap();
    let b1 = child("IP_ADDRESS", "2.2.2.2", "dns", &b);
    store.store_event(scan_id, &b1, None).await.unwrap();

    let all = store.children_all(scan_id, &root.hash).await.unwrap();
    assert_eq!(all.len(), 4);
    // Both second-level domains must appear before either third-level IP:
    // the entire frontier at each depth is accumulated before the next hop.
    let depth_of = |hash: &str| all.iter().position(|e| e.hash == hash).unwrap();
    assert!(depth_of(&a.hash) < depth_of(&a1.hash));
    assert!(depth_of(&b.hash) < depth_of(&a1.hash));
    assert!(depth_of(&a.hash) < depth_of(&b1.hash));
    assert!(depth_of(&b.hash) < depth_of(&b1.hash));
}

#[tokio::test]
async fn query_events_narrows_by_type_and_false_positive() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let scan_id = "scan-query";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();
    let ip = child("IP_ADDRESS", "1.1.1.1", "dns", &root);
    let domain = child("DOMAIN_NAME", "a.example.com", "dns", &root);
    store.store_event(scan_id, &ip, None).await.unwrap();
    store.store_event(scan_id, &domain, None).await.unwrap();
    store.update_false_positive(scan_id, &[ip.hash.clone()], true).await.unwrap();

    let mut types = HashSet::new();
    types.insert("IP_ADDRESS".to_string());
    let filter = EventFilter { event_types: Some(types), filter_false_positive: Some(true), ..Default::default() };
    let rows = store.query_events(scan_id, &filter).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hash, ip.hash);
}

#[tokio::test]
async fn correlation_result_round_trips_through_query_events() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let scan_id = "scan-corr";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();
    let ip = child("IP_ADDRESS", "1.1.1.1", "dns", &root);
    store.store_event(scan_id, &ip, None).await.unwrap();

    store
        .store_correlation_result(scan_id, "rule_one", "Name", "Desc", 50, None, "Title", &[ip.hash.clone()])
        .await
        .unwrap();

    let filter = EventFilter { correlation_id: Some("rule_one".to_string()), ..Default::default() };
    let rows = store.query_events(scan_id, &filter).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hash, ip.hash);
}

#[tokio::test]
async fn search_orders_most_recent_first() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let scan_id = "scan-search";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();
    let first = Event::child("dns", "IP_ADDRESS", "1.1.1.1", &root).generated_at(100.0).build().unwrap();
    let second = Event::child("dns", "IP_ADDRESS", "2.2.2.2", &root).generated_at(200.0).build().unwrap();
    store.store_event(scan_id, &first, None).await.unwrap();
    store.store_event(scan_id, &second, None).await.unwrap();

    let results = store.search(scan_id, &SearchQuery::default()).await.unwrap();
    let ips: Vec<&str> = results.iter().map(|e| e.data.as_str()).collect();
    assert_eq!(ips, vec!["2.2.2.2", "1.1.1.1"], "search orders generated descending, most recent first");
}

#[tokio::test]
async fn result_summary_by_entity_is_capped_and_classified() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let scan_id = "scan-summary";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();
    let domain = child("DOMAIN_NAME", "a.example.com", "dns", &root);
    let ip = child("IP_ADDRESS", "1.1.1.1", "dns", &root);
    store.store_event(scan_id, &domain, None).await.unwrap();
    store.store_event(scan_id, &ip, None).await.unwrap();

    let mut registry = TypeRegistry::new();
    registry.register("DOMAIN_NAME", TypeClassification::Entity);

    let rows = store.result_summary_by(scan_id, SummaryGroupBy::Entity, Some(&registry)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "DOMAIN_NAME");
}

#[tokio::test]
async fn result_event_unique_orders_rarest_first_and_honors_filters() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let scan_id = "scan-unique";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();
    // Three TCP_PORT_OPEN "22" events (one flagged false-positive) and one "80".
    let p1 = child("TCP_PORT_OPEN", "22", "portscan", &root);
    let p2 = child("TCP_PORT_OPEN", "22", "portscan", &p1);
    let p3 = child("TCP_PORT_OPEN", "22", "portscan", &p2);
    let p4 = child("TCP_PORT_OPEN", "80", "portscan", &root);
    store.store_event(scan_id, &p1, None).await.unwrap();
    store.store_event(scan_id, &p2, None).await.unwrap();
    store.store_event(scan_id, &p3, None).await.unwrap();
    store.store_event(scan_id, &p4, None).await.unwrap();
    store.update_false_positive(scan_id, &[p3.hash.clone()], true).await.unwrap();

    let all = store.result_event_unique(scan_id, None, None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].data, "80", "the rarer (data, type) pair sorts first");
    assert_eq!(all[0].count, 1);
    assert_eq!(all[1].data, "22");
    assert_eq!(all[1].count, 3);

    let narrowed = store.result_event_unique(scan_id, Some("TCP_PORT_OPEN"), None).await.unwrap();
    assert_eq!(narrowed.len(), 2);

    let not_flagged = store.result_event_unique(scan_id, None, Some(false)).await.unwrap();
    assert_eq!(not_flagged.iter().find(|r| r.data == "22").unwrap().count, 2);
}

#[tokio::test]
async fn sources_all_batch_assembles_row_and_reverse_maps() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let scan_id = "scan-batch-provenance";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();
    let domain = child("DOMAIN_NAME", "a.example.com", "dns", &root);
    store.store_event(scan_id, &domain, None).await.unwrap();
    let ip_a = child("IP_ADDRESS", "1.1.1.1", "dns", &domain);
    let ip_b = child("IP_ADDRESS", "2.2.2.2", "dns", &domain);
    store.store_event(scan_id, &ip_a, None).await.unwrap();
    store.store_event(scan_id, &ip_b, None).await.unwrap();

    let (rows, reverse) = store
        .sources_all_batch(scan_id, &[ip_a.hash.clone(), ip_b.hash.clone()])
        .await
        .unwrap();

    // Every ancestor of either starting hash (root excluded) is keyed by its own hash.
    assert!(rows.contains_key(&domain.hash));
    assert!(!rows.contains_key(&root.hash), "ROOT itself is excluded from the walk");

    // Both IPs share the same parent, so the reverse map fans out to both children.
    let mut children = reverse.get(&domain.hash).unwrap().clone();
    children.sort();
    let mut expected = vec![ip_a.hash.clone(), ip_b.hash.clone()];
    expected.sort();
    assert_eq!(children, expected);
}

#[tokio::test]
async fn update_false_positive_flags_a_batch_of_hashes_in_one_call() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let scan_id = "scan-bulk-fp";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();
    let a = child("IP_ADDRESS", "1.1.1.1", "dns", &root);
    let b = child("IP_ADDRESS", "2.2.2.2", "dns", &root);
    let c = child("IP_ADDRESS", "3.3.3.3", "dns", &root);
    store.store_event(scan_id, &a, None).await.unwrap();
    store.store_event(scan_id, &b, None).await.unwrap();
    store.store_event(scan_id, &c, None).await.unwrap();

    // A non-alphanumeric hash in the batch is dropped, not fatal.
    store
        .update_false_positive(scan_id, &[a.hash.clone(), b.hash.clone(), "bad-hash!".to_string()], true)
        .await
        .unwrap();

    let flagged = store.query_events(scan_id, &EventFilter { filter_false_positive: Some(true), ..Default::default() }).await.unwrap();
    let mut flagged_hashes: Vec<&str> = flagged.iter().map(|e| e.hash.as_str()).collect();
    flagged_hashes.sort();
    let mut expected = vec![a.hash.as_str(), b.hash.as_str()];
    expected.sort();
    assert_eq!(flagged_hashes, expected);

    // Re-applying the same flag to the same set is a no-op, not an error.
    store.update_false_positive(scan_id, &[a.hash.clone(), b.hash.clone()], true).await.unwrap();
    let flagged_again = store.query_events(scan_id, &EventFilter { filter_false_positive: Some(true), ..Default::default() }).await.unwrap();
    assert_eq!(flagged_again.len(), 2);
}

#[tokio::test]
async fn store_event_truncates_data_when_over_the_byte_cap() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let scan_id = "scan-truncate";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();
    let long = child("RAW_DATA", "0123456789", "dns", &root);
    store.store_event(scan_id, &long, Some(5)).await.unwrap();

    let stored = store.result_event(scan_id, &long.hash).await.unwrap().unwrap();
    assert_eq!(stored.data, "01234");
}

#[tokio::test]
async fn log_events_batch_append_is_idempotent() {
    let Some(pool) = test_pool().await else { return };
    let verify_pool = pool.clone();
    let store = EventStore::new(pool);
    let scan_id = "scan-log";

    let entries = vec![
        LogEntry::new(1_700_000_000_000, "orchestrator", "INFO", "scan started"),
        LogEntry::new(1_700_000_001_000, "dns", "WARN", "rate limited"),
    ];
    store.log_events(scan_id, &entries).await.unwrap();
    // Re-submitting the identical batch must not duplicate rows.
    store.log_events(scan_id, &entries).await.unwrap();

    let rows: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scan_log WHERE scan_instance_id = $1")
        .bind(scan_id)
        .fetch_one(&verify_pool)
        .await
        .unwrap();
    assert_eq!(rows.0, 2, "two distinct entries submitted twice still yield two rows");
}
