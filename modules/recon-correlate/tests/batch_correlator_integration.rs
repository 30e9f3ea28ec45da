//! Integration tests for `RuleCorrelator` against a real Postgres instance.
//! Requires `DATABASE_TEST_URL`; tests skip (not fail) when it is unset.

use recon_core::{Event, TypeRegistry};
use recon_correlate::{CorrelationRuleDoc, RuleCorrelator};
use recon_store::EventStore;
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

    sqlx::query("TRUNCATE scan_results, correlation_results").execute(&pool).await.ok()?;

    Some(pool)
}

const THRESHOLD_RULE: &str = r#"
id: many_open_ports
meta:
  name: "Many open ports"
  description: "Flags hosts with more than 2 open ports discovered."
  risk: 40
collections:
  - - field: type
      method: exact
      value: TCP_PORT_OPEN
aggregation:
  field: source.data
analysis:
  - method: threshold
    minimum: 2
headline: "{data}: multiple open ports"
"#;

#[tokio::test]
async fn threshold_rule_fires_on_host_with_enough_ports() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let registry = TypeRegistry::new();
    let scan_id = "scan-correlate";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();

    let host = Event::child("dns", "IP_ADDRESS", "10.0.0.1", &root).build().unwrap();
    store.store_event(scan_id, &host, None).await.unwrap();

    for port in ["22", "80", "443"] {
        let open = Event::child("portscan", "TCP_PORT_OPEN", port, &host).build().unwrap();
        store.store_event(scan_id, &open, None).await.unwrap();
    }

    let rule = CorrelationRuleDoc::from_yaml(THRESHOLD_RULE).unwrap();
    let correlator = RuleCorrelator::new(&store, &registry);
    let results = correlator.run(scan_id, &rule).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].event_hashes.len(), 3);
    assert_eq!(results[0].risk, 40);
}

#[tokio::test]
async fn run_and_store_persists_results_queryable_by_rule_id() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let registry = TypeRegistry::new();
    let scan_id = "scan-correlate-persist";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();
    let host = Event::child("dns", "IP_ADDRESS", "10.0.0.2", &root).build().unwrap();
    store.store_event(scan_id, &host, None).await.unwrap();
    for port in ["22", "80", "8080"] {
        let open = Event::child("portscan", "TCP_PORT_OPEN", port, &host).build().unwrap();
        store.store_event(scan_id, &open, None).await.unwrap();
    }

    let rule = CorrelationRuleDoc::from_yaml(THRESHOLD_RULE).unwrap();
    let correlator = RuleCorrelator::new(&store, &registry);
    let stored = correlator.run_and_store(scan_id, &rule).await.unwrap();
    assert_eq!(stored.len(), 1);

    let filter = recon_store::EventFilter {
        correlation_id: Some("many_open_ports".to_string()),
        ..Default::default()
    };
    let rows = store.query_events(scan_id, &filter).await.unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn disabled_rule_produces_no_results() {
    let Some(pool) = test_pool().await else { return };
    let store = EventStore::new(pool);
    let registry = TypeRegistry::new();
    let scan_id = "scan-correlate-disabled";

    let root = Event::root("example.com");
    store.store_event(scan_id, &root, None).await.unwrap();

    let mut rule = CorrelationRuleDoc::from_yaml(THRESHOLD_RULE).unwrap();
    rule.enabled = false;

    let correlator = RuleCorrelator::new(&store, &registry);
    let results = correlator.run(scan_id, &rule).await.unwrap();
    assert!(results.is_empty());
}
