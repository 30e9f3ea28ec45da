//! The batch rule-document correlator: runs a [`CorrelationRuleDoc`] over a
//! scan's durable event history and produces [`CorrelationResult`]s.

use recon_core::{EngineResult, TypeRegistry};
use recon_store::{EventFilter, EventStore};

use crate::aggregate::{aggregate, apply_analysis, render_headline};
use crate::enrichment::{extract_values, match_values, Enrichment, MatchedEvent};
use crate::result::CorrelationResult;
use crate::rule::{AnalysisStep, Collection, CorrelationRuleDoc, FieldRoot, MatchMethod, MatchRule};

/// Which enrichment walks a rule actually needs, computed once per rule so
/// unused walks are never performed.
#[derive(Debug, Clone, Copy, Default)]
struct EnrichmentNeeds {
    source: bool,
    children: bool,
    entity: bool,
}

fn needs_for_rule(rule: &CorrelationRuleDoc) -> EnrichmentNeeds {
    let mut roots: Vec<FieldRoot> = Vec::new();
    for collection in &rule.collections {
        roots.extend(collection.iter().map(|mr| mr.field.root));
    }
    if let Some(agg) = &rule.aggregation {
        roots.push(agg.field.root);
    }
    for step in &rule.analysis {
        if let AnalysisStep::MatchAllToFirstCollection(spec) = step {
            roots.push(spec.field.root);
        }
    }
    roots.extend(headline_field_roots(&rule.headline));

    let mut needs = EnrichmentNeeds::default();
    for root in roots {
        match root {
            FieldRoot::Source => needs.source = true,
            FieldRoot::Child => needs.children = true,
            FieldRoot::Entity => needs.entity = true,
            FieldRoot::Type | FieldRoot::Module | FieldRoot::Data => {}
        }
    }
    needs
}

/// Parses every `{field.path}` placeholder in a headline template and
/// returns the enrichment roots it references, so `{source.data}`-style
/// headlines trigger the same enrichment walk match-rules would.
fn headline_field_roots(headline: &str) -> Vec<FieldRoot> {
    static PLACEHOLDER: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| regex::Regex::new(r"\{([A-Za-z0-9_.]+)\}").expect("static pattern"));
    re.captures_iter(headline)
        .filter_map(|caps| crate::rule::FieldPath::parse(&caps[1]).ok())
        .map(|field| field.root)
        .collect()
}

/// Only `type`/`module`/`data` under `exact` can be pushed into the store's
/// primary query; everything else (including the primary match-rule
/// itself) is still re-applied in memory, so this is purely an
/// optimization, never a correctness requirement.
fn primary_filter(primary: &MatchRule) -> EventFilter {
    let mut filter = EventFilter::default();
    if primary.method != MatchMethod::Exact {
        return filter;
    }
    match primary.field.root {
        FieldRoot::Type => filter.event_types = Some(primary.values.iter().cloned().collect()),
        FieldRoot::Module => filter.modules = Some(primary.values.iter().cloned().collect()),
        FieldRoot::Data if primary.values.len() == 1 => filter.data = primary.values.first().cloned(),
        _ => {}
    }
    filter
}

pub struct RuleCorrelator<'a> {
    store: &'a EventStore,
    registry: &'a TypeRegistry,
}

impl<'a> RuleCorrelator<'a> {
    pub fn new(store: &'a EventStore, registry: &'a TypeRegistry) -> Self {
        Self { store, registry }
    }

    /// Runs `rule` against `scan_id` and returns one result per surviving
    /// bucket. Disabled rules always return an empty list.
    pub async fn run(&self, scan_id: &str, rule: &CorrelationRuleDoc) -> EngineResult<Vec<CorrelationResult>> {
        if !rule.enabled {
            return Ok(Vec::new());
        }

        let needs = needs_for_rule(rule);
        let mut matched_all = Vec::new();
        for (idx, collection) in rule.collections.iter().enumerate() {
            matched_all.extend(self.resolve_collection(scan_id, idx, collection, needs).await?);
        }

        let buckets = aggregate(matched_all, rule.aggregation.as_ref());
        let buckets = apply_analysis(buckets, &rule.analysis);

        let mut results = Vec::new();
        for bucket in buckets {
            if bucket.events.is_empty() {
                continue;
            }
            let title = render_headline(&rule.headline, &bucket.events[0]);
            let mut hashes: Vec<String> = bucket.events.iter().map(|e| e.event.hash.clone()).collect();
            hashes.sort();
            hashes.dedup();
            results.push(CorrelationResult {
                rule_id: rule.id.clone(),
                title,
                risk: rule.meta.risk,
                event_hashes: hashes,
            });
        }
        Ok(results)
    }

    /// Runs `rule` and persists every surviving result via
    /// `EventStore::store_correlation_result`. The caller is responsible
    /// for confirming the scan is no longer running before calling this.
    pub async fn run_and_store(&self, scan_id: &str, rule: &CorrelationRuleDoc) -> EngineResult<Vec<CorrelationResult>> {
        let results = self.run(scan_id, rule).await?;
        for result in &results {
            self.store
                .store_correlation_result(
                    scan_id,
                    &result.rule_id,
                    &rule.meta.name,
                    &rule.meta.description,
                    result.risk as i16,
                    rule.raw_yaml.as_deref(),
                    &result.title,
                    &result.event_hashes,
                )
                .await?;
        }
        Ok(results)
    }

    async fn resolve_collection(
        &self,
        scan_id: &str,
        idx: usize,
        collection: &Collection,
        needs: EnrichmentNeeds,
    ) -> EngineResult<Vec<MatchedEvent>> {
        let primary = &collection[0];
        let filter = primary_filter(primary);
        let candidates = self.store.query_events(scan_id, &filter).await?;

        let mut matched = Vec::with_capacity(candidates.len());
        'candidates: for event in candidates {
            let enrichment = self.enrich(scan_id, &event, needs).await?;
            let candidate = MatchedEvent { event, collection: idx, enrichment };
            for rule in collection {
                let values = extract_values(&rule.field, &candidate);
                if !match_values(&values, rule.method, &rule.values) {
                    continue 'candidates;
                }
            }
            matched.push(candidate);
        }
        Ok(matched)
    }

    async fn enrich(
        &self,
        scan_id: &str,
        event: &recon_store::StoredEvent,
        needs: EnrichmentNeeds,
    ) -> EngineResult<Enrichment> {
        let mut enrichment = Enrichment::default();
        if needs.source {
            enrichment.source = self.store.sources_all(scan_id, &event.hash).await?;
        }
        if needs.children {
            enrichment.children = self.store.children_direct(scan_id, &event.hash).await?;
        }
        if needs.entity {
            enrichment.entity = self.entity_walk(scan_id, event).await?;
        }
        Ok(enrichment)
    }

    /// Walks parents until an `ENTITY`/`INTERNAL`-classified type is found.
    /// Broader than `EventStore::get_entities`, which stops at `ENTITY`
    /// only: the correlation engine also treats `INTERNAL` types as
    /// enrichment anchors.
    async fn entity_walk(
        &self,
        scan_id: &str,
        event: &recon_store::StoredEvent,
    ) -> EngineResult<Option<recon_store::StoredEvent>> {
        let mut current = event.source_event_hash.clone();
        loop {
            let Some(candidate) = self.store.result_event(scan_id, &current).await? else {
                return Ok(None);
            };
            if self.registry.is_entity_or_internal(&candidate.event_type) {
                return Ok(Some(candidate));
            }
            if candidate.source_event_hash == current {
                return Ok(None);
            }
            current = candidate.source_event_hash.clone();
        }
    }
}
