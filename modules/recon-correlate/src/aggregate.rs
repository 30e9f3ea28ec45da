//! Bucketing and the four analysis methods. Pure functions over
//! `MatchedEvent`s, no store access, fully unit-testable.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use regex::Regex;
use recon_store::StoredEvent;

use crate::enrichment::{extract_values, sub_value, MatchedEvent};
use crate::rule::{
    AggregationSpec, AnalysisStep, CrossCollectionMatchMethod, FieldPath, FieldRoot,
    MatchAllToFirstCollectionSpec, OutlierSpec, ThresholdSpec,
};

/// One aggregation bucket. `key` is `None` only when there is no
/// aggregation spec, in which case every event is its own singleton
/// bucket keyed by hash.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub key: Option<String>,
    pub events: Vec<MatchedEvent>,
}

fn cidr_contains(cidr: &str, ip: IpAddr) -> bool {
    let Some((addr_str, prefix_str)) = cidr.split_once('/') else {
        return false;
    };
    let (Ok(network), Ok(prefix)) = (addr_str.parse::<IpAddr>(), prefix_str.parse::<u32>()) else {
        return false;
    };
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(host)) => {
            if prefix > 32 {
                return false;
            }
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            (u32::from(net) & mask) == (u32::from(host) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(host)) => {
            if prefix > 128 {
                return false;
            }
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            (u128::from(net) & mask) == (u128::from(host) & mask)
        }
        _ => false,
    }
}

fn subnet_match(a: &str, b: &str) -> bool {
    if let Ok(ip) = b.parse::<IpAddr>() {
        if cidr_contains(a, ip) {
            return true;
        }
    }
    if let Ok(ip) = a.parse::<IpAddr>() {
        if cidr_contains(b, ip) {
            return true;
        }
    }
    false
}

fn cross_match(method: CrossCollectionMatchMethod, primary_value: &str, candidate: &str) -> bool {
    match method {
        CrossCollectionMatchMethod::Exact => primary_value == candidate,
        CrossCollectionMatchMethod::Contains => {
            candidate.contains(primary_value) || primary_value.contains(candidate)
        }
        CrossCollectionMatchMethod::Subnet => subnet_match(primary_value, candidate),
    }
}

/// Bucketing needs for an un-dotted aggregation field: plain grouping by
/// the single value every event resolves to.
fn aggregate_direct(events: Vec<MatchedEvent>, spec: &AggregationSpec) -> Vec<Bucket> {
    let mut map: BTreeMap<String, Vec<MatchedEvent>> = BTreeMap::new();
    for event in events {
        let key = extract_values(&spec.field, &event).into_iter().next().unwrap_or_default();
        map.entry(key).or_default().push(event);
    }
    map.into_iter().map(|(key, events)| Bucket { key: Some(key), events }).collect()
}

fn strip_non_matching_siblings(field: &crate::rule::FieldPath, matched: &mut MatchedEvent, value: &str) {
    match field.root {
        FieldRoot::Source => matched
            .enrichment
            .source
            .retain(|e| sub_value(e, field.sub.as_deref()) == value),
        FieldRoot::Child => matched
            .enrichment
            .children
            .retain(|e| sub_value(e, field.sub.as_deref()) == value),
        FieldRoot::Entity => {
            let keep = matched
                .enrichment
                .entity
                .as_ref()
                .map(|e| sub_value(e, field.sub.as_deref()) == value)
                .unwrap_or(false);
            if !keep {
                matched.enrichment.entity = None;
            }
        }
        FieldRoot::Type | FieldRoot::Module | FieldRoot::Data => {}
    }
}

/// Bucketing for a dotted aggregation field: one bucket per distinct
/// sub-event value, each holding a clone of the top-level event with every
/// non-matching sibling sub-event stripped out.
fn aggregate_dotted(events: Vec<MatchedEvent>, spec: &AggregationSpec) -> Vec<Bucket> {
    let mut map: BTreeMap<String, Vec<MatchedEvent>> = BTreeMap::new();
    for event in events {
        let distinct: BTreeSet<String> = extract_values(&spec.field, &event).into_iter().collect();
        for value in distinct {
            let mut clone = event.clone();
            strip_non_matching_siblings(&spec.field, &mut clone, &value);
            map.entry(value.clone()).or_default().push(clone);
        }
    }
    map.into_iter().map(|(key, events)| Bucket { key: Some(key), events }).collect()
}

pub fn aggregate(events: Vec<MatchedEvent>, spec: Option<&AggregationSpec>) -> Vec<Bucket> {
    let Some(spec) = spec else {
        return events
            .into_iter()
            .map(|e| Bucket { key: Some(e.event.hash.clone()), events: vec![e] })
            .collect();
    };
    if spec.field.is_dotted() {
        aggregate_dotted(events, spec)
    } else {
        aggregate_direct(events, spec)
    }
}

fn apply_threshold(buckets: Vec<Bucket>, spec: &ThresholdSpec) -> Vec<Bucket> {
    buckets
        .into_iter()
        .filter(|b| {
            let count = if spec.count_unique_only {
                b.events.iter().map(|e| &e.event.data).collect::<BTreeSet<_>>().len() as u64
            } else {
                b.events.len() as u64
            };
            spec.minimum.map_or(true, |min| count >= min) && spec.maximum.map_or(true, |max| count <= max)
        })
        .collect()
}

/// Keeps buckets whose share of the grand total strictly exceeds
/// `maximum_percent`. If the average share per bucket (`100 / bucket
/// count`) falls below `noisy_percent`, the distribution is considered too
/// flat to be meaningful and every bucket is discarded instead.
fn apply_outlier(buckets: Vec<Bucket>, spec: &OutlierSpec) -> Vec<Bucket> {
    if buckets.is_empty() {
        return buckets;
    }
    let average_percent = 100.0 / buckets.len() as f64;
    if average_percent < spec.noisy_percent {
        return Vec::new();
    }
    let grand_total: usize = buckets.iter().map(|b| b.events.len()).sum();
    if grand_total == 0 {
        return Vec::new();
    }
    buckets
        .into_iter()
        .filter(|b| (b.events.len() as f64 / grand_total as f64 * 100.0) > spec.maximum_percent)
        .collect()
}

/// Keeps only `_collection == 0` events in each bucket, then drops any
/// bucket left empty.
fn apply_first_collection_only(buckets: Vec<Bucket>) -> Vec<Bucket> {
    buckets
        .into_iter()
        .filter_map(|mut bucket| {
            bucket.events.retain(|e| e.collection == 0);
            if bucket.events.is_empty() {
                None
            } else {
                Some(bucket)
            }
        })
        .collect()
}

/// A bucket survives iff it still contains at least one non-primary event
/// whose field matched a primary event's field after filtering.
fn apply_match_all_to_first(buckets: Vec<Bucket>, spec: &MatchAllToFirstCollectionSpec) -> Vec<Bucket> {
    buckets
        .into_iter()
        .filter_map(|bucket| {
            let primary_values: Vec<String> = bucket
                .events
                .iter()
                .filter(|e| e.collection == 0)
                .flat_map(|e| extract_values(&spec.field, e))
                .collect();

            let mut survived_non_primary = false;
            let events: Vec<MatchedEvent> = bucket
                .events
                .into_iter()
                .filter(|e| {
                    if e.collection == 0 {
                        return true;
                    }
                    let values = extract_values(&spec.field, e);
                    let matched = values
                        .iter()
                        .any(|v| primary_values.iter().any(|pv| cross_match(spec.match_method, pv, v)));
                    if matched {
                        survived_non_primary = true;
                    }
                    matched
                })
                .collect();

            if survived_non_primary {
                Some(Bucket { key: bucket.key, events })
            } else {
                None
            }
        })
        .collect()
}

pub fn apply_analysis(buckets: Vec<Bucket>, steps: &[AnalysisStep]) -> Vec<Bucket> {
    let mut buckets = buckets;
    for step in steps {
        buckets = match step {
            AnalysisStep::Threshold(t) => apply_threshold(buckets, t),
            AnalysisStep::Outlier(o) => apply_outlier(buckets, o),
            AnalysisStep::FirstCollectionOnly => apply_first_collection_only(buckets),
            AnalysisStep::MatchAllToFirstCollection(m) => apply_match_all_to_first(buckets, m),
        };
    }
    buckets
}

/// Resolves a headline placeholder against `matched`. Flat fields read the
/// matched event directly; dotted fields (`source.*`, `child.*`,
/// `entity.*`) go through the same `extract_values` enrichment walk the
/// match-rules use, taking the first extracted value.
fn resolve_headline_field(matched: &MatchedEvent, field: &str) -> Option<String> {
    match field {
        "type" => Some(matched.event.event_type.clone()),
        "module" => Some(matched.event.module.clone()),
        "data" => Some(matched.event.data.clone()),
        "hash" => Some(matched.event.hash.clone()),
        "risk" => Some(matched.event.risk.to_string()),
        "confidence" => Some(matched.event.confidence.to_string()),
        "visibility" => Some(matched.event.visibility.to_string()),
        "source_event_hash" => Some(matched.event.source_event_hash.clone()),
        _ if field.contains('.') => {
            let path = FieldPath::parse(field).ok()?;
            extract_values(&path, matched).into_iter().next()
        }
        _ => None,
    }
}

/// Substitutes `{field.path}` placeholders against `matched`, covering the
/// same field vocabulary match-rules do. A placeholder that cannot be
/// resolved is left in the output verbatim rather than aborting the render.
pub fn render_headline(template: &str, matched: &MatchedEvent) -> String {
    let re = Regex::new(r"\{([A-Za-z0-9_.]+)\}").expect("static headline placeholder pattern");
    re.replace_all(template, |caps: &regex::Captures| {
        resolve_headline_field(matched, &caps[1]).unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}
