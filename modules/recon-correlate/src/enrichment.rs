//! Field extraction and match-rule evaluation against a matched, enriched
//! event. Pure and store-independent: the enrichment itself is fetched by
//! `batch.rs`, these functions only read what's already attached.

use regex::Regex;
use recon_store::StoredEvent;

use crate::rule::{FieldPath, FieldRoot, MatchMethod};

/// Parent chain (nearest first, via `sources_all`), one-hop children, and
/// the nearest `ENTITY`/`INTERNAL` ancestor, if any were needed by the
/// rule being evaluated.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub source: Vec<StoredEvent>,
    pub children: Vec<StoredEvent>,
    pub entity: Option<StoredEvent>,
}

/// An event that survived its collection's match-rules, tagged with which
/// collection it belongs to (`_collection` in the rule-document vocabulary).
#[derive(Debug, Clone)]
pub struct MatchedEvent {
    pub event: StoredEvent,
    pub collection: usize,
    pub enrichment: Enrichment,
}

pub fn sub_value(event: &StoredEvent, sub: Option<&str>) -> String {
    match sub {
        Some("type") => event.event_type.clone(),
        Some("module") => event.module.clone(),
        Some("data") => event.data.clone(),
        Some("hash") => event.hash.clone(),
        _ => String::new(),
    }
}

/// Extracts every value `field` resolves to on `matched`. Dotted roots can
/// yield zero, one, or many values depending on how many related events
/// were enriched in.
pub fn extract_values(field: &FieldPath, matched: &MatchedEvent) -> Vec<String> {
    match field.root {
        FieldRoot::Type => vec![matched.event.event_type.clone()],
        FieldRoot::Module => vec![matched.event.module.clone()],
        FieldRoot::Data => vec![matched.event.data.clone()],
        FieldRoot::Source => matched
            .enrichment
            .source
            .iter()
            .map(|e| sub_value(e, field.sub.as_deref()))
            .collect(),
        FieldRoot::Child => matched
            .enrichment
            .children
            .iter()
            .map(|e| sub_value(e, field.sub.as_deref()))
            .collect(),
        FieldRoot::Entity => matched
            .enrichment
            .entity
            .iter()
            .map(|e| sub_value(e, field.sub.as_deref()))
            .collect(),
    }
}

/// `exact` matches if any extracted value equals any rule value; `regex`
/// matches if any extracted value matches any rule value compiled as a
/// pattern. An uncompilable pattern never matches (it is rejected at
/// ruleset-load time in a well-formed deployment, not re-validated here).
pub fn match_values(extracted: &[String], method: MatchMethod, values: &[String]) -> bool {
    match method {
        MatchMethod::Exact => extracted.iter().any(|v| values.iter().any(|mv| mv == v)),
        MatchMethod::Regex => {
            let patterns: Vec<Regex> = values.iter().filter_map(|p| Regex::new(p).ok()).collect();
            extracted.iter().any(|v| patterns.iter().any(|re| re.is_match(v)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::FieldPath;

    fn stored(event_type: &str, module: &str, data: &str, hash: &str) -> StoredEvent {
        StoredEvent {
            scan_id: "scan".to_string(),
            hash: hash.to_string(),
            event_type: event_type.to_string(),
            generated_ms: 0,
            confidence: 100,
            visibility: 100,
            risk: 0,
            module: module.to_string(),
            data: data.to_string(),
            source_event_hash: "ROOT".to_string(),
            false_positive: false,
        }
    }

    #[test]
    fn direct_field_extracts_single_value() {
        let matched = MatchedEvent {
            event: stored("IP_ADDRESS", "dns", "1.1.1.1", "h1"),
            collection: 0,
            enrichment: Enrichment::default(),
        };
        let field = FieldPath::parse("type").unwrap();
        assert_eq!(extract_values(&field, &matched), vec!["IP_ADDRESS".to_string()]);
    }

    #[test]
    fn child_field_extracts_one_value_per_child() {
        let matched = MatchedEvent {
            event: stored("DOMAIN_NAME", "dns", "example.com", "h1"),
            collection: 0,
            enrichment: Enrichment {
                children: vec![
                    stored("IP_ADDRESS", "dns", "1.1.1.1", "c1"),
                    stored("IP_ADDRESS", "dns", "2.2.2.2", "c2"),
                ],
                ..Default::default()
            },
        };
        let field = FieldPath::parse("child.data").unwrap();
        let values = extract_values(&field, &matched);
        assert_eq!(values, vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()]);
    }

    #[test]
    fn exact_match_is_case_sensitive_set_membership() {
        assert!(match_values(&["IP_ADDRESS".to_string()], MatchMethod::Exact, &["IP_ADDRESS".to_string()]));
        assert!(!match_values(&["ip_address".to_string()], MatchMethod::Exact, &["IP_ADDRESS".to_string()]));
    }

    #[test]
    fn regex_match_checks_every_extracted_value() {
        let values = vec!["abc123".to_string(), "zzz".to_string()];
        assert!(match_values(&values, MatchMethod::Regex, &["^abc".to_string()]));
        assert!(!match_values(&values, MatchMethod::Regex, &["^xyz".to_string()]));
    }
}
