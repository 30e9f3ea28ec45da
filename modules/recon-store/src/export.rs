//! Data export: serializes a (optionally filtered) sequence of stored
//! events into one of several registered formats.

use std::collections::{HashMap, HashSet};

use recon_core::{EngineError, EngineResult};
use serde_json::json;

use crate::types::StoredEvent;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub include_metadata: bool,
    pub include_raw: bool,
    pub min_risk: Option<i16>,
    pub max_results: Option<usize>,
    pub event_types: Option<HashSet<String>>,
    pub modules: Option<HashSet<String>>,
    pub pretty: bool,
    pub timestamp_format: Option<String>,
}

/// Applies the fixed filtering order: risk floor, event-type allow-list,
/// module allow-list, raw-type exclusion, `max_results` truncation last,
/// so a result cap never competes with the other filters for which events
/// make the cut.
fn filter_events(events: &[StoredEvent], options: &ExportOptions) -> Vec<StoredEvent> {
    let mut filtered: Vec<StoredEvent> = events.to_vec();

    if let Some(min_risk) = options.min_risk {
        filtered.retain(|e| e.risk >= min_risk);
    }
    if let Some(types) = &options.event_types {
        filtered.retain(|e| types.contains(&e.event_type));
    }
    if let Some(modules) = &options.modules {
        filtered.retain(|e| modules.contains(&e.module));
    }
    if !options.include_raw {
        filtered.retain(|e| !e.event_type.starts_with("RAW_"));
    }
    if let Some(max) = options.max_results {
        filtered.truncate(max);
    }

    filtered
}

pub trait Exporter: Send + Sync {
    fn format_name(&self) -> &str;
    fn file_extension(&self) -> &str;
    fn content_type(&self) -> &str;
    fn export(&self, events: &[StoredEvent], options: &ExportOptions) -> EngineResult<String>;
}

pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn format_name(&self) -> &str {
        "json"
    }
    fn file_extension(&self) -> &str {
        "json"
    }
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn export(&self, events: &[StoredEvent], options: &ExportOptions) -> EngineResult<String> {
        let filtered = filter_events(events, options);
        let values: Vec<_> = filtered
            .iter()
            .map(|e| {
                let mut value = json!({
                    "hash": e.hash,
                    "type": e.event_type,
                    "module": e.module,
                    "data": e.data,
                    "risk": e.risk,
                });
                if options.include_metadata {
                    value["confidence"] = json!(e.confidence);
                    value["visibility"] = json!(e.visibility);
                    value["source_event_hash"] = json!(e.source_event_hash);
                    value["generated_ms"] = json!(e.generated_ms);
                }
                value
            })
            .collect();

        if options.pretty {
            serde_json::to_string_pretty(&values).map_err(|e| EngineError::Storage(e.to_string()))
        } else {
            serde_json::to_string(&values).map_err(|e| EngineError::Storage(e.to_string()))
        }
    }
}

pub struct CsvExporter;

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl Exporter for CsvExporter {
    fn format_name(&self) -> &str {
        "csv"
    }
    fn file_extension(&self) -> &str {
        "csv"
    }
    fn content_type(&self) -> &str {
        "text/csv"
    }

    fn export(&self, events: &[StoredEvent], options: &ExportOptions) -> EngineResult<String> {
        let filtered = filter_events(events, options);
        let mut out = String::from("hash,type,module,data,risk\n");
        for e in &filtered {
            out.push_str(&format!(
                "{},{},{},{},{}\n",
                csv_escape(&e.hash),
                csv_escape(&e.event_type),
                csv_escape(&e.module),
                csv_escape(&e.data),
                e.risk
            ));
        }
        Ok(out)
    }
}

pub struct SummaryExporter;

impl Exporter for SummaryExporter {
    fn format_name(&self) -> &str {
        "summary"
    }
    fn file_extension(&self) -> &str {
        "txt"
    }
    fn content_type(&self) -> &str {
        "text/plain"
    }

    fn export(&self, events: &[StoredEvent], options: &ExportOptions) -> EngineResult<String> {
        let filtered = filter_events(events, options);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for e in &filtered {
            *counts.entry(e.event_type.clone()).or_insert(0) += 1;
        }
        let mut lines: Vec<String> = counts
            .into_iter()
            .map(|(event_type, count)| format!("{event_type}: {count}"))
            .collect();
        lines.sort();
        Ok(format!("total: {}\n{}", filtered.len(), lines.join("\n")))
    }
}

pub struct StixExporter;

impl Exporter for StixExporter {
    fn format_name(&self) -> &str {
        "stix"
    }
    fn file_extension(&self) -> &str {
        "json"
    }
    fn content_type(&self) -> &str {
        "application/stix+json"
    }

    fn export(&self, events: &[StoredEvent], options: &ExportOptions) -> EngineResult<String> {
        let filtered = filter_events(events, options);
        let objects: Vec<_> = filtered
            .iter()
            .map(|e| {
                json!({
                    "type": "indicator",
                    "id": format!("indicator--{}", e.hash),
                    "pattern": format!("[{}:value = '{}']", e.event_type.to_ascii_lowercase(), e.data),
                    "pattern_type": "stix",
                    "labels": [e.event_type],
                })
            })
            .collect();

        let bundle = json!({
            "type": "bundle",
            "id": "bundle--export",
            "objects": objects,
        });

        if options.pretty {
            serde_json::to_string_pretty(&bundle).map_err(|e| EngineError::Storage(e.to_string()))
        } else {
            serde_json::to_string(&bundle).map_err(|e| EngineError::Storage(e.to_string()))
        }
    }
}

/// Named exporter registry. `export` fails with `UnknownFormat` if the
/// name is unregistered.
pub struct ExportRegistry {
    exporters: HashMap<String, Box<dyn Exporter>>,
}

impl Default for ExportRegistry {
    fn default() -> Self {
        let mut registry = Self {
            exporters: HashMap::new(),
        };
        registry.register(Box::new(JsonExporter));
        registry.register(Box::new(CsvExporter));
        registry.register(Box::new(SummaryExporter));
        registry.register(Box::new(StixExporter));
        registry
    }
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self {
            exporters: HashMap::new(),
        }
    }

    pub fn register(&mut self, exporter: Box<dyn Exporter>) {
        self.exporters.insert(exporter.format_name().to_string(), exporter);
    }

    pub fn export(
        &self,
        format_name: &str,
        events: &[StoredEvent],
        options: &ExportOptions,
    ) -> EngineResult<String> {
        let exporter = self
            .exporters
            .get(format_name)
            .ok_or_else(|| EngineError::UnknownFormat(format_name.to_string()))?;
        exporter.export(events, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, risk: i16, module: &str) -> StoredEvent {
        StoredEvent {
            scan_id: "scan1".to_string(),
            hash: format!("hash_{event_type}_{risk}"),
            event_type: event_type.to_string(),
            generated_ms: 0,
            confidence: 100,
            visibility: 100,
            risk,
            module: module.to_string(),
            data: "x".to_string(),
            source_event_hash: "ROOT".to_string(),
            false_positive: false,
        }
    }

    #[test]
    fn min_risk_filters_before_max_results() {
        let events = vec![
            event("IP_ADDRESS", 9, "dns"),
            event("IP_ADDRESS", 2, "dns"),
            event("IP_ADDRESS", 8, "dns"),
        ];
        let options = ExportOptions {
            min_risk: Some(7),
            max_results: Some(1),
            ..Default::default()
        };
        let registry = ExportRegistry::default();
        let out = registry.export("json", &events, &options).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1, "max_results applies last, after risk filter");
        assert_eq!(parsed[0]["risk"], 9);
    }

    #[test]
    fn include_raw_false_excludes_raw_prefixed_types() {
        let events = vec![event("RAW_DNS_RECORD", 0, "dns"), event("IP_ADDRESS", 0, "dns")];
        let options = ExportOptions {
            include_raw: false,
            ..Default::default()
        };
        let registry = ExportRegistry::default();
        let out = registry.export("json", &events, &options).unwrap();
        assert!(!out.contains("RAW_DNS_RECORD"));
        assert!(out.contains("IP_ADDRESS"));
    }

    #[test]
    fn unknown_format_surfaces_typed_error() {
        let registry = ExportRegistry::default();
        let err = registry.export("xml", &[], &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownFormat(ref f) if f == "xml"));
    }

    #[test]
    fn csv_escapes_commas_and_quotes() {
        let mut e = event("IP_ADDRESS", 0, "dns");
        e.data = "a,\"b\"".to_string();
        let registry = ExportRegistry::default();
        let out = registry.export("csv", &[e], &ExportOptions::default()).unwrap();
        assert!(out.contains("\"a,\"\"b\"\"\""));
    }
}
