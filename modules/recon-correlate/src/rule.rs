//! Rule-document model for the batch correlator: parsing, validation, and
//! the typed shape a YAML rule is reduced to before evaluation.

use recon_core::{EngineError, EngineResult};
use serde::Deserialize;

/// `field ∈ {type, module, data, child.*, source.*, entity.*}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRoot {
    Type,
    Module,
    Data,
    Child,
    Source,
    Entity,
}

/// A parsed `field` reference, e.g. `type` or `child.module`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub root: FieldRoot,
    pub sub: Option<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let (root_str, sub) = match raw.split_once('.') {
            Some((r, s)) => (r, Some(s.to_string())),
            None => (raw, None),
        };
        let root = match root_str {
            "type" => FieldRoot::Type,
            "module" => FieldRoot::Module,
            "data" => FieldRoot::Data,
            "child" => FieldRoot::Child,
            "source" => FieldRoot::Source,
            "entity" => FieldRoot::Entity,
            other => return Err(EngineError::Validation(format!("unknown field root '{other}'"))),
        };
        if matches!(root, FieldRoot::Type | FieldRoot::Module | FieldRoot::Data) && sub.is_some() {
            return Err(EngineError::Validation(format!("field '{raw}' must not be dotted")));
        }
        if matches!(root, FieldRoot::Child | FieldRoot::Source | FieldRoot::Entity) && sub.is_none() {
            return Err(EngineError::Validation(format!(
                "field '{raw}' requires a sub-field, e.g. '{raw}.type'"
            )));
        }
        Ok(FieldPath { root, sub })
    }

    pub fn is_dotted(&self) -> bool {
        self.sub.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Exact,
    Regex,
}

/// One `(field, method, value)` triple. `value` always normalizes to a
/// list even when the rule document wrote a single string.
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub field: FieldPath,
    pub method: MatchMethod,
    pub values: Vec<String>,
}

pub type Collection = Vec<MatchRule>;

fn validate_collection(idx: usize, collection: &Collection) -> EngineResult<()> {
    let Some(first) = collection.first() else {
        return Err(EngineError::Validation(format!("collection {idx} has no match-rules")));
    };
    if first.field.is_dotted() {
        return Err(EngineError::Validation(format!(
            "collection {idx}: first match-rule field must not be dotted"
        )));
    }
    if first.field.root == FieldRoot::Data && first.method == MatchMethod::Regex {
        return Err(EngineError::Validation(format!(
            "collection {idx}: 'data' cannot be the first match-rule's field under 'regex'"
        )));
    }
    if first.field.root == FieldRoot::Module && first.method == MatchMethod::Regex {
        return Err(EngineError::Validation(format!(
            "collection {idx}: 'module' cannot be the first match-rule's field under 'regex'"
        )));
    }
    for rule in collection {
        if rule.field.root == FieldRoot::Module && rule.method == MatchMethod::Regex {
            return Err(EngineError::Validation(format!(
                "collection {idx}: 'module' may never be matched with 'regex'"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AggregationSpec {
    pub field: FieldPath,
}

#[derive(Debug, Clone, Default)]
pub struct ThresholdSpec {
    pub minimum: Option<u64>,
    pub maximum: Option<u64>,
    pub count_unique_only: bool,
}

#[derive(Debug, Clone)]
pub struct OutlierSpec {
    pub maximum_percent: f64,
    pub noisy_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossCollectionMatchMethod {
    Exact,
    Subnet,
    Contains,
}

#[derive(Debug, Clone)]
pub struct MatchAllToFirstCollectionSpec {
    pub field: FieldPath,
    pub match_method: CrossCollectionMatchMethod,
}

#[derive(Debug, Clone)]
pub enum AnalysisStep {
    Threshold(ThresholdSpec),
    Outlier(OutlierSpec),
    FirstCollectionOnly,
    MatchAllToFirstCollection(MatchAllToFirstCollectionSpec),
}

#[derive(Debug, Clone, Default)]
pub struct RuleMeta {
    pub name: String,
    pub description: String,
    pub risk: u8,
    pub author: Option<String>,
    pub url: Option<String>,
}

/// A fully parsed and validated rule document, ready for evaluation.
#[derive(Debug, Clone)]
pub struct CorrelationRuleDoc {
    pub id: String,
    pub version: String,
    pub enabled: bool,
    pub meta: RuleMeta,
    pub collections: Vec<Collection>,
    pub headline: String,
    pub aggregation: Option<AggregationSpec>,
    pub analysis: Vec<AnalysisStep>,
    pub raw_yaml: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValue {
    One(String),
    Many(Vec<String>),
}

impl RawValue {
    fn into_vec(self) -> Vec<String> {
        match self {
            RawValue::One(s) => vec![s],
            RawValue::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMatchRule {
    field: String,
    method: String,
    value: RawValue,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMeta {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    risk: u8,
    author: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAggregation {
    field: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case", deny_unknown_fields)]
enum RawAnalysisStep {
    Threshold {
        minimum: Option<u64>,
        maximum: Option<u64>,
        #[serde(default)]
        count_unique_only: bool,
    },
    Outlier {
        maximum_percent: f64,
        noisy_percent: f64,
    },
    FirstCollectionOnly,
    MatchAllToFirstCollection {
        field: String,
        match_method: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDoc {
    id: Option<String>,
    #[serde(default)]
    version: String,
    #[serde(default = "default_true")]
    enabled: bool,
    meta: Option<RawMeta>,
    collections: Option<Vec<Vec<RawMatchRule>>>,
    headline: Option<String>,
    aggregation: Option<RawAggregation>,
    #[serde(default)]
    analysis: Vec<RawAnalysisStep>,
}

impl CorrelationRuleDoc {
    /// Parses and validates a YAML rule document. Unknown top-level keys,
    /// an unknown analysis method, and the match-rule constraints are all
    /// rejected here, at load time, never discovered mid-evaluation.
    pub fn from_yaml(raw_yaml: &str) -> EngineResult<Self> {
        let raw: RawDoc = serde_yaml::from_str(raw_yaml)
            .map_err(|e| EngineError::Validation(format!("rule parse error: {e}")))?;

        let id = raw.id.ok_or_else(|| EngineError::Validation("rule missing 'id'".to_string()))?;
        let meta_raw = raw.meta.ok_or_else(|| EngineError::Validation("rule missing 'meta'".to_string()))?;
        let collections_raw = raw
            .collections
            .ok_or_else(|| EngineError::Validation("rule missing 'collections'".to_string()))?;
        if collections_raw.is_empty() {
            return Err(EngineError::Validation("rule 'collections' must not be empty".to_string()));
        }
        let headline = raw.headline.ok_or_else(|| EngineError::Validation("rule missing 'headline'".to_string()))?;

        let mut collections = Vec::with_capacity(collections_raw.len());
        for (idx, raw_collection) in collections_raw.into_iter().enumerate() {
            if raw_collection.is_empty() {
                return Err(EngineError::Validation(format!("collection {idx} has no match-rules")));
            }
            let mut parsed = Vec::with_capacity(raw_collection.len());
            for raw_rule in raw_collection {
                let field = FieldPath::parse(&raw_rule.field)?;
                let method = match raw_rule.method.as_str() {
                    "exact" => MatchMethod::Exact,
                    "regex" => MatchMethod::Regex,
                    other => return Err(EngineError::Validation(format!("unknown match method '{other}'"))),
                };
                parsed.push(MatchRule {
                    field,
                    method,
                    values: raw_rule.value.into_vec(),
                });
            }
            validate_collection(idx, &parsed)?;
            collections.push(parsed);
        }

        let aggregation = raw
            .aggregation
            .map(|a| -> EngineResult<AggregationSpec> {
                Ok(AggregationSpec { field: FieldPath::parse(&a.field)? })
            })
            .transpose()?;

        let mut analysis = Vec::with_capacity(raw.analysis.len());
        for step in raw.analysis {
            analysis.push(match step {
                RawAnalysisStep::Threshold { minimum, maximum, count_unique_only } => {
                    AnalysisStep::Threshold(ThresholdSpec { minimum, maximum, count_unique_only })
                }
                RawAnalysisStep::Outlier { maximum_percent, noisy_percent } => {
                    AnalysisStep::Outlier(OutlierSpec { maximum_percent, noisy_percent })
                }
                RawAnalysisStep::FirstCollectionOnly => AnalysisStep::FirstCollectionOnly,
                RawAnalysisStep::MatchAllToFirstCollection { field, match_method } => {
                    let field = FieldPath::parse(&field)?;
                    let match_method = match match_method.as_str() {
                        "exact" => CrossCollectionMatchMethod::Exact,
                        "subnet" => CrossCollectionMatchMethod::Subnet,
                        "contains" => CrossCollectionMatchMethod::Contains,
                        other => {
                            return Err(EngineError::Validation(format!("unknown match_method '{other}'")))
                        }
                    };
                    AnalysisStep::MatchAllToFirstCollection(MatchAllToFirstCollectionSpec { field, match_method })
                }
            });
        }

        Ok(CorrelationRuleDoc {
            id,
            version: raw.version,
            enabled: raw.enabled,
            meta: RuleMeta {
                name: meta_raw.name,
                description: meta_raw.description,
                risk: meta_raw.risk,
                author: meta_raw.author,
                url: meta_raw.url,
            },
            collections,
            headline,
            aggregation,
            analysis,
            raw_yaml: Some(raw_yaml.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
id: rule_one
meta:
  name: "Example rule"
  risk: 40
collections:
  - - field: type
      method: exact
      value: IP_ADDRESS
headline: "Found {data}"
"#;

    #[test]
    fn minimal_rule_parses() {
        let doc = CorrelationRuleDoc::from_yaml(MINIMAL).unwrap();
        assert_eq!(doc.id, "rule_one");
        assert!(doc.enabled);
        assert_eq!(doc.collections.len(), 1);
        assert_eq!(doc.meta.risk, 40);
    }

    #[test]
    fn missing_id_is_rejected() {
        let yaml = MINIMAL.replacen("id: rule_one\n", "", 1);
        let err = CorrelationRuleDoc::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn missing_headline_is_rejected() {
        let yaml = MINIMAL.replace("headline: \"Found {data}\"\n", "");
        assert!(CorrelationRuleDoc::from_yaml(&yaml).is_err());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let yaml = format!("{MINIMAL}\nbogus_key: true\n");
        assert!(CorrelationRuleDoc::from_yaml(&yaml).is_err());
    }

    #[test]
    fn unknown_analysis_method_is_rejected_at_load() {
        let yaml = format!("{MINIMAL}\nanalysis:\n  - method: made_up\n");
        let err = CorrelationRuleDoc::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn dotted_first_match_rule_field_is_rejected() {
        let yaml = r#"
id: r
meta:
  name: n
collections:
  - - field: child.type
      method: exact
      value: X
headline: h
"#;
        assert!(CorrelationRuleDoc::from_yaml(yaml).is_err());
    }

    #[test]
    fn data_with_regex_as_first_match_rule_is_rejected() {
        let yaml = r#"
id: r
meta:
  name: n
collections:
  - - field: data
      method: regex
      value: "abc.*"
headline: h
"#;
        assert!(CorrelationRuleDoc::from_yaml(yaml).is_err());
    }

    #[test]
    fn module_with_regex_anywhere_is_rejected() {
        let yaml = r#"
id: r
meta:
  name: n
collections:
  - - field: type
      method: exact
      value: X
    - field: module
      method: regex
      value: "dns.*"
headline: h
"#;
        assert!(CorrelationRuleDoc::from_yaml(yaml).is_err());
    }

    #[test]
    fn value_list_is_accepted() {
        let yaml = r#"
id: r
meta:
  name: n
collections:
  - - field: type
      method: exact
      value: ["IP_ADDRESS", "IPV6_ADDRESS"]
headline: h
"#;
        let doc = CorrelationRuleDoc::from_yaml(yaml).unwrap();
        assert_eq!(doc.collections[0][0].values.len(), 2);
    }
}
